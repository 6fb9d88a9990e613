//! Property-based tests for the LC2 line codec
//!
//! Uses proptest to check that every line survives encode/decode and that
//! encoded lines never exceed the worst-case bound.

use proptest::prelude::*;
use specstore::lc2::codec::{decode, encode, worst_case_bound, zigzag_decode, zigzag_encode};

/// Spectra-like lines: long zero stretches, small counts, rare large values
fn spectrum_line() -> impl Strategy<Value = Vec<i32>> {
    prop::collection::vec(
        prop_oneof![
            6 => Just(0i32),
            4 => 0i32..8,
            2 => -300i32..300,
            1 => any::<i32>(),
        ],
        0..600,
    )
}

proptest! {
    #[test]
    fn prop_round_trip_any_values(line in prop::collection::vec(any::<i32>(), 0..300)) {
        let encoded = encode(&line);
        let decoded = decode(&encoded, line.len()).unwrap();
        prop_assert_eq!(decoded, line);
    }

    #[test]
    fn prop_round_trip_spectra(line in spectrum_line()) {
        let encoded = encode(&line);
        prop_assert_eq!(decode(&encoded, line.len()).unwrap(), line);
    }

    #[test]
    fn prop_encoded_size_within_bound(line in prop::collection::vec(any::<i32>(), 0..300)) {
        prop_assert!(encode(&line).len() <= worst_case_bound(line.len()));
    }

    #[test]
    fn prop_runs_compress(value in -1000i32..1000, len in 40usize..2000) {
        let line = vec![value; len];
        let encoded = encode(&line);
        prop_assert!(encoded.len() <= 16, "{} samples took {} bytes", len, encoded.len());
        prop_assert_eq!(decode(&encoded, len).unwrap(), line);
    }

    #[test]
    fn prop_wrong_count_is_rejected(line in prop::collection::vec(1i32..1000, 1..100)) {
        let encoded = encode(&line);
        // One fewer sample leaves trailing bytes or overruns a token
        prop_assert!(decode(&encoded, line.len() - 1).is_err());
    }

    #[test]
    fn prop_zigzag_inverse(v in any::<i32>()) {
        prop_assert_eq!(zigzag_decode(zigzag_encode(v)), v);
    }
}
