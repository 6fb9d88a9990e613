#![no_main]
use libfuzzer_sys::{fuzz_target, arbitrary::{Arbitrary, Unstructured}};
use specstore::lc2::codec;

#[derive(Debug, Arbitrary)]
struct Line {
    count: u16,
    stream: Vec<u8>,
}

// Decoding arbitrary bytes must fail cleanly or yield a line that
// re-encodes to something decoding to the same samples
fuzz_target!(|input: &[u8]| {
    let mut u = Unstructured::new(input);
    let line: Line = match u.arbitrary() {
        Ok(line) => line,
        Err(_) => return,
    };

    let Ok(samples) = codec::decode(&line.stream, line.count as usize) else {
        return;
    };
    assert_eq!(samples.len(), line.count as usize);

    let encoded = codec::encode(&samples);
    assert!(encoded.len() <= codec::worst_case_bound(samples.len()));
    assert_eq!(codec::decode(&encoded, samples.len()).unwrap(), samples);
});
