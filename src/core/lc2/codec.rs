//! LC2 line compression
//!
//! A line is coded as a sequence of control bytes, each describing the next
//! one, two, three or several samples as zig-zag deltas from the previous
//! sample (the first delta is taken from 0). All arithmetic wraps at 32 bits.
//!
//! ```text
//! 00aabbcc            three deltas, 2 bits each
//! 01aaabbb            two deltas, 3 bits each
//! 10nnnnnn [ext]      one delta, value n
//! 11nnnnnn [ext]      run: one sample with delta (n & 1), then
//!                     (n >> 1) + 3 copies of it
//! ```
//!
//! When the 6-bit field is above 59 it announces `field - 59` extension
//! bytes (1 to 4) holding a bijective base-256 number `Σ (b[i] + 1)·256^i`,
//! little-endian, which is added to 59. Every value therefore has exactly
//! one encoding.

use crate::error::{MatrixError, Result};

const WIDE: u8 = 0x80;
const PAIR_OR_RUN: u8 = 0x40;
const FIELD_MASK: u8 = 0x3f;

/// Largest value stored directly in the 6-bit field
pub const MAX_INLINE: u32 = 59;

/// Samples a run token must cover to be worth emitting
pub const MIN_RUN: usize = 4;

/// Longest run whose count still fits the 32-bit field
const MAX_RUN_REPEATS: usize = (u32::MAX >> 1) as usize + 3;

#[inline]
pub fn zigzag_encode(v: i32) -> u32 {
    ((v << 1) ^ (v >> 31)) as u32
}

#[inline]
pub fn zigzag_decode(n: u32) -> i32 {
    ((n >> 1) as i32) ^ -((n & 1) as i32)
}

/// Upper bound on the encoded size of `columns` samples
pub fn worst_case_bound(columns: usize) -> usize {
    columns * 5
}

/// Encode one line
pub fn encode(samples: &[i32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() + 8);
    encode_into(samples, &mut out);
    out
}

/// Encode one line into `out`, replacing its contents
pub fn encode_into(samples: &[i32], out: &mut Vec<u8>) {
    out.clear();
    let n = samples.len();
    let mut last = 0i32;
    let mut i = 0;

    while i < n {
        let z0 = zigzag_encode(samples[i].wrapping_sub(last));

        if z0 <= 1 {
            let value = samples[i];
            let same = samples[i + 1..]
                .iter()
                .take(MAX_RUN_REPEATS)
                .take_while(|&&s| s == value)
                .count();
            if same + 1 >= MIN_RUN {
                let field = (((same - 3) as u32) << 1) | z0;
                push_wide(out, WIDE | PAIR_OR_RUN, field);
                last = value;
                i += same + 1;
                continue;
            }
        }

        if i + 3 <= n {
            let z1 = zigzag_encode(samples[i + 1].wrapping_sub(samples[i]));
            let z2 = zigzag_encode(samples[i + 2].wrapping_sub(samples[i + 1]));
            if z0 < 4 && z1 < 4 && z2 < 4 {
                out.push(((z0 << 4) | (z1 << 2) | z2) as u8);
                last = samples[i + 2];
                i += 3;
                continue;
            }
        }

        if i + 2 <= n {
            let z1 = zigzag_encode(samples[i + 1].wrapping_sub(samples[i]));
            if z0 < 8 && z1 < 8 {
                out.push(PAIR_OR_RUN | ((z0 << 3) | z1) as u8);
                last = samples[i + 1];
                i += 2;
                continue;
            }
        }

        push_wide(out, WIDE, z0);
        last = samples[i];
        i += 1;
    }
}

fn push_wide(out: &mut Vec<u8>, flags: u8, value: u32) {
    if value <= MAX_INLINE {
        out.push(flags | value as u8);
        return;
    }
    let mark = out.len();
    out.push(0);
    let mut rest = (value - MAX_INLINE) as u64;
    let mut extra = 0u8;
    while rest > 0 {
        rest -= 1;
        out.push((rest & 0xff) as u8);
        rest >>= 8;
        extra += 1;
    }
    out[mark] = flags | (MAX_INLINE as u8 + extra);
}

/// Decode exactly `count` samples
pub fn decode(data: &[u8], count: usize) -> Result<Vec<i32>> {
    let mut out = vec![0i32; count];
    decode_into(data, &mut out)?;
    Ok(out)
}

/// Decode a line filling all of `out`; the stream must end exactly there
pub fn decode_into(data: &[u8], out: &mut [i32]) -> Result<()> {
    let total = out.len();
    let mut pos = 0usize;
    let mut filled = 0usize;
    let mut last = 0i32;

    while filled < total {
        let Some(&t) = data.get(pos) else {
            return Err(MatrixError::corrupt(format!(
                "stream ends after {} of {} samples",
                filled, total
            )));
        };
        pos += 1;
        let room = total - filled;

        if t & WIDE != 0 {
            let field = read_field(data, &mut pos, t & FIELD_MASK)?;
            if t & PAIR_OR_RUN != 0 {
                let len = (field >> 1) as u64 + 4;
                if len > room as u64 {
                    return Err(overrun(len, filled, total));
                }
                last = last.wrapping_add(zigzag_decode(field & 1));
                out[filled..filled + len as usize].fill(last);
                filled += len as usize;
            } else {
                last = last.wrapping_add(zigzag_decode(field));
                out[filled] = last;
                filled += 1;
            }
        } else if t & PAIR_OR_RUN != 0 {
            if room < 2 {
                return Err(overrun(2, filled, total));
            }
            for shift in [3, 0] {
                last = last.wrapping_add(zigzag_decode(((t >> shift) & 0x07) as u32));
                out[filled] = last;
                filled += 1;
            }
        } else {
            if room < 3 {
                return Err(overrun(3, filled, total));
            }
            for shift in [4, 2, 0] {
                last = last.wrapping_add(zigzag_decode(((t >> shift) & 0x03) as u32));
                out[filled] = last;
                filled += 1;
            }
        }
    }

    if pos != data.len() {
        return Err(MatrixError::corrupt(format!(
            "{} trailing bytes after {} samples",
            data.len() - pos,
            total
        )));
    }
    Ok(())
}

fn read_field(data: &[u8], pos: &mut usize, field: u8) -> Result<u32> {
    let field = field as u32;
    if field <= MAX_INLINE {
        return Ok(field);
    }
    let extra = (field - MAX_INLINE) as usize;
    let bytes = data
        .get(*pos..*pos + extra)
        .ok_or_else(|| MatrixError::corrupt("truncated escape sequence"))?;
    *pos += extra;

    let mut value = 0u64;
    for (i, &b) in bytes.iter().enumerate() {
        value += (b as u64 + 1) << (8 * i);
    }
    u32::try_from(value + MAX_INLINE as u64)
        .map_err(|_| MatrixError::corrupt("escape value exceeds 32 bits"))
}

fn overrun(len: u64, filled: usize, total: usize) -> MatrixError {
    MatrixError::corrupt(format!(
        "token of {} samples at {} overruns line of {}",
        len, filled, total
    ))
}
