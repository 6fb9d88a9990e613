//! Heuristic detection of headerless files
//!
//! Every raw layout whose width divides the file size is decoded over a
//! leading window. Layouts that produce implausible numbers are dropped;
//! of the rest, the one giving the smoothest sequence wins, since real
//! spectra vary slowly from channel to channel while a wrong byte order or
//! width produces noise.

use super::raw::{Encoding, RawLayout};
use super::{Detected, Dimensions, FormatId};
use crate::access::AccessMethod;
use crate::error::Result;
use tracing::{debug, trace};

/// Candidates in tie-break order
const CANDIDATES: [FormatId; 8] = [
    FormatId::Le2,
    FormatId::Le4,
    FormatId::Lf4,
    FormatId::Lf8,
    FormatId::Be2,
    FormatId::Be4,
    FormatId::Bf4,
    FormatId::Bf8,
];

const MIN_SMALL_FRACTION: f64 = 0.95;
const MIN_NONNEGATIVE_FRACTION: f64 = 0.90;
const MAX_NEGATIVE_SIGNED_FRACTION: f64 = 0.01;
const INT_LIMIT: f64 = (1 << 24) as f64;
const FLOAT_MIN: f64 = 1.0 / (1 << 20) as f64;
const FLOAT_MAX: f64 = (1u64 << 40) as f64;

fn fraction(values: &[f64], pred: impl Fn(f64) -> bool) -> f64 {
    values.iter().filter(|&&v| pred(v)).count() as f64 / values.len() as f64
}

/// Mean absolute step relative to mean magnitude
pub fn roughness(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let steps: f64 = values.windows(2).map(|w| (w[1] - w[0]).abs()).sum();
    let mean_step = steps / (values.len() - 1) as f64;
    let mean_mag = values.iter().map(|v| v.abs()).sum::<f64>() / values.len() as f64;
    mean_step / (mean_mag + 1.0)
}

fn plausible(layout: &RawLayout, values: &[f64]) -> bool {
    match (layout.encoding, layout.width) {
        (Encoding::Float, _) => {
            fraction(values, |v| {
                v == 0.0 || (v.is_finite() && (FLOAT_MIN..=FLOAT_MAX).contains(&v.abs()))
            }) >= MIN_SMALL_FRACTION
        }
        (_, 4) => {
            fraction(values, |v| v.abs() < INT_LIMIT) >= MIN_SMALL_FRACTION
                && fraction(values, |v| v >= 0.0) >= MIN_NONNEGATIVE_FRACTION
        }
        _ => true,
    }
}

/// Swap a signed 2-byte candidate for its unsigned twin when it reads
/// as noticeably negative
fn refine(format: FormatId, values: &mut [f64]) -> FormatId {
    let unsigned = match format {
        FormatId::Le2 => FormatId::Leu2,
        FormatId::Be2 => FormatId::Beu2,
        other => return other,
    };
    if fraction(values, |v| v < 0.0) > MAX_NEGATIVE_SIGNED_FRACTION {
        for v in values.iter_mut().filter(|v| **v < 0.0) {
            *v += 65536.0;
        }
        unsigned
    } else {
        format
    }
}

pub(crate) fn probe(io: &mut dyn AccessMethod, window: usize) -> Result<Option<Detected>> {
    let size = io.size();
    if size == 0 {
        return Ok(None);
    }

    let mut head = vec![0u8; (size as usize).min(window)];
    let n = io.read_at(0, &mut head)?;
    head.truncate(n);

    let mut best: Option<(FormatId, f64)> = None;
    for format in CANDIDATES {
        let Some(layout) = RawLayout::for_format(format) else {
            continue;
        };
        let width = layout.width as u64;
        if size % width != 0 || head.len() < layout.width {
            continue;
        }

        let mut values: Vec<f64> = head
            .chunks_exact(layout.width)
            .map(|b| layout.decode_f64(b))
            .collect();
        if !plausible(&layout, &values) {
            trace!(format = %format, "implausible");
            continue;
        }
        let format = refine(format, &mut values);
        let score = roughness(&values);
        trace!(format = %format, score, "candidate");

        if best.map_or(true, |(_, s)| score < s) {
            best = Some((format, score));
        }
    }

    let Some((format, score)) = best else {
        return Ok(None);
    };
    let width = format.descriptor().width as u64;
    let columns = match u32::try_from(size / width) {
        Ok(c) => c,
        Err(_) => return Ok(None),
    };
    debug!(format = %format, score, "raw layout guessed");

    Ok(Some(Detected {
        format,
        dims: Dimensions::new(1, 1, columns),
        version: 1,
    }))
}
