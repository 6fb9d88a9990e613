//! Plain-text matrices
//!
//! Whitespace-separated decimal numbers, `#` starts a comment line. A file
//! whose rows all hold one number is a single spectrum; otherwise every row
//! is one spectrum and all rows must have the same width. The whole matrix
//! is held in memory and rewritten on flush.

use super::{float64, float64_mut, Address, Detected, Dimensions, FormatCodec, FormatId};
use super::{FormatState, Setup};
use crate::access::AccessMethod;
use crate::convert::{ElementKind, Samples, SamplesMut};
use crate::error::{MatrixError, Result};
use std::fmt::Write as _;
use tracing::{debug, warn};

/// Bytes inspected before committing to a full parse
const SNIFF_LEN: usize = 4096;

fn read_all(io: &mut dyn AccessMethod) -> Result<Vec<u8>> {
    let size = usize::try_from(io.size())
        .map_err(|_| MatrixError::corrupt("text file too large to load"))?;
    let mut buf = vec![0u8; size];
    io.read_exact_at(0, &mut buf)?;
    Ok(buf)
}

fn is_text(bytes: &[u8]) -> bool {
    bytes
        .iter()
        .all(|&b| b.is_ascii_graphic() || b.is_ascii_whitespace())
}

/// Non-empty rows that are not comments
fn rows(text: &str) -> impl Iterator<Item = &str> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
}

/// Parse a text body into (row width, values)
fn parse(text: &str) -> Result<(usize, Vec<f64>)> {
    let mut width = None;
    let mut uniform = true;
    let mut values = Vec::new();

    for (n, row) in rows(text).enumerate() {
        let before = values.len();
        for token in row.split_whitespace() {
            let v = token.parse::<f64>().map_err(|_| {
                MatrixError::corrupt(format!("row {}: '{}' is not a number", n + 1, token))
            })?;
            values.push(v);
        }
        let count = values.len() - before;
        match width {
            None => width = Some(count),
            Some(w) if w != count => uniform = false,
            _ => {}
        }
    }

    let width = match width {
        Some(w) if uniform => w,
        Some(_) => 1,
        None => 0,
    };
    Ok((width, values))
}

fn layout(width: usize, total: usize) -> Result<Dimensions> {
    let too_big = || MatrixError::corrupt("text matrix too large");
    if width <= 1 {
        let columns = u32::try_from(total).map_err(|_| too_big())?;
        return Ok(Dimensions::new(1, 1, columns));
    }
    let lines = u32::try_from(total / width).map_err(|_| too_big())?;
    let columns = u32::try_from(width).map_err(|_| too_big())?;
    Ok(Dimensions::new(1, lines, columns))
}

pub(crate) fn probe(io: &mut dyn AccessMethod) -> Result<Option<Detected>> {
    let size = io.size();
    if size == 0 {
        return Ok(None);
    }

    let mut head = vec![0u8; (size as usize).min(SNIFF_LEN)];
    let n = io.read_at(0, &mut head)?;
    head.truncate(n);
    if !is_text(&head) {
        return Ok(None);
    }

    // The window may cut the last token in half; only check whole rows
    let whole = if (n as u64) < size {
        match head.iter().rposition(|&b| b == b'\n') {
            Some(end) => &head[..end],
            None => return Ok(None),
        }
    } else {
        &head[..]
    };
    let text = String::from_utf8_lossy(whole);
    if parse(&text).is_err() || rows(&text).next().is_none() {
        return Ok(None);
    }

    let body = read_all(io)?;
    if !is_text(&body) {
        return Ok(None);
    }
    let (width, values) = match parse(&String::from_utf8_lossy(&body)) {
        Ok(parsed) => parsed,
        Err(_) => return Ok(None),
    };
    if values.is_empty() {
        return Ok(None);
    }

    Ok(Some(Detected {
        format: FormatId::Txt,
        dims: layout(width, values.len())?,
        version: 1,
    }))
}

pub(crate) fn init(io: &mut dyn AccessMethod, setup: &Setup) -> Result<FormatState> {
    TextMatrix::load(io, setup.dims).map(FormatState::Text)
}

/// In-memory text matrix
#[derive(Debug)]
pub struct TextMatrix {
    dims: Dimensions,
    values: Vec<f64>,
    dirty: bool,
}

impl TextMatrix {
    pub fn load(io: &mut dyn AccessMethod, dims: Dimensions) -> Result<Self> {
        let total = usize::try_from(dims.samples())
            .map_err(|_| dims.invalid("too many samples to hold in memory"))?;

        let mut values = if io.size() > 0 {
            let body = read_all(io)?;
            parse(&String::from_utf8_lossy(&body))?.1
        } else {
            Vec::new()
        };

        if values.len() > total {
            warn!(
                found = values.len(),
                kept = total,
                "text matrix has more values than its extents"
            );
        }
        values.resize(total, 0.0);
        debug!(dims = %dims, "loaded text matrix");

        Ok(TextMatrix {
            dims,
            values,
            dirty: false,
        })
    }

    fn range(&self, at: Address, len: usize) -> std::ops::Range<usize> {
        let start = at.sample(&self.dims) as usize;
        start..start + len
    }

    /// Render the whole matrix
    pub fn render(&self) -> String {
        let mut out = String::with_capacity(self.values.len() * 8);
        let per_row = if self.dims.spectra() == 1 {
            1
        } else {
            self.dims.columns as usize
        };
        for row in self.values.chunks(per_row) {
            for (i, v) in row.iter().enumerate() {
                if i > 0 {
                    out.push(' ');
                }
                push_number(&mut out, *v);
            }
            out.push('\n');
        }
        out
    }
}

fn push_number(out: &mut String, v: f64) {
    if v.fract() == 0.0 && v.abs() < 1e15 {
        let _ = write!(out, "{}", v as i64);
    } else {
        let _ = write!(out, "{}", v);
    }
}

impl FormatCodec for TextMatrix {
    fn native_kind(&self) -> ElementKind {
        ElementKind::Float64
    }

    fn read(&mut self, _io: &mut dyn AccessMethod, at: Address, out: SamplesMut<'_>) -> Result<()> {
        let out = float64_mut(out)?;
        let range = self.range(at, out.len());
        out.copy_from_slice(&self.values[range]);
        Ok(())
    }

    fn write(&mut self, _io: &mut dyn AccessMethod, at: Address, data: Samples<'_>) -> Result<()> {
        let data = float64(data)?;
        let range = self.range(at, data.len());
        self.values[range].copy_from_slice(data);
        self.dirty = true;
        Ok(())
    }

    fn flush(&mut self, io: &mut dyn AccessMethod) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }
        let body = self.render();
        io.write_all_at(0, body.as_bytes())?;
        io.set_len(body.len() as u64)?;
        self.dirty = false;
        Ok(())
    }
}
