//! Packed symmetric matrices
//!
//! Only the lower triangle of an n×n matrix is stored, as little-endian
//! int32. Element (r, c) lives at index `max(r,c)·(max(r,c)+1)/2 + min(r,c)`,
//! so reading or writing (r, c) and (c, r) touch the same cell. The file
//! has no header; the side length comes from the hint or the file size.

use super::{int32, int32_mut, Address, Dimensions, FormatCodec, FormatState, Setup};
use crate::access::AccessMethod;
use crate::convert::{ElementKind, Samples, SamplesMut};
use crate::error::Result;

const WIDTH: u64 = 4;

/// Packed index of cell (r, c)
pub fn packed_index(r: u32, c: u32) -> u64 {
    let (hi, lo) = if r >= c { (r, c) } else { (c, r) };
    let hi = hi as u64;
    hi * (hi + 1) / 2 + lo as u64
}

/// Largest n whose packed triangle fits in `size` bytes
pub fn side_for_size(size: u64) -> u32 {
    let cells = size / WIDTH;
    let mut n = ((8.0 * cells as f64 + 1.0).sqrt() as u64).saturating_sub(1) / 2;
    while (n + 1) * (n + 2) / 2 <= cells {
        n += 1;
    }
    while n > 0 && n * (n + 1) / 2 > cells {
        n -= 1;
    }
    n.min(u32::MAX as u64) as u32
}

pub(crate) fn init(_io: &mut dyn AccessMethod, setup: &Setup) -> Result<FormatState> {
    TriMatrix::new(setup.dims).map(FormatState::Tri)
}

#[derive(Debug)]
pub struct TriMatrix {
    side: u32,
    bytes: Vec<u8>,
}

impl TriMatrix {
    pub fn new(dims: Dimensions) -> Result<Self> {
        if dims.levels != 1 || dims.lines != dims.columns {
            return Err(dims.invalid("symmetric matrices need one level of n×n"));
        }
        Ok(TriMatrix {
            side: dims.columns,
            bytes: Vec::new(),
        })
    }

    pub fn side(&self) -> u32 {
        self.side
    }

    fn read_cells(&mut self, io: &mut dyn AccessMethod, first: u64, count: usize) -> Result<()> {
        let len = count * WIDTH as usize;
        self.bytes.clear();
        self.bytes.resize(len, 0);
        let mut filled = 0;
        while filled < len {
            let n = io.read_at(first * WIDTH + filled as u64, &mut self.bytes[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        Ok(())
    }
}

impl FormatCodec for TriMatrix {
    fn native_kind(&self) -> ElementKind {
        ElementKind::Int32
    }

    fn read(&mut self, io: &mut dyn AccessMethod, at: Address, out: SamplesMut<'_>) -> Result<()> {
        let out = int32_mut(out)?;
        let row = at.line;
        let end = at.col as u64 + out.len() as u64;

        // Columns up to the diagonal are contiguous in the packed row
        let lower_end = end.min(row as u64 + 1);
        let lower = lower_end.saturating_sub(at.col as u64) as usize;
        if lower > 0 {
            self.read_cells(io, packed_index(row, at.col), lower)?;
            for (d, b) in out[..lower].iter_mut().zip(self.bytes.chunks_exact(4)) {
                *d = i32::from_le_bytes([b[0], b[1], b[2], b[3]]);
            }
        }

        for (i, d) in out.iter_mut().enumerate().skip(lower) {
            let col = at.col + i as u32;
            self.read_cells(io, packed_index(row, col), 1)?;
            *d = i32::from_le_bytes([self.bytes[0], self.bytes[1], self.bytes[2], self.bytes[3]]);
        }
        Ok(())
    }

    fn write(&mut self, io: &mut dyn AccessMethod, at: Address, data: Samples<'_>) -> Result<()> {
        let data = int32(data)?;
        let row = at.line;
        let end = at.col as u64 + data.len() as u64;

        let lower_end = end.min(row as u64 + 1);
        let lower = lower_end.saturating_sub(at.col as u64) as usize;
        if lower > 0 {
            self.bytes.clear();
            for v in &data[..lower] {
                self.bytes.extend_from_slice(&v.to_le_bytes());
            }
            io.write_all_at(packed_index(row, at.col) * WIDTH, &self.bytes)?;
        }

        for (i, v) in data.iter().enumerate().skip(lower) {
            let col = at.col + i as u32;
            io.write_all_at(packed_index(row, col) * WIDTH, &v.to_le_bytes())?;
        }
        Ok(())
    }

    fn flush(&mut self, _io: &mut dyn AccessMethod) -> Result<()> {
        Ok(())
    }
}
