//! Single-spectrum float files with Fortran record framing
//!
//! ```text
//! offset      size  content
//! 0           4     24            record marker
//! 4           8     name          ASCII, space padded
//! 12          4     n             number of channels
//! 16          12    1, 1, 1
//! 28          4     24            record marker
//! 32          4     4n            record marker
//! 36          4n    data          float32
//! 36 + 4n     4     4n            record marker
//! ```
//!
//! Integers and floats use one byte order throughout, detected on open.
//! New files are written little-endian.

use super::raw::Endian;
use super::{float32, float32_mut, Address, Detected, Dimensions, FormatCodec, FormatId};
use super::{FormatState, Setup};
use crate::access::AccessMethod;
use crate::convert::{ElementKind, Samples, SamplesMut};
use crate::error::{MatrixError, Result};
use tracing::debug;

const HEAD_MARKER: u32 = 24;
const NAME_LEN: usize = 8;
const DATA_OFFSET: u64 = 36;
const DEFAULT_NAME: &[u8; NAME_LEN] = b"spectrum";

/// Total file size for `n` channels
pub fn file_size(n: u32) -> u64 {
    40 + 4 * n as u64
}

fn u32_at(bytes: &[u8], offset: usize, endian: Endian) -> u32 {
    let b = [
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ];
    match endian {
        Endian::Little => u32::from_le_bytes(b),
        Endian::Big => u32::from_be_bytes(b),
    }
}

fn u32_bytes(v: u32, endian: Endian) -> [u8; 4] {
    match endian {
        Endian::Little => v.to_le_bytes(),
        Endian::Big => v.to_be_bytes(),
    }
}

/// Parsed leading record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Gf2Header {
    pub endian: Endian,
    pub name: [u8; NAME_LEN],
    pub channels: u32,
}

impl Gf2Header {
    /// Try both byte orders against the 36 leading bytes
    pub fn parse(head: &[u8], size: u64) -> Option<Self> {
        if head.len() < DATA_OFFSET as usize {
            return None;
        }
        [Endian::Little, Endian::Big].into_iter().find_map(|endian| {
            let n = u32_at(head, 12, endian);
            let framed = u32_at(head, 0, endian) == HEAD_MARKER
                && u32_at(head, 28, endian) == HEAD_MARKER
                && n > 0
                && n <= u32::MAX / 4
                && u32_at(head, 32, endian) == 4 * n
                && size == file_size(n);
            framed.then(|| {
                let mut name = [0u8; NAME_LEN];
                name.copy_from_slice(&head[4..4 + NAME_LEN]);
                Gf2Header {
                    endian,
                    name,
                    channels: n,
                }
            })
        })
    }

    pub fn to_bytes(&self) -> [u8; DATA_OFFSET as usize] {
        let mut out = [0u8; DATA_OFFSET as usize];
        let e = self.endian;
        out[0..4].copy_from_slice(&u32_bytes(HEAD_MARKER, e));
        out[4..12].copy_from_slice(&self.name);
        out[12..16].copy_from_slice(&u32_bytes(self.channels, e));
        for field in [16, 20, 24] {
            out[field..field + 4].copy_from_slice(&u32_bytes(1, e));
        }
        out[28..32].copy_from_slice(&u32_bytes(HEAD_MARKER, e));
        out[32..36].copy_from_slice(&u32_bytes(4 * self.channels, e));
        out
    }
}

fn read_header(io: &mut dyn AccessMethod) -> Result<Option<Gf2Header>> {
    let size = io.size();
    if size < file_size(1) {
        return Ok(None);
    }
    let mut head = [0u8; DATA_OFFSET as usize];
    io.read_exact_at(0, &mut head)?;
    Ok(Gf2Header::parse(&head, size))
}

pub(crate) fn probe(io: &mut dyn AccessMethod) -> Result<Option<Detected>> {
    Ok(read_header(io)?.map(|h| Detected {
        format: FormatId::Gf2,
        dims: Dimensions::new(1, 1, h.channels),
        version: 1,
    }))
}

pub(crate) fn init(io: &mut dyn AccessMethod, setup: &Setup) -> Result<FormatState> {
    Gf2Spectrum::open(io, setup.dims).map(FormatState::Gf2)
}

#[derive(Debug)]
pub struct Gf2Spectrum {
    header: Gf2Header,
    header_dirty: bool,
    bytes: Vec<u8>,
}

impl Gf2Spectrum {
    pub fn open(io: &mut dyn AccessMethod, dims: Dimensions) -> Result<Self> {
        if dims.levels != 1 || dims.lines != 1 {
            return Err(dims.invalid("gf2 holds a single spectrum"));
        }

        if io.size() == 0 {
            return Ok(Gf2Spectrum {
                header: Gf2Header {
                    endian: Endian::Little,
                    name: *DEFAULT_NAME,
                    channels: dims.columns,
                },
                header_dirty: true,
                bytes: Vec::new(),
            });
        }

        let header = read_header(io)?
            .ok_or_else(|| MatrixError::corrupt("gf2 record markers do not match"))?;
        if header.channels != dims.columns {
            return Err(MatrixError::FormatMismatch {
                requested: format!("gf2 with {} channels", dims.columns),
                found: format!("gf2 with {} channels", header.channels),
            });
        }
        debug!(channels = header.channels, endian = ?header.endian, "opened gf2 spectrum");

        Ok(Gf2Spectrum {
            header,
            header_dirty: false,
            bytes: Vec::new(),
        })
    }

    pub fn endian(&self) -> Endian {
        self.header.endian
    }
}

impl FormatCodec for Gf2Spectrum {
    fn native_kind(&self) -> ElementKind {
        ElementKind::Float32
    }

    fn read(&mut self, io: &mut dyn AccessMethod, at: Address, out: SamplesMut<'_>) -> Result<()> {
        let out = float32_mut(out)?;
        self.bytes.clear();
        self.bytes.resize(out.len() * 4, 0);
        let offset = DATA_OFFSET + at.col as u64 * 4;
        let mut filled = 0;
        while filled < self.bytes.len() {
            let n = io.read_at(offset + filled as u64, &mut self.bytes[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }

        let endian = self.header.endian;
        for (d, b) in out.iter_mut().zip(self.bytes.chunks_exact(4)) {
            *d = f32::from_bits(u32_at(b, 0, endian));
        }
        Ok(())
    }

    fn write(&mut self, io: &mut dyn AccessMethod, at: Address, data: Samples<'_>) -> Result<()> {
        let data = float32(data)?;
        let endian = self.header.endian;
        self.bytes.clear();
        for v in data {
            self.bytes.extend_from_slice(&u32_bytes(v.to_bits(), endian));
        }
        io.write_all_at(DATA_OFFSET + at.col as u64 * 4, &self.bytes)
    }

    fn flush(&mut self, io: &mut dyn AccessMethod) -> Result<()> {
        if !self.header_dirty {
            return Ok(());
        }
        let n = self.header.channels;
        let e = self.header.endian;
        io.write_all_at(0, &self.header.to_bytes())?;
        io.write_all_at(DATA_OFFSET + 4 * n as u64, &u32_bytes(4 * n, e))?;
        self.header_dirty = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::MemoryAccess;

    fn framed(values: &[f32], endian: Endian) -> Vec<u8> {
        let header = Gf2Header {
            endian,
            name: *b"test    ",
            channels: values.len() as u32,
        };
        let mut out = header.to_bytes().to_vec();
        for v in values {
            out.extend_from_slice(&u32_bytes(v.to_bits(), endian));
        }
        out.extend_from_slice(&u32_bytes(4 * values.len() as u32, endian));
        out
    }

    #[test]
    fn test_probe_both_byte_orders() {
        for endian in [Endian::Little, Endian::Big] {
            let mut io = MemoryAccess::from_bytes(framed(&[1.0, 2.0, 3.0], endian), false);
            let found = probe(&mut io).unwrap().unwrap();
            assert_eq!(found.dims, Dimensions::new(1, 1, 3));
        }
    }

    #[test]
    fn test_probe_requires_exact_size() {
        let mut bytes = framed(&[1.0, 2.0], Endian::Little);
        bytes.push(0);
        let mut io = MemoryAccess::from_bytes(bytes, false);
        assert!(probe(&mut io).unwrap().is_none());
    }

    #[test]
    fn test_new_file_layout() {
        let mut io = MemoryAccess::new();
        let mut spectrum = Gf2Spectrum::open(&mut io, Dimensions::new(1, 1, 2)).unwrap();
        let at = Address {
            level: 0,
            line: 0,
            col: 0,
        };
        spectrum
            .write(&mut io, at, Samples::Float32(&[0.5, -1.0]))
            .unwrap();
        spectrum.flush(&mut io).unwrap();

        assert_eq!(io.size(), file_size(2));
        assert_eq!(&io.as_bytes()[0..4], &24u32.to_le_bytes());
        assert_eq!(&io.as_bytes()[32..36], &8u32.to_le_bytes());
        assert_eq!(&io.as_bytes()[44..48], &8u32.to_le_bytes());

        let found = probe(&mut io).unwrap().unwrap();
        assert_eq!(found.dims.columns, 2);
    }

    #[test]
    fn test_big_endian_values() {
        let mut io = MemoryAccess::from_bytes(framed(&[1.5, 2.5], Endian::Big), true);
        let mut spectrum = Gf2Spectrum::open(&mut io, Dimensions::new(1, 1, 2)).unwrap();
        assert_eq!(spectrum.endian(), Endian::Big);

        let mut out = [0f32; 2];
        let at = Address {
            level: 0,
            line: 0,
            col: 0,
        };
        spectrum
            .read(&mut io, at, SamplesMut::Float32(&mut out))
            .unwrap();
        assert_eq!(out, [1.5, 2.5]);
    }

    #[test]
    fn test_channel_mismatch() {
        let mut io = MemoryAccess::from_bytes(framed(&[1.0, 2.0], Endian::Little), true);
        assert!(matches!(
            Gf2Spectrum::open(&mut io, Dimensions::new(1, 1, 5)),
            Err(MatrixError::FormatMismatch { .. })
        ));
    }
}
