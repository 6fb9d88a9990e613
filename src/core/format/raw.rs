//! Headerless fixed-width formats
//!
//! Samples are stored back to back in row-major order with no header.
//! Reads beyond the end of the file yield zeros; writes past the end grow
//! it. Integer values that do not fit a 2-byte format are clamped.

use super::{Address, Dimensions, FormatCodec, FormatId, FormatState, Setup};
use crate::access::AccessMethod;
use crate::convert::{ElementKind, Samples, SamplesMut};
use crate::error::{MatrixError, Result};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    Little,
    Big,
}

impl Endian {
    pub fn native() -> Self {
        if cfg!(target_endian = "big") {
            Endian::Big
        } else {
            Endian::Little
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Signed,
    Unsigned,
    Float,
}

/// On-disk shape of one sample
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawLayout {
    pub width: usize,
    pub encoding: Encoding,
    pub endian: Endian,
}

impl RawLayout {
    pub const fn new(width: usize, encoding: Encoding, endian: Endian) -> Self {
        RawLayout {
            width,
            encoding,
            endian,
        }
    }

    pub fn for_format(format: FormatId) -> Option<Self> {
        use Encoding::*;
        use Endian::*;

        let layout = match format {
            FormatId::Le2 => Self::new(2, Signed, Little),
            FormatId::Leu2 => Self::new(2, Unsigned, Little),
            FormatId::Le4 => Self::new(4, Signed, Little),
            FormatId::Lf4 => Self::new(4, Float, Little),
            FormatId::Lf8 => Self::new(8, Float, Little),
            FormatId::Be2 => Self::new(2, Signed, Big),
            FormatId::Beu2 => Self::new(2, Unsigned, Big),
            FormatId::Be4 => Self::new(4, Signed, Big),
            FormatId::Bf4 => Self::new(4, Float, Big),
            FormatId::Bf8 => Self::new(8, Float, Big),
            FormatId::Shm => Self::new(4, Signed, Endian::native()),
            _ => return None,
        };
        Some(layout)
    }

    pub fn native_kind(&self) -> ElementKind {
        match (self.encoding, self.width) {
            (Encoding::Float, 8) => ElementKind::Float64,
            (Encoding::Float, _) => ElementKind::Float32,
            _ => ElementKind::Int32,
        }
    }

    fn bytes<const N: usize>(&self, b: &[u8]) -> [u8; N] {
        let mut out = [0u8; N];
        out.copy_from_slice(&b[..N]);
        if self.endian == Endian::Big {
            out.reverse();
        }
        out
    }

    fn put<const N: usize>(&self, mut value: [u8; N], out: &mut [u8]) {
        if self.endian == Endian::Big {
            value.reverse();
        }
        out[..N].copy_from_slice(&value);
    }

    /// Decode one integer sample stored little-endian-normalised
    pub fn decode_int(&self, b: &[u8]) -> i32 {
        match (self.width, self.encoding) {
            (2, Encoding::Unsigned) => u16::from_le_bytes(self.bytes(b)) as i32,
            (2, _) => i16::from_le_bytes(self.bytes(b)) as i32,
            _ => i32::from_le_bytes(self.bytes(b)),
        }
    }

    /// Encode one integer sample; returns false when it had to clamp
    pub fn encode_int(&self, value: i32, out: &mut [u8]) -> bool {
        match (self.width, self.encoding) {
            (2, Encoding::Unsigned) => {
                let v = value.clamp(0, u16::MAX as i32);
                self.put((v as u16).to_le_bytes(), out);
                v == value
            }
            (2, _) => {
                let v = value.clamp(i16::MIN as i32, i16::MAX as i32);
                self.put((v as i16).to_le_bytes(), out);
                v == value
            }
            _ => {
                self.put(value.to_le_bytes(), out);
                true
            }
        }
    }

    /// Decode any sample as f64, used by the heuristic sniffer
    pub fn decode_f64(&self, b: &[u8]) -> f64 {
        match (self.encoding, self.width) {
            (Encoding::Float, 4) => f32::from_le_bytes(self.bytes(b)) as f64,
            (Encoding::Float, _) => f64::from_le_bytes(self.bytes(b)),
            _ => self.decode_int(b) as f64,
        }
    }
}

pub(crate) fn init(_io: &mut dyn AccessMethod, setup: &Setup) -> Result<FormatState> {
    let layout = RawLayout::for_format(setup.format).ok_or(MatrixError::NoFormat)?;
    Ok(FormatState::Raw(RawMatrix::new(layout, setup.dims)))
}

/// Codec state for a headerless file
#[derive(Debug)]
pub struct RawMatrix {
    layout: RawLayout,
    dims: Dimensions,
    bytes: Vec<u8>,
}

impl RawMatrix {
    pub fn new(layout: RawLayout, dims: Dimensions) -> Self {
        RawMatrix {
            layout,
            dims,
            bytes: Vec::new(),
        }
    }

    pub fn layout(&self) -> RawLayout {
        self.layout
    }

    fn offset(&self, at: Address) -> u64 {
        at.sample(&self.dims) * self.layout.width as u64
    }

    /// Read `count` samples into the byte scratch, zero-filling past EOF
    fn load(&mut self, io: &mut dyn AccessMethod, at: Address, count: usize) -> Result<()> {
        let len = count * self.layout.width;
        self.bytes.clear();
        self.bytes.resize(len, 0);
        let offset = self.offset(at);
        let mut filled = 0;
        while filled < len {
            let n = io.read_at(offset + filled as u64, &mut self.bytes[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        Ok(())
    }
}

impl FormatCodec for RawMatrix {
    fn native_kind(&self) -> ElementKind {
        self.layout.native_kind()
    }

    fn read(&mut self, io: &mut dyn AccessMethod, at: Address, out: SamplesMut<'_>) -> Result<()> {
        self.load(io, at, out.len())?;
        let w = self.layout.width;
        let layout = self.layout;
        let chunks = self.bytes.chunks_exact(w);

        match (out, layout.native_kind()) {
            (SamplesMut::Int32(dst), ElementKind::Int32) => {
                for (d, b) in dst.iter_mut().zip(chunks) {
                    *d = layout.decode_int(b);
                }
            }
            (SamplesMut::Float32(dst), ElementKind::Float32) => {
                for (d, b) in dst.iter_mut().zip(chunks) {
                    *d = f32::from_le_bytes(layout.bytes(b));
                }
            }
            (SamplesMut::Float64(dst), ElementKind::Float64) => {
                for (d, b) in dst.iter_mut().zip(chunks) {
                    *d = f64::from_le_bytes(layout.bytes(b));
                }
            }
            (other, native) => return Err(super::kind_mismatch(native, other.kind())),
        }
        Ok(())
    }

    fn write(&mut self, io: &mut dyn AccessMethod, at: Address, data: Samples<'_>) -> Result<()> {
        let w = self.layout.width;
        let layout = self.layout;
        self.bytes.clear();
        self.bytes.resize(data.len() * w, 0);
        let chunks = self.bytes.chunks_exact_mut(w);

        match (data, layout.native_kind()) {
            (Samples::Int32(src), ElementKind::Int32) => {
                let mut clamped = 0usize;
                for (b, &v) in chunks.zip(src) {
                    if !layout.encode_int(v, b) {
                        clamped += 1;
                    }
                }
                if clamped > 0 {
                    warn!(clamped, width = w, "values clamped to the storage range");
                }
            }
            (Samples::Float32(src), ElementKind::Float32) => {
                for (b, &v) in chunks.zip(src) {
                    layout.put(v.to_le_bytes(), b);
                }
            }
            (Samples::Float64(src), ElementKind::Float64) => {
                for (b, &v) in chunks.zip(src) {
                    layout.put(v.to_le_bytes(), b);
                }
            }
            (other, native) => return Err(super::kind_mismatch(native, other.kind())),
        }

        let offset = self.offset(at);
        io.write_all_at(offset, &self.bytes)
    }

    fn flush(&mut self, _io: &mut dyn AccessMethod) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::MemoryAccess;

    fn at(line: u32, col: u32) -> Address {
        Address {
            level: 0,
            line,
            col,
        }
    }

    #[test]
    fn test_big_endian_int16_layout() {
        let layout = RawLayout::for_format(FormatId::Be2).unwrap();
        let mut matrix = RawMatrix::new(layout, Dimensions::new(1, 1, 3));
        let mut io = MemoryAccess::new();

        matrix
            .write(&mut io, at(0, 0), Samples::Int32(&[1, -2, 0x1234]))
            .unwrap();
        assert_eq!(io.as_bytes(), &[0x00, 0x01, 0xff, 0xfe, 0x12, 0x34]);

        let mut back = [0i32; 3];
        matrix
            .read(&mut io, at(0, 0), SamplesMut::Int32(&mut back))
            .unwrap();
        assert_eq!(back, [1, -2, 0x1234]);
    }

    #[test]
    fn test_unsigned_reads_high_values() {
        let layout = RawLayout::for_format(FormatId::Leu2).unwrap();
        let mut matrix = RawMatrix::new(layout, Dimensions::new(1, 1, 2));
        let mut io = MemoryAccess::from_bytes(vec![0xff, 0xff, 0x00, 0x80], false);

        let mut out = [0i32; 2];
        matrix
            .read(&mut io, at(0, 0), SamplesMut::Int32(&mut out))
            .unwrap();
        assert_eq!(out, [65535, 32768]);
    }

    #[test]
    fn test_clamps_out_of_range_values() {
        let layout = RawLayout::for_format(FormatId::Le2).unwrap();
        let mut buf = [0u8; 2];
        assert!(!layout.encode_int(100_000, &mut buf));
        assert_eq!(i16::from_le_bytes(buf), i16::MAX);
        assert!(layout.encode_int(-5, &mut buf));
        assert_eq!(i16::from_le_bytes(buf), -5);
    }

    #[test]
    fn test_read_past_end_is_zero() {
        let layout = RawLayout::for_format(FormatId::Lf8).unwrap();
        let mut matrix = RawMatrix::new(layout, Dimensions::new(1, 4, 2));
        let mut io = MemoryAccess::new();

        matrix
            .write(&mut io, at(0, 0), Samples::Float64(&[1.5, 2.5]))
            .unwrap();

        let mut out = [9.0f64; 2];
        matrix
            .read(&mut io, at(3, 0), SamplesMut::Float64(&mut out))
            .unwrap();
        assert_eq!(out, [0.0, 0.0]);
    }

    #[test]
    fn test_line_offsets() {
        let layout = RawLayout::for_format(FormatId::Bf4).unwrap();
        let mut matrix = RawMatrix::new(layout, Dimensions::new(1, 2, 2));
        let mut io = MemoryAccess::new();

        matrix
            .write(&mut io, at(1, 1), Samples::Float32(&[1.0]))
            .unwrap();
        assert_eq!(io.size(), 16);
        assert_eq!(&io.as_bytes()[12..], &1.0f32.to_be_bytes());
    }

    #[test]
    fn test_wrong_kind_rejected() {
        let layout = RawLayout::for_format(FormatId::Le4).unwrap();
        let mut matrix = RawMatrix::new(layout, Dimensions::new(1, 1, 1));
        let mut io = MemoryAccess::new();
        assert!(matrix
            .write(&mut io, at(0, 0), Samples::Float64(&[1.0]))
            .is_err());
    }
}
