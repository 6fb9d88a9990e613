use crate::error::{MatrixError, Result};
use crate::format::Dimensions;
use serde::Serialize;

pub const LC2_MAGIC: u32 = 0x8044_7fff;
pub const LC2_VERSION: u32 = 1;
pub const HEADER_SIZE: usize = 64;

/// Bytes per position/length table entry
pub const POSLEN_SIZE: u64 = 8;

/// Header status: every change has been written back
pub const STATUS_CLEAN: u32 = 0;
/// Header status: a writer had the file open and had not flushed
pub const STATUS_OPEN: u32 = 1;

/// LC2 file header
///
/// The header occupies the first 64 bytes of the file. All fields are
/// little-endian `u32`; the unused tail is zero. It is followed by the
/// position/length table and then by the compressed line payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Lc2Header {
    /// Magic number: 0x80447fff
    pub magic: u32,

    /// Layout version
    pub version: u32,

    pub levels: u32,
    pub lines: u32,
    pub columns: u32,

    /// Offset of the position/length table
    pub poslen_pos: u32,

    /// First byte past the payload; new slots are placed here
    pub free_pos: u32,

    /// Reserved for a free list, always 0
    pub freelist_pos: u32,

    /// Payload bytes referenced by the table
    pub used: u32,

    /// Payload bytes no longer referenced
    pub free: u32,

    /// One of [`STATUS_CLEAN`] or [`STATUS_OPEN`]
    pub status: u32,
}

impl Lc2Header {
    /// Header for an empty matrix of the given extents
    pub fn new(dims: Dimensions) -> Result<Self> {
        dims.validate()?;
        let mut header = Lc2Header {
            magic: LC2_MAGIC,
            version: LC2_VERSION,
            levels: dims.levels,
            lines: dims.lines,
            columns: dims.columns,
            poslen_pos: HEADER_SIZE as u32,
            free_pos: 0,
            freelist_pos: 0,
            used: 0,
            free: 0,
            status: STATUS_CLEAN,
        };
        header.free_pos = u32::try_from(header.payload_start())
            .map_err(|_| dims.invalid("position table does not fit a 4 GiB file"))?;
        Ok(header)
    }

    pub fn dimensions(&self) -> Dimensions {
        Dimensions::new(self.levels, self.lines, self.columns)
    }

    /// Number of table entries
    pub fn slots(&self) -> u64 {
        self.dimensions().spectra()
    }

    pub fn table_bytes(&self) -> u64 {
        self.slots() * POSLEN_SIZE
    }

    /// Offset of the first payload byte
    pub fn payload_start(&self) -> u64 {
        self.poslen_pos as u64 + self.table_bytes()
    }

    pub fn is_open(&self) -> bool {
        self.status == STATUS_OPEN
    }

    /// Validate magic, version and internal consistency
    pub fn validate(&self) -> Result<()> {
        if self.magic != LC2_MAGIC {
            return Err(MatrixError::corrupt(format!(
                "bad LC2 magic {:#010x}",
                self.magic
            )));
        }

        if self.version != LC2_VERSION {
            return Err(MatrixError::FormatMismatch {
                requested: format!("lc2 version {}", LC2_VERSION),
                found: format!("lc2 version {}", self.version),
            });
        }

        self.dimensions()
            .validate()
            .map_err(|_| MatrixError::corrupt("LC2 header has a zero extent"))?;

        if (self.poslen_pos as usize) < HEADER_SIZE {
            return Err(MatrixError::corrupt(format!(
                "position table at {} overlaps the header",
                self.poslen_pos
            )));
        }

        if (self.free_pos as u64) < self.payload_start() {
            return Err(MatrixError::corrupt(format!(
                "free cursor {} lies before the payload at {}",
                self.free_pos,
                self.payload_start()
            )));
        }

        if self.status > STATUS_OPEN {
            return Err(MatrixError::corrupt(format!(
                "unknown status word {}",
                self.status
            )));
        }

        Ok(())
    }

    /// Serialize header to bytes
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let fields = [
            self.magic,
            self.version,
            self.levels,
            self.lines,
            self.columns,
            self.poslen_pos,
            self.free_pos,
            self.freelist_pos,
            self.used,
            self.free,
            self.status,
        ];

        let mut bytes = [0u8; HEADER_SIZE];
        for (chunk, field) in bytes.chunks_exact_mut(4).zip(fields) {
            chunk.copy_from_slice(&field.to_le_bytes());
        }
        bytes
    }

    /// Deserialize and validate a header
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(MatrixError::corrupt(format!(
                "LC2 header needs {} bytes, got {}",
                HEADER_SIZE,
                bytes.len()
            )));
        }

        let mut offset = 0;
        let mut next = || {
            let v = u32::from_le_bytes([
                bytes[offset],
                bytes[offset + 1],
                bytes[offset + 2],
                bytes[offset + 3],
            ]);
            offset += 4;
            v
        };

        let header = Lc2Header {
            magic: next(),
            version: next(),
            levels: next(),
            lines: next(),
            columns: next(),
            poslen_pos: next(),
            free_pos: next(),
            freelist_pos: next(),
            used: next(),
            free: next(),
            status: next(),
        };

        header.validate()?;

        Ok(header)
    }

    /// Cheap magic check on raw bytes
    pub fn has_magic(bytes: &[u8]) -> bool {
        bytes.len() >= 4 && bytes[..4] == LC2_MAGIC.to_le_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_creation() {
        let header = Lc2Header::new(Dimensions::new(1, 4, 1024)).unwrap();
        assert_eq!(header.magic, LC2_MAGIC);
        assert_eq!(header.poslen_pos, 64);
        assert_eq!(header.free_pos, 64 + 4 * 8);
        assert_eq!(header.status, STATUS_CLEAN);
        assert!(header.validate().is_ok());
    }

    #[test]
    fn test_header_bytes_layout() {
        let header = Lc2Header::new(Dimensions::new(2, 3, 5)).unwrap();
        let bytes = header.to_bytes();
        assert_eq!(&bytes[0..4], &[0xff, 0x7f, 0x44, 0x80]);
        assert_eq!(&bytes[8..12], &2u32.to_le_bytes());
        assert_eq!(&bytes[16..20], &5u32.to_le_bytes());
        assert!(bytes[44..].iter().all(|&b| b == 0));
        assert!(Lc2Header::has_magic(&bytes));

        let parsed = Lc2Header::from_bytes(&bytes).unwrap();
        assert_eq!(parsed, header);
    }

    #[test]
    fn test_invalid_magic() {
        let mut header = Lc2Header::new(Dimensions::new(1, 1, 8)).unwrap();
        header.magic = 0xdead_beef;
        assert!(matches!(
            header.validate(),
            Err(MatrixError::DecodeCorruption(_))
        ));
    }

    #[test]
    fn test_invalid_version() {
        let mut header = Lc2Header::new(Dimensions::new(1, 1, 8)).unwrap();
        header.version = 7;
        assert!(matches!(
            header.validate(),
            Err(MatrixError::FormatMismatch { .. })
        ));
    }

    #[test]
    fn test_free_cursor_before_payload() {
        let mut header = Lc2Header::new(Dimensions::new(1, 10, 8)).unwrap();
        header.free_pos = 70;
        assert!(header.validate().is_err());
    }

    #[test]
    fn test_short_buffer() {
        assert!(Lc2Header::from_bytes(&[0u8; 10]).is_err());
    }

    #[test]
    fn test_zero_extents_rejected() {
        assert!(Lc2Header::new(Dimensions::new(1, 0, 8)).is_err());
    }
}
