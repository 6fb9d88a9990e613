//! LC2 compressed matrices
//!
//! Layout on disk:
//!
//! ```text
//! 0        header (64 bytes)
//! 64       position/length table, one (pos, len) pair per line
//! ...      compressed line payload, up to the free cursor
//! ```
//!
//! Each line is compressed on its own (see [`codec`]). One decoded line is
//! cached; random access to individual samples decodes the whole line once
//! and serves subsequent requests from memory. Dirty lines are re-encoded
//! and placed by [`slots::SlotTable`] when another line is needed or on
//! flush, which also rewrites the table and the header.

pub mod cache;
pub mod codec;
pub mod header;
pub mod slots;

pub use cache::{CacheStats, LineCache};
pub use header::{Lc2Header, HEADER_SIZE, LC2_MAGIC, LC2_VERSION, STATUS_CLEAN, STATUS_OPEN};
pub use slots::{Placement, PosLen, SlotTable};

use crate::access::AccessMethod;
use crate::convert::{ElementKind, Samples, SamplesMut};
use crate::error::{MatrixError, Result};
use crate::format::{int32, int32_mut, Address, Detected, FormatCodec, FormatId};
use crate::format::{FormatState, Setup};
use serde::Serialize;
use tracing::{debug, trace, warn};

/// Space accounting for one LC2 matrix
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Lc2Stats {
    pub payload_start: u32,
    pub free_cursor: u32,
    /// Bytes referenced by the table
    pub used: u64,
    /// Bytes orphaned by moved or shrunk lines
    pub free: u64,
    pub lines_stored: usize,
    pub cache: CacheStats,
}

pub(crate) fn probe(io: &mut dyn AccessMethod) -> Result<Option<Detected>> {
    if io.size() < HEADER_SIZE as u64 {
        return Ok(None);
    }
    let mut head = [0u8; HEADER_SIZE];
    io.read_exact_at(0, &mut head)?;
    if !Lc2Header::has_magic(&head) {
        return Ok(None);
    }

    let header = Lc2Header::from_bytes(&head)?;
    Ok(Some(Detected {
        format: FormatId::Lc2,
        dims: header.dimensions(),
        version: header.version,
    }))
}

pub(crate) fn init(io: &mut dyn AccessMethod, setup: &Setup) -> Result<FormatState> {
    Lc2Matrix::open(io, setup).map(FormatState::Lc2)
}

fn truncated(e: MatrixError, what: &str) -> MatrixError {
    match e {
        MatrixError::Io(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => {
            MatrixError::corrupt(format!("file ends inside the {}", what))
        }
        other => other,
    }
}

#[derive(Debug)]
pub struct Lc2Matrix {
    header: Lc2Header,
    slots: SlotTable,
    cache: LineCache,
    /// Compressed bytes of the line being read or written back
    encoded: Vec<u8>,
    /// Table or header changed since the last flush
    header_dirty: bool,
    /// The open-for-writing status went to disk this session
    marked_open: bool,
}

impl Lc2Matrix {
    /// Load an existing matrix, or start a new one on an empty store
    pub fn open(io: &mut dyn AccessMethod, setup: &Setup) -> Result<Self> {
        if setup.version != LC2_VERSION {
            return Err(MatrixError::FormatMismatch {
                requested: format!("lc2 version {}", setup.version),
                found: format!("lc2 version {}", LC2_VERSION),
            });
        }
        let columns = usize::try_from(setup.dims.columns)
            .map_err(|_| setup.dims.invalid("line too long for this platform"))?;

        if io.size() == 0 {
            let header = Lc2Header::new(setup.dims)?;
            let slots = SlotTable::new(&header)?;
            debug!(dims = %setup.dims, "new LC2 matrix");
            return Ok(Lc2Matrix {
                header,
                slots,
                cache: LineCache::new(columns),
                encoded: Vec::new(),
                header_dirty: setup.writable,
                marked_open: false,
            });
        }

        let mut head = [0u8; HEADER_SIZE];
        io.read_exact_at(0, &mut head)
            .map_err(|e| truncated(e, "header"))?;
        let header = Lc2Header::from_bytes(&head)?;

        if header.dimensions() != setup.dims {
            return Err(MatrixError::FormatMismatch {
                requested: format!("lc2 {}", setup.dims),
                found: format!("lc2 {}", header.dimensions()),
            });
        }

        let table_len = usize::try_from(header.table_bytes())
            .map_err(|_| MatrixError::corrupt("position table too large"))?;
        let mut table = vec![0u8; table_len];
        io.read_exact_at(header.poslen_pos as u64, &mut table)
            .map_err(|e| truncated(e, "position table"))?;
        let slots = SlotTable::from_bytes(&header, &table)?;

        if header.is_open() {
            warn!(
                dims = %header.dimensions(),
                "LC2 file was not flushed by its last writer; recent lines may be missing"
            );
        }
        if slots.used() != header.used as u64 {
            debug!(
                header = header.used,
                table = slots.used(),
                "LC2 used counter disagrees with the table"
            );
        }

        debug!(
            dims = %header.dimensions(),
            lines_stored = slots.occupied(),
            free_cursor = slots.free_pos(),
            "opened LC2 matrix"
        );

        Ok(Lc2Matrix {
            header,
            slots,
            cache: LineCache::new(columns),
            encoded: Vec::new(),
            header_dirty: false,
            marked_open: false,
        })
    }

    pub fn header(&self) -> &Lc2Header {
        &self.header
    }

    /// Slot of line `index` as currently recorded in memory
    pub fn slot(&self, index: usize) -> Option<PosLen> {
        (index < self.slots.len()).then(|| self.slots.get(index))
    }

    pub fn stats(&self) -> Lc2Stats {
        Lc2Stats {
            payload_start: self.slots.payload_start(),
            free_cursor: self.slots.free_pos(),
            used: self.slots.used(),
            free: self.slots.free(),
            lines_stored: self.slots.occupied(),
            cache: self.cache.stats(),
        }
    }

    fn columns(&self) -> usize {
        self.header.columns as usize
    }

    fn line_index(&self, at: Address) -> usize {
        at.spectrum(&self.header.dimensions()) as usize
    }

    /// Record on disk that the file is being modified
    fn mark_open(&mut self, io: &mut dyn AccessMethod) -> Result<()> {
        if self.marked_open {
            return Ok(());
        }
        let mut header = self.header;
        header.status = STATUS_OPEN;
        io.write_all_at(0, &header.to_bytes())?;
        self.header.status = STATUS_OPEN;
        self.marked_open = true;
        Ok(())
    }

    /// Re-encode and store the cached line if it is dirty
    fn write_back(&mut self, io: &mut dyn AccessMethod) -> Result<()> {
        let Some((index, samples)) = self.cache.pending() else {
            return Ok(());
        };
        codec::encode_into(samples, &mut self.encoded);

        let len = u32::try_from(self.encoded.len())
            .map_err(|_| MatrixError::OutOfSpace(format!("line {} encodes too large", index)))?;
        let plan = self.slots.plan(index, len)?;

        self.mark_open(io)?;
        io.write_all_at(plan.slot.pos as u64, &self.encoded)?;

        self.slots.commit(&plan);
        self.slots.sync_header(&mut self.header);
        self.header_dirty = true;
        self.cache.mark_clean();

        trace!(
            line = index,
            bytes = len,
            placement = ?plan.placement,
            pos = plan.slot.pos,
            "line written back"
        );
        Ok(())
    }

    /// Make line `index` the cached line, decoding it from disk
    fn load_line(&mut self, io: &mut dyn AccessMethod, index: usize) -> Result<()> {
        if self.cache.lookup(index) {
            return Ok(());
        }
        self.write_back(io)?;

        let slot = self.slots.get(index);
        let buf = self.cache.staging();
        if slot.is_empty() {
            buf.fill(0);
        } else {
            self.encoded.resize(slot.len as usize, 0);
            io.read_exact_at(slot.pos as u64, &mut self.encoded)
                .map_err(|e| truncated(e, "line payload"))?;
            codec::decode_into(&self.encoded, buf).map_err(|e| match e {
                MatrixError::DecodeCorruption(msg) => {
                    MatrixError::corrupt(format!("line {}: {}", index, msg))
                }
                other => other,
            })?;
        }
        self.cache.fill(index);
        Ok(())
    }
}

impl FormatCodec for Lc2Matrix {
    fn native_kind(&self) -> ElementKind {
        ElementKind::Int32
    }

    fn read(&mut self, io: &mut dyn AccessMethod, at: Address, out: SamplesMut<'_>) -> Result<()> {
        let out = int32_mut(out)?;
        let index = self.line_index(at);
        self.load_line(io, index)?;

        let col = at.col as usize;
        out.copy_from_slice(&self.cache.samples()[col..col + out.len()]);
        Ok(())
    }

    fn write(&mut self, io: &mut dyn AccessMethod, at: Address, data: Samples<'_>) -> Result<()> {
        let data = int32(data)?;
        let index = self.line_index(at);
        let col = at.col as usize;

        if col == 0 && data.len() == self.columns() {
            // Whole line: no need to decode the old content
            if self.cache.line() != Some(index) {
                self.write_back(io)?;
            }
            self.cache.replace(index).copy_from_slice(data);
        } else {
            self.load_line(io, index)?;
            self.cache.modify()[col..col + data.len()].copy_from_slice(data);
        }
        Ok(())
    }

    fn flush(&mut self, io: &mut dyn AccessMethod) -> Result<()> {
        self.write_back(io)?;
        if !self.header_dirty {
            return Ok(());
        }

        let mut header = self.header;
        self.slots.sync_header(&mut header);
        header.status = STATUS_CLEAN;

        io.write_all_at(header.poslen_pos as u64, &self.slots.to_bytes())?;
        io.write_all_at(0, &header.to_bytes())?;

        self.header = header;
        self.header_dirty = false;
        self.marked_open = false;

        debug!(
            used = header.used,
            free = header.free,
            free_cursor = header.free_pos,
            "LC2 table flushed"
        );
        Ok(())
    }
}
