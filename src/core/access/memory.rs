//! In-memory backend

use super::{AccessMethod, AccessStats};
use crate::error::{MatrixError, Result};

/// A growable byte buffer standing in for a file
#[derive(Debug, Default)]
pub struct MemoryAccess {
    data: Vec<u8>,
    writable: bool,
    closed: bool,
    stats: AccessStats,
}

impl MemoryAccess {
    /// Empty, writable store
    pub fn new() -> Self {
        Self::from_bytes(Vec::new(), true)
    }

    pub fn from_bytes(data: Vec<u8>, writable: bool) -> Self {
        MemoryAccess {
            data,
            writable,
            closed: false,
            stats: AccessStats::default(),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    fn check_open(&self) -> Result<()> {
        if self.closed {
            return Err(MatrixError::Io(std::io::Error::other(
                "memory store already closed",
            )));
        }
        Ok(())
    }
}

impl AccessMethod for MemoryAccess {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn is_writable(&self) -> bool {
        self.writable
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        self.check_open()?;
        let start = (offset as usize).min(self.data.len());
        let n = buf.len().min(self.data.len() - start);
        buf[..n].copy_from_slice(&self.data[start..start + n]);
        self.stats.record_read(n);
        Ok(n)
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<usize> {
        self.check_open()?;
        if !self.writable {
            return Err(MatrixError::ReadOnly("memory store is read-only"));
        }
        let start = offset as usize;
        let end = start + data.len();
        if end > self.data.len() {
            self.data.resize(end, 0);
        }
        self.data[start..end].copy_from_slice(data);
        self.stats.record_write(data.len());
        Ok(data.len())
    }

    fn set_len(&mut self, len: u64) -> Result<()> {
        self.check_open()?;
        if !self.writable {
            return Err(MatrixError::ReadOnly("memory store is read-only"));
        }
        self.data.resize(len as usize, 0);
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.check_open()?;
        self.stats.flushes += 1;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }

    fn stats(&self) -> AccessStats {
        self.stats
    }
}
