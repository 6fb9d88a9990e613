//! Byte-addressable backing stores
//!
//! An [`AccessMethod`] hides whether a matrix lives in a regular file, a
//! shared-memory segment or a plain buffer. Backends are selected at open
//! time by running an ordered list of probes; the first one that attaches
//! wins.

pub mod file;
pub mod memory;
pub mod shm;

pub use file::FileAccess;
pub use memory::MemoryAccess;
pub use shm::ShmAccess;

use crate::config::Config;
use crate::error::{MatrixError, Result};
use crate::hint::AccessMode;
use std::path::Path;
use tracing::debug;

/// I/O counters kept by every backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AccessStats {
    pub reads: u64,
    pub writes: u64,
    pub bytes_read: u64,
    pub bytes_written: u64,
    pub flushes: u64,
}

impl AccessStats {
    pub(crate) fn record_read(&mut self, bytes: usize) {
        self.reads += 1;
        self.bytes_read += bytes as u64;
    }

    pub(crate) fn record_write(&mut self, bytes: usize) {
        self.writes += 1;
        self.bytes_written += bytes as u64;
    }
}

/// Range I/O over a backing store
pub trait AccessMethod {
    /// Short backend name used in logs ("file", "shm", "memory")
    fn name(&self) -> &'static str;

    /// Current total size in bytes
    fn size(&self) -> u64;

    fn is_writable(&self) -> bool;

    /// Read up to `buf.len()` bytes at `offset`, returning the count.
    ///
    /// A short count means end of store.
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize>;

    /// Write `data` at `offset`, growing the store if needed
    fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<usize>;

    /// Truncate or extend the store
    fn set_len(&mut self, len: u64) -> Result<()>;

    fn flush(&mut self) -> Result<()>;

    /// Release the store. Further calls fail.
    fn close(&mut self) -> Result<()>;

    fn stats(&self) -> AccessStats;

    fn read_exact_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let n = self.read_at(offset, buf)?;
        if n < buf.len() {
            return Err(MatrixError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!(
                    "{}: wanted {} bytes at offset {}, got {}",
                    self.name(),
                    buf.len(),
                    offset,
                    n
                ),
            )));
        }
        Ok(())
    }

    fn write_all_at(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        let n = self.write_at(offset, data)?;
        if n != data.len() {
            return Err(MatrixError::Io(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                format!("{}: short write at offset {}", self.name(), offset),
            )));
        }
        Ok(())
    }
}

/// A backend probe: `Ok(None)` means "not mine, try the next one"
pub type AccessProbe = fn(&Path, AccessMode) -> Result<Option<Box<dyn AccessMethod>>>;

/// Backend probes in priority order
pub fn probes(config: &Config) -> Vec<(&'static str, AccessProbe)> {
    let mut list: Vec<(&'static str, AccessProbe)> = Vec::with_capacity(2);
    if config.shared_memory {
        list.push(("shm", shm::probe));
    }
    list.push(("file", file::probe));
    list
}

/// Attach the first backend that accepts `path`
pub fn attach(path: &Path, mode: AccessMode, config: &Config) -> Result<Box<dyn AccessMethod>> {
    let mut reasons = Vec::new();

    for (name, probe) in probes(config) {
        match probe(path, mode) {
            Ok(Some(access)) => {
                debug!(backend = name, path = %path.display(), "attached backend");
                return Ok(access);
            }
            Ok(None) => {}
            Err(e) => reasons.push(format!("{}: {}", name, e)),
        }
    }

    let reason = if reasons.is_empty() {
        "no backend accepted the path".to_string()
    } else {
        reasons.join("; ")
    };
    Err(MatrixError::open_failure(path, reason))
}
