//! Read-only System V shared-memory backend
//!
//! A segment is found through a small descriptor file:
//!
//! ```text
//! SPECSTORE-SHM
//! 1234567
//! ```
//!
//! The first line is the magic string, the second the decimal segment id.
//! The segment is attached read-only for the lifetime of the handle.

use super::{AccessMethod, AccessStats};
use crate::error::{MatrixError, Result};
use crate::hint::AccessMode;
use std::io::Read;
use std::path::Path;

pub const SHM_MAGIC: &str = "SPECSTORE-SHM";

/// Longest descriptor we bother to look at
const MAX_DESCRIPTOR_LEN: usize = 256;

/// Parse a descriptor file body into a segment id
pub fn parse_descriptor(text: &str) -> Option<i32> {
    let mut lines = text.lines();
    if lines.next()?.trim_end() != SHM_MAGIC {
        return None;
    }
    lines.next()?.trim().parse().ok()
}

/// Write a descriptor file for `segment_id`
pub fn write_descriptor<P: AsRef<Path>>(path: P, segment_id: i32) -> Result<()> {
    std::fs::write(path, format!("{}\n{}\n", SHM_MAGIC, segment_id))?;
    Ok(())
}

pub(crate) fn probe(path: &Path, _mode: AccessMode) -> Result<Option<Box<dyn AccessMethod>>> {
    let file = match std::fs::File::open(path) {
        Ok(f) => f,
        Err(_) => return Ok(None),
    };

    let mut head = Vec::with_capacity(MAX_DESCRIPTOR_LEN);
    file.take(MAX_DESCRIPTOR_LEN as u64).read_to_end(&mut head)?;
    if !head.starts_with(SHM_MAGIC.as_bytes()) {
        return Ok(None);
    }

    let text = String::from_utf8_lossy(&head);
    let id = parse_descriptor(&text).ok_or_else(|| {
        MatrixError::open_failure(path, "shared-memory descriptor without a segment id")
    })?;

    attach_boxed(id).map(Some)
}

#[cfg(unix)]
fn attach_boxed(id: i32) -> Result<Box<dyn AccessMethod>> {
    Ok(Box::new(ShmAccess::attach(id)?))
}

#[cfg(not(unix))]
fn attach_boxed(id: i32) -> Result<Box<dyn AccessMethod>> {
    ShmAccess::attach(id)?;
    Err(MatrixError::Io(std::io::ErrorKind::Unsupported.into()))
}

/// An attached shared-memory segment
#[cfg(unix)]
pub struct ShmAccess {
    id: i32,
    addr: *const u8,
    size: usize,
    stats: AccessStats,
}

#[cfg(unix)]
impl ShmAccess {
    /// Attach segment `id` read-only
    pub fn attach(id: i32) -> Result<Self> {
        // SAFETY: shmid_ds is plain old data; IPC_STAT fills it in.
        let mut ds: libc::shmid_ds = unsafe { std::mem::zeroed() };
        if unsafe { libc::shmctl(id, libc::IPC_STAT, &mut ds) } < 0 {
            return Err(std::io::Error::last_os_error().into());
        }
        let size = ds.shm_segsz as usize;

        // SAFETY: a null address lets the kernel pick the mapping; the result
        // is checked against the documented (void *)-1 failure value.
        let addr = unsafe { libc::shmat(id, std::ptr::null(), libc::SHM_RDONLY) };
        if addr as isize == -1 {
            return Err(std::io::Error::last_os_error().into());
        }

        tracing::debug!(segment = id, size, "attached shared-memory segment");

        Ok(ShmAccess {
            id,
            addr: addr as *const u8,
            size,
            stats: AccessStats::default(),
        })
    }

    pub fn segment_id(&self) -> i32 {
        self.id
    }

    fn detach(&mut self) -> Result<()> {
        if self.addr.is_null() {
            return Ok(());
        }
        // SAFETY: addr came from a successful shmat and is detached once.
        let rc = unsafe { libc::shmdt(self.addr as *const libc::c_void) };
        self.addr = std::ptr::null();
        if rc < 0 {
            return Err(std::io::Error::last_os_error().into());
        }
        Ok(())
    }
}

#[cfg(unix)]
impl AccessMethod for ShmAccess {
    fn name(&self) -> &'static str {
        "shm"
    }

    fn size(&self) -> u64 {
        self.size as u64
    }

    fn is_writable(&self) -> bool {
        false
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        if self.addr.is_null() {
            return Err(MatrixError::Io(std::io::Error::other(
                "segment already detached",
            )));
        }
        let start = (offset as usize).min(self.size);
        let n = buf.len().min(self.size - start);
        // SAFETY: the segment is mapped for `size` bytes while attached.
        let segment = unsafe { std::slice::from_raw_parts(self.addr, self.size) };
        buf[..n].copy_from_slice(&segment[start..start + n]);
        self.stats.record_read(n);
        Ok(n)
    }

    fn write_at(&mut self, _offset: u64, _data: &[u8]) -> Result<usize> {
        Err(MatrixError::ReadOnly("shared-memory segments are read-only"))
    }

    fn set_len(&mut self, _len: u64) -> Result<()> {
        Err(MatrixError::ReadOnly("shared-memory segments are read-only"))
    }

    fn flush(&mut self) -> Result<()> {
        self.stats.flushes += 1;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.detach()
    }

    fn stats(&self) -> AccessStats {
        self.stats
    }
}

#[cfg(unix)]
impl Drop for ShmAccess {
    fn drop(&mut self) {
        if let Err(e) = self.detach() {
            tracing::error!(segment = self.id, "failed to detach segment: {}", e);
        }
    }
}

/// Shared memory is unavailable off unix; attaching always fails
#[cfg(not(unix))]
pub struct ShmAccess;

#[cfg(not(unix))]
impl ShmAccess {
    pub fn attach(_id: i32) -> Result<Self> {
        Err(MatrixError::Io(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "shared memory is not supported on this platform",
        )))
    }
}
