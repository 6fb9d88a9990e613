//! Plain seekable-file backend

use super::{AccessMethod, AccessStats};
use crate::error::{MatrixError, Result};
use crate::hint::AccessMode;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Disk-backed matrix storage
pub struct FileAccess {
    file: Option<File>,
    path: PathBuf,
    size: u64,
    writable: bool,
    stats: AccessStats,
}

impl FileAccess {
    /// Open `path` according to `mode`
    pub fn open<P: AsRef<Path>>(path: P, mode: AccessMode) -> Result<Self> {
        let mut options = OpenOptions::new();
        options.read(true);
        match mode {
            AccessMode::Read => {}
            AccessMode::Write => {
                options.write(true).create(true).truncate(true);
            }
            AccessMode::Update => {
                options.write(true).create(true);
            }
        }

        let file = options.open(&path)?;
        let size = file.metadata()?.len();

        Ok(FileAccess {
            file: Some(file),
            path: path.as_ref().to_path_buf(),
            size,
            writable: mode.is_writable(),
            stats: AccessStats::default(),
        })
    }

    /// Get file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn file(&mut self) -> Result<&mut File> {
        self.file
            .as_mut()
            .ok_or_else(|| MatrixError::Io(std::io::Error::other("file already closed")))
    }
}

pub(crate) fn probe(path: &Path, mode: AccessMode) -> Result<Option<Box<dyn AccessMethod>>> {
    Ok(Some(Box::new(FileAccess::open(path, mode)?)))
}

impl AccessMethod for FileAccess {
    fn name(&self) -> &'static str {
        "file"
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn is_writable(&self) -> bool {
        self.writable
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let file = self.file()?;
        file.seek(SeekFrom::Start(offset))?;

        let mut total = 0;
        while total < buf.len() {
            match file.read(&mut buf[total..]) {
                Ok(0) => break,
                Ok(n) => total += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }

        self.stats.record_read(total);
        Ok(total)
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<usize> {
        if !self.writable {
            return Err(MatrixError::ReadOnly("file opened read-only"));
        }
        let file = self.file()?;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)?;

        self.size = self.size.max(offset + data.len() as u64);
        self.stats.record_write(data.len());
        Ok(data.len())
    }

    fn set_len(&mut self, len: u64) -> Result<()> {
        if !self.writable {
            return Err(MatrixError::ReadOnly("file opened read-only"));
        }
        self.file()?.set_len(len)?;
        self.size = len;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        let writable = self.writable;
        let file = self.file()?;
        if writable {
            file.flush()?;
            file.sync_data()?;
        }
        self.stats.flushes += 1;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if let Some(mut file) = self.file.take() {
            if self.writable {
                file.flush()?;
                file.sync_all()?;
            }
        }
        Ok(())
    }

    fn stats(&self) -> AccessStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_write_and_read_back() {
        let temp = NamedTempFile::new().unwrap();
        let mut access = FileAccess::open(temp.path(), AccessMode::Update).unwrap();

        access.write_all_at(10, b"Hello").unwrap();
        assert_eq!(access.size(), 15);

        let mut buf = [0u8; 5];
        access.read_exact_at(10, &mut buf).unwrap();
        assert_eq!(&buf, b"Hello");

        // The gap before the first write reads back as zeros
        let mut gap = [0xFFu8; 10];
        access.read_exact_at(0, &mut gap).unwrap();
        assert_eq!(gap, [0u8; 10]);
    }

    #[test]
    fn test_short_read_at_eof() {
        let temp = NamedTempFile::new().unwrap();
        std::fs::write(temp.path(), b"abc").unwrap();
        let mut access = FileAccess::open(temp.path(), AccessMode::Read).unwrap();

        let mut buf = [0u8; 8];
        assert_eq!(access.read_at(1, &mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], b"bc");
    }

    #[test]
    fn test_read_only_rejects_writes() {
        let temp = NamedTempFile::new().unwrap();
        let mut access = FileAccess::open(temp.path(), AccessMode::Read).unwrap();
        assert!(matches!(
            access.write_at(0, b"x"),
            Err(MatrixError::ReadOnly(_))
        ));
        assert!(matches!(access.set_len(0), Err(MatrixError::ReadOnly(_))));
    }

    #[test]
    fn test_write_mode_truncates() {
        let temp = NamedTempFile::new().unwrap();
        std::fs::write(temp.path(), b"old content").unwrap();

        let access = FileAccess::open(temp.path(), AccessMode::Write).unwrap();
        assert_eq!(access.size(), 0);
    }

    #[test]
    fn test_closed_file_errors() {
        let temp = NamedTempFile::new().unwrap();
        let mut access = FileAccess::open(temp.path(), AccessMode::Update).unwrap();
        access.close().unwrap();

        let mut buf = [0u8; 1];
        assert!(access.read_at(0, &mut buf).is_err());
    }

    #[test]
    fn test_stats_count_operations() {
        let temp = NamedTempFile::new().unwrap();
        let mut access = FileAccess::open(temp.path(), AccessMode::Update).unwrap();
        access.write_all_at(0, &[1, 2, 3, 4]).unwrap();
        let mut buf = [0u8; 4];
        access.read_exact_at(0, &mut buf).unwrap();

        let stats = access.stats();
        assert_eq!(stats.writes, 1);
        assert_eq!(stats.reads, 1);
        assert_eq!(stats.bytes_written, 4);
        assert_eq!(stats.bytes_read, 4);
    }
}
