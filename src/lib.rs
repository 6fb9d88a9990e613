//! Specstore: storage engine for large collections of integer spectra
//!
//! A matrix is a three-dimensional array of samples addressed by
//! (level, line, column); each (level, line) pair is one spectrum of
//! `columns` channels. Callers open a path with a mode string and read or
//! write contiguous runs of one spectrum in whichever element kind suits
//! them (`i32`, `f32` or `f64`). The engine picks the backing store and the
//! on-disk format, converting samples on the fly when the format's native
//! kind differs.
//!
//! The native format is LC2: every spectrum is delta-encoded into a compact
//! byte stream and located through a position/length table, so sparse
//! gamma-gamma matrices take a fraction of their raw size while any
//! spectrum stays individually addressable. Text columns, gf2 spectra,
//! triangular matrices, shared-memory segments and raw binary dumps are
//! served through the same interface.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use specstore::{MatrixHandle, Result};
//!
//! fn main() -> Result<()> {
//!     // Four spectra of 16384 channels, LC2 compressed
//!     let mut m = MatrixHandle::open("gg.lc2", "w,4.16k.lc2")?;
//!
//!     m.put(0, 2, 100, &[5i32, 7, 7, 7, 7])?;
//!     let peak: Vec<f64> = m.get_vec(0, 2, 100, 5)?;
//!     assert_eq!(peak[1], 7.0);
//!
//!     m.close()?;
//!     Ok(())
//! }
//! ```
//!
//! Without a hint the format is detected from content:
//!
//! ```rust,no_run
//! use specstore::MatrixHandle;
//!
//! # fn main() -> specstore::Result<()> {
//! let mut m = MatrixHandle::open("spectrum.txt", "r")?;
//! println!("{} {}", m.format(), m.dimensions());
//! let line: Vec<i32> = m.get_line(0, 0)?;
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! - **Access**: file, System V shared memory or in-memory byte stores
//! - **Format registry**: closed set of formats with probes and lazy codec init
//! - **Conversion**: per-kind bindings between caller and native element kinds
//! - **LC2**: line codec, position/length table with a free cursor, one-line cache

pub mod core;

pub use self::core::{access, config, convert, error, format, handle, hint, lc2};

pub use access::{AccessMethod, AccessStats, FileAccess, MemoryAccess, ShmAccess};
pub use config::Config;
pub use convert::{Element, ElementKind};
pub use error::{MatrixError, Result};
pub use format::{lookup_by_id, lookup_by_name, Dimensions, FormatDescriptor, FormatId};
pub use handle::{MatrixHandle, MatrixInfo, MatrixStatus};
pub use hint::{parse_hint, parse_mode, AccessMode, FormatHint, OpenMode};
pub use lc2::{Lc2Stats, PosLen};

use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Open a matrix with a mode string such as `"r"`, `"a"` or `"w,1.4k.lc2"`
///
/// Shorthand for [`MatrixHandle::open`].
pub fn open<P: AsRef<Path>>(path: P, mode: &str) -> Result<MatrixHandle> {
    MatrixHandle::open(path, mode)
}

/// Builder for opening or creating matrices
///
/// # Examples
///
/// ```rust,no_run
/// use specstore::{FormatId, MatrixBuilder};
///
/// # fn main() -> specstore::Result<()> {
/// let mut m = MatrixBuilder::new()
///     .path("run42.lc2")
///     .truncate()
///     .format(FormatId::Lc2)
///     .dimensions(1, 4096, 4096)
///     .build()?;
///
/// m.put_line(0, 0, &vec![1i32; 4096])?;
/// m.close()?;
/// # Ok(())
/// # }
/// ```
pub struct MatrixBuilder {
    path: Option<PathBuf>,
    access: AccessMode,
    format: Option<FormatId>,
    levels: Option<u32>,
    lines: Option<u32>,
    columns: Option<u32>,
    version: Option<u32>,
    config: Config,
}

impl MatrixBuilder {
    /// Create a new builder; access defaults to update (`a`)
    pub fn new() -> Self {
        Self {
            path: None,
            access: AccessMode::Update,
            format: None,
            levels: None,
            lines: None,
            columns: None,
            version: None,
            config: Config::default(),
        }
    }

    pub fn path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.path = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn mode(mut self, access: AccessMode) -> Self {
        self.access = access;
        self
    }

    /// Open an existing store without write access
    pub fn read_only(mut self) -> Self {
        self.access = AccessMode::Read;
        self
    }

    /// Create the store, discarding any existing content
    pub fn truncate(mut self) -> Self {
        self.access = AccessMode::Write;
        self
    }

    pub fn format(mut self, format: FormatId) -> Self {
        self.format = Some(format);
        self
    }

    pub fn dimensions(mut self, levels: u32, lines: u32, columns: u32) -> Self {
        self.levels = Some(levels);
        self.lines = Some(lines);
        self.columns = Some(columns);
        self
    }

    /// Single spectrum of `columns` channels
    pub fn columns(mut self, columns: u32) -> Self {
        self.columns = Some(columns);
        self
    }

    pub fn version(mut self, version: u32) -> Self {
        self.version = Some(version);
        self
    }

    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    fn hint(&self) -> Result<Option<FormatHint>> {
        let Some(format) = self.format else {
            if self.columns.is_some() || self.version.is_some() {
                return Err(MatrixError::InvalidHint(
                    "dimensions or version given without a format".to_string(),
                ));
            }
            return Ok(None);
        };
        Ok(Some(FormatHint {
            format,
            levels: self.levels,
            lines: self.lines,
            columns: self.columns,
            version: self.version,
        }))
    }

    /// Open the matrix at the configured path
    pub fn build(self) -> Result<MatrixHandle> {
        let path = self.path.clone().ok_or_else(|| {
            MatrixError::Io(io::Error::new(io::ErrorKind::InvalidInput, "path must be set"))
        })?;
        let mode = OpenMode {
            access: self.access,
            hint: self.hint()?,
        };
        MatrixHandle::open_with(path, mode, &self.config)
    }

    /// Create the matrix on an in-memory store; the path is ignored
    pub fn build_in_memory(self) -> Result<MatrixHandle> {
        let hint = self.hint()?;
        MatrixHandle::from_access(Box::new(MemoryAccess::new()), hint, &self.config)
    }
}

impl Default for MatrixBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Copy every spectrum of `src` into `dst`
///
/// Both handles must have the same extents. Samples travel in the native
/// kind of `src`, so a copy out of an integer format stays exact whatever
/// `dst` stores. This is the basis of format conversion.
///
/// # Examples
///
/// ```rust,no_run
/// use specstore::{copy_matrix, MatrixHandle};
///
/// # fn main() -> specstore::Result<()> {
/// let mut src = MatrixHandle::open("old.mat", "r,1.4k.4k.le4")?;
/// let mut dst = MatrixHandle::open("new.lc2", "w,1.4k.4k.lc2")?;
/// copy_matrix(&mut src, &mut dst)?;
/// dst.close()?;
/// # Ok(())
/// # }
/// ```
pub fn copy_matrix(src: &mut MatrixHandle, dst: &mut MatrixHandle) -> Result<()> {
    let dims = src.dimensions();
    if dst.dimensions() != dims {
        return Err(MatrixError::InvalidDimensions {
            levels: dst.dimensions().levels,
            lines: dst.dimensions().lines,
            columns: dst.dimensions().columns,
            reason: "destination extents differ from the source",
        });
    }

    let kind = src.native_kind().ok_or(MatrixError::NoFormat)?;
    info!(
        from = %src.format(),
        to = %dst.format(),
        dims = %dims,
        kind = %kind,
        "copying matrix"
    );

    match kind {
        ElementKind::Int32 => copy_lines::<i32>(src, dst, dims),
        ElementKind::Float32 => copy_lines::<f32>(src, dst, dims),
        ElementKind::Float64 => copy_lines::<f64>(src, dst, dims),
    }
}

fn copy_lines<T: Element>(
    src: &mut MatrixHandle,
    dst: &mut MatrixHandle,
    dims: Dimensions,
) -> Result<()> {
    for level in 0..dims.levels {
        for line in 0..dims.lines {
            let samples: Vec<T> = src.get_line(level, line)?;
            // An empty spectrum only needs writing over existing content
            if is_empty_line(&samples) && is_empty_line(&dst.get_line::<T>(level, line)?) {
                continue;
            }
            dst.put_line(level, line, &samples)?;
        }
        debug!(level, "level copied");
    }
    dst.flush()
}

fn is_empty_line<T: Element>(samples: &[T]) -> bool {
    samples.iter().all(|s| *s == T::default())
}
