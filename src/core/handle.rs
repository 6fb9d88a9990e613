//! The matrix handle
//!
//! A [`MatrixHandle`] owns one backing store and the codec state of the
//! format selected for it. Requests are bounds-checked before any I/O. The
//! codec is created on first access; requests in an element kind other than
//! the format's native kind go through a conversion binding installed once
//! per kind.

use crate::access::{self, AccessMethod, AccessStats};
use crate::config::Config;
use crate::convert::{convert_into, Binding, Element, ElementKind, Scratch};
use crate::error::{MatrixError, Result};
use crate::format::{self, Address, Dimensions, FormatCodec, FormatId, FormatState, Setup};
use crate::hint::{FormatHint, OpenMode};
use crate::lc2::{Lc2Stats, PosLen};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

/// Format and extents of a matrix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatrixInfo {
    pub format: FormatId,
    pub levels: u32,
    pub lines: u32,
    pub columns: u32,
    pub version: u32,
}

impl MatrixInfo {
    /// Info for `format` at its default version
    pub fn new(format: FormatId, dims: Dimensions) -> Self {
        MatrixInfo {
            format,
            levels: dims.levels,
            lines: dims.lines,
            columns: dims.columns,
            version: format.descriptor().default_version,
        }
    }

    pub fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    pub fn dimensions(&self) -> Dimensions {
        Dimensions::new(self.levels, self.lines, self.columns)
    }
}

/// Runtime state reported alongside [`MatrixInfo`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MatrixStatus {
    pub dirty: bool,
    pub dimensions_locked: bool,
    pub writable: bool,
    pub backend: &'static str,
}

enum CodecState {
    Unbound,
    Bound(FormatState),
    /// Lazy init failed; the handle refuses further access
    Invalid,
}

/// Format, extents and lock state settled at open time
struct Resolved {
    format: FormatId,
    dims: Dimensions,
    version: u32,
    locked: bool,
}

impl Resolved {
    fn unknown() -> Self {
        Resolved {
            format: FormatId::Unknown,
            dims: Dimensions::default(),
            version: 0,
            locked: false,
        }
    }
}

/// An open matrix
pub struct MatrixHandle {
    path: Option<PathBuf>,
    format: FormatId,
    dims: Dimensions,
    version: u32,
    dims_locked: bool,
    dirty: bool,
    access: Box<dyn AccessMethod>,
    codec: CodecState,
    bindings: [Binding; 3],
    scratch: Scratch,
    closed: bool,
}

impl MatrixHandle {
    /// Open `path` with a mode string such as `"r"` or `"w,4.16k.lc2"`
    pub fn open<P: AsRef<Path>>(path: P, mode: &str) -> Result<Self> {
        Self::open_with(path, mode.parse()?, &Config::default())
    }

    /// Open with an already parsed mode and explicit configuration
    pub fn open_with<P: AsRef<Path>>(path: P, mode: OpenMode, config: &Config) -> Result<Self> {
        let path = path.as_ref();
        let access = access::attach(path, mode.access, config)?;

        if mode.access.is_writable() && !access.is_writable() {
            return Err(MatrixError::open_failure(
                path,
                format!("{} backend is read-only", access.name()),
            ));
        }

        let mut handle = Self::from_access(access, mode.hint, config)
            .map_err(|e| match e {
                MatrixError::OpenFailure { reason, .. } => MatrixError::open_failure(path, reason),
                other => other,
            })?;
        handle.path = Some(path.to_path_buf());

        info!(
            path = %path.display(),
            backend = handle.access.name(),
            format = %handle.format,
            dims = %handle.dims,
            "opened matrix"
        );
        Ok(handle)
    }

    /// Wrap an attached backend, detecting or applying the format
    pub fn from_access(
        mut access: Box<dyn AccessMethod>,
        hint: Option<FormatHint>,
        config: &Config,
    ) -> Result<Self> {
        let resolved = resolve(access.as_mut(), hint, config)?;
        debug!(
            format = %resolved.format,
            dims = %resolved.dims,
            locked = resolved.locked,
            "format resolved"
        );

        Ok(MatrixHandle {
            path: None,
            format: resolved.format,
            dims: resolved.dims,
            version: resolved.version,
            dims_locked: resolved.locked,
            dirty: false,
            access,
            codec: CodecState::Unbound,
            bindings: [Binding::Unbound; 3],
            scratch: Scratch::default(),
            closed: false,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn format(&self) -> FormatId {
        self.format
    }

    pub fn dimensions(&self) -> Dimensions {
        self.dims
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn dimensions_locked(&self) -> bool {
        self.dims_locked
    }

    pub fn is_writable(&self) -> bool {
        self.access.is_writable() && self.format.descriptor().writable
    }

    pub fn info(&self) -> MatrixInfo {
        MatrixInfo {
            format: self.format,
            levels: self.dims.levels,
            lines: self.dims.lines,
            columns: self.dims.columns,
            version: self.version,
        }
    }

    pub fn status(&self) -> MatrixStatus {
        MatrixStatus {
            dirty: self.dirty,
            dimensions_locked: self.dims_locked,
            writable: self.is_writable(),
            backend: self.access.name(),
        }
    }

    /// Info and status together
    pub fn get_info(&self) -> (MatrixInfo, MatrixStatus) {
        (self.info(), self.status())
    }

    /// Counters of the backing store
    pub fn access_stats(&self) -> AccessStats {
        self.access.stats()
    }

    /// Element kind the format stores, if a format is selected
    pub fn native_kind(&self) -> Option<ElementKind> {
        self.format.descriptor().native
    }

    /// Change format, extents or version
    ///
    /// Identical info is a no-op. Otherwise buffered data is flushed and the
    /// codec state is dropped so the next access initialises the new format.
    /// Fails with [`MatrixError::DimensionLocked`] once data has been written.
    pub fn set_info(&mut self, info: &MatrixInfo) -> Result<()> {
        if *info == self.info() {
            return Ok(());
        }
        if self.dims_locked {
            return Err(MatrixError::DimensionLocked);
        }
        if info.format == FormatId::Invalid {
            return Err(MatrixError::InvalidHint(
                "the invalid format cannot be selected".to_string(),
            ));
        }

        self.release_codec()?;
        debug!(
            from = %self.format,
            to = %info.format,
            dims = %info.dimensions(),
            "matrix info changed"
        );
        self.format = info.format;
        self.dims = info.dimensions();
        self.version = info.version;
        Ok(())
    }

    /// Change extents, keeping format and version
    pub fn set_dimensions(&mut self, dims: Dimensions) -> Result<()> {
        let mut info = self.info();
        info.levels = dims.levels;
        info.lines = dims.lines;
        info.columns = dims.columns;
        self.set_info(&info)
    }

    /// Change format at its default version, keeping extents
    pub fn set_format(&mut self, format: FormatId) -> Result<()> {
        self.set_info(&MatrixInfo::new(format, self.dims))
    }

    fn release_codec(&mut self) -> Result<()> {
        if let CodecState::Bound(state) = &mut self.codec {
            state.flush(self.access.as_mut())?;
        }
        self.codec = CodecState::Unbound;
        self.bindings = [Binding::Unbound; 3];
        self.scratch.clear();
        Ok(())
    }

    fn check_format(&self) -> Result<()> {
        match (self.format, &self.codec) {
            (FormatId::Invalid, _) | (_, CodecState::Invalid) => Err(MatrixError::InvalidHandle),
            (FormatId::Unknown, _) => Err(MatrixError::NoFormat),
            _ => Ok(()),
        }
    }

    fn check_bounds(&self, level: u32, line: u32, col: u32, num: usize) -> Result<()> {
        let d = self.dims;
        let end = col as u64 + num as u64;
        if level >= d.levels || line >= d.lines || end > d.columns as u64 {
            return Err(MatrixError::OutOfRange {
                level,
                line,
                col,
                num,
                levels: d.levels,
                lines: d.lines,
                columns: d.columns,
            });
        }
        Ok(())
    }

    fn check_writable(&self) -> Result<()> {
        if !self.access.is_writable() {
            return Err(MatrixError::ReadOnly("matrix was opened read-only"));
        }
        if !self.format.descriptor().writable {
            return Err(MatrixError::ReadOnly("format cannot be written"));
        }
        Ok(())
    }

    /// Create the codec state on first access
    fn ensure_codec(&mut self) -> Result<()> {
        match self.codec {
            CodecState::Bound(_) => return Ok(()),
            CodecState::Invalid => return Err(MatrixError::InvalidHandle),
            CodecState::Unbound => {}
        }
        self.dims.validate()?;

        let setup = Setup {
            format: self.format,
            dims: self.dims,
            version: self.version,
            writable: self.access.is_writable(),
        };
        match FormatState::init(self.access.as_mut(), &setup) {
            Ok(state) => {
                debug!(format = %self.format, dims = %self.dims, "codec initialised");
                self.codec = CodecState::Bound(state);
                Ok(())
            }
            Err(e) => {
                warn!(format = %self.format, "codec initialisation failed: {}", e);
                self.codec = CodecState::Invalid;
                self.format = FormatId::Invalid;
                Err(e)
            }
        }
    }

    /// Install the binding for requests of `kind`
    fn bind(&mut self, kind: ElementKind) -> Result<Binding> {
        let current = self.bindings[kind.index()];
        if current != Binding::Unbound {
            return Ok(current);
        }
        self.ensure_codec()?;

        let native = match &self.codec {
            CodecState::Bound(state) => state.native_kind(),
            _ => return Err(MatrixError::InvalidHandle),
        };
        let binding = Binding::for_kinds(kind, native);
        if let Binding::Converted(native) = binding {
            debug!(requested = %kind, native = %native, "conversion installed");
        }
        self.bindings[kind.index()] = binding;
        Ok(binding)
    }

    /// Read `out.len()` samples of one spectrum starting at column `col`
    pub fn get<T: Element>(&mut self, level: u32, line: u32, col: u32, out: &mut [T]) -> Result<()> {
        self.check_format()?;
        self.check_bounds(level, line, col, out.len())?;
        if out.is_empty() {
            return Ok(());
        }
        let binding = self.bind(T::KIND)?;

        let at = Address { level, line, col };
        let MatrixHandle {
            codec,
            access,
            scratch,
            ..
        } = &mut *self;
        let CodecState::Bound(state) = codec else {
            return Err(MatrixError::InvalidHandle);
        };

        match binding {
            Binding::Native => state.read(access.as_mut(), at, T::samples_mut(out)),
            Binding::Converted(native) => {
                state.read(access.as_mut(), at, scratch.buf_mut(native, out.len()))?;
                convert_into(scratch.view(native, out.len()), out);
                Ok(())
            }
            Binding::Unbound => Err(MatrixError::InvalidHandle),
        }
    }

    /// Read `num` samples into a new vector
    pub fn get_vec<T: Element>(&mut self, level: u32, line: u32, col: u32, num: usize) -> Result<Vec<T>> {
        self.check_format()?;
        self.check_bounds(level, line, col, num)?;
        let mut out = vec![T::default(); num];
        self.get(level, line, col, &mut out)?;
        Ok(out)
    }

    /// Read a whole spectrum
    pub fn get_line<T: Element>(&mut self, level: u32, line: u32) -> Result<Vec<T>> {
        let columns = self.dims.columns as usize;
        self.get_vec(level, line, 0, columns)
    }

    /// Write `data` into one spectrum starting at column `col`
    ///
    /// Any accepted put marks the handle dirty, even an empty one.
    pub fn put<T: Element>(&mut self, level: u32, line: u32, col: u32, data: &[T]) -> Result<()> {
        self.check_format()?;
        self.check_bounds(level, line, col, data.len())?;
        self.check_writable()?;
        if data.is_empty() {
            self.dirty = true;
            return Ok(());
        }
        let binding = self.bind(T::KIND)?;
        self.dirty = true;

        let at = Address { level, line, col };
        let MatrixHandle {
            codec,
            access,
            scratch,
            ..
        } = &mut *self;
        let CodecState::Bound(state) = codec else {
            return Err(MatrixError::InvalidHandle);
        };

        match binding {
            Binding::Native => state.write(access.as_mut(), at, T::samples(data))?,
            Binding::Converted(native) => {
                let samples = scratch.load(native, data);
                state.write(access.as_mut(), at, samples)?
            }
            Binding::Unbound => return Err(MatrixError::InvalidHandle),
        }

        if self.format.descriptor().fixed_dims {
            self.dims_locked = true;
        }
        Ok(())
    }

    /// Write a whole spectrum
    pub fn put_line<T: Element>(&mut self, level: u32, line: u32, data: &[T]) -> Result<()> {
        if data.len() != self.dims.columns as usize {
            return Err(MatrixError::OutOfRange {
                level,
                line,
                col: 0,
                num: data.len(),
                levels: self.dims.levels,
                lines: self.dims.lines,
                columns: self.dims.columns,
            });
        }
        self.put(level, line, 0, data)
    }

    /// Write buffered state to the backing store
    pub fn flush(&mut self) -> Result<()> {
        if let CodecState::Bound(state) = &mut self.codec {
            state.flush(self.access.as_mut())?;
        }
        if self.dirty {
            self.access.flush()?;
            self.dirty = false;
        }
        Ok(())
    }

    /// Flush and release the backing store
    ///
    /// The store is closed even when the flush fails; the first error is
    /// returned.
    pub fn close(mut self) -> Result<()> {
        self.closed = true;
        let flushed = self.flush();
        let closed = self.access.close();
        info!(
            path = ?self.path,
            ok = flushed.is_ok() && closed.is_ok(),
            "closed matrix"
        );
        flushed.and(closed)
    }

    /// Space accounting when the format is LC2 and the codec is live
    pub fn lc2_stats(&self) -> Option<Lc2Stats> {
        match &self.codec {
            CodecState::Bound(state) => state.as_lc2().map(|m| m.stats()),
            _ => None,
        }
    }

    /// Slot of spectrum (level, line) when the format is LC2
    pub fn lc2_slot(&self, level: u32, line: u32) -> Option<PosLen> {
        if level >= self.dims.levels || line >= self.dims.lines {
            return None;
        }
        let index = level as usize * self.dims.lines as usize + line as usize;
        match &self.codec {
            CodecState::Bound(state) => state.as_lc2().and_then(|m| m.slot(index)),
            _ => None,
        }
    }
}

impl Drop for MatrixHandle {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        if self.dirty {
            warn!(path = ?self.path, "matrix dropped without close; flushing");
        }
        if let Err(e) = self.flush() {
            error!(path = ?self.path, "flush on drop failed: {}", e);
        }
        if let Err(e) = self.access.close() {
            error!(path = ?self.path, "close on drop failed: {}", e);
        }
    }
}

impl std::fmt::Debug for MatrixHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MatrixHandle")
            .field("path", &self.path)
            .field("format", &self.format)
            .field("dims", &self.dims)
            .field("version", &self.version)
            .field("dims_locked", &self.dims_locked)
            .field("dirty", &self.dirty)
            .field("backend", &self.access.name())
            .finish()
    }
}

/// Settle format and extents for a freshly attached store
fn resolve(
    access: &mut dyn AccessMethod,
    hint: Option<FormatHint>,
    config: &Config,
) -> Result<Resolved> {
    let size = access.size();

    if access.name() == "shm" {
        return resolve_shared(size, hint);
    }

    if size == 0 {
        return Ok(match hint {
            Some(hint) => {
                let dims = match hint.columns {
                    Some(_) => format::infer_dimensions(
                        hint.format,
                        0,
                        hint.levels,
                        hint.lines,
                        hint.columns,
                    )?,
                    None => Dimensions::default(),
                };
                Resolved {
                    format: hint.format,
                    dims,
                    version: hint
                        .version
                        .unwrap_or(hint.format.descriptor().default_version),
                    locked: false,
                }
            }
            None => Resolved::unknown(),
        });
    }

    match hint {
        Some(hint) => resolve_hinted(access, hint, config),
        None => match format::detect(access, config)? {
            Some(found) => Ok(Resolved {
                format: found.format,
                dims: found.dims,
                version: found.version,
                locked: found.format.descriptor().stores_dims,
            }),
            None => Err(MatrixError::open_failure(
                "",
                "content not recognised by any probe and no format hint given",
            )),
        },
    }
}

fn resolve_shared(size: u64, hint: Option<FormatHint>) -> Result<Resolved> {
    let format = FormatId::Shm;
    if let Some(hint) = hint {
        if hint.format != format {
            return Err(MatrixError::FormatMismatch {
                requested: hint.to_string(),
                found: format.name().to_string(),
            });
        }
    }
    let hint = hint.unwrap_or_else(|| FormatHint::new(format));
    let dims = format::infer_dimensions(format, size, hint.levels, hint.lines, hint.columns)?;
    Ok(Resolved {
        format,
        dims,
        version: hint.version.unwrap_or(format.descriptor().default_version),
        locked: true,
    })
}

fn resolve_hinted(
    access: &mut dyn AccessMethod,
    hint: FormatHint,
    config: &Config,
) -> Result<Resolved> {
    let descriptor = hint.format.descriptor();

    let Some(probe) = descriptor.probe else {
        let dims = format::infer_dimensions(
            hint.format,
            access.size(),
            hint.levels,
            hint.lines,
            hint.columns,
        )?;
        return Ok(Resolved {
            format: hint.format,
            dims,
            version: hint.version.unwrap_or(descriptor.default_version),
            locked: false,
        });
    };

    let Some(found) = probe(access)? else {
        let actual = format::detect(access, config)?
            .map(|d| d.format.name())
            .unwrap_or("unrecognised content");
        return Err(MatrixError::FormatMismatch {
            requested: hint.to_string(),
            found: actual.to_string(),
        });
    };

    let dims = hint
        .dimensions()
        .map(|(levels, lines, columns)| Dimensions::new(levels, lines, columns))
        .unwrap_or(found.dims);
    if descriptor.fixed_dims && dims != found.dims {
        return Err(MatrixError::FormatMismatch {
            requested: format!("{} {}", hint.format, dims),
            found: format!("{} {}", found.format, found.dims),
        });
    }

    Ok(Resolved {
        format: hint.format,
        dims,
        version: hint.version.unwrap_or(found.version),
        locked: descriptor.stores_dims,
    })
}
