//! Format registry
//!
//! Every supported encoding has one immutable [`FormatDescriptor`] in a
//! process-wide table. Descriptors are looked up by numeric id or by name,
//! drive auto-detection through their optional probe, and create per-handle
//! codec state through their lazy-init routine.
//!
//! The set of formats is closed: [`FormatState`] has one variant per codec
//! family and dispatches the [`FormatCodec`] operations with a `match`.

pub mod gf2;
pub mod raw;
pub mod sniff;
pub mod text;
pub mod tri;

use crate::access::AccessMethod;
use crate::config::{Config, HEURISTIC_PROBE};
use crate::convert::{ElementKind, Samples, SamplesMut};
use crate::error::{MatrixError, Result};
use crate::lc2::{self, Lc2Matrix};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

use gf2::Gf2Spectrum;
use raw::RawMatrix;
use text::TextMatrix;
use tri::TriMatrix;

/// Identifier of a registered format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum FormatId {
    Unknown,
    Invalid,
    Lc2,
    Txt,
    Gf2,
    Tri,
    Shm,
    Le2,
    Leu2,
    Le4,
    Lf4,
    Lf8,
    Be2,
    Beu2,
    Be4,
    Bf4,
    Bf8,
}

impl FormatId {
    pub fn descriptor(self) -> &'static FormatDescriptor {
        &DESCRIPTORS[self as usize]
    }

    pub fn code(self) -> u32 {
        self as u32
    }

    pub fn name(self) -> &'static str {
        self.descriptor().name
    }

    pub fn is_known(self) -> bool {
        !matches!(self, FormatId::Unknown | FormatId::Invalid)
    }
}

impl fmt::Display for FormatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl From<FormatId> for String {
    fn from(id: FormatId) -> String {
        id.name().to_string()
    }
}

impl TryFrom<String> for FormatId {
    type Error = MatrixError;

    fn try_from(name: String) -> Result<Self> {
        lookup_by_name(&name)
            .map(|d| d.id)
            .ok_or_else(|| MatrixError::InvalidHint(format!("unknown format '{}'", name)))
    }
}

/// Logical extents of a matrix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Dimensions {
    pub levels: u32,
    pub lines: u32,
    pub columns: u32,
}

impl Dimensions {
    pub const fn new(levels: u32, lines: u32, columns: u32) -> Self {
        Dimensions {
            levels,
            lines,
            columns,
        }
    }

    /// Number of spectra (levels × lines)
    pub fn spectra(&self) -> u64 {
        self.levels as u64 * self.lines as u64
    }

    /// Total number of samples
    pub fn samples(&self) -> u64 {
        self.spectra() * self.columns as u64
    }

    pub fn is_empty(&self) -> bool {
        self.levels == 0 || self.lines == 0 || self.columns == 0
    }

    pub fn validate(&self) -> Result<()> {
        if self.is_empty() {
            return Err(self.invalid("every extent must be at least 1"));
        }
        Ok(())
    }

    pub(crate) fn invalid(&self, reason: &'static str) -> MatrixError {
        MatrixError::InvalidDimensions {
            levels: self.levels,
            lines: self.lines,
            columns: self.columns,
            reason,
        }
    }
}

impl fmt::Display for Dimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}x{}", self.levels, self.lines, self.columns)
    }
}

/// Position of the first requested sample
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Address {
    pub level: u32,
    pub line: u32,
    pub col: u32,
}

impl Address {
    /// Index of the spectrum this address falls in
    pub fn spectrum(&self, dims: &Dimensions) -> u64 {
        self.level as u64 * dims.lines as u64 + self.line as u64
    }

    /// Flat sample index, row-major over (level, line, column)
    pub fn sample(&self, dims: &Dimensions) -> u64 {
        self.spectrum(dims) * dims.columns as u64 + self.col as u64
    }
}

/// What a probe found in a file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Detected {
    pub format: FormatId,
    pub dims: Dimensions,
    pub version: u32,
}

/// Everything a lazy-init routine needs to set up per-handle state
#[derive(Debug, Clone, Copy)]
pub struct Setup {
    pub format: FormatId,
    pub dims: Dimensions,
    pub version: u32,
    pub writable: bool,
}

pub type ProbeFn = fn(&mut dyn AccessMethod) -> Result<Option<Detected>>;

pub type InitFn = fn(&mut dyn AccessMethod, &Setup) -> Result<FormatState>;

/// Static description of one encoding
#[derive(Debug)]
pub struct FormatDescriptor {
    pub id: FormatId,
    pub name: &'static str,
    /// Element kind the codec reads and writes natively
    pub native: Option<ElementKind>,
    /// Bytes per sample on disk, 0 when variable
    pub width: usize,
    pub writable: bool,
    /// Extents may not change once data is written
    pub fixed_dims: bool,
    /// The file records its own extents
    pub stores_dims: bool,
    pub probe: Option<ProbeFn>,
    pub init: Option<InitFn>,
    pub default_version: u32,
}

macro_rules! raw_descriptor {
    ($id:ident, $name:literal, $kind:ident, $width:literal) => {
        FormatDescriptor {
            id: FormatId::$id,
            name: $name,
            native: Some(ElementKind::$kind),
            width: $width,
            writable: true,
            fixed_dims: true,
            stores_dims: false,
            probe: None,
            init: Some(raw::init),
            default_version: 1,
        }
    };
}

/// The registry, indexed by `FormatId as usize`
pub static DESCRIPTORS: [FormatDescriptor; 17] = [
    FormatDescriptor {
        id: FormatId::Unknown,
        name: "unknown",
        native: None,
        width: 0,
        writable: false,
        fixed_dims: false,
        stores_dims: false,
        probe: None,
        init: None,
        default_version: 0,
    },
    FormatDescriptor {
        id: FormatId::Invalid,
        name: "invalid",
        native: None,
        width: 0,
        writable: false,
        fixed_dims: false,
        stores_dims: false,
        probe: None,
        init: None,
        default_version: 0,
    },
    FormatDescriptor {
        id: FormatId::Lc2,
        name: "lc2",
        native: Some(ElementKind::Int32),
        width: 0,
        writable: true,
        fixed_dims: true,
        stores_dims: true,
        probe: Some(lc2::probe),
        init: Some(lc2::init),
        default_version: lc2::LC2_VERSION,
    },
    FormatDescriptor {
        id: FormatId::Txt,
        name: "txt",
        native: Some(ElementKind::Float64),
        width: 0,
        writable: true,
        fixed_dims: false,
        stores_dims: false,
        probe: Some(text::probe),
        init: Some(text::init),
        default_version: 1,
    },
    FormatDescriptor {
        id: FormatId::Gf2,
        name: "gf2",
        native: Some(ElementKind::Float32),
        width: 4,
        writable: true,
        fixed_dims: true,
        stores_dims: true,
        probe: Some(gf2::probe),
        init: Some(gf2::init),
        default_version: 1,
    },
    FormatDescriptor {
        id: FormatId::Tri,
        name: "tri",
        native: Some(ElementKind::Int32),
        width: 4,
        writable: true,
        fixed_dims: true,
        stores_dims: false,
        probe: None,
        init: Some(tri::init),
        default_version: 1,
    },
    FormatDescriptor {
        id: FormatId::Shm,
        name: "shm",
        native: Some(ElementKind::Int32),
        width: 4,
        writable: false,
        fixed_dims: true,
        stores_dims: false,
        probe: None,
        init: Some(raw::init),
        default_version: 1,
    },
    raw_descriptor!(Le2, "le2", Int32, 2),
    raw_descriptor!(Leu2, "leu2", Int32, 2),
    raw_descriptor!(Le4, "le4", Int32, 4),
    raw_descriptor!(Lf4, "lf4", Float32, 4),
    raw_descriptor!(Lf8, "lf8", Float64, 8),
    raw_descriptor!(Be2, "be2", Int32, 2),
    raw_descriptor!(Beu2, "beu2", Int32, 2),
    raw_descriptor!(Be4, "be4", Int32, 4),
    raw_descriptor!(Bf4, "bf4", Float32, 4),
    raw_descriptor!(Bf8, "bf8", Float64, 8),
];

pub fn lookup_by_id(code: u32) -> Option<&'static FormatDescriptor> {
    DESCRIPTORS.get(code as usize)
}

/// Case-insensitive lookup
pub fn lookup_by_name(name: &str) -> Option<&'static FormatDescriptor> {
    DESCRIPTORS
        .iter()
        .find(|d| d.name.eq_ignore_ascii_case(name))
}

/// Run the configured probes in order until one recognises the content
pub fn detect(io: &mut dyn AccessMethod, config: &Config) -> Result<Option<Detected>> {
    for name in &config.probe_order {
        let found = if name == HEURISTIC_PROBE {
            if !config.heuristic_probe {
                continue;
            }
            sniff::probe(io, config.sniff_window)?
        } else {
            match lookup_by_name(name).and_then(|d| d.probe) {
                Some(probe) => probe(io)?,
                None => continue,
            }
        };

        if let Some(found) = found {
            debug!(probe = %name, format = %found.format, dims = %found.dims, "format detected");
            return Ok(Some(found));
        }
    }
    Ok(None)
}

/// Work out extents for formats that do not record them
pub fn infer_dimensions(
    format: FormatId,
    size: u64,
    levels: Option<u32>,
    lines: Option<u32>,
    columns: Option<u32>,
) -> Result<Dimensions> {
    let descriptor = format.descriptor();

    if format == FormatId::Tri {
        let n = match columns {
            Some(n) => n,
            None => tri::side_for_size(size),
        };
        return Ok(Dimensions::new(1, n, n));
    }

    if descriptor.width == 0 {
        return match columns {
            Some(columns) => Ok(Dimensions::new(
                levels.unwrap_or(1),
                lines.unwrap_or(1),
                columns,
            )),
            None => Err(Dimensions::default().invalid("extents required for this format")),
        };
    }

    let total = size / descriptor.width as u64;
    let levels = levels.unwrap_or(1);
    let columns = match columns {
        Some(c) => c,
        None => u32::try_from(total / levels as u64)
            .map_err(|_| Dimensions::new(levels, 1, 0).invalid("file too large for one line"))?,
    };
    let lines = match lines {
        Some(l) => l,
        None if columns == 0 => 1,
        None => {
            let per_level = total / (levels as u64 * columns as u64);
            u32::try_from(per_level.max(1))
                .map_err(|_| Dimensions::new(levels, 0, columns).invalid("too many lines"))?
        }
    };
    Ok(Dimensions::new(levels, lines, columns))
}

/// Operations every codec provides on its native element kind
pub trait FormatCodec {
    fn native_kind(&self) -> ElementKind;

    /// Fill `out` with samples starting at `at`
    fn read(&mut self, io: &mut dyn AccessMethod, at: Address, out: SamplesMut<'_>) -> Result<()>;

    /// Store `data` starting at `at`
    fn write(&mut self, io: &mut dyn AccessMethod, at: Address, data: Samples<'_>) -> Result<()>;

    /// Persist buffered state
    fn flush(&mut self, io: &mut dyn AccessMethod) -> Result<()>;
}

/// Per-handle codec state created by lazy init
pub enum FormatState {
    Lc2(Lc2Matrix),
    Raw(RawMatrix),
    Text(TextMatrix),
    Tri(TriMatrix),
    Gf2(Gf2Spectrum),
}

impl FormatState {
    /// Run the descriptor's lazy-init for `setup.format`
    pub fn init(io: &mut dyn AccessMethod, setup: &Setup) -> Result<Self> {
        match setup.format {
            FormatId::Unknown => Err(MatrixError::NoFormat),
            FormatId::Invalid => Err(MatrixError::InvalidHandle),
            format => {
                let init = format.descriptor().init.ok_or(MatrixError::NoFormat)?;
                init(io, setup)
            }
        }
    }

    fn codec(&mut self) -> &mut dyn FormatCodec {
        match self {
            FormatState::Lc2(c) => c,
            FormatState::Raw(c) => c,
            FormatState::Text(c) => c,
            FormatState::Tri(c) => c,
            FormatState::Gf2(c) => c,
        }
    }

    pub fn as_lc2(&self) -> Option<&Lc2Matrix> {
        match self {
            FormatState::Lc2(c) => Some(c),
            _ => None,
        }
    }
}

impl FormatCodec for FormatState {
    fn native_kind(&self) -> ElementKind {
        match self {
            FormatState::Lc2(c) => c.native_kind(),
            FormatState::Raw(c) => c.native_kind(),
            FormatState::Text(c) => c.native_kind(),
            FormatState::Tri(c) => c.native_kind(),
            FormatState::Gf2(c) => c.native_kind(),
        }
    }

    fn read(&mut self, io: &mut dyn AccessMethod, at: Address, out: SamplesMut<'_>) -> Result<()> {
        self.codec().read(io, at, out)
    }

    fn write(&mut self, io: &mut dyn AccessMethod, at: Address, data: Samples<'_>) -> Result<()> {
        self.codec().write(io, at, data)
    }

    fn flush(&mut self, io: &mut dyn AccessMethod) -> Result<()> {
        self.codec().flush(io)
    }
}

fn kind_mismatch(expected: ElementKind, got: ElementKind) -> MatrixError {
    MatrixError::FormatMismatch {
        requested: got.to_string(),
        found: format!("native {}", expected),
    }
}

pub(crate) fn int32_mut<'a>(out: SamplesMut<'a>) -> Result<&'a mut [i32]> {
    match out {
        SamplesMut::Int32(buf) => Ok(buf),
        other => Err(kind_mismatch(ElementKind::Int32, other.kind())),
    }
}

pub(crate) fn int32<'a>(data: Samples<'a>) -> Result<&'a [i32]> {
    match data {
        Samples::Int32(buf) => Ok(buf),
        other => Err(kind_mismatch(ElementKind::Int32, other.kind())),
    }
}

pub(crate) fn float32_mut<'a>(out: SamplesMut<'a>) -> Result<&'a mut [f32]> {
    match out {
        SamplesMut::Float32(buf) => Ok(buf),
        other => Err(kind_mismatch(ElementKind::Float32, other.kind())),
    }
}

pub(crate) fn float32<'a>(data: Samples<'a>) -> Result<&'a [f32]> {
    match data {
        Samples::Float32(buf) => Ok(buf),
        other => Err(kind_mismatch(ElementKind::Float32, other.kind())),
    }
}

pub(crate) fn float64_mut<'a>(out: SamplesMut<'a>) -> Result<&'a mut [f64]> {
    match out {
        SamplesMut::Float64(buf) => Ok(buf),
        other => Err(kind_mismatch(ElementKind::Float64, other.kind())),
    }
}

pub(crate) fn float64<'a>(data: Samples<'a>) -> Result<&'a [f64]> {
    match data {
        Samples::Float64(buf) => Ok(buf),
        other => Err(kind_mismatch(ElementKind::Float64, other.kind())),
    }
}
