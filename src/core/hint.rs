//! Open-mode and format-hint strings
//!
//! A mode string is `<access>[,<hint>]`:
//!
//! - `r` read-only, the file must exist
//! - `w` read-write, created or truncated
//! - `a` read-write, created if missing, content kept
//!
//! and a hint is `[[levels.]lines.]columns.formatname[:version]`, or just
//! `formatname`. Sizes take a `k` suffix for ×1024, so `4.16k.lc2` is four
//! spectra of 16384 channels in LC2.

use crate::error::{MatrixError, Result};
use crate::format::{self, FormatId};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    Read,
    Write,
    Update,
}

impl AccessMode {
    pub fn is_writable(self) -> bool {
        !matches!(self, AccessMode::Read)
    }
}

impl FromStr for AccessMode {
    type Err = MatrixError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "r" => Ok(AccessMode::Read),
            "w" => Ok(AccessMode::Write),
            "a" => Ok(AccessMode::Update),
            _ => Err(MatrixError::InvalidHint(format!(
                "unknown access mode '{}' (expected r, w or a)",
                s
            ))),
        }
    }
}

/// Format and optional extents requested by the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatHint {
    pub format: FormatId,
    pub levels: Option<u32>,
    pub lines: Option<u32>,
    pub columns: Option<u32>,
    pub version: Option<u32>,
}

impl FormatHint {
    pub fn new(format: FormatId) -> Self {
        FormatHint {
            format,
            levels: None,
            lines: None,
            columns: None,
            version: None,
        }
    }

    pub fn has_dimensions(&self) -> bool {
        self.columns.is_some()
    }

    /// Extents with unspecified outer axes defaulting to 1
    pub fn dimensions(&self) -> Option<(u32, u32, u32)> {
        let columns = self.columns?;
        Some((self.levels.unwrap_or(1), self.lines.unwrap_or(1), columns))
    }
}

impl FromStr for FormatHint {
    type Err = MatrixError;

    fn from_str(s: &str) -> Result<Self> {
        parse_hint(s)
    }
}

impl fmt::Display for FormatHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(levels) = self.levels {
            write!(f, "{}.", levels)?;
        }
        if let Some(lines) = self.lines {
            write!(f, "{}.", lines)?;
        }
        if let Some(columns) = self.columns {
            write!(f, "{}.", columns)?;
        }
        write!(f, "{}", self.format.name())?;
        if let Some(version) = self.version {
            write!(f, ":{}", version)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenMode {
    pub access: AccessMode,
    pub hint: Option<FormatHint>,
}

impl FromStr for OpenMode {
    type Err = MatrixError;

    fn from_str(s: &str) -> Result<Self> {
        parse_mode(s)
    }
}

pub fn parse_mode(s: &str) -> Result<OpenMode> {
    let (access, hint) = match s.split_once(',') {
        Some((access, hint)) => (access.trim(), Some(hint.trim())),
        None => (s.trim(), None),
    };

    Ok(OpenMode {
        access: access.parse()?,
        hint: hint.map(parse_hint).transpose()?,
    })
}

pub fn parse_hint(s: &str) -> Result<FormatHint> {
    let parts: Vec<&str> = s.split('.').collect();
    let (sizes, name_part) = parts.split_at(parts.len() - 1);

    if sizes.len() > 3 {
        return Err(MatrixError::InvalidHint(format!(
            "'{}' has more than three extents",
            s
        )));
    }

    let (name, version) = match name_part[0].split_once(':') {
        Some((name, version)) => {
            let version = version.parse::<u32>().map_err(|_| {
                MatrixError::InvalidHint(format!("bad version '{}' in '{}'", version, s))
            })?;
            (name, Some(version))
        }
        None => (name_part[0], None),
    };

    let descriptor = format::lookup_by_name(name)
        .filter(|d| d.id.is_known())
        .ok_or_else(|| MatrixError::InvalidHint(format!("unknown format '{}'", name)))?;

    let sizes = sizes
        .iter()
        .map(|size| parse_size(size))
        .collect::<Result<Vec<u32>>>()?;

    let mut hint = FormatHint::new(descriptor.id);
    hint.version = version;
    match sizes.as_slice() {
        [] => {}
        [columns] => hint.columns = Some(*columns),
        [lines, columns] => {
            hint.lines = Some(*lines);
            hint.columns = Some(*columns);
        }
        [levels, lines, columns] => {
            hint.levels = Some(*levels);
            hint.lines = Some(*lines);
            hint.columns = Some(*columns);
        }
        _ => unreachable!("checked above"),
    }
    Ok(hint)
}

/// Parse an extent such as `512` or `16k`
pub fn parse_size(s: &str) -> Result<u32> {
    let bad = || MatrixError::InvalidHint(format!("bad size '{}'", s));

    let (digits, multiplier) = match s.strip_suffix(['k', 'K']) {
        Some(digits) => (digits, 1024u64),
        None => (s, 1u64),
    };
    let value = digits.parse::<u64>().map_err(|_| bad())?;
    let value = value.checked_mul(multiplier).ok_or_else(bad)?;
    if value == 0 {
        return Err(bad());
    }
    u32::try_from(value).map_err(|_| bad())
}
