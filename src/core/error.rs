use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MatrixError {
    #[error("Cannot open {path}: {reason}")]
    OpenFailure { path: PathBuf, reason: String },

    #[error("Format mismatch: requested {requested}, file looks like {found}")]
    FormatMismatch { requested: String, found: String },

    #[error("Dimensions are locked: matrix already holds data")]
    DimensionLocked,

    #[error(
        "Out of range: level {level}, line {line}, columns {col}..{col}+{num} \
         (extents {levels}x{lines}x{columns})"
    )]
    OutOfRange {
        level: u32,
        line: u32,
        col: u32,
        num: usize,
        levels: u32,
        lines: u32,
        columns: u32,
    },

    #[error("Corrupt data: {0}")]
    DecodeCorruption(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid mode or format hint: {0}")]
    InvalidHint(String),

    #[error("No format selected: set the file type before the first access")]
    NoFormat,

    #[error("Handle is invalid: format initialisation failed earlier")]
    InvalidHandle,

    #[error("Read-only: {0}")]
    ReadOnly(&'static str),

    #[error("Out of space: {0}")]
    OutOfSpace(String),

    #[error("Invalid dimensions {levels}x{lines}x{columns}: {reason}")]
    InvalidDimensions {
        levels: u32,
        lines: u32,
        columns: u32,
        reason: &'static str,
    },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),
}

impl MatrixError {
    pub(crate) fn corrupt(msg: impl Into<String>) -> Self {
        MatrixError::DecodeCorruption(msg.into())
    }

    pub(crate) fn open_failure(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        MatrixError::OpenFailure {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, MatrixError>;
