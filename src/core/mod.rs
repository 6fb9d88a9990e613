pub mod access;
pub mod config;
pub mod convert;
pub mod error;
pub mod format;
pub mod handle;
pub mod hint;
pub mod lc2;
