//! Engine configuration
//!
//! Controls which backends and format probes take part in auto-detection.
//! Usually built in code via [`Config::default`], or read from a TOML file:
//!
//! ```toml
//! shared_memory = false
//! heuristic_probe = true
//! probe_order = ["lc2", "txt", "raw"]
//! sniff_window = 8192
//! ```

use crate::error::{MatrixError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Name used in `probe_order` for the statistical sniffer of untagged binary dumps
pub const HEURISTIC_PROBE: &str = "raw";

const DEFAULT_SNIFF_WINDOW: usize = 16 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Try the shared-memory backend before the plain file backend
    pub shared_memory: bool,

    /// Allow statistical sniffing of untagged binary files
    pub heuristic_probe: bool,

    /// Order in which format probes run during auto-detection
    pub probe_order: Vec<String>,

    /// Number of bytes sampled by the sniffer
    pub sniff_window: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            shared_memory: true,
            heuristic_probe: true,
            probe_order: vec![
                "lc2".to_string(),
                "gf2".to_string(),
                "txt".to_string(),
                HEURISTIC_PROBE.to_string(),
            ],
            sniff_window: DEFAULT_SNIFF_WINDOW,
        }
    }
}

impl Config {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Config = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Reject probe names the registry does not know
    pub fn validate(&self) -> Result<()> {
        for name in &self.probe_order {
            if name != HEURISTIC_PROBE && crate::format::lookup_by_name(name).is_none() {
                return Err(MatrixError::InvalidHint(format!(
                    "unknown format '{}' in probe_order",
                    name
                )));
            }
        }
        if self.sniff_window < 64 {
            return Err(MatrixError::InvalidHint(format!(
                "sniff_window must be at least 64 bytes, got {}",
                self.sniff_window
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert!(config.shared_memory);
        assert!(config.heuristic_probe);
        assert_eq!(config.probe_order, vec!["lc2", "gf2", "txt", "raw"]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = Config::from_toml_str("shared_memory = false\n").unwrap();
        assert!(!config.shared_memory);
        assert!(config.heuristic_probe);
        assert_eq!(config.sniff_window, DEFAULT_SNIFF_WINDOW);
    }

    #[test]
    fn test_probe_order_reordered() {
        let config = Config::from_toml_str("probe_order = [\"txt\", \"lc2\"]").unwrap();
        assert_eq!(config.probe_order, vec!["txt", "lc2"]);
    }

    #[test]
    fn test_unknown_probe_rejected() {
        let result = Config::from_toml_str("probe_order = [\"nope\"]");
        assert!(matches!(result, Err(MatrixError::InvalidHint(_))));
    }

    #[test]
    fn test_malformed_toml() {
        let result = Config::from_toml_str("shared_memory = \"yes\"");
        assert!(matches!(result, Err(MatrixError::Config(_))));
    }
}
