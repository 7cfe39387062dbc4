//! TOML configuration for the redactor CLI
//!
//! Every section and field is optional; command-line flags override what the
//! file sets.

use anyhow::Context;
use redactor_core::PipelineOptions;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// How redactions are committed
    #[serde(default)]
    pub pipeline: PipelineOptions,
    /// Document worker settings
    #[serde(default)]
    pub worker: WorkerConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_str(&content)
    }

    /// Parse configuration from a TOML string
    pub fn from_str(s: &str) -> anyhow::Result<Self> {
        toml::from_str(s).context("Failed to parse TOML configuration")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkerConfig {
    /// Seconds to wait for any single document request; 0 waits forever
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    120
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl WorkerConfig {
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::from_str("").unwrap();
        assert_eq!(config, Config::default());
        assert!(config.pipeline.apply);
        assert!(config.pipeline.keep_unapplied_markers);
        assert_eq!(config.worker.timeout(), Some(Duration::from_secs(120)));
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
            [pipeline]
            apply = true
            keep_unapplied_markers = false
            placeholder_font_size = 10.0
            default_label = "WITHHELD"

            [worker]
            timeout_secs = 0
        "#;
        let config = Config::from_str(toml).unwrap();
        assert!(!config.pipeline.keep_unapplied_markers);
        assert_eq!(config.pipeline.placeholder_font_size, 10.0);
        assert_eq!(config.pipeline.default_label, "WITHHELD");
        assert_eq!(config.worker.timeout(), None);
    }

    #[test]
    fn test_partial_section_keeps_other_defaults() {
        let config = Config::from_str("[pipeline]\napply = false\n").unwrap();
        assert!(!config.pipeline.apply);
        assert_eq!(config.pipeline.default_label, "REDACTED");
    }

    #[test]
    fn test_malformed_config_is_an_error() {
        assert!(Config::from_str("[pipeline]\napply = \"sometimes\"\n").is_err());
        assert!(Config::from_file("/definitely/not/here.toml").is_err());
    }
}
