//! Engine configuration. Loaded from YAML; missing fields fall back to defaults.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Root engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Encoded into the high bits of every generated key.
    pub partition_id: u16,
    /// Max TERMINATE_ELEMENT commands written per batch when a scope terminates its children.
    pub max_commands_in_batch: usize,
    /// TTL applied to published messages that don't carry one.
    pub default_message_ttl_ms: i64,
    /// Activation timeout used when a job batch request doesn't carry one.
    pub job_timeout_ms: i64,
    /// `EnvFilter` directive used by binaries that initialise logging.
    pub log_filter: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            partition_id: 1,
            max_commands_in_batch: 100,
            default_message_ttl_ms: 3_600_000,
            job_timeout_ms: 300_000,
            log_filter: "info".to_string(),
        }
    }
}

impl EngineConfig {
    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: EngineConfig =
            serde_yaml::from_str(content).context("Parsing engine config")?;
        anyhow::ensure!(
            config.max_commands_in_batch > 0,
            "max_commands_in_batch must be at least 1"
        );
        Ok(config)
    }

    /// Load from a YAML file.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content =
            std::fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
        Self::from_yaml(&content).with_context(|| format!("Parsing {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config =
            EngineConfig::from_yaml("partition_id: 4\nmax_commands_in_batch: 2\n").unwrap();
        assert_eq!(config.partition_id, 4);
        assert_eq!(config.max_commands_in_batch, 2);
        assert_eq!(config.job_timeout_ms, EngineConfig::default().job_timeout_ms);
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        assert!(EngineConfig::from_yaml("max_commands_in_batch: 0\n").is_err());
    }
}
