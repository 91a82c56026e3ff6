//! Binding layer configuration.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use osn_events::{QueuePolicy, DEFAULT_QUEUE_CAPACITY};

use crate::error::ConfigError;

/// Settings for the registry and the callback queues.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BindingsConfig {
    /// Highest handle the registry hands out.
    pub index_ceiling: u32,

    /// Callback queue settings.
    pub queue: QueueConfig,
}

impl Default for BindingsConfig {
    fn default() -> Self {
        Self {
            index_ceiling: u32::MAX - 1,
            queue: QueueConfig::default(),
        }
    }
}

impl BindingsConfig {
    /// Parse and validate a JSON document.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a JSON file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let json = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&json)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue.capacity == Some(0) {
            return Err(ConfigError::Invalid(
                "queue.capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Callback queue settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Maximum queued entries per queue; `null` for unbounded.
    pub capacity: Option<usize>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: Some(DEFAULT_QUEUE_CAPACITY),
        }
    }
}

impl QueueConfig {
    pub fn policy(&self) -> QueuePolicy {
        QueuePolicy::from_capacity(self.capacity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = BindingsConfig::from_json("{}").unwrap();
        assert_eq!(config, BindingsConfig::default());
        assert_eq!(config.queue.policy(), QueuePolicy::DropOldest(4096));
    }

    #[test]
    fn test_null_capacity_is_unbounded() {
        let config =
            BindingsConfig::from_json(r#"{"index_ceiling": 15, "queue": {"capacity": null}}"#)
                .unwrap();
        assert_eq!(config.index_ceiling, 15);
        assert_eq!(config.queue.policy(), QueuePolicy::Unbounded);
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let err = BindingsConfig::from_json(r#"{"queue": {"capacity": 0}}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_malformed_json_rejected() {
        let err = BindingsConfig::from_json("{ index_ceiling: ").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_missing_file_reports_path() {
        let err = BindingsConfig::load(Path::new("/nonexistent/osn.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
