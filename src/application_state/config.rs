//! # Engine Configuration
//!
//! JSON configuration for the engine and the headless frame loop. Every field
//! is optional; missing fields fall back to their defaults.
//!
//! ```json
//! {
//!     "log_filter": "frame_engine=debug",
//!     "cpu_cores": 4,
//!     "scheduler": { "min_threads_per_pool": 2, "thread_name_prefix": "worker" },
//!     "frames": 120,
//!     "demo_entities": 32
//! }
//! ```

use std::{fs, path::Path};

use serde::Deserialize;
use thiserror::Error;

use crate::engine_state::task_management::config::SchedulerConfig;

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("failed to read config file {path}")]
    Read {
        /// The file that was being read.
        path: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The config text is not valid JSON for `EngineConfig`.
    #[error("invalid engine config")]
    Parse(#[from] serde_json::Error),
}

/// Top-level engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// `env_logger` filter string; overrides `RUST_LOG` when set.
    pub log_filter: Option<String>,
    /// Overrides the detected CPU core count when sizing the task pools.
    pub cpu_cores: Option<usize>,
    /// Task scheduler tuning.
    pub scheduler: SchedulerConfig,
    /// Number of frames the headless loop runs.
    pub frames: usize,
    /// Number of transforms the headless loop animates.
    pub demo_entities: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            log_filter: None,
            cpu_cores: None,
            scheduler: SchedulerConfig::default(),
            frames: 60,
            demo_entities: 16,
        }
    }
}

impl EngineConfig {
    /// Parses a config from JSON text.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Reads and parses a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_is_the_default_config() {
        assert_eq!(EngineConfig::from_json_str("{}").unwrap(), EngineConfig::default());
    }

    #[test]
    fn nested_scheduler_config_is_parsed() {
        let config = EngineConfig::from_json_str(
            r#"{ "cpu_cores": 8, "scheduler": { "thread_name_prefix": "worker" }, "frames": 3 }"#,
        )
        .unwrap();
        assert_eq!(config.cpu_cores, Some(8));
        assert_eq!(config.scheduler.thread_name_prefix, "worker");
        assert_eq!(config.scheduler.min_threads_per_pool, 2);
        assert_eq!(config.frames, 3);
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        assert!(matches!(
            EngineConfig::from_json_str("{ frames: "),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let error = EngineConfig::load("/definitely/not/here.json").unwrap_err();
        assert!(matches!(error, ConfigError::Read { .. }));
        assert!(error.to_string().contains("/definitely/not/here.json"));
    }
}
