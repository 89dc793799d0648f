//! Durability core configuration
//!
//! Configuration is loaded once at startup (JSON file or in code) and is
//! immutable afterwards. `validate()` must pass before any writer is opened.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::durability::DurabilityMode;
use crate::observability::{log_event_with_fields, Event};
use crate::replication::ReplicationConfig;

/// Default redo buffer capacity, in bytes.
pub const DEFAULT_BUFFER_CAPACITY: usize = 4096;

/// Default amount of redo growth that triggers a checkpoint, in bytes.
pub const DEFAULT_CHECKPOINT_SIZE_THRESHOLD: u64 = 1024 * 1024;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid durability mode: {0:?}")]
    InvalidDurabilityMode(String),

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("failed to read configuration file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

impl ConfigError {
    /// Stable error code.
    pub fn code(&self) -> &'static str {
        match self {
            ConfigError::InvalidDurabilityMode(_) => "CONFIG_INVALID_DURABILITY_MODE",
            ConfigError::Invalid(_) => "CONFIG_INVALID",
            ConfigError::Read { .. } => "CONFIG_READ_FAILED",
            ConfigError::Parse(_) => "CONFIG_PARSE_FAILED",
        }
    }
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Durability core configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DurabilityConfig {
    /// Directory holding single-node redo files.
    pub redo_dir: PathBuf,

    /// Capacity of the in-process redo buffer.
    pub buffer_capacity: usize,

    /// Mode applied when a transaction does not request one.
    pub default_mode: DurabilityMode,

    /// Redo growth, in bytes, after which a checkpoint is due.
    pub checkpoint_size_threshold: u64,

    /// Location of the checkpoint header recording the recovery point.
    pub checkpoint_header: PathBuf,

    /// Replication settings. When disabled, the single-node file writer is used.
    pub replication: ReplicationConfig,
}

impl Default for DurabilityConfig {
    fn default() -> Self {
        Self {
            redo_dir: PathBuf::from("redo"),
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            default_mode: DurabilityMode::Sync,
            checkpoint_size_threshold: DEFAULT_CHECKPOINT_SIZE_THRESHOLD,
            checkpoint_header: PathBuf::from("checkpoint.json"),
            replication: ReplicationConfig::disabled(),
        }
    }
}

impl DurabilityConfig {
    /// Configuration rooted at `data_dir`.
    pub fn in_dir(data_dir: &Path) -> Self {
        Self {
            redo_dir: data_dir.join("redo"),
            checkpoint_header: data_dir.join("checkpoint.json"),
            ..Self::default()
        }
    }

    /// Parses a JSON document. Missing fields take their defaults.
    pub fn from_json(json: &str) -> ConfigResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads and validates a JSON configuration file.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let json = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_json(&json)?;

        let redo_dir = config.redo_dir.display().to_string();
        log_event_with_fields(
            Event::ConfigLoaded,
            &[
                ("redo_dir", redo_dir.as_str()),
                ("default_mode", config.default_mode.as_str()),
            ],
        );
        Ok(config)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.buffer_capacity == 0 {
            return Err(ConfigError::Invalid(
                "buffer_capacity must be greater than zero".into(),
            ));
        }
        if self.checkpoint_size_threshold == 0 {
            return Err(ConfigError::Invalid(
                "checkpoint_size_threshold must be greater than zero".into(),
            ));
        }
        if self.redo_dir.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("redo_dir must not be empty".into()));
        }
        self.replication.validate()
    }
}
