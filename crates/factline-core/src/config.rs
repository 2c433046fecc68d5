//! Configuration parsing for ledger clients.
//!
//! Components take explicit configuration structs through their
//! constructors; there are no process-wide mutable singletons. The structs
//! here parse from TOML (or JSON, via serde) and carry defaults for every
//! field, so an empty document yields a working in-memory ledger.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::backend::file::DEFAULT_MAX_ANCHORS;
use crate::batch::{BatchConfig, DEFAULT_FLUSH_INTERVAL, DEFAULT_MAX_BATCH_SIZE};

/// Errors from configuration loading.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("cannot read config file: {0}")]
    Io(#[from] std::io::Error),

    /// The TOML failed to parse.
    #[error("cannot parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// The parsed configuration is semantically invalid.
    #[error("invalid config: {0}")]
    Validation(String),
}

/// Which storage tier to construct.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackendConfig {
    /// Volatile in-memory storage.
    Memory,
    /// Durable JSON document at `path`.
    File {
        /// Location of the persisted ledger document.
        path: PathBuf,
        /// Maximum anchor count before submissions are rejected.
        #[serde(default = "default_max_anchors")]
        max_anchors: usize,
    },
    /// Merkle-rooted block chain, optionally persisted at `path`.
    Chain {
        /// Location of the persisted chain file, if any.
        #[serde(default)]
        path: Option<PathBuf>,
    },
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self::Memory
    }
}

fn default_max_anchors() -> usize {
    DEFAULT_MAX_ANCHORS
}

/// Batching policy, as configured.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BatchSettings {
    /// Whether submissions may be batched at all.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Queue length at which a flush becomes due.
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
    /// Seconds since the last flush at which a flush becomes due.
    #[serde(default = "default_flush_interval_secs")]
    pub flush_interval_secs: u64,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            flush_interval_secs: DEFAULT_FLUSH_INTERVAL.as_secs(),
        }
    }
}

impl BatchSettings {
    /// Converts into the batch processor's runtime policy.
    #[must_use]
    pub fn to_batch_config(&self) -> BatchConfig {
        BatchConfig {
            enabled: self.enabled,
            max_batch_size: self.max_batch_size,
            flush_interval: Duration::from_secs(self.flush_interval_secs),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_max_batch_size() -> usize {
    DEFAULT_MAX_BATCH_SIZE
}

fn default_flush_interval_secs() -> u64 {
    DEFAULT_FLUSH_INTERVAL.as_secs()
}

/// Top-level ledger configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct LedgerConfig {
    /// Storage tier selection.
    #[serde(default)]
    pub backend: BackendConfig,

    /// Batching policy.
    #[serde(default)]
    pub batch: BatchSettings,
}

impl LedgerConfig {
    /// Loads configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or fails
    /// validation.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parses configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid or fails validation.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.batch.max_batch_size == 0 {
            return Err(ConfigError::Validation(
                "batch.max_batch_size must be greater than zero".to_string(),
            ));
        }
        if let BackendConfig::File { max_anchors, .. } = &self.backend {
            if *max_anchors == 0 {
                return Err(ConfigError::Validation(
                    "backend.max_anchors must be greater than zero".to_string(),
                ));
            }
        }
        Ok(())
    }
}
