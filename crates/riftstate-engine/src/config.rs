//! Configuration loading and typed config structure for the engine.
//!
//! The canonical configuration lives in a YAML file supplied by the host.
//! All fields have defaults tuned for an interactive simulation: short
//! lock waits, a small I/O failure budget, and frequent-enough
//! checkpoints to keep replay cheap.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Engine configuration.
///
/// Mirrors the YAML structure one-to-one; every field falls back to a
/// documented default when omitted.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EngineConfig {
    /// Directory holding the durable log and checkpoint files.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Durable log file name within `data_dir`.
    #[serde(default = "default_log_file")]
    pub log_file: String,

    /// Checkpoint file name within `data_dir`.
    #[serde(default = "default_checkpoint_file")]
    pub checkpoint_file: String,

    /// Bounded wait for a scope lock, in milliseconds.
    #[serde(default = "default_lock_wait_ms")]
    pub lock_wait_ms: u64,

    /// Idle age after which a held scope lock is force-expired and its
    /// transaction rolled back, in milliseconds. 0 disables expiry.
    #[serde(default = "default_lock_idle_expiry_ms")]
    pub lock_idle_expiry_ms: u64,

    /// Consecutive durable-log failures before the commit breaker trips.
    #[serde(default = "default_io_failure_threshold")]
    pub io_failure_threshold: u32,

    /// Take an automatic checkpoint every N commits. 0 disables.
    #[serde(default = "default_checkpoint_every_commits")]
    pub checkpoint_every_commits: u64,

    /// Retry attempts per event consequence on conflict or lock timeout.
    #[serde(default = "default_consequence_retry_limit")]
    pub consequence_retry_limit: u32,

    /// Backoff between consequence retries, in milliseconds.
    #[serde(default = "default_consequence_retry_backoff_ms")]
    pub consequence_retry_backoff_ms: u64,
}

impl EngineConfig {
    /// Load configuration from a YAML file at the given path.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, or
    /// [`ConfigError::Yaml`] if the content is not valid YAML.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(serde_yml::from_str(&contents)?)
    }

    /// Parse configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        Ok(serde_yml::from_str(yaml)?)
    }

    /// Full path of the durable log file.
    pub fn log_path(&self) -> PathBuf {
        self.data_dir.join(&self.log_file)
    }

    /// Full path of the checkpoint file.
    pub fn checkpoint_path(&self) -> PathBuf {
        self.data_dir.join(&self.checkpoint_file)
    }

    /// Bounded lock wait as a [`Duration`].
    pub const fn lock_wait(&self) -> Duration {
        Duration::from_millis(self.lock_wait_ms)
    }

    /// Lock idle expiry as a [`Duration`]; `None` when disabled.
    pub const fn lock_idle_expiry(&self) -> Option<Duration> {
        if self.lock_idle_expiry_ms == 0 {
            None
        } else {
            Some(Duration::from_millis(self.lock_idle_expiry_ms))
        }
    }

    /// Consequence retry backoff as a [`Duration`].
    pub const fn consequence_retry_backoff(&self) -> Duration {
        Duration::from_millis(self.consequence_retry_backoff_ms)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            log_file: default_log_file(),
            checkpoint_file: default_checkpoint_file(),
            lock_wait_ms: default_lock_wait_ms(),
            lock_idle_expiry_ms: default_lock_idle_expiry_ms(),
            io_failure_threshold: default_io_failure_threshold(),
            checkpoint_every_commits: default_checkpoint_every_commits(),
            consequence_retry_limit: default_consequence_retry_limit(),
            consequence_retry_backoff_ms: default_consequence_retry_backoff_ms(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("riftstate-data")
}

fn default_log_file() -> String {
    "world.wal".to_owned()
}

fn default_checkpoint_file() -> String {
    "world.checkpoint".to_owned()
}

const fn default_lock_wait_ms() -> u64 {
    250
}

const fn default_lock_idle_expiry_ms() -> u64 {
    5_000
}

const fn default_io_failure_threshold() -> u32 {
    3
}

const fn default_checkpoint_every_commits() -> u64 {
    256
}

const fn default_consequence_retry_limit() -> u32 {
    3
}

const fn default_consequence_retry_backoff_ms() -> u64 {
    5
}
