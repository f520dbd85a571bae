//! Configuration structures for the rq-stats module.
//!
//! Supports TOML deserialization with defaults matching the stock driver:
//! a 5-tick deferred interval, node `rq-stats` under CPU 0 and the command
//! attribute disabled.

use crate::time::{TickRate, Ticks};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

/// Default rearm interval in ticks.
pub const DEFAULT_DEF_TIMER_TICKS: u64 = 5;

/// Size of the page buffer the attribute layer hands to read handlers.
pub const PAGE_SIZE: usize = 4096;

/// Default capacity of the command buffer, terminator included.
pub const DEFAULT_COMMAND_CAPACITY: usize = 1024;

/// Top-level module configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RqStatsConfig {
    /// Scheduler tick rate used to convert millisecond intervals.
    pub tick_rate_hz: TickRate,

    /// Rearm interval in effect until the first write.
    pub default_interval_ticks: Ticks,

    /// CPU whose device node hosts the attribute directory.
    pub cpu: u32,

    /// Name of the attribute directory.
    pub node_name: String,

    /// Name of the dedicated notifier worker.
    pub worker_name: String,

    /// Upper bound on draining the worker at teardown.
    #[serde(with = "humantime_serde")]
    pub drain_timeout: Duration,

    /// Command attribute configuration.
    pub command: CommandConfig,
}

impl Default for RqStatsConfig {
    fn default() -> Self {
        Self {
            tick_rate_hz: TickRate::default(),
            default_interval_ticks: Ticks(DEFAULT_DEF_TIMER_TICKS),
            cpu: 0,
            node_name: String::from("rq-stats"),
            worker_name: String::from("rq_stats"),
            drain_timeout: Duration::from_secs(1),
            command: CommandConfig::default(),
        }
    }
}

/// Free-form command attribute (`mpctl`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandConfig {
    /// Register the command attribute alongside the timer attribute.
    pub enabled: bool,

    /// Buffer capacity in bytes, including the terminator slot.
    pub capacity: usize,
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            capacity: DEFAULT_COMMAND_CAPACITY,
        }
    }
}

impl RqStatsConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let config = Self::from_toml(&content)?;
        info!(path = %path.display(), "Configuration loaded");
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid or fails validation.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        if let Err(e) = config.validate() {
            warn!(error = %e, "Configuration rejected");
            return Err(e);
        }
        Ok(config)
    }

    /// Serialize configuration to TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Enable the command attribute.
    #[must_use]
    pub fn with_command_attribute(mut self) -> Self {
        self.command.enabled = true;
        self
    }

    /// Check value ranges that serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] describing the first bad field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.node_name.is_empty() || self.node_name.contains('/') {
            return Err(ConfigError::Invalid(format!(
                "node_name {:?} must be a single non-empty path component",
                self.node_name
            )));
        }
        if self.worker_name.is_empty() {
            return Err(ConfigError::Invalid("worker_name must not be empty".into()));
        }
        if !(2..=PAGE_SIZE).contains(&self.command.capacity) {
            return Err(ConfigError::Invalid(format!(
                "command.capacity {} outside 2..={PAGE_SIZE}",
                self.command.capacity
            )));
        }
        Ok(())
    }
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File I/O error.
    #[error("failed to read config file {path}: {source}")]
    Io {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// TOML parsing error.
    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialization error.
    #[error("failed to serialize TOML: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// Value out of range.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Serde helper module for `Duration` using humantime format.
mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = humantime::format_duration(*duration).to_string();
        serializer.serialize_str(&s)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}
