//! Configuration management for the mirror agent.
//!
//! Loads configuration from a TOML file; the CLI may override individual
//! values. The agent only ever reads current values at invocation time.

use crate::utils::errors::{MirrorError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub source: SourceConfig,
    pub destination: DestinationConfig,
    #[serde(default)]
    pub mirror: MirrorConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Directory the backup tool drops its timestamped artifacts into
    pub dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DestinationConfig {
    /// Directory that should hold exactly the newest artifact
    pub dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MirrorConfig {
    /// Copy chunk size in bytes; must be a power of two
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Substring a file name must contain to count as a backup artifact
    #[serde(default = "default_marker")]
    pub marker: String,

    /// File name used when the selected artifact's own name is unusable
    #[serde(default = "default_fallback_name")]
    pub fallback_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Hour of day for the daily run (0-23)
    #[serde(default = "default_hour")]
    pub hour: u32,

    /// Minute of hour for the daily run (0-59)
    #[serde(default)]
    pub minute: u32,

    /// Whether the recurring schedule is active
    #[serde(default)]
    pub enabled: bool,

    /// How many times a scheduled run may be retried on transient I/O errors
    #[serde(default = "default_retry_limit")]
    pub retry_limit: u32,

    /// Pause between retries, in seconds
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default values
fn default_chunk_size() -> usize {
    8 * 1024
}

fn default_marker() -> String {
    ".backup".to_string()
}

fn default_fallback_name() -> String {
    "signal-latest.backup".to_string()
}

fn default_hour() -> u32 {
    3
}

fn default_retry_limit() -> u32 {
    2
}

fn default_retry_delay_secs() -> u64 {
    5
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for MirrorConfig {
    fn default() -> Self {
        MirrorConfig {
            chunk_size: default_chunk_size(),
            marker: default_marker(),
            fallback_name: default_fallback_name(),
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        ScheduleConfig {
            hour: default_hour(),
            minute: 0,
            enabled: false,
            retry_limit: default_retry_limit(),
            retry_delay_secs: default_retry_delay_secs(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| MirrorError::Config(format!("cannot read {}: {}", path.display(), e)))?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| MirrorError::Config(format!("cannot parse {}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Build a configuration from explicit directories, all other values default
    pub fn with_dirs(source: PathBuf, destination: PathBuf) -> Self {
        Config {
            source: SourceConfig { dir: source },
            destination: DestinationConfig { dir: destination },
            mirror: MirrorConfig::default(),
            schedule: ScheduleConfig::default(),
            log: LogConfig::default(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.mirror.chunk_size == 0 || !self.mirror.chunk_size.is_power_of_two() {
            return Err(MirrorError::Config(format!(
                "mirror.chunk_size must be a power of two, got {}",
                self.mirror.chunk_size
            )));
        }
        if self.mirror.marker.is_empty() {
            return Err(MirrorError::Config("mirror.marker must not be empty".into()));
        }
        if self.schedule.hour > 23 {
            return Err(MirrorError::Config(format!(
                "schedule.hour must be 0-23, got {}",
                self.schedule.hour
            )));
        }
        if self.schedule.minute > 59 {
            return Err(MirrorError::Config(format!(
                "schedule.minute must be 0-59, got {}",
                self.schedule.minute
            )));
        }
        Ok(())
    }
}
