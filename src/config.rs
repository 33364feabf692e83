// Configuration File Support
//
// TOML configuration for queue-throttle with environment variable overrides.
// Loaded from the XDG config directory: ~/.config/queue-throttle/config.toml

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::rate::{ThrottleRate, TimeUnit};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// Logging configuration
    pub logging: LoggingConfig,

    /// Scheduled pass configuration
    pub cron: CronConfig,

    /// Per-queue throttle settings, keyed by queue name
    pub queues: BTreeMap<String, QueueSettings>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (json, pretty, compact)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "compact".to_string(),
        }
    }
}

/// Scheduled pass configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CronConfig {
    /// Time budget for queues whose `time` is 0
    pub default_time_secs: u64,
}

impl Default for CronConfig {
    fn default() -> Self {
        Self {
            default_time_secs: 15,
        }
    }
}

/// Throttle settings for one queue
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct QueueSettings {
    /// Drained by the scheduled pass
    pub enabled: bool,

    /// Processing time per pass in seconds (0 = scheduler default)
    pub time: u64,

    /// Items per unit
    pub items: i64,

    /// Time unit for `items`
    pub unit: String,

    /// Log every dispatched item
    pub detailed_logging: bool,

    /// Worker command, `[program, args...]`
    pub command: Vec<String>,

    /// JSON-lines file holding the queue's pending payloads
    pub spool: Option<PathBuf>,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            time: 60,
            items: 0,
            unit: TimeUnit::Second.as_str().to_string(),
            detailed_logging: false,
            command: Vec::new(),
            spool: None,
        }
    }
}

impl QueueSettings {
    /// Throttle rate from `items` and `unit`
    pub fn rate(&self) -> crate::error::Result<ThrottleRate> {
        ThrottleRate::parse(self.items, &self.unit)
    }
}

impl Config {
    /// Load configuration from the default XDG config directory
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed.
    /// If the config file does not exist, returns default configuration.
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();
        Self::load_from_path(&config_path)
    }

    /// Load configuration from a specific path
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed or
    /// does not validate. A missing file yields the defaults.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default().apply_env_overrides());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file from {:?}", path))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file from {:?}", path))?;

        let config = config.apply_env_overrides();
        config.validate()?;

        tracing::debug!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Get the default configuration file path
    ///
    /// Returns `~/.config/queue-throttle/config.toml` on Linux
    pub fn config_path() -> PathBuf {
        if let Some(proj_dirs) = directories::ProjectDirs::from("org", "queue-throttle", "queue-throttle") {
            proj_dirs.config_dir().join("config.toml")
        } else {
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
            PathBuf::from(home).join(".config").join("queue-throttle").join("config.toml")
        }
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// Environment variables take precedence over config file values:
    /// - QUEUE_THROTTLE_LOG_LEVEL
    /// - QUEUE_THROTTLE_LOG_FORMAT
    /// - QUEUE_THROTTLE_CRON_TIME
    fn apply_env_overrides(self) -> Self {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(level) = lookup("QUEUE_THROTTLE_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = lookup("QUEUE_THROTTLE_LOG_FORMAT") {
            self.logging.format = format;
        }
        if let Some(secs) = lookup("QUEUE_THROTTLE_CRON_TIME") {
            if let Ok(secs) = secs.parse::<u64>() {
                if secs > 0 {
                    self.cron.default_time_secs = secs;
                }
            }
        }

        self
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<()> {
        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!("Invalid log level: {}. Must be one of: trace, debug, info, warn, error", self.logging.level),
        }

        match self.logging.format.to_lowercase().as_str() {
            "json" | "pretty" | "compact" => {}
            _ => anyhow::bail!("Invalid log format: {}. Must be one of: json, pretty, compact", self.logging.format),
        }

        if self.cron.default_time_secs == 0 {
            anyhow::bail!("Cron default time must be > 0 seconds");
        }

        for (name, queue) in &self.queues {
            if queue.enabled {
                queue
                    .rate()
                    .with_context(|| format!("Queue '{}' has an invalid throttle rate", name))?;
            }
            if queue.spool.is_some() && queue.command.is_empty() {
                anyhow::bail!("Queue '{}' has a spool file but no worker command", name);
            }
        }

        Ok(())
    }

    /// Convert log level string to tracing::Level
    pub fn log_level(&self) -> Result<tracing::Level> {
        self.logging.level.to_lowercase().parse()
            .map_err(|e| anyhow::anyhow!("Failed to parse log level: {}", e))
    }

    /// Settings for `name`, or the defaults if the queue is not configured
    pub fn queue(&self, name: &str) -> QueueSettings {
        self.queues.get(name).cloned().unwrap_or_default()
    }
}
