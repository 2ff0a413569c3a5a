//! Configuration module for hashwatch.
//!
//! This module handles parsing configuration from environment variables.
//!
//! # Environment Variables
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `HASHWATCH_HOME` | No | home directory | Base directory holding `.hashwatch/` |
//! | `HASHWATCH_INTERVAL_SECS` | No | 5 | Seconds between watch polls |
//! | `HASHWATCH_RETRY_SECS` | No | 3 | Seconds to wait after a failed read |
//!
//! # Example
//!
//! ```no_run
//! use hashwatch::config::Config;
//!
//! let config = Config::from_env().expect("Failed to load configuration");
//! println!("History directory: {}", config.history_dir().display());
//! ```

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use directories::BaseDirs;
use thiserror::Error;

/// Name of the hidden history directory inside the base directory.
pub const HISTORY_DIR_NAME: &str = ".hashwatch";

/// Default seconds between polls of a watched file.
const DEFAULT_INTERVAL_SECS: u64 = 5;

/// Default seconds to back off after a failed digest.
const DEFAULT_RETRY_SECS: u64 = 3;

/// Errors that can occur during configuration parsing.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Environment variable has an invalid value.
    #[error("invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Failed to determine home directory.
    #[error("failed to determine home directory")]
    NoHomeDirectory,
}

/// Timing of the watch loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchConfig {
    /// Sleep between successful polls.
    pub interval: Duration,

    /// Sleep after a digest error before retrying.
    pub retry_backoff: Duration,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(DEFAULT_INTERVAL_SECS),
            retry_backoff: Duration::from_secs(DEFAULT_RETRY_SECS),
        }
    }
}

/// Configuration for hashwatch.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base directory; history records live in `<base_dir>/.hashwatch`.
    pub base_dir: PathBuf,

    /// Watch loop timing.
    pub watch: WatchConfig,
}

impl Config {
    /// Creates a new `Config` by parsing environment variables.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if:
    /// - `HASHWATCH_INTERVAL_SECS` or `HASHWATCH_RETRY_SECS` is not a positive integer
    /// - `HASHWATCH_HOME` is unset and the home directory cannot be determined
    pub fn from_env() -> Result<Self, ConfigError> {
        // Optional: HASHWATCH_HOME (default: home directory)
        let base_dir = match env::var("HASHWATCH_HOME") {
            Ok(dir) if !dir.trim().is_empty() => PathBuf::from(dir),
            _ => BaseDirs::new()
                .ok_or(ConfigError::NoHomeDirectory)?
                .home_dir()
                .to_path_buf(),
        };

        let defaults = WatchConfig::default();
        let interval = parse_secs("HASHWATCH_INTERVAL_SECS", defaults.interval)?;
        let retry_backoff = parse_secs("HASHWATCH_RETRY_SECS", defaults.retry_backoff)?;

        Ok(Self {
            base_dir,
            watch: WatchConfig {
                interval,
                retry_backoff,
            },
        })
    }

    /// Directory holding the history records.
    #[must_use]
    pub fn history_dir(&self) -> PathBuf {
        self.base_dir.join(HISTORY_DIR_NAME)
    }
}

/// Parses a positive number of seconds from an environment variable.
fn parse_secs(key: &str, default: Duration) -> Result<Duration, ConfigError> {
    match env::var(key) {
        Ok(val) => {
            let secs = val
                .trim()
                .parse::<u64>()
                .map_err(|_| ConfigError::InvalidValue {
                    key: key.to_string(),
                    message: format!("expected positive integer, got '{val}'"),
                })?;
            if secs == 0 {
                return Err(ConfigError::InvalidValue {
                    key: key.to_string(),
                    message: "must be at least 1 second".to_string(),
                });
            }
            Ok(Duration::from_secs(secs))
        }
        Err(_) => Ok(default),
    }
}
