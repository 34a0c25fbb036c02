//! Configuration management for VaultState
//!
//! Environment-based configuration with defaults, TOML files and
//! validation. Every section has sensible defaults so an embedding client
//! only needs to override what it cares about.

use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::time::Duration;

use crate::core_state::definition::DEFAULT_CLEANUP_DELAY;
use crate::core_state::storage::DEFAULT_UPDATE_FEED_CAPACITY;

mod error;

pub use error::ConfigError;

/// Main configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// State handle behaviour
    pub state: StateConfig,

    /// Storage backend settings
    pub storage: StorageConfig,

    /// Derived state settings
    pub derived: DerivedConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// State handle configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    /// How long `update` waits for a combined dependency
    #[serde(with = "humantime_serde")]
    pub update_timeout: Duration,

    /// Warn when an update writes a value equal to the current one
    pub warn_on_redundant_update: bool,
}

/// Storage configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Capacity of the in-memory backend's update feed
    pub update_feed_capacity: usize,
}

/// Derived state configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DerivedConfig {
    /// Grace period before an unobserved derived state is torn down
    #[serde(with = "humantime_serde")]
    pub cleanup_delay: Duration,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Enable JSON formatting
    pub json_format: bool,

    /// Include timestamps
    pub with_timestamp: bool,

    /// Include target module
    pub with_target: bool,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            update_timeout: Duration::from_secs(1),
            warn_on_redundant_update: false,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            update_feed_capacity: DEFAULT_UPDATE_FEED_CAPACITY,
        }
    }
}

impl Default for DerivedConfig {
    fn default() -> Self {
        Self {
            cleanup_delay: DEFAULT_CLEANUP_DELAY,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            with_timestamp: true,
            with_target: true,
        }
    }
}

fn env_override<T>(var: &'static str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(var) {
        Ok(raw) => raw.parse().map(Some).map_err(|e: T::Err| ConfigError::InvalidEnv {
            var,
            reason: e.to_string(),
        }),
        Err(_) => Ok(None),
    }
}

fn env_duration(var: &'static str) -> Result<Option<Duration>, ConfigError> {
    match env::var(var) {
        Ok(raw) => humantime_serde::re::humantime::parse_duration(&raw)
            .map(Some)
            .map_err(|e| ConfigError::InvalidEnv {
                var,
                reason: e.to_string(),
            }),
        Err(_) => Ok(None),
    }
}

impl Config {
    /// Load configuration from environment variables
    ///
    /// Environment variables follow the pattern: VAULTSTATE_<SECTION>_<KEY>
    /// Example: VAULTSTATE_STATE_UPDATE_TIMEOUT=250ms
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        // State config
        if let Some(timeout) = env_duration("VAULTSTATE_STATE_UPDATE_TIMEOUT")? {
            config.state.update_timeout = timeout;
        }
        if let Some(warn) = env_override("VAULTSTATE_STATE_WARN_ON_REDUNDANT_UPDATE")? {
            config.state.warn_on_redundant_update = warn;
        }

        // Storage config
        if let Some(capacity) = env_override("VAULTSTATE_STORAGE_UPDATE_FEED_CAPACITY")? {
            config.storage.update_feed_capacity = capacity;
        }

        // Derived config
        if let Some(delay) = env_duration("VAULTSTATE_DERIVED_CLEANUP_DELAY")? {
            config.derived.cleanup_delay = delay;
        }

        // Logging config
        if let Ok(level) = env::var("VAULTSTATE_LOG_LEVEL") {
            config.logging.level = level;
        }
        if let Some(json) = env_override("VAULTSTATE_LOG_JSON")? {
            config.logging.json_format = json;
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let config: Self = toml::from_str(&contents)?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.state.update_timeout.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "update_timeout must be greater than 0".to_string(),
            ));
        }

        // broadcast::channel panics on zero capacity
        if self.storage.update_feed_capacity == 0 {
            return Err(ConfigError::ValidationFailed(
                "update_feed_capacity must be greater than 0".to_string(),
            ));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::ValidationFailed(format!(
                "Invalid log level: {}",
                self.logging.level
            )));
        }

        Ok(())
    }

    /// Save configuration to file
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let contents = toml::to_string_pretty(self)?;

        std::fs::write(path, contents).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }
}
