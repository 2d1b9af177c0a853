//! # Session Configuration
//!
//! Configuration for the register session layer.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     CAJA_DB_PATH=/var/lib/caja/caja.db                                 │
//! │     CAJA_CALL_TIMEOUT_MS=5000                                          │
//! │     CAJA_READ_RETRIES=3                                                │
//! │     CAJA_CLOSE_ATTEMPTS=3                                              │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/caja/caja.toml (Linux)                                   │
//! │     ~/Library/Application Support/com.caja.pos/caja.toml (macOS)       │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # caja.toml
//! [database]
//! path = "caja.db"
//! max_connections = 5
//! acquire_timeout_ms = 30000
//! idle_timeout_secs = 600
//!
//! [calls]
//! timeout_ms = 5000
//!
//! [retry]          # idempotent reads only
//! max_attempts = 3
//! initial_backoff_ms = 100
//! max_backoff_ms = 2000
//!
//! [close]          # re-read/recompute rounds when a sale races the close
//! max_attempts = 3
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use caja_db::DbConfig;

use crate::guard::CallContext;

// =============================================================================
// Config Errors
// =============================================================================

/// Errors while loading or saving configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("No config path available on this platform")]
    NoConfigPath,
}

pub type ConfigResult<T> = Result<T, ConfigError>;

// =============================================================================
// Sections
// =============================================================================

/// Where the register database lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// SQLite file path. `:memory:` keeps everything in process.
    #[serde(default = "default_db_path")]
    pub path: PathBuf,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// How long a store call waits for a pooled connection.
    #[serde(default = "default_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,

    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("caja.db")
}

fn default_max_connections() -> u32 {
    5
}

fn default_acquire_timeout_ms() -> u64 {
    30_000
}

fn default_idle_timeout_secs() -> u64 {
    600
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        DatabaseSettings {
            path: default_db_path(),
            max_connections: default_max_connections(),
            acquire_timeout_ms: default_acquire_timeout_ms(),
            idle_timeout_secs: default_idle_timeout_secs(),
        }
    }
}

/// Bounds applied to every store call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallSettings {
    /// Per-call timeout (milliseconds).
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_timeout_ms() -> u64 {
    5_000
}

impl Default for CallSettings {
    fn default() -> Self {
        CallSettings {
            timeout_ms: default_timeout_ms(),
        }
    }
}

/// Automatic retry of idempotent reads.
///
/// Writes (open, record sale, close, delete) are never retried.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Total attempts including the first one. 1 disables retry.
    #[serde(default = "default_retry_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_initial_backoff() -> u64 {
    100
}

fn default_max_backoff() -> u64 {
    2_000
}

impl Default for RetrySettings {
    fn default() -> Self {
        RetrySettings {
            max_attempts: default_retry_attempts(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
        }
    }
}

/// Close behaviour when the register changes between read and close.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseSettings {
    /// Read-compute-submit rounds before giving up.
    #[serde(default = "default_close_attempts")]
    pub max_attempts: u32,
}

fn default_close_attempts() -> u32 {
    3
}

impl Default for CloseSettings {
    fn default() -> Self {
        CloseSettings {
            max_attempts: default_close_attempts(),
        }
    }
}

// =============================================================================
// Session Config
// =============================================================================

/// Complete session configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default)]
    pub database: DatabaseSettings,

    #[serde(default)]
    pub calls: CallSettings,

    #[serde(default)]
    pub retry: RetrySettings,

    #[serde(default)]
    pub close: CloseSettings,
}

impl SessionConfig {
    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (caja.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> ConfigResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading session config from file");
                config = Self::from_file(&path)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns defaults if loading fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load session config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Parses a TOML file without applying overrides.
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> ConfigResult<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> ConfigResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or(ConfigError::NoConfigPath)?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents)?;

        info!(?path, "Session config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.database.path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("database.path must not be empty".into()));
        }

        if self.database.max_connections == 0 {
            return Err(ConfigError::Invalid(
                "database.max_connections must be greater than 0".into(),
            ));
        }

        if self.database.acquire_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "database.acquire_timeout_ms must be greater than 0".into(),
            ));
        }

        if self.calls.timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "calls.timeout_ms must be greater than 0".into(),
            ));
        }

        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "retry.max_attempts must be at least 1".into(),
            ));
        }

        if self.retry.initial_backoff_ms > self.retry.max_backoff_ms {
            return Err(ConfigError::Invalid(
                "retry.initial_backoff_ms must not exceed retry.max_backoff_ms".into(),
            ));
        }

        if self.close.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "close.max_attempts must be at least 1".into(),
            ));
        }

        Ok(())
    }

    /// Applies `CAJA_*` environment variable overrides.
    fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Applies overrides from any key lookup (environment in production).
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup("CAJA_DB_PATH") {
            debug!(path = %path, "Overriding database path from environment");
            self.database.path = PathBuf::from(path);
        }

        if let Some(raw) = lookup("CAJA_CALL_TIMEOUT_MS") {
            match raw.parse::<u64>() {
                Ok(ms) => self.calls.timeout_ms = ms,
                Err(_) => warn!(value = %raw, "Ignoring invalid CAJA_CALL_TIMEOUT_MS"),
            }
        }

        if let Some(raw) = lookup("CAJA_READ_RETRIES") {
            match raw.parse::<u32>() {
                Ok(n) => self.retry.max_attempts = n,
                Err(_) => warn!(value = %raw, "Ignoring invalid CAJA_READ_RETRIES"),
            }
        }

        if let Some(raw) = lookup("CAJA_CLOSE_ATTEMPTS") {
            match raw.parse::<u32>() {
                Ok(n) => self.close.max_attempts = n,
                Err(_) => warn!(value = %raw, "Ignoring invalid CAJA_CLOSE_ATTEMPTS"),
            }
        }
    }

    /// Returns the default config file path.
    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "caja", "pos")
            .map(|dirs| dirs.config_dir().join("caja.toml"))
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.calls.timeout_ms)
    }

    /// Pool configuration for the SQLite store.
    pub fn db_config(&self) -> DbConfig {
        let base = if self.database.path.as_os_str() == ":memory:" {
            DbConfig::in_memory()
        } else {
            DbConfig::new(&self.database.path)
        };

        base.max_connections(self.database.max_connections)
            .acquire_timeout(Duration::from_millis(self.database.acquire_timeout_ms))
            .idle_timeout(Duration::from_secs(self.database.idle_timeout_secs))
    }

    /// A fresh call context using the configured timeout.
    pub fn call_context(&self) -> CallContext {
        CallContext::new(self.call_timeout())
    }
}
