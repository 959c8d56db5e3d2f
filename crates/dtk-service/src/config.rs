//! Service configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::reconnect::ReconnectOptions;

/// Service configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Serial source settings.
    pub serial: SerialConfig,
    /// Storage settings.
    pub storage: StorageConfig,
    /// Consumer query settings.
    pub query: QueryConfig,
    /// Reconnection after device I/O failures.
    pub reconnect: ReconnectConfig,
}

impl Config {
    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = default_config_path();
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Read {
            path: path.as_ref().to_path_buf(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Save configuration to a file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self).map_err(ConfigError::Serialize)?;

        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Write {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        std::fs::write(path.as_ref(), content).map_err(|e| ConfigError::Write {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Validate the configuration and return all errors at once.
    ///
    /// ```
    /// use dtk_service::Config;
    ///
    /// let config = Config::default();
    /// config.validate().expect("Default config should be valid");
    /// ```
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();
        errors.extend(self.serial.validate());
        errors.extend(self.storage.validate());
        errors.extend(self.query.validate());
        errors.extend(self.reconnect.validate());

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    /// Load and validate configuration from a file.
    pub fn load_validated<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = Self::load(path)?;
        config.validate()?;
        Ok(config)
    }
}

/// Default serial device path.
pub const DEFAULT_SERIAL_PATH: &str = "/dev/ttyUSB0";
/// Default baud rate of the sensor gateway.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;
/// Shortest accepted read timeout in milliseconds.
pub const MIN_READ_TIMEOUT_MS: u64 = 10;
/// Longest accepted read timeout in milliseconds (1 minute).
pub const MAX_READ_TIMEOUT_MS: u64 = 60_000;

/// Serial source configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Device path (e.g. `/dev/ttyUSB0` or `COM3`).
    pub path: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Read timeout in milliseconds. Bounds how long shutdown waits for a
    /// blocked read.
    pub read_timeout_ms: u64,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            path: DEFAULT_SERIAL_PATH.to_string(),
            baud_rate: DEFAULT_BAUD_RATE,
            read_timeout_ms: 1000,
        }
    }
}

impl SerialConfig {
    /// Read timeout as a duration.
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    /// Validate serial configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.path.trim().is_empty() {
            errors.push(ValidationError {
                field: "serial.path".to_string(),
                message: "device path cannot be empty".to_string(),
            });
        }

        if self.baud_rate == 0 {
            errors.push(ValidationError {
                field: "serial.baud_rate".to_string(),
                message: "baud rate cannot be 0".to_string(),
            });
        }

        if !(MIN_READ_TIMEOUT_MS..=MAX_READ_TIMEOUT_MS).contains(&self.read_timeout_ms) {
            errors.push(ValidationError {
                field: "serial.read_timeout_ms".to_string(),
                message: format!(
                    "read timeout {} ms is out of range ({}-{} ms)",
                    self.read_timeout_ms, MIN_READ_TIMEOUT_MS, MAX_READ_TIMEOUT_MS
                ),
            });
        }

        errors
    }
}

/// Storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Database file path.
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: dtk_store::default_db_path(),
        }
    }
}

impl StorageConfig {
    /// Validate storage configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.path.as_os_str().is_empty() {
            errors.push(ValidationError {
                field: "storage.path".to_string(),
                message: "database path cannot be empty".to_string(),
            });
        }

        errors
    }
}

/// Largest accepted rolling window.
pub const MAX_WINDOW: u32 = 10_000;
/// Shortest accepted consumer poll interval in milliseconds.
pub const MIN_POLL_INTERVAL_MS: u64 = 100;

/// Consumer query configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    /// Number of records in the rolling window.
    pub window: u32,
    /// How often live consumers re-query, in milliseconds.
    pub poll_interval_ms: u64,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            window: dtk_store::DEFAULT_WINDOW,
            poll_interval_ms: 1000,
        }
    }
}

impl QueryConfig {
    /// Poll interval as a duration.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Validate query configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.window == 0 || self.window > MAX_WINDOW {
            errors.push(ValidationError {
                field: "query.window".to_string(),
                message: format!(
                    "window {} is out of range (1-{})",
                    self.window, MAX_WINDOW
                ),
            });
        }

        if self.poll_interval_ms < MIN_POLL_INTERVAL_MS {
            errors.push(ValidationError {
                field: "query.poll_interval_ms".to_string(),
                message: format!(
                    "poll interval {} ms is too short (minimum {} ms)",
                    self.poll_interval_ms, MIN_POLL_INTERVAL_MS
                ),
            });
        }

        errors
    }
}

/// Reconnection configuration.
///
/// `max_attempts = 0` disables reconnection: the first device I/O failure
/// closes the ingestion loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Reconnection attempts after an I/O failure (0 = none).
    pub max_attempts: u32,
    /// Delay before the first attempt, in milliseconds.
    pub initial_delay_ms: u64,
    /// Upper bound for the backoff delay, in milliseconds.
    pub max_delay_ms: u64,
    /// Multiplier applied to the delay after each failed attempt.
    pub backoff_multiplier: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: 0,
            initial_delay_ms: 1000,
            max_delay_ms: 60_000,
            backoff_multiplier: 2.0,
        }
    }
}

impl ReconnectConfig {
    /// Convert to the options used by the ingestion loop.
    pub fn to_options(&self) -> ReconnectOptions {
        ReconnectOptions::new()
            .max_attempts(self.max_attempts)
            .initial_delay(Duration::from_millis(self.initial_delay_ms))
            .max_delay(Duration::from_millis(self.max_delay_ms))
            .backoff_multiplier(self.backoff_multiplier)
    }

    /// Validate reconnection configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        self.to_options()
            .validate()
            .err()
            .map(|message| {
                vec![ValidationError {
                    field: "reconnect".to_string(),
                    message,
                }]
            })
            .unwrap_or_default()
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Failed to serialize config: {0}")]
    Serialize(toml::ser::Error),
    #[error("Failed to write config file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Configuration validation failed:\n{}", format_validation_errors(.0))]
    Validation(Vec<ValidationError>),
}

/// A single validation error with context.
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// The field path (e.g., `serial.baud_rate`).
    pub field: String,
    /// Description of the validation failure.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn format_validation_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {}", e))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("dtk")
        .join("dtk.toml")
}
