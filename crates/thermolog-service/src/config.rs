//! Service configuration.
//!
//! The configuration is a JSON file, by default `config.json` next to the
//! executable:
//!
//! ```json
//! {
//!   "mac_addresses": ["A4:C1:38:00:00:01"],
//!   "poll_interval_minutes": 5
//! }
//! ```
//!
//! Only `mac_addresses` and `poll_interval_minutes` are required. The
//! configuration is loaded once at startup and never changes afterwards.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use thermolog_core::{AcquireOptions, RetryPolicy};
use thermolog_types::{DeviceTarget, MacAddress};

/// Service configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Sensor addresses. Only the first is polled.
    pub mac_addresses: Vec<String>,
    /// Minutes between acquisition cycles.
    pub poll_interval_minutes: u64,
    /// Database file path.
    #[serde(default = "thermolog_store::default_db_path")]
    pub database_path: PathBuf,
    /// HTTP bind address (e.g., "127.0.0.1:8080").
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Readings older than this many days are pruned.
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
    /// Acquisition attempts per cycle.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Seconds to wait between failed attempts.
    #[serde(default = "default_retry_delay_seconds")]
    pub retry_delay_seconds: u64,
    /// Seconds allowed for finding and connecting to the sensor.
    #[serde(default = "default_connect_timeout_seconds")]
    pub connect_timeout_seconds: u64,
    /// Seconds to wait for the first payload after subscribing.
    #[serde(default = "default_notification_timeout_seconds")]
    pub notification_timeout_seconds: u64,
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_retention_days() -> u32 {
    1
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_delay_seconds() -> u64 {
    5
}

fn default_connect_timeout_seconds() -> u64 {
    20
}

fn default_notification_timeout_seconds() -> u64 {
    30
}

impl Config {
    /// Create a configuration with the required fields and defaults for the rest.
    pub fn new(mac_addresses: Vec<String>, poll_interval_minutes: u64) -> Self {
        Self {
            mac_addresses,
            poll_interval_minutes,
            database_path: thermolog_store::default_db_path(),
            bind: default_bind(),
            retention_days: default_retention_days(),
            max_attempts: default_max_attempts(),
            retry_delay_seconds: default_retry_delay_seconds(),
            connect_timeout_seconds: default_connect_timeout_seconds(),
            notification_timeout_seconds: default_notification_timeout_seconds(),
        }
    }

    /// Load configuration from a file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Read {
            path: path.as_ref().to_path_buf(),
            source: e,
        })?;
        serde_json::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Load and validate configuration from a file.
    pub fn load_validated<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = Self::load(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration and return any errors.
    ///
    /// This checks:
    /// - At least one address is listed and the first one parses
    /// - Poll interval, retention window and timeouts are non-zero
    /// - Bind address has a `host:port` form with a non-zero port
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        match self.mac_addresses.first() {
            None => errors.push(ValidationError::new(
                "mac_addresses",
                "at least one MAC address is required",
            )),
            Some(first) => {
                if let Err(e) = first.parse::<MacAddress>() {
                    errors.push(ValidationError::new("mac_addresses[0]", e.to_string()));
                }
            }
        }

        for (field, value) in [
            ("poll_interval_minutes", self.poll_interval_minutes),
            ("retention_days", u64::from(self.retention_days)),
            ("connect_timeout_seconds", self.connect_timeout_seconds),
            ("notification_timeout_seconds", self.notification_timeout_seconds),
        ] {
            if value == 0 {
                errors.push(ValidationError::new(field, "must be greater than 0"));
            }
        }

        errors.extend(validate_bind(&self.bind));

        if self.database_path.as_os_str().is_empty() {
            errors.push(ValidationError::new(
                "database_path",
                "database path cannot be empty",
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    /// The sensor to poll.
    ///
    /// Only the first listed address is used; any others are ignored with a
    /// warning.
    pub fn device_target(&self) -> Result<DeviceTarget, ConfigError> {
        let first = self.mac_addresses.first().ok_or_else(|| {
            ConfigError::Validation(vec![ValidationError::new(
                "mac_addresses",
                "at least one MAC address is required",
            )])
        })?;

        let address: MacAddress = first.parse().map_err(|e: thermolog_types::ParseError| {
            ConfigError::Validation(vec![ValidationError::new("mac_addresses[0]", e.to_string())])
        })?;

        if self.mac_addresses.len() > 1 {
            warn!(
                "{} MAC addresses configured; only monitoring the first: {}",
                self.mac_addresses.len(),
                address
            );
        }

        Ok(DeviceTarget::new(address))
    }

    /// Time between acquisition cycles.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_minutes.saturating_mul(60))
    }

    /// Maximum age of a stored reading.
    pub fn retention(&self) -> Duration {
        Duration::from_secs(u64::from(self.retention_days) * 24 * 60 * 60)
    }

    /// Retry policy for one acquisition cycle.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts).delay(Duration::from_secs(self.retry_delay_seconds))
    }

    /// Timeouts for one acquisition attempt.
    pub fn acquire_options(&self) -> AcquireOptions {
        AcquireOptions::new()
            .connect_timeout(Duration::from_secs(self.connect_timeout_seconds))
            .notification_timeout(Duration::from_secs(self.notification_timeout_seconds))
    }
}

fn validate_bind(bind: &str) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if bind.is_empty() {
        errors.push(ValidationError::new("bind", "bind address cannot be empty"));
        return errors;
    }

    match bind.rsplit_once(':') {
        None => errors.push(ValidationError::new(
            "bind",
            format!("invalid bind address '{}': expected format 'host:port'", bind),
        )),
        Some((_, port)) => match port.parse::<u16>() {
            Ok(0) => errors.push(ValidationError::new("bind", "port cannot be 0")),
            Ok(_) => {}
            Err(_) => errors.push(ValidationError::new(
                "bind",
                format!("invalid port '{}': must be a number 1-65535", port),
            )),
        },
    }

    errors
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
        source: serde_json::Error,
    },
    #[error("Configuration validation failed:\n{}", format_validation_errors(.0))]
    Validation(Vec<ValidationError>),
}

/// A single validation error with context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// The offending field (e.g., `mac_addresses[0]`).
    pub field: String,
    /// Description of the validation failure.
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
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

/// `config.json` in the directory containing the running executable.
pub fn default_config_path() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."))
        .join("config.json")
}
