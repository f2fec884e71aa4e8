//! Room Controller configuration.
//!
//! Configuration is loaded from environment variables. Numeric values that
//! fail to parse or fall outside their range are errors, never silently
//! replaced by defaults.

use crate::actors::RoomSettings;
use crate::controller::ControllerSettings;
use crate::native::DeviceProfile;

use std::collections::HashMap;
use std::env;
use std::fmt::Display;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Default health endpoint bind address.
pub const DEFAULT_HEALTH_BIND_ADDRESS: &str = "0.0.0.0:8081";

/// Default pump interval in milliseconds.
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 150;

/// Accepted pump interval range in milliseconds.
pub const HEARTBEAT_INTERVAL_RANGE_MS: RangeInclusive<u64> = 10..=1000;

/// Default per-subscriber event queue length.
pub const DEFAULT_SUBSCRIBER_QUEUE_CAPACITY: usize = 256;

/// Default time an unanswered pairing blocks a new pair request.
pub const DEFAULT_PAIRING_TIMEOUT_SECONDS: u64 = 60;

/// Default threshold above which native calls are logged as slow.
pub const DEFAULT_NATIVE_CALL_TIMEOUT_SECONDS: u64 = 10;

/// Default bound on each shutdown wait.
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECONDS: u64 = 10;

/// Room Controller configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Writable directory for the native runtime's credential store.
    pub content_dir: PathBuf,

    /// Health endpoint bind address (default: "0.0.0.0:8081").
    pub health_bind_address: String,

    /// Pump interval (default: 150ms).
    pub heartbeat_interval: Duration,

    /// Per-subscriber queue length (default: 256).
    pub subscriber_queue_capacity: usize,

    pub pairing_timeout: Duration,

    pub native_call_timeout: Duration,

    pub shutdown_timeout: Duration,

    /// Identity reported to the native runtime at initialization.
    pub device: DeviceProfile,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    ///
    /// Creates the content directory if it does not exist.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let content_dir = PathBuf::from(
            vars.get("RC_CONTENT_DIR")
                .filter(|dir| !dir.trim().is_empty())
                .ok_or_else(|| ConfigError::MissingEnvVar("RC_CONTENT_DIR".to_string()))?,
        );
        prepare_content_dir(&content_dir)?;

        let health_bind_address = vars
            .get("RC_HEALTH_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_HEALTH_BIND_ADDRESS.to_string());

        let heartbeat_interval_ms = parse_var(
            vars,
            "RC_HEARTBEAT_INTERVAL_MS",
            DEFAULT_HEARTBEAT_INTERVAL_MS,
        )?;
        if !HEARTBEAT_INTERVAL_RANGE_MS.contains(&heartbeat_interval_ms) {
            return Err(ConfigError::InvalidValue(format!(
                "RC_HEARTBEAT_INTERVAL_MS must be within {}..={}, got {heartbeat_interval_ms}",
                HEARTBEAT_INTERVAL_RANGE_MS.start(),
                HEARTBEAT_INTERVAL_RANGE_MS.end()
            )));
        }

        let subscriber_queue_capacity = parse_var(
            vars,
            "RC_SUBSCRIBER_QUEUE_CAPACITY",
            DEFAULT_SUBSCRIBER_QUEUE_CAPACITY,
        )?;
        if subscriber_queue_capacity == 0 {
            return Err(ConfigError::InvalidValue(
                "RC_SUBSCRIBER_QUEUE_CAPACITY must be greater than 0".to_string(),
            ));
        }

        let pairing_timeout_seconds = parse_var(
            vars,
            "RC_PAIRING_TIMEOUT_SECONDS",
            DEFAULT_PAIRING_TIMEOUT_SECONDS,
        )?;
        let native_call_timeout_seconds = parse_var(
            vars,
            "RC_NATIVE_CALL_TIMEOUT_SECONDS",
            DEFAULT_NATIVE_CALL_TIMEOUT_SECONDS,
        )?;
        let shutdown_timeout_seconds = parse_var(
            vars,
            "RC_SHUTDOWN_TIMEOUT_SECONDS",
            DEFAULT_SHUTDOWN_TIMEOUT_SECONDS,
        )?;

        let defaults = DeviceProfile::default();
        let text = |key: &str, default: String| vars.get(key).cloned().unwrap_or(default);
        let device = DeviceProfile {
            manufacturer: text("RC_DEVICE_MANUFACTURER", defaults.manufacturer),
            model: text("RC_DEVICE_MODEL", defaults.model),
            serial_number: text("RC_DEVICE_SERIAL", defaults.serial_number),
            mac_address: defaults.mac_address,
            ip_address: defaults.ip_address,
            firmware_version: defaults.firmware_version,
            app_name: text("RC_APP_NAME", defaults.app_name),
            app_version: text("RC_APP_VERSION", defaults.app_version),
            app_developer: text("RC_APP_DEVELOPER", defaults.app_developer),
            app_contact: text("RC_APP_CONTACT", defaults.app_contact),
            content_dir: content_dir.clone(),
        };

        Ok(Config {
            content_dir,
            health_bind_address,
            heartbeat_interval: Duration::from_millis(heartbeat_interval_ms),
            subscriber_queue_capacity,
            pairing_timeout: Duration::from_secs(pairing_timeout_seconds),
            native_call_timeout: Duration::from_secs(native_call_timeout_seconds),
            shutdown_timeout: Duration::from_secs(shutdown_timeout_seconds),
            device,
        })
    }

    /// Settings for the room session core.
    #[must_use]
    pub fn controller_settings(&self) -> ControllerSettings {
        ControllerSettings {
            heartbeat_interval: self.heartbeat_interval,
            subscriber_queue_capacity: self.subscriber_queue_capacity,
            shutdown_timeout: self.shutdown_timeout,
            room: RoomSettings {
                pairing_timeout: self.pairing_timeout,
                slow_call_threshold: self.native_call_timeout,
            },
            device: self.device.clone(),
        }
    }
}

fn parse_var<T>(vars: &HashMap<String, String>, key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    match vars.get(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| ConfigError::InvalidValue(format!("{key}={raw:?}: {e}"))),
    }
}

fn prepare_content_dir(dir: &Path) -> Result<(), ConfigError> {
    if dir.exists() && !dir.is_dir() {
        return Err(ConfigError::InvalidValue(format!(
            "RC_CONTENT_DIR {} is not a directory",
            dir.display()
        )));
    }
    std::fs::create_dir_all(dir).map_err(|e| {
        ConfigError::InvalidValue(format!(
            "RC_CONTENT_DIR {} cannot be created: {e}",
            dir.display()
        ))
    })
}
