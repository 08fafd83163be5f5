//! Configuration loading: TOML file with environment variable overrides.
//!
//! Looks for `mithermo.toml` in the working directory. Every field has a
//! sensible default so the file is optional. Environment variables take
//! precedence over file values.

use serde::Deserialize;

use mithermo_adapter_ble::BleConfig;
use mithermo_app::scan_controller::DEFAULT_DISPLAY_NAME;

/// Top-level configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Logging settings.
    pub logging: LoggingConfig,
    /// Scanning and polling settings.
    pub ble: BleConfig,
    /// How devices are presented to the host.
    pub device: DeviceConfig,
}

/// Logging configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive (`RUST_LOG` syntax).
    pub filter: String,
}

/// Device presentation.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Title of every device, also used as the host id prefix.
    pub display_name: String,
}

impl Config {
    /// Load configuration from `mithermo.toml` (if present) then apply
    /// environment-variable overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML file exists but is malformed, or if the
    /// resulting configuration is invalid.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::from_file("mithermo.toml")?;
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(ConfigError::Parse),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(ConfigError::Io(err)),
        }
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(val) = var("MITHERMO_POLL_INTERVAL_MS") {
            match val.parse() {
                Ok(ms) => self.ble.poll_interval_ms = ms,
                Err(_) => eprintln!("ignoring invalid MITHERMO_POLL_INTERVAL_MS={val}"),
            }
        }
        if let Some(val) = var("MITHERMO_GATT_TIMEOUT_MS") {
            match val.parse() {
                Ok(ms) => self.ble.gatt_timeout_ms = Some(ms),
                Err(_) => eprintln!("ignoring invalid MITHERMO_GATT_TIMEOUT_MS={val}"),
            }
        }
        if let Some(val) = var("MITHERMO_DISPLAY_NAME") {
            self.device.display_name = val;
        }
        if let Some(val) = var("MITHERMO_LOG") {
            self.logging.filter = val;
        }
        if let Some(val) = var("RUST_LOG") {
            self.logging.filter = val;
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.ble.poll_interval_ms == 0 {
            return Err(ConfigError::Validation(
                "poll_interval_ms must be non-zero".to_string(),
            ));
        }
        if self.ble.gatt_timeout_ms == Some(0) {
            return Err(ConfigError::Validation(
                "gatt_timeout_ms must be non-zero when set".to_string(),
            ));
        }
        if self.device.display_name.trim().is_empty() {
            return Err(ConfigError::Validation(
                "display_name must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "mithermod=info,mithermo_app=info,mithermo_adapter_ble=info".to_string(),
        }
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            display_name: DEFAULT_DISPLAY_NAME.to_string(),
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// TOML parse failure.
    #[error("failed to parse config file")]
    Parse(#[from] toml::de::Error),
    /// File I/O failure.
    #[error("failed to read config file")]
    Io(#[from] std::io::Error),
    /// Semantic validation failure.
    #[error("invalid configuration: {0}")]
    Validation(String),
}
