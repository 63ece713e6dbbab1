//! Driver settings stored as TOML

use crate::core::modem::ModemOptions;
use crate::core::router::EchoConfig;
use crate::core::status::PinAssignment;
use crate::core::transport::SerialConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Configuration load/save failures
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Could not determine config directory")]
    NoConfigDir,

    #[error("Config I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Could not serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Signal and data UARTs
    pub ports: PortsConfig,
    /// Delays and deadlines
    pub timing: TimingConfig,
    /// Which incoming lines are echoed to the log
    pub echo: EchoConfig,
    /// Host GPIO numbers of the control lines
    pub pins: PinAssignment,
    /// Logging settings
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load config from the default location, defaults when absent
    pub fn load() -> Result<Self, ConfigError> {
        let path = super::config_path().ok_or(ConfigError::NoConfigDir)?;
        Self::load_from(&path)
    }

    /// Load config from `path`, defaults when the file does not exist
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(toml::from_str(&content)?)
    }

    /// Save config to the default location
    pub fn save(&self) -> Result<PathBuf, ConfigError> {
        let path = super::config_path().ok_or(ConfigError::NoConfigDir)?;
        self.save_to(&path)?;
        Ok(path)
    }

    /// Save config to `path`, creating parent directories
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let io_err = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(io_err)
    }

    /// Options for [`Modem`](crate::core::modem::Modem)
    pub fn to_modem_options(&self) -> ModemOptions {
        ModemOptions {
            settle_delay: Duration::from_millis(self.timing.settle_delay_ms),
            command_timeout: Duration::from_millis(self.timing.command_timeout_ms),
            connect_timeout: Duration::from_secs(self.timing.connect_timeout_secs),
            http_timeout: Duration::from_secs(self.timing.http_timeout_secs),
            certificate_wait: Duration::from_millis(self.timing.certificate_wait_ms),
            echo: self.echo,
            ..Default::default()
        }
    }
}

/// Serial ports of the unit
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortsConfig {
    /// AT command UART
    pub signal: SerialConfig,
    /// Payload UART, `None` disables HTTP requests
    pub data: Option<SerialConfig>,
}

/// Delays and deadlines
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Pause after each command write
    pub settle_delay_ms: u64,
    pub command_timeout_ms: u64,
    pub connect_timeout_secs: u64,
    pub http_timeout_secs: u64,
    pub location_timeout_secs: u64,
    pub certificate_wait_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        let options = ModemOptions::default();
        Self {
            settle_delay_ms: millis(options.settle_delay),
            command_timeout_ms: millis(options.command_timeout),
            connect_timeout_secs: options.connect_timeout.as_secs(),
            http_timeout_secs: options.http_timeout.as_secs(),
            location_timeout_secs: crate::core::location::DEFAULT_LOCATION_TIMEOUT.as_secs(),
            certificate_wait_ms: millis(options.certificate_wait),
        }
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `tracing` filter directive, overridden by `RUST_LOG`
    pub filter: String,
    /// Emit JSON records
    pub json: bool,
    /// Also write a daily rotated log file
    pub file: bool,
    /// Directory for the log file
    pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            json: false,
            file: false,
            directory: super::log_dir(),
        }
    }
}
