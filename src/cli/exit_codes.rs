//! CLI Exit Codes
//!
//! Standard exit codes for CLI operations and automation.

use crate::config::ConfigError;
use crate::core::error::ModemError;
use std::process::ExitCode;

/// Exit code constants
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitCodes;

impl ExitCodes {
    /// Success
    pub const SUCCESS: u8 = 0;

    /// General error
    pub const ERROR: u8 = 1;

    /// Invalid arguments
    pub const INVALID_ARGS: u8 = 2;

    /// Device rejected the connection
    pub const CONNECTION_FAILED: u8 = 3;

    /// No answer before the deadline
    pub const TIMEOUT: u8 = 4;

    /// Port not found
    pub const PORT_NOT_FOUND: u8 = 5;

    /// Permission denied
    pub const PERMISSION_DENIED: u8 = 7;

    /// Configuration error
    pub const CONFIG_ERROR: u8 = 8;

    /// Protocol error
    pub const PROTOCOL_ERROR: u8 = 9;

    /// User cancelled
    pub const CANCELLED: u8 = 11;

    /// Data channel or radio busy
    pub const DEVICE_BUSY: u8 = 13;

    /// Status/power control failure
    pub const STATUS_ERROR: u8 = 14;

    /// Internal error
    pub const INTERNAL_ERROR: u8 = 127;
}

/// CLI operation result
#[derive(Debug)]
pub enum CliResult {
    /// Success with optional message
    Success(Option<String>),

    /// Error with code and message
    Error(u8, String),
}

impl CliResult {
    pub fn success() -> Self {
        Self::Success(None)
    }

    pub fn success_with_message(msg: impl Into<String>) -> Self {
        Self::Success(Some(msg.into()))
    }

    pub fn error(code: u8, msg: impl Into<String>) -> Self {
        Self::Error(code, msg.into())
    }

    /// Get exit code
    pub fn code(&self) -> u8 {
        match self {
            Self::Success(_) => ExitCodes::SUCCESS,
            Self::Error(code, _) => *code,
        }
    }

    /// Get message
    pub fn message(&self) -> Option<&str> {
        match self {
            Self::Success(Some(msg)) | Self::Error(_, msg) => Some(msg),
            Self::Success(None) => None,
        }
    }

    /// Convert to ExitCode
    pub fn to_exit_code(&self) -> ExitCode {
        ExitCode::from(self.code())
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

fn io_code(err: &std::io::Error) -> u8 {
    use std::io::ErrorKind;

    match err.kind() {
        ErrorKind::NotFound => ExitCodes::PORT_NOT_FOUND,
        ErrorKind::PermissionDenied => ExitCodes::PERMISSION_DENIED,
        ErrorKind::TimedOut => ExitCodes::TIMEOUT,
        _ => ExitCodes::ERROR,
    }
}

impl From<&ModemError> for CliResult {
    fn from(err: &ModemError) -> Self {
        let code = match err {
            ModemError::Timeout => ExitCodes::TIMEOUT,
            ModemError::Protocol(_) => ExitCodes::PROTOCOL_ERROR,
            ModemError::DeviceRejected(_) => ExitCodes::CONNECTION_FAILED,
            ModemError::Io(e) => io_code(e),
            ModemError::ResourceConflict(_) => ExitCodes::DEVICE_BUSY,
            ModemError::InvalidArgument(_) => ExitCodes::INVALID_ARGS,
            ModemError::Status(_) => ExitCodes::STATUS_ERROR,
            ModemError::ChannelClosed => ExitCodes::ERROR,
        };
        Self::Error(code, err.to_string())
    }
}

impl From<&ConfigError> for CliResult {
    fn from(err: &ConfigError) -> Self {
        Self::Error(ExitCodes::CONFIG_ERROR, err.to_string())
    }
}

impl From<&anyhow::Error> for CliResult {
    /// Uses the first driver or config error in the chain
    fn from(err: &anyhow::Error) -> Self {
        for cause in err.chain() {
            if let Some(e) = cause.downcast_ref::<ModemError>() {
                return Self::from(e);
            }
            if let Some(e) = cause.downcast_ref::<ConfigError>() {
                return Self::from(e);
            }
        }
        Self::Error(ExitCodes::ERROR, format!("{err:#}"))
    }
}

/// Exit code description
pub fn exit_code_description(code: u8) -> &'static str {
    match code {
        0 => "Success",
        1 => "General error",
        2 => "Invalid arguments",
        3 => "Connection rejected by device",
        4 => "Timeout",
        5 => "Port not found",
        7 => "Permission denied",
        8 => "Configuration error",
        9 => "Protocol error",
        11 => "Operation cancelled",
        13 => "Device busy",
        14 => "Status control error",
        127 => "Internal error",
        _ => "Unknown error",
    }
}

/// Print exit code table
pub fn print_exit_codes() {
    println!("Exit Codes:");
    for code in [0, 1, 2, 3, 4, 5, 7, 8, 9, 11, 13, 14, 127] {
        println!("  {:>3}  {}", code, exit_code_description(code));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_result() {
        let success = CliResult::success();
        assert!(success.is_success());
        assert_eq!(success.code(), 0);

        let error = CliResult::error(3, "Connection failed");
        assert!(!error.is_success());
        assert_eq!(error.code(), 3);
        assert_eq!(error.message(), Some("Connection failed"));
    }

    #[test]
    fn test_from_modem_error() {
        assert_eq!(CliResult::from(&ModemError::Timeout).code(), ExitCodes::TIMEOUT);
        assert_eq!(
            CliResult::from(&ModemError::ResourceConflict("busy".into())).code(),
            ExitCodes::DEVICE_BUSY
        );
        let missing = ModemError::Io(std::io::Error::new(std::io::ErrorKind::NotFound, "no port"));
        assert_eq!(CliResult::from(&missing).code(), ExitCodes::PORT_NOT_FOUND);
    }

    #[test]
    fn test_from_anyhow_chain() {
        let err = anyhow::Error::new(ModemError::DeviceRejected("Host name not found".into()))
            .context("http request failed");
        let result = CliResult::from(&err);
        assert_eq!(result.code(), ExitCodes::CONNECTION_FAILED);
        assert!(result.message().unwrap().contains("Host name not found"));

        let other = anyhow::anyhow!("something else");
        assert_eq!(CliResult::from(&other).code(), ExitCodes::ERROR);
    }
}
