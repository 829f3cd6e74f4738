//! CLI Exit Codes
//!
//! Stable process exit codes so scripts can tell modem failures apart.

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

    /// Socket connection failed
    pub const CONNECTION_FAILED: u8 = 3;

    /// Modem did not answer in time
    pub const TIMEOUT: u8 = 4;

    /// Modem rejected a command
    pub const COMMAND_FAILED: u8 = 5;

    /// File not found
    pub const FILE_NOT_FOUND: u8 = 6;

    /// Permission denied
    pub const PERMISSION_DENIED: u8 = 7;

    /// Configuration error
    pub const CONFIG_ERROR: u8 = 8;

    /// Unexpected reply from the modem
    pub const PROTOCOL_ERROR: u8 = 9;

    /// Bring-up exhausted its attempts
    pub const BRINGUP_FAILED: u8 = 10;

    /// Modem is powered off
    pub const POWERED_OFF: u8 = 11;

    /// No usable device or lookup result
    pub const DEVICE_NOT_FOUND: u8 = 12;

    /// Operation not supported by this modem
    pub const UNSUPPORTED: u8 = 13;

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
    /// Plain success
    pub fn success() -> Self {
        Self::Success(None)
    }

    /// Success carrying a message
    pub fn success_with_message(msg: impl Into<String>) -> Self {
        Self::Success(Some(msg.into()))
    }

    /// Error with an explicit code
    pub fn error(code: u8, msg: impl Into<String>) -> Self {
        Self::Error(code, msg.into())
    }

    /// Invalid command-line input
    pub fn invalid_args(msg: impl Into<String>) -> Self {
        Self::Error(ExitCodes::INVALID_ARGS, msg.into())
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

    /// Convert to `ExitCode`
    pub fn to_exit_code(&self) -> ExitCode {
        ExitCode::from(self.code())
    }

    /// Is success?
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

impl From<std::io::Error> for CliResult {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind;

        let code = match err.kind() {
            ErrorKind::NotFound => ExitCodes::FILE_NOT_FOUND,
            ErrorKind::PermissionDenied => ExitCodes::PERMISSION_DENIED,
            ErrorKind::TimedOut => ExitCodes::TIMEOUT,
            _ => ExitCodes::ERROR,
        };

        Self::Error(code, err.to_string())
    }
}

impl From<ModemError> for CliResult {
    fn from(err: ModemError) -> Self {
        let code = match &err {
            ModemError::Timeout => ExitCodes::TIMEOUT,
            ModemError::CommandFailed(_) => ExitCodes::COMMAND_FAILED,
            ModemError::OutOfMemory => ExitCodes::INTERNAL_ERROR,
            ModemError::PoweredOff => ExitCodes::POWERED_OFF,
            ModemError::InvalidArgument(_) => ExitCodes::INVALID_ARGS,
            ModemError::UnsupportedMode | ModemError::Unsupported(_) => ExitCodes::UNSUPPORTED,
            ModemError::ParseFailed(_) => ExitCodes::PROTOCOL_ERROR,
            ModemError::NotFound | ModemError::NotInitialized => ExitCodes::DEVICE_NOT_FOUND,
            ModemError::ConnectFailed => ExitCodes::CONNECTION_FAILED,
            ModemError::BringupFailed { .. } => ExitCodes::BRINGUP_FAILED,
        };

        Self::Error(code, err.to_string())
    }
}

impl From<ConfigError> for CliResult {
    fn from(err: ConfigError) -> Self {
        Self::Error(ExitCodes::CONFIG_ERROR, err.to_string())
    }
}

/// Exit code description
pub fn exit_code_description(code: u8) -> &'static str {
    match code {
        0 => "Success",
        1 => "General error",
        2 => "Invalid arguments",
        3 => "Connection failed",
        4 => "Modem timeout",
        5 => "Command rejected by modem",
        6 => "File not found",
        7 => "Permission denied",
        8 => "Configuration error",
        9 => "Protocol error",
        10 => "Bring-up failed",
        11 => "Modem powered off",
        12 => "Device not found",
        13 => "Not supported",
        127 => "Internal error",
        _ => "Unknown error",
    }
}

/// Print exit code table
pub fn print_exit_codes() {
    println!("Exit Codes:");
    for code in [0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 127] {
        println!("  {:>3}  {}", code, exit_code_description(code));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::bringup::Stage;
    use crate::core::device::ControlCommand;

    #[test]
    fn test_cli_result() {
        let success = CliResult::success();
        assert!(success.is_success());
        assert_eq!(success.code(), 0);
        assert_eq!(success.message(), None);

        let error = CliResult::error(3, "Connection failed");
        assert!(!error.is_success());
        assert_eq!(error.code(), 3);
        assert_eq!(error.message(), Some("Connection failed"));
    }

    #[test]
    fn test_from_io_error() {
        let err = std::io::Error::new(std::io::ErrorKind::NotFound, "file missing");
        let result = CliResult::from(err);
        assert_eq!(result.code(), ExitCodes::FILE_NOT_FOUND);
    }

    #[test]
    fn test_from_modem_error() {
        assert_eq!(CliResult::from(ModemError::Timeout).code(), ExitCodes::TIMEOUT);
        assert_eq!(
            CliResult::from(ModemError::ConnectFailed).code(),
            ExitCodes::CONNECTION_FAILED
        );
        assert_eq!(
            CliResult::from(ModemError::Unsupported(ControlCommand::GetGps)).code(),
            ExitCodes::UNSUPPORTED
        );

        let failed = CliResult::from(ModemError::BringupFailed {
            attempts: 5,
            stage: Stage::RegistrationCheck,
            source: Box::new(ModemError::Timeout),
        });
        assert_eq!(failed.code(), ExitCodes::BRINGUP_FAILED);
        assert!(failed.message().is_some_and(|m| m.contains("registration check")));
    }

    #[test]
    fn test_descriptions_cover_table() {
        for code in [0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 127] {
            assert_ne!(exit_code_description(code), "Unknown error");
        }
        assert_eq!(exit_code_description(200), "Unknown error");
    }
}
