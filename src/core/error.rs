//! Error kinds surfaced by the modem core

use super::bringup::Stage;
use super::device::ControlCommand;
use super::transport::TransportError;
use thiserror::Error;

/// Modem error types
#[derive(Error, Debug)]
pub enum ModemError {
    /// No reply within the operation's bound
    #[error("Operation timed out")]
    Timeout,

    /// The transport reported a non-OK result
    #[error("Command failed: {0}")]
    CommandFailed(String),

    /// Buffer allocation failed
    #[error("Out of memory")]
    OutOfMemory,

    /// The operation requires the modem to be powered
    #[error("Modem is powered off")]
    PoweredOff,

    /// Invalid argument
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Server-mode sockets are not supported
    #[error("Only client connections are supported")]
    UnsupportedMode,

    /// A reply did not match the expected grammar
    #[error("Failed to parse reply: {0}")]
    ParseFailed(String),

    /// Recognized control command that this modem does not implement
    #[error("Control command not supported: {0:?}")]
    Unsupported(ControlCommand),

    /// Lookup produced no usable result
    #[error("Not found")]
    NotFound,

    /// TCP connect step failed
    #[error("Connection failed")]
    ConnectFailed,

    /// No initialized device is available
    #[error("No initialized device")]
    NotInitialized,

    /// Every bring-up attempt failed
    #[error("Bring-up failed after {attempts} attempts (last stage: {stage})")]
    BringupFailed {
        /// Attempts consumed
        attempts: u32,
        /// Stage that failed on the last attempt
        stage: Stage,
        /// Failure of the last attempt
        #[source]
        source: Box<ModemError>,
    },
}

impl ModemError {
    /// Check if this error is a timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout)
    }
}

impl From<TransportError> for ModemError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Timeout(_) => Self::Timeout,
            TransportError::CommandFailed(reply) => Self::CommandFailed(reply),
            other => Self::CommandFailed(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_transport_error_mapping() {
        let err = ModemError::from(TransportError::Timeout(Duration::from_millis(300)));
        assert!(err.is_timeout());

        let err = ModemError::from(TransportError::CommandFailed("ERROR".to_string()));
        assert!(matches!(err, ModemError::CommandFailed(ref reply) if reply == "ERROR"));

        let err = ModemError::from(TransportError::Closed);
        assert!(matches!(err, ModemError::CommandFailed(_)));
    }

    #[test]
    fn test_bringup_failed_display() {
        let err = ModemError::BringupFailed {
            attempts: 5,
            stage: Stage::SimCheck,
            source: Box::new(ModemError::Timeout),
        };
        assert_eq!(
            err.to_string(),
            "Bring-up failed after 5 attempts (last stage: SIM check)"
        );
    }
}
