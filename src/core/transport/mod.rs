//! Collaborator interfaces for the AT channel
//!
//! The modem core never touches the serial line itself. It talks to:
//! - an AT transport that executes commands and matches their replies
//! - a raw reader for bytes that bypass the response matcher
//! - a URC router that hands unsolicited lines to registered handlers
//!
//! A single object usually implements all three, since they share one wire.

mod response;

pub use response::{
    is_valid_rssi, parse_cereg_stat, parse_cgpaddr, parse_cgsn, parse_csq, parse_mdns,
    parse_nping, parse_socket_id, AtResponse, RegistrationStatus,
};

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Interval between `AT` liveness polls while waiting for the modem
pub const LIVENESS_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Transport error types
#[derive(Error, Debug)]
pub enum TransportError {
    /// No reply arrived in time
    #[error("No reply within {0:?}")]
    Timeout(Duration),

    /// The modem answered with an error result code
    #[error("Command failed: {0}")]
    CommandFailed(String),

    /// The channel is gone
    #[error("Transport closed")]
    Closed,

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Command/response side of the AT channel
///
/// Implementations serialize commands: at most one exchange is in flight at a
/// time, which is what lets bring-up, the link monitor and socket calls share
/// the channel without further locking.
#[async_trait]
pub trait AtTransport: Send + Sync {
    /// Send `command` and wait up to `timeout` for its final result code
    async fn exec(&self, command: &str, timeout: Duration) -> Result<AtResponse, TransportError>;

    /// Send `command` without waiting for a reply
    ///
    /// Used when the reply is consumed straight off the raw stream.
    async fn send_command(&self, command: &str) -> Result<(), TransportError>;

    /// Block until the modem answers a bare `AT`, or fail after `timeout`
    async fn wait_connect(&self, timeout: Duration) -> Result<(), TransportError> {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            match self.exec("AT", LIVENESS_POLL_INTERVAL).await {
                Ok(_) => return Ok(()),
                Err(TransportError::Timeout(_)) => {}
                Err(_) => tokio::time::sleep(LIVENESS_POLL_INTERVAL).await,
            }

            if tokio::time::Instant::now() >= deadline {
                return Err(TransportError::Timeout(timeout));
            }
        }
    }
}

/// Raw byte access to the receive stream
#[async_trait]
pub trait RawReader: Send + Sync {
    /// Read up to `buf.len()` bytes, giving up after `timeout`
    ///
    /// Returns the number of bytes read; a short count means the timeout hit.
    async fn read(&self, buf: &mut [u8], timeout: Duration) -> Result<usize, TransportError>;
}

/// Handler for one class of unsolicited result codes
#[async_trait]
pub trait UrcHandler: Send + Sync {
    /// Called with the full URC line (prefix included, terminator stripped)
    async fn on_urc(&self, line: &str);
}

/// One URC routing entry
#[derive(Clone)]
pub struct UrcEntry {
    /// Line prefix that selects this entry
    pub prefix: &'static str,
    /// Line terminator
    pub suffix: &'static str,
    /// Handler invoked for matching lines
    pub handler: Arc<dyn UrcHandler>,
}

impl std::fmt::Debug for UrcEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UrcEntry")
            .field("prefix", &self.prefix)
            .field("suffix", &self.suffix)
            .finish_non_exhaustive()
    }
}

/// Find the entry responsible for `line`
pub fn route<'a>(table: &'a [UrcEntry], line: &str) -> Option<&'a UrcEntry> {
    table.iter().find(|entry| line.starts_with(entry.prefix))
}

/// Dispatch table owner on the transport side
pub trait UrcRouter: Send + Sync {
    /// Replace the routing table
    fn set_urc_table(&self, table: Vec<UrcEntry>);

    /// Drop every routing entry
    fn clear_urc_table(&self);
}
