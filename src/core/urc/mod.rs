//! Unsolicited socket notifications
//!
//! Two URCs drive the receive side:
//! - `+NSOCLI:<id>` when the peer closes a socket
//! - `+NSONMI:<id>,<len>` when data is waiting in the modem
//!
//! Waiting data is fetched with a bodyless `AT+NSORF` whose reply is parsed
//! straight off the raw stream by [`frame::FrameReader`].

pub mod frame;

use self::frame::{drain_until_idle, FrameError, FrameReader, FrameTimeouts, RawByteSource};
use super::error::ModemError;
use super::socket::{SocketEventHandler, SocketTable};
use super::transport::{AtTransport, RawReader, UrcEntry, UrcHandler};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Peer close notification prefix
pub const URC_CLOSE_PREFIX: &str = "+NSOCLI:";
/// Data notification prefix
pub const URC_RECEIVE_PREFIX: &str = "+NSONMI:";
/// Notification line terminator
pub const URC_SUFFIX: &str = "\r\n";

/// What a notification led to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UrcOutcome {
    /// Payload handed to the event handler
    Delivered {
        /// Slot index
        slot: u8,
        /// Payload length
        len: usize,
    },
    /// Peer close reported to the event handler
    ClosedByPeer {
        /// Slot index
        slot: u8,
    },
    /// Nothing to do
    Ignored,
    /// A frame for an unknown socket was read and dropped
    Discarded,
}

/// Handler for the socket URCs of one device
pub struct UrcFrameReader {
    name: String,
    at: Arc<dyn AtTransport>,
    raw: Arc<dyn RawReader>,
    table: Arc<SocketTable>,
    events: Arc<dyn SocketEventHandler>,
    timeouts: FrameTimeouts,
}

impl UrcFrameReader {
    /// Create a reader
    pub fn new(
        name: &str,
        at: Arc<dyn AtTransport>,
        raw: Arc<dyn RawReader>,
        table: Arc<SocketTable>,
        events: Arc<dyn SocketEventHandler>,
        timeouts: FrameTimeouts,
    ) -> Self {
        Self {
            name: name.to_string(),
            at,
            raw,
            table,
            events,
            timeouts,
        }
    }

    /// Routing entries to install on the URC router
    pub fn urc_table(self: &Arc<Self>) -> Vec<UrcEntry> {
        let handler: Arc<dyn UrcHandler> = self.clone();
        vec![
            UrcEntry {
                prefix: URC_CLOSE_PREFIX,
                suffix: URC_SUFFIX,
                handler: handler.clone(),
            },
            UrcEntry {
                prefix: URC_RECEIVE_PREFIX,
                suffix: URC_SUFFIX,
                handler,
            },
        ]
    }

    /// Handle `+NSOCLI:<id>`
    ///
    /// The slot stays allocated; the application closes it in response.
    pub fn handle_close(&self, line: &str) -> UrcOutcome {
        let id = line
            .strip_prefix(URC_CLOSE_PREFIX)
            .and_then(|rest| rest.trim().parse::<i32>().ok());

        match id.and_then(|id| self.table.slot_of(id)) {
            Some(slot) => {
                debug!(device = %self.name, slot, "socket closed by peer");
                self.events.on_closed(slot);
                UrcOutcome::ClosedByPeer { slot }
            }
            None => UrcOutcome::Ignored,
        }
    }

    /// Handle `+NSONMI:<id>,<len>`
    pub async fn handle_receive(&self, line: &str) -> Result<UrcOutcome, ModemError> {
        let (id, len) = parse_receive(line)
            .ok_or_else(|| ModemError::ParseFailed(format!("bad receive notification {line:?}")))?;
        if len == 0 {
            return Ok(UrcOutcome::Ignored);
        }

        let slot = self.table.slot_of(id);
        if slot.is_none() {
            warn!(device = %self.name, id, len, "data for unknown socket, discarding");
        }

        self.at.send_command(&format!("AT+NSORF={id},{len}")).await?;

        let mut source = RawByteSource::new(self.raw.as_ref());
        let mut reader = FrameReader::new(&mut source, self.timeouts);
        match reader.read_frame(len).await {
            Ok(data) => match slot {
                Some(slot) => {
                    self.events.on_receive(slot, data);
                    Ok(UrcOutcome::Delivered { slot, len })
                }
                None => Ok(UrcOutcome::Discarded),
            },
            Err(FrameError::OutOfMemory(size)) => {
                error!(device = %self.name, size, "no memory for URC receive buffer");
                drain_until_idle(self.raw.as_ref(), self.timeouts.byte).await;
                Err(ModemError::OutOfMemory)
            }
            Err(err) => {
                error!(device = %self.name, id, %err, "read receive frame failed");
                reader.drain_line().await;
                Err(err.into())
            }
        }
    }
}

fn parse_receive(line: &str) -> Option<(i32, usize)> {
    let (id, len) = line.strip_prefix(URC_RECEIVE_PREFIX)?.split_once(',')?;
    Some((id.trim().parse().ok()?, len.trim().parse().ok()?))
}

#[async_trait]
impl UrcHandler for UrcFrameReader {
    async fn on_urc(&self, line: &str) {
        if line.starts_with(URC_CLOSE_PREFIX) {
            self.handle_close(line);
        } else if line.starts_with(URC_RECEIVE_PREFIX) {
            if let Err(err) = self.handle_receive(line).await {
                debug!(device = %self.name, %err, "receive notification dropped");
            }
        }
    }
}
