//! Socket multiplexing over the AT channel
//!
//! A fixed table of slots maps caller-visible socket handles onto the
//! socket ids the modem hands out. The session manager issues the
//! open/connect/send/close commands; received data and peer closes come
//! back asynchronously through a [`SocketEventHandler`].

mod session;
mod table;

pub use session::SocketSessionManager;
pub use table::{local_port, SocketSlot, SocketTable, LOCAL_PORT_BASE, MAX_IP_LEN, SOCKET_SLOTS};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::broadcast;

/// Transport protocol of a socket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SocketKind {
    /// Stream socket
    Tcp,
    /// Datagram socket
    Udp,
}

impl SocketKind {
    /// Type and protocol arguments of `AT+NSOCR`
    pub fn open_args(&self) -> &'static str {
        match self {
            Self::Tcp => "STREAM,6",
            Self::Udp => "DGRAM,17",
        }
    }
}

/// Timeouts and limits of the socket path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SocketConfig {
    /// Open and close commands
    pub command_timeout_ms: u64,
    /// TCP connect
    pub connect_timeout_ms: u64,
    /// Each send chunk
    pub send_timeout_ms: u64,
    /// Largest payload per send command
    pub max_chunk_size: usize,
    /// Domain lookup
    pub resolve_timeout_ms: u64,
    /// Per-byte bound while reading an inline frame
    pub byte_timeout_ms: u64,
    /// Per-byte bound for the first field of an inline frame
    pub first_byte_timeout_ms: u64,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            command_timeout_ms: 300,
            connect_timeout_ms: 15_000,
            send_timeout_ms: 5000,
            max_chunk_size: crate::core::codec::MAX_CHUNK_SIZE,
            resolve_timeout_ms: 15_000,
            byte_timeout_ms: 10,
            first_byte_timeout_ms: 20,
        }
    }
}

impl SocketConfig {
    /// Open and close command timeout
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    /// TCP connect timeout
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Per-chunk send timeout
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    /// Domain lookup timeout
    pub fn resolve_timeout(&self) -> Duration {
        Duration::from_millis(self.resolve_timeout_ms)
    }
}

/// Asynchronous socket notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
    /// Payload arrived for a slot
    DataReceived {
        /// Slot index
        slot: u8,
        /// Decoded payload
        data: Bytes,
    },
    /// The remote end closed the connection
    ClosedByPeer {
        /// Slot index
        slot: u8,
    },
}

/// Receiver of socket notifications
#[cfg_attr(test, mockall::automock)]
pub trait SocketEventHandler: Send + Sync {
    /// Data arrived for `slot`
    fn on_receive(&self, slot: u8, data: Bytes);

    /// The peer closed `slot`
    fn on_closed(&self, slot: u8);
}

/// Handler that fans events out over a broadcast channel
pub struct EventBroadcaster {
    tx: broadcast::Sender<SocketEvent>,
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new(256)
    }
}

impl EventBroadcaster {
    /// Create a broadcaster keeping up to `capacity` undelivered events
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> broadcast::Receiver<SocketEvent> {
        self.tx.subscribe()
    }
}

impl SocketEventHandler for EventBroadcaster {
    fn on_receive(&self, slot: u8, data: Bytes) {
        let _ = self.tx.send(SocketEvent::DataReceived { slot, data });
    }

    fn on_closed(&self, slot: u8) {
        let _ = self.tx.send(SocketEvent::ClosedByPeer { slot });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_args() {
        assert_eq!(SocketKind::Tcp.open_args(), "STREAM,6");
        assert_eq!(SocketKind::Udp.open_args(), "DGRAM,17");
    }

    #[tokio::test]
    async fn test_broadcaster_delivers_in_order() {
        let events = EventBroadcaster::default();
        let mut rx = events.subscribe();

        events.on_receive(3, Bytes::from_static(b"ping"));
        events.on_closed(3);

        assert_eq!(
            rx.recv().await.unwrap(),
            SocketEvent::DataReceived {
                slot: 3,
                data: Bytes::from_static(b"ping"),
            }
        );
        assert_eq!(rx.recv().await.unwrap(), SocketEvent::ClosedByPeer { slot: 3 });
    }
}
