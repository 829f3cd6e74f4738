//! # cellsock Core Library
//!
//! Driver core for an NB-IoT modem reachable only through an AT command
//! channel, with support for:
//! - Power sequencing and power-saving control
//! - Bring-up with bounded retries and per-stage poll budgets
//! - Periodic link monitoring
//! - Seven multiplexed TCP/UDP client sockets over the one channel
//! - Inline receive frames parsed straight off the raw stream
//!
//! The serial line itself is supplied by the caller through the
//! [`AtTransport`], [`RawReader`] and [`UrcRouter`] traits.
//!
//! ## Example
//!
//! ```rust,no_run
//! use cellsock_core::{ModemConfig, ModemDevice, SetUp, SimulatedModem, SocketKind};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let sim = Arc::new(SimulatedModem::healthy());
//!     let device = ModemDevice::builder(ModemConfig::default()).build(sim);
//!
//!     if let SetUp::Started(handle) = device.set_up().await? {
//!         handle.wait().await?;
//!     }
//!
//!     let sockets = device.sockets();
//!     sockets.connect(0, "93.184.216.34", 80, SocketKind::Tcp, true).await?;
//!     sockets.send(0, b"GET / HTTP/1.0\r\n\r\n", SocketKind::Tcp).await?;
//!     sockets.close(0).await?;
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cli;
pub mod config;
pub mod core;

// Re-exports for convenience
pub use crate::cli::{CliResult, ExitCodes, OutputFormat};
pub use crate::config::{AppConfig, LoggingConfig};
pub use crate::core::bringup::{BringupMode, BringupPolicy, BringupReport, Stage};
pub use crate::core::device::{
    ControlCommand, DeviceRegistry, ModemConfig, ModemDevice, PingReply, SetUp,
};
pub use crate::core::error::ModemError;
pub use crate::core::netdev::{NetdevSink, NetdevSnapshot, NetdevState};
pub use crate::core::power::{DeviceState, PowerPin};
pub use crate::core::simulator::{CommandMatch, SimReply, SimulatedModem, SimulatedPin};
pub use crate::core::socket::{EventBroadcaster, SocketEvent, SocketEventHandler, SocketKind};
pub use crate::core::transport::{
    AtResponse, AtTransport, RawReader, TransportError, UrcEntry, UrcHandler, UrcRouter,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
