//! Core module containing the modem driver
//!
//! This module provides:
//! - Channel interfaces (AT transport, raw reader, URC router) and reply parsers
//! - Power control and the bring-up state machine
//! - Link monitoring and network info discovery
//! - Socket slot table, session operations and inline frame parsing
//! - Device control surface and registry
//! - Simulated modem for tests and demos

pub mod bringup;
pub mod codec;
pub mod device;
pub mod error;
pub mod link_monitor;
pub mod netdev;
pub mod netinfo;
pub mod power;
pub mod simulator;
pub mod socket;
pub mod transport;
pub mod urc;
