//! Socket operations issued over the AT channel

use super::table::{local_port, SocketTable, MAX_IP_LEN};
use super::{SocketConfig, SocketKind};
use crate::core::codec::hex_chunks;
use crate::core::error::ModemError;
use crate::core::transport::{parse_mdns, parse_socket_id, AtTransport};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

/// Shortest reply accepted as a resolved address
const MIN_RESOLVED_LEN: usize = 8;

/// Connect, send, close and resolve on behalf of the socket slots
pub struct SocketSessionManager {
    name: String,
    at: Arc<dyn AtTransport>,
    table: Arc<SocketTable>,
    config: SocketConfig,
    /// Serializes every send on this device
    tx_lock: Mutex<()>,
}

impl SocketSessionManager {
    /// Create a manager over `table`
    pub fn new(
        name: &str,
        at: Arc<dyn AtTransport>,
        table: Arc<SocketTable>,
        config: SocketConfig,
    ) -> Self {
        Self {
            name: name.to_string(),
            at,
            table,
            config,
            tx_lock: Mutex::new(()),
        }
    }

    /// Slot table
    pub fn table(&self) -> &Arc<SocketTable> {
        &self.table
    }

    /// Socket configuration
    pub fn config(&self) -> &SocketConfig {
        &self.config
    }

    fn check_slot(slot: u8) -> Result<(), ModemError> {
        if SocketTable::is_valid(slot) {
            Ok(())
        } else {
            Err(ModemError::InvalidArgument(format!("socket slot {slot} out of range")))
        }
    }

    /// Open a client socket on `slot` towards `ip:port`
    ///
    /// A socket already open on the slot is closed first.
    pub async fn connect(
        &self,
        slot: u8,
        ip: &str,
        port: u16,
        kind: SocketKind,
        is_client: bool,
    ) -> Result<(), ModemError> {
        if !is_client {
            return Err(ModemError::UnsupportedMode);
        }
        Self::check_slot(slot)?;
        if ip.is_empty() || ip.len() > MAX_IP_LEN {
            return Err(ModemError::InvalidArgument(format!("invalid remote address {ip:?}")));
        }

        let timeout = self.config.command_timeout();

        if let Some(old) = self.table.release(slot) {
            let _ = self.at.exec(&format!("AT+NSOCL={old}"), timeout).await;
        }

        let open = format!("AT+NSOCR={},{},1", kind.open_args(), local_port(slot));
        let resp = self.at.exec(&open, timeout).await.map_err(|err| {
            error!(device = %self.name, slot, %err, "socket open failed");
            ModemError::CommandFailed(format!("{open}: {err}"))
        })?;
        let id = parse_socket_id(&resp)
            .ok_or_else(|| ModemError::ParseFailed(format!("{open}: no socket id")))?;

        if kind == SocketKind::Tcp {
            let connect = format!("AT+NSOCO={id},{ip},{port}");
            if let Err(err) = self.at.exec(&connect, self.config.connect_timeout()).await {
                error!(device = %self.name, slot, %err, "socket connect failed");
                let _ = self.at.exec(&format!("AT+NSOCL={id}"), timeout).await;
                return Err(ModemError::ConnectFailed);
            }
        }

        self.table.occupy(slot, id, ip, port);
        debug!(device = %self.name, slot, id, %ip, port, ?kind, "socket connected");
        Ok(())
    }

    /// Send `data` on `slot`
    ///
    /// Returns the number of bytes accepted by the modem. A failure on the
    /// first chunk is returned as the error; a failure on a later chunk ends
    /// the send and reports the bytes of the chunks that went through.
    pub async fn send(&self, slot: u8, data: &[u8], kind: SocketKind) -> Result<usize, ModemError> {
        Self::check_slot(slot)?;

        let _guard = self.tx_lock.lock().await;

        let entry = self
            .table
            .get(slot)
            .filter(|entry| !entry.is_free())
            .ok_or_else(|| ModemError::InvalidArgument(format!("socket slot {slot} is not open")))?;
        let id = entry.device_socket.unwrap_or(-1);

        let mut sent = 0usize;
        for chunk in hex_chunks(data, self.config.max_chunk_size) {
            let command = match kind {
                SocketKind::Tcp => format!("AT+NSOSD={id},{},{}", chunk.len, chunk.hex),
                SocketKind::Udp => format!(
                    "AT+NSOST={id},{},{},{},{}",
                    entry.remote_ip, entry.remote_port, chunk.len, chunk.hex
                ),
            };

            if let Err(err) = self.at.exec(&command, self.config.send_timeout()).await {
                if sent == 0 {
                    error!(device = %self.name, slot, %err, "socket send failed");
                    return Err(err.into());
                }
                warn!(
                    device = %self.name,
                    slot,
                    sent,
                    total = data.len(),
                    %err,
                    "socket send cut short"
                );
                return Ok(sent);
            }
            sent += chunk.len;
        }

        Ok(sent)
    }

    /// Close `slot`
    ///
    /// The slot is freed even when the modem rejects the close command.
    pub async fn close(&self, slot: u8) -> Result<(), ModemError> {
        Self::check_slot(slot)?;

        let Some(id) = self.table.release(slot) else {
            return Ok(());
        };

        self.at
            .exec(&format!("AT+NSOCL={id}"), self.config.command_timeout())
            .await?;
        debug!(device = %self.name, slot, id, "socket closed");
        Ok(())
    }

    /// Resolve a host name through the modem's DNS client
    pub async fn resolve_domain(&self, name: &str) -> Result<String, ModemError> {
        if name.is_empty() {
            return Err(ModemError::InvalidArgument("empty domain name".to_string()));
        }

        let command = format!("AT+MDNS=0,{name}");
        let resp = self
            .at
            .exec(&command, self.config.resolve_timeout())
            .await
            .map_err(|err| {
                error!(device = %self.name, %name, %err, "domain resolve cmd error");
                ModemError::from(err)
            })?;

        let address: String = parse_mdns(&resp)
            .ok_or_else(|| ModemError::ParseFailed(command.clone()))?
            .chars()
            .take(MAX_IP_LEN)
            .collect();

        if address.len() < MIN_RESOLVED_LEN {
            return Err(ModemError::NotFound);
        }
        Ok(address)
    }
}
