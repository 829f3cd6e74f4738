//! Interface identity and address discovery

use super::error::ModemError;
use super::netdev::{NetdevSink, HWADDR_LEN};
use super::transport::{parse_cgpaddr, parse_cgsn, AtTransport};
use serde::Serialize;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};

/// Digits in an IMEI
pub const IMEI_LEN: usize = 15;

/// Identity and address of an attached modem
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NetworkInfo {
    /// Device IMEI
    pub imei: String,
    /// Hardware address derived from the IMEI
    pub hwaddr: [u8; HWADDR_LEN],
    /// Address assigned by the network
    pub ip_address: IpAddr,
}

/// Derive the 8-byte hardware address from a 15-digit IMEI
///
/// Digit pairs become `10 * d0 + d1`; the odd last digit stands alone.
pub fn derive_hwaddr(imei: &str) -> Result<[u8; HWADDR_LEN], ModemError> {
    if imei.len() != IMEI_LEN || !imei.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ModemError::ParseFailed(format!("invalid IMEI {imei:?}")));
    }

    let mut hwaddr = [0u8; HWADDR_LEN];
    for (slot, pair) in hwaddr.iter_mut().zip(imei.as_bytes().chunks(2)) {
        *slot = pair.iter().fold(0, |acc, digit| acc * 10 + (digit - b'0'));
    }
    Ok(hwaddr)
}

/// Reads identity and address from the modem and reports them to the netdev
pub struct NetworkInfoResolver {
    name: String,
    at: Arc<dyn AtTransport>,
    netdev: Arc<dyn NetdevSink>,
    command_timeout: Duration,
}

impl NetworkInfoResolver {
    /// Create a resolver
    pub fn new(
        name: &str,
        at: Arc<dyn AtTransport>,
        netdev: Arc<dyn NetdevSink>,
        command_timeout: Duration,
    ) -> Self {
        Self {
            name: name.to_string(),
            at,
            netdev,
            command_timeout,
        }
    }

    /// Mark the interface up and push hardware and IP addresses
    pub async fn resolve(&self) -> Result<NetworkInfo, ModemError> {
        self.netdev.set_status(true);
        self.netdev.set_link_status(true);
        self.netdev.set_dhcp_status(true);

        let resp = self.at.exec("AT+CGSN=1", self.command_timeout).await?;
        let imei = parse_cgsn(&resp)
            .ok_or_else(|| {
                error!(device = %self.name, "device parse \"AT+CGSN=1\" cmd error");
                ModemError::ParseFailed("AT+CGSN=1".to_string())
            })?
            .to_string();
        debug!(device = %self.name, %imei, "device IMEI number");

        let hwaddr = derive_hwaddr(&imei)?;
        self.netdev.set_hwaddr(&hwaddr);

        let resp = self.at.exec("AT+CGPADDR=0", self.command_timeout).await?;
        let ip_address: IpAddr = parse_cgpaddr(&resp)
            .and_then(|addr| addr.parse().ok())
            .ok_or_else(|| {
                error!(device = %self.name, "device \"AT+CGPADDR=0\" cmd error");
                ModemError::ParseFailed("AT+CGPADDR=0".to_string())
            })?;
        debug!(device = %self.name, %ip_address, "device IP address");
        self.netdev.set_ipaddr(ip_address);

        Ok(NetworkInfo {
            imei,
            hwaddr,
            ip_address,
        })
    }
}
