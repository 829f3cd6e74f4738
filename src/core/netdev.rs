//! Network-interface status sink
//!
//! Interface state is pushed outward, never pulled: bring-up, the network
//! info resolver and the link monitor report into a [`NetdevSink`].

use parking_lot::RwLock;
use serde::Serialize;
use std::net::IpAddr;

/// Interface MTU advertised for the modem
pub const NETDEV_MTU: u16 = 1500;

/// Length of the synthesized hardware address
pub const HWADDR_LEN: usize = 8;

/// Receiver of interface status and address updates
#[cfg_attr(test, mockall::automock)]
pub trait NetdevSink: Send + Sync {
    /// Administrative up/down
    fn set_status(&self, up: bool);
    /// Link up/down
    fn set_link_status(&self, up: bool);
    /// DHCP enabled/disabled
    fn set_dhcp_status(&self, enabled: bool);
    /// Hardware address
    fn set_hwaddr(&self, hwaddr: &[u8]);
    /// Interface address
    fn set_ipaddr(&self, addr: IpAddr);
}

/// Point-in-time view of a [`NetdevState`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NetdevSnapshot {
    /// Interface name
    pub name: String,
    /// Administrative status
    pub up: bool,
    /// Link status
    pub link_up: bool,
    /// DHCP flag
    pub dhcp: bool,
    /// Hardware address
    pub hwaddr: Vec<u8>,
    /// Interface address
    pub ipaddr: Option<IpAddr>,
    /// MTU
    pub mtu: u16,
    /// Number of link status reports received
    pub link_reports: u64,
}

impl NetdevSnapshot {
    /// Hardware address as colon-separated hex
    pub fn hwaddr_string(&self) -> String {
        self.hwaddr
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect::<Vec<_>>()
            .join(":")
    }
}

/// In-memory sink that simply records the latest values
#[derive(Debug, Default)]
pub struct NetdevState {
    inner: RwLock<NetdevSnapshot>,
}

impl NetdevState {
    /// Create an empty interface record
    pub fn new(name: &str) -> Self {
        Self {
            inner: RwLock::new(NetdevSnapshot {
                name: name.to_string(),
                mtu: NETDEV_MTU,
                ..Default::default()
            }),
        }
    }

    /// Current values
    pub fn snapshot(&self) -> NetdevSnapshot {
        self.inner.read().clone()
    }
}

impl NetdevSink for NetdevState {
    fn set_status(&self, up: bool) {
        self.inner.write().up = up;
    }

    fn set_link_status(&self, up: bool) {
        let mut inner = self.inner.write();
        inner.link_up = up;
        inner.link_reports += 1;
    }

    fn set_dhcp_status(&self, enabled: bool) {
        self.inner.write().dhcp = enabled;
    }

    fn set_hwaddr(&self, hwaddr: &[u8]) {
        self.inner.write().hwaddr = hwaddr.to_vec();
    }

    fn set_ipaddr(&self, addr: IpAddr) {
        self.inner.write().ipaddr = Some(addr);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_records_updates() {
        let state = NetdevState::new("nb0");
        state.set_status(true);
        state.set_link_status(false);
        state.set_link_status(true);
        state.set_hwaddr(&[12, 34, 56, 78, 90, 12, 34, 5]);
        state.set_ipaddr("10.0.0.7".parse().unwrap());

        let snap = state.snapshot();
        assert_eq!(snap.name, "nb0");
        assert!(snap.up && snap.link_up && !snap.dhcp);
        assert_eq!(snap.link_reports, 2);
        assert_eq!(snap.mtu, NETDEV_MTU);
        assert_eq!(snap.hwaddr_string(), "0c:22:38:4e:5a:0c:22:05");
        assert_eq!(snap.ipaddr, Some("10.0.0.7".parse().unwrap()));
    }
}
