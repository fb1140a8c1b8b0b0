//! Static per-interface configuration.
//!
//! One [`IfaceConfig`] exists per bound port. The whole table is built on
//! the master context before any worker starts, then shared read-only
//! behind an `Arc` for the lifetime of the process.

use crate::net::MacAddr;
use std::net::Ipv4Addr;

/// Configuration of one bound interface.
#[derive(Debug, Clone)]
pub struct IfaceConfig {
    /// Port identifier, also the interface index of the device.
    pub port: u8,
    /// The interface's own IPv4 address.
    pub ip: Ipv4Addr,
    /// The interface's own MAC address, read from the device.
    pub mac: MacAddr,
    /// Worker context the interface is served by; contexts count from 1,
    /// context 0 is the master and never touches the packet path.
    pub context_id: u16,
    /// RX queues configured on the device, one per bound interface.
    pub num_rx_queues: u16,
}

impl IfaceConfig {
    /// The TX queue this interface's worker uses on every port.
    #[inline]
    pub fn tx_queue(&self) -> u16 {
        self.context_id - 1
    }

    /// The interface address as it appears on the wire.
    #[inline]
    pub fn ip_octets(&self) -> [u8; 4] {
        self.ip.octets()
    }
}

/// The immutable table of all bound interfaces.
#[derive(Debug, Default)]
pub struct IfaceTable {
    ifaces: Vec<IfaceConfig>,
}

impl IfaceTable {
    pub fn new(ifaces: Vec<IfaceConfig>) -> Self {
        IfaceTable { ifaces }
    }

    pub fn len(&self) -> usize {
        self.ifaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ifaces.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &IfaceConfig> {
        self.ifaces.iter()
    }

    pub fn by_port(&self, port: u8) -> Option<&IfaceConfig> {
        self.ifaces.iter().find(|cfg| cfg.port == port)
    }

    /// Whether `ip` (network byte order) belongs to any bound interface.
    ///
    /// The table is a handful of entries, so a linear scan beats any
    /// lookup structure here.
    #[inline]
    pub fn is_local_ip(&self, ip: [u8; 4]) -> bool {
        self.ifaces.iter().any(|cfg| cfg.ip_octets() == ip)
    }
}
