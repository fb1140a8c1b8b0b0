//! Wire-level address types and constants shared by the protocol stacks.

use crate::error::SetupError;
use std::fmt;
use std::str::FromStr;

/// EtherType of IPv4, host byte order.
pub const ETHERTYPE_IPV4: u16 = 0x0800;
/// EtherType of ARP, host byte order.
pub const ETHERTYPE_ARP: u16 = 0x0806;
/// Length of an Ethernet II header.
pub const ETH_HEADER_LEN: usize = 14;

/// An Ethernet MAC address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MacAddr(pub [u8; 6]);

impl MacAddr {
    pub const BROADCAST: MacAddr = MacAddr([0xFF; 6]);
    pub const ZERO: MacAddr = MacAddr([0; 6]);

    #[inline]
    pub fn octets(&self) -> [u8; 6] {
        self.0
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    #[inline]
    pub fn is_broadcast(&self) -> bool {
        self.0 == [0xFF; 6]
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

impl FromStr for MacAddr {
    type Err = SetupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parsed = eui48::MacAddress::parse_str(s)
            .map_err(|e| SetupError::Format(format!("bad MAC address {s:?}: {e}")))?;
        Ok(MacAddr(parsed.to_array()))
    }
}
