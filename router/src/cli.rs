//! Command-line surface of the router.
//!
//! Routes and interface bindings are given as repeatable short options:
//!
//! ```text
//! router -p 7,10.0.0.1 -p veth1,10.0.1.1 \
//!        -r 10.0.10.0/24,52:54:00:cb:ee:f4,7 \
//!        -r 0.0.0.0/0,52:54:00:cb:ee:f5,8
//! ```
//!
//! Parsing stops at the format level here; resolving interface names and
//! checking cross-references (routes against bound ports) happens during
//! startup.

use crate::error::SetupError;
use crate::net::MacAddr;
use clap::Parser;
use ipnet::Ipv4Net;
use std::net::Ipv4Addr;
use std::str::FromStr;

/// A userspace IPv4 router on AF_XDP.
#[derive(Parser, Debug)]
#[command(name = "router", version)]
pub struct Args {
    /// Install a static route: <ip>/<cidr>,<mac>,<port>
    #[arg(short = 'r', value_name = "ROUTE")]
    pub routes: Vec<RouteSpec>,

    /// Bind an interface with an IPv4 address: <port>,<ip> (the port is
    /// the interface index; an interface name is accepted too)
    #[arg(short = 'p', value_name = "IFACE")]
    pub ifaces: Vec<IfaceSpec>,
}

/// One parsed `-r` argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteSpec {
    pub net: Ipv4Net,
    pub mac: MacAddr,
    pub port: u8,
}

impl FromStr for RouteSpec {
    type Err = SetupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split(',');
        let (Some(net), Some(mac), Some(port), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(SetupError::Format(format!(
                "route {s:?} is not <ip>/<cidr>,<mac>,<port>"
            )));
        };
        let net: Ipv4Net = net
            .parse()
            .map_err(|e| SetupError::Format(format!("bad network in route {s:?}: {e}")))?;
        let mac: MacAddr = mac.parse()?;
        let port: u8 = port
            .parse()
            .map_err(|e| SetupError::Format(format!("bad port in route {s:?}: {e}")))?;
        Ok(RouteSpec { net, mac, port })
    }
}

/// One parsed `-p` argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IfaceSpec {
    pub port: PortRef,
    pub ip: Ipv4Addr,
}

/// How the user named the port: by index or by interface name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortRef {
    Index(u8),
    Name(String),
}

impl FromStr for IfaceSpec {
    type Err = SetupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some((port, ip)) = s.split_once(',') else {
            return Err(SetupError::Format(format!(
                "interface {s:?} is not <port>,<ip>"
            )));
        };
        let port = if port.bytes().all(|b| b.is_ascii_digit()) && !port.is_empty() {
            PortRef::Index(port.parse().map_err(|e| {
                SetupError::Format(format!("bad port in interface {s:?}: {e}"))
            })?)
        } else {
            PortRef::Name(port.to_string())
        };
        let ip: Ipv4Addr = ip
            .parse()
            .map_err(|e| SetupError::Format(format!("bad address in interface {s:?}: {e}")))?;
        Ok(IfaceSpec { port, ip })
    }
}
