#![doc = include_str!("../../README.md")]

pub mod arp;
pub mod cli;
pub mod error;
pub mod ethernet;
pub mod fib;
pub mod iface;
pub mod io;
pub mod ipv4;
pub mod net;
pub mod routes;
pub mod worker;

pub use error::{PacketError, SetupError};
pub use fib::{Fib, NextHop};
pub use iface::{IfaceConfig, IfaceTable};
pub use net::MacAddr;
pub use routes::RouteList;
