#![doc = include_str!("../../README.md")]

pub mod dev;
pub mod frame;
pub mod mmap;
pub mod ring;
pub mod socket;

pub use dev::{PortQueues, ifindex_by_name, mac_by_ifindex, open_port};
pub use frame::FrameBuf;
pub use socket::{XskOpts, XskRx, XskTx, open_queue};
