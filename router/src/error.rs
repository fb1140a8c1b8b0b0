//! Error taxonomy of the router.
//!
//! Packet-path errors ([`PacketError`]) classify why a frame was dropped;
//! they never escape the dispatcher and are only visible through debug
//! logging. Startup errors ([`SetupError`]) abort the process with a
//! single diagnostic and a non-zero exit code.

use std::fmt;
use std::io;

/// Why a frame was dropped on the packet path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketError {
    /// Malformed at L2 or L3: size, checksum, version, header length,
    /// length mismatch, or bad ARP fields.
    InvalidPacket,
    /// A protocol or operation the router does not implement.
    NotSupported,
    /// ARP request for an address that is not ours.
    NotForMe,
    /// TTL reached zero in transit.
    TtlExpired,
    /// Longest-prefix match found no route.
    NoRoute,
}

impl fmt::Display for PacketError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let what = match self {
            PacketError::InvalidPacket => "invalid packet",
            PacketError::NotSupported => "not supported",
            PacketError::NotForMe => "not addressed to this router",
            PacketError::TtlExpired => "TTL expired in transit",
            PacketError::NoRoute => "no route to host",
        };
        f.write_str(what)
    }
}

impl std::error::Error for PacketError {}

/// A startup failure; printed once, then the process exits non-zero.
#[derive(Debug)]
pub enum SetupError {
    /// A command-line argument did not match its expected format.
    Format(String),
    /// The configuration is inconsistent (for example a route pointing
    /// at an unbound port).
    Config(String),
    /// More than 255 distinct next hops; DIR-24-8 stores 8-bit hop ids.
    NextHopCapacity,
    /// More than 4096 TBLlong blocks would be needed.
    TblLongCapacity,
    /// Device or socket setup failed.
    Io(io::Error),
    /// A worker thread could not be started.
    Launch(io::Error),
}

impl fmt::Display for SetupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SetupError::Format(what) => write!(f, "invalid argument: {what}"),
            SetupError::Config(what) => write!(f, "invalid configuration: {what}"),
            SetupError::NextHopCapacity => {
                write!(f, "more than 255 next hops cannot be handled by DIR-24-8")
            }
            SetupError::TblLongCapacity => write!(f, "not enough space in TBLlong"),
            SetupError::Io(e) => write!(f, "device setup failed: {e}"),
            SetupError::Launch(e) => write!(f, "failed to launch worker: {e}"),
        }
    }
}

impl std::error::Error for SetupError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SetupError::Io(e) | SetupError::Launch(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for SetupError {
    fn from(e: io::Error) -> Self {
        SetupError::Io(e)
    }
}
