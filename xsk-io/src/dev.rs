//! # Device Setup
//!
//! ## Purpose
//!
//! Device-level plumbing for binding a router port: resolving interface
//! names and indices, reading the device MAC, probing for zero-copy
//! support, and opening the full set of per-queue sockets a port needs.
//!
//! ## How it works
//!
//! A port is prepared by `open_port`, which creates one bidirectional
//! AF_XDP socket per queue (`open_queue`). The device MAC comes out of
//! sysfs: the index is mapped back to its interface name and
//! `/sys/class/net/<name>/address` is read and parsed, which keeps the
//! probe free of raw socket ioctls. Zero-copy capability is asked of the
//! driver through `libbpf`'s XDP feature query; the answer only steers
//! logging, since the sockets themselves fall back to copy mode when the
//! kernel refuses a zero-copy bind.

use crate::socket::{XskOpts, XskRx, XskTx, open_queue};
use std::io;
use std::mem::size_of;

/// Everything `open_port` produced for one device: its MAC and one
/// `(tx, rx)` socket pair per queue.
pub struct PortQueues {
    pub ifindex: u32,
    pub mac: [u8; 6],
    pub queues: Vec<(XskTx, XskRx)>,
}

/// Prepares a device for the data plane with `num_queues` queues.
pub fn open_port(ifindex: u32, num_queues: usize, opts: XskOpts) -> io::Result<PortQueues> {
    let name = name_of_ifindex(ifindex)?;
    let mac = mac_by_ifindex(ifindex)?;
    let mut queues = Vec::with_capacity(num_queues);
    for queue_id in 0..num_queues {
        queues.push(open_queue(ifindex, queue_id as u32, opts)?);
    }
    log::info!(
        "{name} (ifindex {ifindex}): bound {} queue(s), mac {}, {}",
        queues.len(),
        format_mac(&mac),
        if supports_zero_copy(ifindex) {
            "zero-copy capable"
        } else {
            "copy mode"
        },
    );
    Ok(PortQueues {
        ifindex,
        mac,
        queues,
    })
}

/// Resolves an interface name to its index.
pub fn ifindex_by_name(name: &str) -> io::Result<u32> {
    let cname = std::ffi::CString::new(name).map_err(io::Error::other)?;
    let idx = unsafe { libc::if_nametoindex(cname.as_ptr()) };
    if idx == 0 {
        return Err(io::Error::other(format!("no such interface: {name}")));
    }
    Ok(idx)
}

/// Resolves an interface index back to its name.
pub fn name_of_ifindex(ifindex: u32) -> io::Result<String> {
    let mut buf = [0u8; libc::IF_NAMESIZE];
    let res = unsafe { libc::if_indextoname(ifindex, buf.as_mut_ptr() as *mut libc::c_char) };
    if res.is_null() {
        return Err(io::Error::other(format!("no interface with index {ifindex}")));
    }
    let len = buf.iter().position(|b| *b == 0).unwrap_or(buf.len());
    String::from_utf8(buf[..len].to_vec()).map_err(io::Error::other)
}

/// Reads the hardware address of an interface from sysfs.
pub fn mac_by_ifindex(ifindex: u32) -> io::Result<[u8; 6]> {
    let name = name_of_ifindex(ifindex)?;
    let text = std::fs::read_to_string(format!("/sys/class/net/{name}/address"))?;
    parse_mac_text(text.trim())
        .ok_or_else(|| io::Error::other(format!("{name}: unreadable MAC {:?}", text.trim())))
}

/// Parses the `aa:bb:cc:dd:ee:ff` notation sysfs uses.
fn parse_mac_text(text: &str) -> Option<[u8; 6]> {
    let mut mac = [0u8; 6];
    let mut groups = text.split(':');
    for byte in &mut mac {
        *byte = u8::from_str_radix(groups.next()?, 16).ok()?;
    }
    if groups.next().is_some() {
        return None;
    }
    Some(mac)
}

fn format_mac(mac: &[u8; 6]) -> String {
    mac.map(|b| format!("{b:02x}")).join(":")
}

/// Asks the driver whether it can do zero-copy AF_XDP.
///
/// Errors degrade to "no": the query needs a reasonably recent kernel and
/// CAP_BPF, and a failed probe must not keep the port from coming up.
pub fn supports_zero_copy(ifindex: u32) -> bool {
    // NETDEV_XDP_ACT_XSK_ZEROCOPY from the kernel's netdev UAPI.
    const XSK_ZEROCOPY: u64 = 1 << 3;
    let mut opts = libbpf_sys::bpf_xdp_query_opts {
        sz: size_of::<libbpf_sys::bpf_xdp_query_opts>() as u64,
        ..unsafe { std::mem::zeroed() }
    };
    let err = unsafe {
        libbpf_sys::bpf_xdp_query(
            ifindex as libc::c_int,
            libbpf_sys::XDP_FLAGS_DRV_MODE as libc::c_int,
            &mut opts,
        )
    };
    if err < 0 {
        log::debug!(
            "ifindex {ifindex}: XDP feature query unavailable: {}",
            io::Error::last_os_error()
        );
        return false;
    }
    opts.feature_flags & XSK_ZEROCOPY != 0
}
