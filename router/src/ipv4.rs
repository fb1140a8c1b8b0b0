//! # IPv4 Validation and Forwarding
//!
//! ## Purpose
//!
//! The L3 half of the data plane: validate an incoming IPv4 packet,
//! decide whether it is for the router itself, age its TTL, patch the
//! header checksum incrementally and hand it to the Ethernet sender on
//! the egress port the forwarding table picked.
//!
//! ## How it works
//!
//! Validation follows the basic checks of RFC 1812 (size, checksum,
//! version, header length, total length), plus the stricter requirement
//! that the IPv4 total length equals the length reported by the link
//! layer, which rejects malformed framing. All header fields live on the
//! wire in network byte order; multi-byte fields are converted at the
//! point of use and the destination address is converted to host order
//! for the table lookup. The checksum update is the RFC 1624 incremental
//! form for a TTL decrement, which matches a full recomputation for every
//! valid header.

use crate::error::PacketError;
use crate::ethernet;
use crate::fib::Fib;
use crate::iface::{IfaceConfig, IfaceTable};
use crate::io::{Frame as _, PortMap, TxQueue};
use crate::net::ETH_HEADER_LEN;

/// Minimum (and option-less) IPv4 header length.
pub const IPV4_MIN_HEADER: usize = 20;

/// Handles a received IPv4 packet: validate, dispose, forward.
///
/// `frame` is the whole Ethernet frame; the IPv4 packet starts after the
/// Ethernet header. Consumes the frame on every path: forwarded frames
/// are transmitted, everything else is freed by dropping.
///
/// # Returns
///
/// `Ok(())` when the packet was forwarded or was addressed to the router
/// itself. `InvalidPacket`, `TtlExpired` or `NoRoute` otherwise.
pub fn handle_ipv4<T: TxQueue>(
    cfg: &IfaceConfig,
    ifaces: &IfaceTable,
    fib: &Fib,
    txs: &mut PortMap<T>,
    mut frame: T::Frame,
) -> Result<(), PacketError> {
    let pkt = &frame.bytes()[ETH_HEADER_LEN..];
    basic_checks(pkt)?;

    // Network byte order on both sides of the comparison.
    let dst = [pkt[16], pkt[17], pkt[18], pkt[19]];
    if ifaces.is_local_ip(dst) {
        log::debug!("port {}: packet for the router itself, dropping", cfg.port);
        return Ok(());
    }

    let ttl = pkt[8];
    if ttl <= 1 {
        log::debug!("port {}: TTL expired in transit", cfg.port);
        return Err(PacketError::TtlExpired);
    }
    let pkt = &mut frame.bytes_mut()[ETH_HEADER_LEN..];
    pkt[8] = ttl - 1;
    let updated = ttl_decrement_checksum(u16::from_be_bytes([pkt[10], pkt[11]]));
    pkt[10..12].copy_from_slice(&updated.to_be_bytes());

    let Some(hop) = fib.lookup(u32::from_be_bytes(dst)) else {
        log::debug!(
            "port {}: no route for {}.{}.{}.{}",
            cfg.port,
            dst[0],
            dst[1],
            dst[2],
            dst[3]
        );
        return Err(PacketError::NoRoute);
    };
    let hop = *hop;
    let Some(tx) = txs.get_mut(hop.port) else {
        log::debug!("port {}: egress port {} is not bound", cfg.port, hop.port);
        return Err(PacketError::NoRoute);
    };
    ethernet::send_frame(tx, frame, hop.mac)
}

/// The basic header validity checks of RFC 1812, in order.
fn basic_checks(pkt: &[u8]) -> Result<(), PacketError> {
    if pkt.len() < IPV4_MIN_HEADER {
        log::debug!("IPv4 packet shorter than 20 bytes, dropping");
        return Err(PacketError::InvalidPacket);
    }
    let stored = u16::from_be_bytes([pkt[10], pkt[11]]);
    if header_checksum(pkt) != stored {
        log::debug!("IPv4 packet with an invalid checksum, dropping");
        return Err(PacketError::InvalidPacket);
    }
    if pkt[0] >> 4 != 4 {
        log::debug!("IP version is not 4, dropping");
        return Err(PacketError::InvalidPacket);
    }
    let ihl = (pkt[0] & 0x0F) as usize;
    if ihl < 5 {
        log::debug!("IHL shorter than 20 bytes, dropping");
        return Err(PacketError::InvalidPacket);
    }
    let total_len = u16::from_be_bytes([pkt[2], pkt[3]]) as usize;
    if total_len < ihl * 4 {
        log::debug!("total length smaller than the header, dropping");
        return Err(PacketError::InvalidPacket);
    }
    // Stricter than RFC 1812: a total length that disagrees with the
    // link layer means the framing is broken.
    if total_len != pkt.len() {
        log::debug!("total length does not match the link layer, dropping");
        return Err(PacketError::InvalidPacket);
    }
    Ok(())
}

/// Computes the header checksum over the 20-byte base header, treating
/// the checksum field itself as zero. Host byte order; store with
/// `to_be_bytes`.
pub fn header_checksum(hdr: &[u8]) -> u16 {
    debug_assert!(hdr.len() >= IPV4_MIN_HEADER);
    let mut sum = 0u32;
    for word in 0..IPV4_MIN_HEADER / 2 {
        if word == 5 {
            continue; // the checksum field itself
        }
        sum += u16::from_be_bytes([hdr[2 * word], hdr[2 * word + 1]]) as u32;
    }
    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    !(sum as u16)
}

/// Adjusts a header checksum for a TTL decremented by one.
///
/// RFC 1624 form `HC' = !(!HC + !m + m')`: the TTL/protocol word changes
/// by -0x0100, so `!m + m'` is the constant 0xFEFF. The double fold keeps
/// the end-around carry, which the naive `+= 0x0100` loses at the 0xFFFF
/// boundary.
#[inline]
pub fn ttl_decrement_checksum(cksum: u16) -> u16 {
    let sum = (!cksum) as u32 + 0xFEFF;
    let sum = (sum & 0xFFFF) + (sum >> 16);
    let sum = (sum & 0xFFFF) + (sum >> 16);
    !(sum as u16)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fib::Fib;
    use crate::iface::{IfaceConfig, IfaceTable};
    use crate::io::mock::{CaptureTx, TestFrame};
    use crate::net::MacAddr;
    use crate::routes::RouteList;
    use etherparse::PacketBuilder;
    use std::net::Ipv4Addr;

    const IF0_MAC: MacAddr = MacAddr([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x00]);
    const IF1_MAC: MacAddr = MacAddr([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x01]);
    const HOP_MAC: MacAddr = MacAddr([0x52, 0x54, 0x00, 0x00, 0x00, 0x03]);
    const SENDER_MAC: [u8; 6] = [0x52, 0x54, 0x00, 0x00, 0x00, 0x02];

    fn table() -> IfaceTable {
        IfaceTable::new(vec![
            IfaceConfig {
                port: 0,
                ip: Ipv4Addr::new(10, 0, 0, 1),
                mac: IF0_MAC,
                context_id: 1,
                num_rx_queues: 2,
            },
            IfaceConfig {
                port: 1,
                ip: Ipv4Addr::new(192, 168, 0, 1),
                mac: IF1_MAC,
                context_id: 2,
                num_rx_queues: 2,
            },
        ])
    }

    fn fib() -> Fib {
        let mut routes = RouteList::new();
        routes.add(Ipv4Addr::new(192, 168, 0, 0), 16, HOP_MAC, 1);
        Fib::build(routes).unwrap()
    }

    fn txs() -> crate::io::PortMap<CaptureTx> {
        let mut txs = crate::io::PortMap::new();
        txs.insert(0, CaptureTx::new(IF0_MAC));
        txs.insert(1, CaptureTx::new(IF1_MAC));
        txs
    }

    fn frame_to(dst_ip: [u8; 4], ttl: u8) -> Vec<u8> {
        let builder = PacketBuilder::ethernet2(SENDER_MAC, IF0_MAC.octets())
            .ipv4([10, 0, 0, 2], dst_ip, ttl)
            .udp(4000, 4001);
        let mut buf = Vec::new();
        builder.write(&mut buf, b"payload").unwrap();
        buf
    }

    fn run(
        frame: Vec<u8>,
        txs: &mut crate::io::PortMap<CaptureTx>,
    ) -> Result<(), PacketError> {
        let ifaces = table();
        let cfg = ifaces.by_port(0).unwrap().clone();
        handle_ipv4(&cfg, &ifaces, &fib(), txs, TestFrame(frame))
    }

    #[test]
    fn forwards_and_ages_the_packet() {
        let mut txs = txs();
        run(frame_to([192, 168, 5, 7], 64), &mut txs).unwrap();
        let sent = &txs.get_mut(1).unwrap().sent;
        assert_eq!(sent.len(), 1);
        let out = &sent[0];
        assert_eq!(&out[0..6], HOP_MAC.as_bytes());
        assert_eq!(&out[6..12], IF1_MAC.as_bytes());
        let l3 = &out[ETH_HEADER_LEN..];
        assert_eq!(l3[8], 63);
        let stored = u16::from_be_bytes([l3[10], l3[11]]);
        assert_eq!(stored, header_checksum(l3));
    }

    #[test]
    fn ttl_one_expires() {
        let mut txs = txs();
        assert_eq!(
            run(frame_to([192, 168, 5, 7], 1), &mut txs),
            Err(PacketError::TtlExpired)
        );
        assert!(txs.get_mut(1).unwrap().sent.is_empty());
    }

    #[test]
    fn ttl_two_still_forwards() {
        let mut txs = txs();
        run(frame_to([192, 168, 5, 7], 2), &mut txs).unwrap();
        let sent = &txs.get_mut(1).unwrap().sent;
        assert_eq!(sent[0][ETH_HEADER_LEN + 8], 1);
    }

    #[test]
    fn unrouted_destination_is_dropped() {
        let mut txs = txs();
        assert_eq!(
            run(frame_to([1, 2, 3, 4], 64), &mut txs),
            Err(PacketError::NoRoute)
        );
    }

    #[test]
    fn packet_for_ingress_address_is_consumed() {
        let mut txs = txs();
        assert_eq!(run(frame_to([10, 0, 0, 1], 64), &mut txs), Ok(()));
        assert!(txs.get_mut(1).unwrap().sent.is_empty());
    }

    #[test]
    fn packet_for_another_local_address_is_consumed() {
        // The router owns 192.168.0.1 on port 1; even though the packet
        // arrived on port 0 it must not be forwarded.
        let mut txs = txs();
        assert_eq!(run(frame_to([192, 168, 0, 1], 64), &mut txs), Ok(()));
        assert!(txs.get_mut(1).unwrap().sent.is_empty());
    }

    #[test]
    fn corrupted_checksum_is_invalid() {
        let mut frame = frame_to([192, 168, 5, 7], 64);
        frame[ETH_HEADER_LEN + 10] ^= 0xFF;
        let mut txs = txs();
        assert_eq!(run(frame, &mut txs), Err(PacketError::InvalidPacket));
    }

    #[test]
    fn truncated_packet_is_invalid() {
        let frame = frame_to([192, 168, 5, 7], 64);
        let mut txs = txs();
        assert_eq!(
            run(frame[..ETH_HEADER_LEN + 12].to_vec(), &mut txs),
            Err(PacketError::InvalidPacket)
        );
    }

    #[test]
    fn wrong_version_is_invalid() {
        let mut frame = frame_to([192, 168, 5, 7], 64);
        frame[ETH_HEADER_LEN] = 0x65; // version 6, IHL untouched
        let l3 = &frame[ETH_HEADER_LEN..];
        let fixed = header_checksum(l3).to_be_bytes();
        frame[ETH_HEADER_LEN + 10..ETH_HEADER_LEN + 12].copy_from_slice(&fixed);
        let mut txs = txs();
        assert_eq!(run(frame, &mut txs), Err(PacketError::InvalidPacket));
    }

    #[test]
    fn length_mismatch_is_invalid() {
        let mut frame = frame_to([192, 168, 5, 7], 64);
        frame.push(0); // link layer now reports one byte too many
        let mut txs = txs();
        assert_eq!(run(frame, &mut txs), Err(PacketError::InvalidPacket));
    }

    #[test]
    fn incremental_update_equals_recompute() {
        let mut hdr = [0u8; IPV4_MIN_HEADER];
        for id in 0..=u16::MAX {
            hdr[0] = 0x45;
            hdr[1] = 0;
            hdr[2..4].copy_from_slice(&20u16.to_be_bytes());
            hdr[4..6].copy_from_slice(&id.to_be_bytes());
            hdr[8] = 64;
            hdr[9] = 17;
            hdr[12..16].copy_from_slice(&[10, 0, 0, 2]);
            hdr[16..20].copy_from_slice(&[192, 168, 5, 7]);
            let before = header_checksum(&hdr);
            hdr[10..12].copy_from_slice(&before.to_be_bytes());

            hdr[8] -= 1;
            let recomputed = header_checksum(&hdr);
            assert_eq!(
                ttl_decrement_checksum(before),
                recomputed,
                "identification {id:#06x}, checksum {before:#06x}"
            );
            hdr[8] = 64;
        }
    }
}
