//! # Ethernet Dispatch and Transmission
//!
//! ## Purpose
//!
//! The L2 rim of the data plane. Every received frame enters through
//! [`handle_frame`], which filters by destination MAC and dispatches by
//! EtherType; every outgoing frame leaves through [`send_frame`], which
//! stamps the Ethernet addresses and pushes the frame into the egress
//! queue.
//!
//! ## How it works
//!
//! Frames that are neither broadcast nor addressed to the receiving
//! interface are discarded silently; devices run promiscuous under XDP,
//! so the filter lives here. IPv4 goes to the forwarder, ARP to the
//! responder, anything else (including VLAN-tagged traffic) is
//! unsupported. The sender busy-retries a full device ring: under
//! poll-mode semantics that is the cheapest correct backpressure, and
//! there is no deferred-frame queue to manage.

use crate::arp;
use crate::error::PacketError;
use crate::fib::Fib;
use crate::iface::{IfaceConfig, IfaceTable};
use crate::io::{Frame as _, PortMap, TxQueue};
use crate::ipv4;
use crate::net::{ETH_HEADER_LEN, ETHERTYPE_ARP, ETHERTYPE_IPV4, MacAddr};

/// Classifies one received frame and hands it to the right stack.
///
/// Consumes the frame on every path. Errors say why a frame was dropped;
/// they are for the caller's logging only.
pub fn handle_frame<T: TxQueue>(
    cfg: &IfaceConfig,
    ifaces: &IfaceTable,
    fib: &Fib,
    txs: &mut PortMap<T>,
    frame: T::Frame,
) -> Result<(), PacketError> {
    let bytes = frame.bytes();
    if bytes.len() < ETH_HEADER_LEN {
        return Err(PacketError::InvalidPacket);
    }

    // Not broadcast, not us: somebody else's traffic.
    if bytes[0..6] != [0xFF; 6] && bytes[0..6] != cfg.mac.octets() {
        return Ok(());
    }

    match u16::from_be_bytes([bytes[12], bytes[13]]) {
        ETHERTYPE_IPV4 => {
            match ipv4::handle_ipv4(cfg, ifaces, fib, txs, frame) {
                // Only frame-level corruption concerns this layer; the
                // other outcomes just mean dropped traffic.
                Err(PacketError::InvalidPacket) => Err(PacketError::InvalidPacket),
                _ => Ok(()),
            }
        }
        ETHERTYPE_ARP => {
            if let Err(e) = arp::handle_arp(cfg, txs, frame) {
                log::debug!("port {}: ARP packet dropped: {e}", cfg.port);
            }
            Ok(())
        }
        ether_type => {
            log::debug!("port {}: unhandled EtherType {ether_type:#06x}", cfg.port);
            Err(PacketError::NotSupported)
        }
    }
}

/// Transmits a prepared frame: stamps the destination MAC and the egress
/// device's own source MAC, then enqueues, retrying until the device
/// accepts it.
pub fn send_frame<T: TxQueue>(
    tx: &mut T,
    mut frame: T::Frame,
    dst: MacAddr,
) -> Result<(), PacketError> {
    let bytes = frame.bytes_mut();
    bytes[0..6].copy_from_slice(dst.as_bytes());
    bytes[6..12].copy_from_slice(tx.mac().as_bytes());

    let mut pending = frame;
    loop {
        match tx.transmit(pending) {
            Ok(()) => return Ok(()),
            Err(back) => pending = back,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::mock::{CaptureTx, TestFrame};
    use crate::routes::RouteList;
    use std::net::Ipv4Addr;

    const IF_MAC: MacAddr = MacAddr([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x00]);

    fn cfg() -> IfaceConfig {
        IfaceConfig {
            port: 0,
            ip: Ipv4Addr::new(10, 0, 0, 1),
            mac: IF_MAC,
            context_id: 1,
            num_rx_queues: 1,
        }
    }

    fn empty_fib() -> Fib {
        Fib::build(RouteList::new()).unwrap()
    }

    fn run(frame: Vec<u8>) -> (Result<(), PacketError>, crate::io::PortMap<CaptureTx>) {
        let ifaces = IfaceTable::new(vec![cfg()]);
        let mut txs = crate::io::PortMap::new();
        txs.insert(0, CaptureTx::new(IF_MAC));
        let res = handle_frame(&cfg(), &ifaces, &empty_fib(), &mut txs, TestFrame(frame));
        (res, txs)
    }

    fn frame_with(dst: [u8; 6], ether_type: u16) -> Vec<u8> {
        let mut frame = Vec::new();
        frame.extend_from_slice(&dst);
        frame.extend_from_slice(&[0x52, 0x54, 0, 0, 0, 2]);
        frame.extend_from_slice(&ether_type.to_be_bytes());
        frame.extend_from_slice(&[0u8; 32]);
        frame
    }

    #[test]
    fn runt_frames_are_invalid() {
        let (res, _) = run(vec![0xFF; 13]);
        assert_eq!(res, Err(PacketError::InvalidPacket));
    }

    #[test]
    fn foreign_destination_is_silently_discarded() {
        let (res, mut txs) = run(frame_with([2, 2, 2, 2, 2, 2], ETHERTYPE_IPV4));
        assert_eq!(res, Ok(()));
        assert!(txs.get_mut(0).unwrap().sent.is_empty());
    }

    #[test]
    fn unknown_ether_type_is_unsupported() {
        let (res, _) = run(frame_with(IF_MAC.octets(), 0x88B5));
        assert_eq!(res, Err(PacketError::NotSupported));
    }

    #[test]
    fn vlan_tagged_frames_are_unsupported() {
        let (res, _) = run(frame_with([0xFF; 6], 0x8100));
        assert_eq!(res, Err(PacketError::NotSupported));
    }

    #[test]
    fn broadcast_ipv4_garbage_propagates_invalid() {
        // Passes the MAC filter, fails IPv4 validation.
        let (res, _) = run(frame_with([0xFF; 6], ETHERTYPE_IPV4));
        assert_eq!(res, Err(PacketError::InvalidPacket));
    }

    #[test]
    fn arp_errors_are_absorbed() {
        // Too short to be ARP, but the dispatcher must still succeed.
        let (res, _) = run(frame_with(IF_MAC.octets(), ETHERTYPE_ARP));
        assert_eq!(res, Ok(()));
    }

    #[test]
    fn send_retries_until_the_ring_accepts() {
        let mut tx = CaptureTx::new(IF_MAC);
        tx.reject_next = 3;
        let frame = TestFrame(frame_with([0; 6], ETHERTYPE_IPV4));
        send_frame(&mut tx, frame, MacAddr([1, 2, 3, 4, 5, 6])).unwrap();
        assert_eq!(tx.sent.len(), 1);
        assert_eq!(&tx.sent[0][0..6], &[1, 2, 3, 4, 5, 6]);
        assert_eq!(&tx.sent[0][6..12], IF_MAC.as_bytes());
    }
}
