//
// arp.rs - ARP Responder
//
// Purpose:
//   Answers ARP requests that ask for one of the router's own interface
//   addresses. The router never issues requests of its own; neighbor MACs
//   come from the static route configuration.
//
// How it works:
//   - The 28-byte ARP body (RFC 826, Ethernet/IPv4) is validated in full
//     before any byte is touched: exact length, opcode REQUEST, target
//     address equal to the ingress interface address, hardware type
//     ETHERNET, protocol type IPv4, 6/4 address lengths.
//   - The reply is built in place in the receive buffer: the requester's
//     identity moves into the target fields, the router's identity into
//     the sender fields, and the opcode flips to REPLY.
//   - The buffer then goes straight back out of the ingress interface;
//     the Ethernet sender rewrites the frame addresses.
//

use crate::error::PacketError;
use crate::ethernet;
use crate::iface::IfaceConfig;
use crate::io::{Frame as _, PortMap, TxQueue};
use crate::net::{ETH_HEADER_LEN, ETHERTYPE_IPV4, MacAddr};

/// Length of an Ethernet/IPv4 ARP body.
pub const ARP_PKT_LEN: usize = 28;
/// ARP hardware type for Ethernet.
pub const ARP_HRD_ETHER: u16 = 1;
/// ARP opcodes, host byte order.
pub const ARP_OP_REQUEST: u16 = 1;
pub const ARP_OP_REPLY: u16 = 2;

// Field offsets within the ARP body.
const OP: usize = 6;
const SHA: usize = 8;
const SPA: usize = 14;
const THA: usize = 18;
const TPA: usize = 24;

/// Handles an incoming ARP packet, answering it when it is a request for
/// the ingress interface's address.
///
/// Consumes the frame: a reply reuses it for transmission, every other
/// outcome frees it.
pub fn handle_arp<T: TxQueue>(
    cfg: &IfaceConfig,
    txs: &mut PortMap<T>,
    mut frame: T::Frame,
) -> Result<(), PacketError> {
    check_request(&frame.bytes()[ETH_HEADER_LEN..], cfg)?;

    // The request is fully validated; build the reply in place.
    let arp = &mut frame.bytes_mut()[ETH_HEADER_LEN..];
    let mut requester = [0u8; 6];
    requester.copy_from_slice(&arp[SHA..SHA + 6]);
    arp.copy_within(SPA..SPA + 4, TPA); // target IP = asking host
    arp.copy_within(SHA..SHA + 6, THA); // target MAC = asking host
    arp[SHA..SHA + 6].copy_from_slice(cfg.mac.as_bytes());
    arp[SPA..SPA + 4].copy_from_slice(&cfg.ip_octets());
    arp[OP..OP + 2].copy_from_slice(&ARP_OP_REPLY.to_be_bytes());

    log::debug!("port {}: sending ARP reply for {}", cfg.port, cfg.ip);

    let Some(tx) = txs.get_mut(cfg.port) else {
        // The ingress port always has a TX queue; treat a miss as a
        // configuration problem and drop the reply.
        log::debug!("port {}: no TX queue for ARP reply", cfg.port);
        return Err(PacketError::NotSupported);
    };
    ethernet::send_frame(tx, frame, MacAddr(requester))
}

/// Checks that the packet is a well-formed ARP request we can answer.
fn check_request(arp: &[u8], cfg: &IfaceConfig) -> Result<(), PacketError> {
    if arp.len() != ARP_PKT_LEN {
        log::debug!("ARP packet with an invalid length: {}", arp.len());
        return Err(PacketError::InvalidPacket);
    }
    if u16::from_be_bytes([arp[OP], arp[OP + 1]]) != ARP_OP_REQUEST {
        log::debug!("unhandled ARP operation: {:#06x}", u16::from_be_bytes([arp[OP], arp[OP + 1]]));
        return Err(PacketError::NotSupported);
    }
    if arp[TPA..TPA + 4] != cfg.ip_octets() {
        log::debug!("ARP request for an address that is not ours");
        return Err(PacketError::NotForMe);
    }
    if u16::from_be_bytes([arp[0], arp[1]]) != ARP_HRD_ETHER {
        log::debug!("unknown ARP hardware type");
        return Err(PacketError::InvalidPacket);
    }
    if u16::from_be_bytes([arp[2], arp[3]]) != ETHERTYPE_IPV4 {
        log::debug!("unknown ARP protocol type");
        return Err(PacketError::InvalidPacket);
    }
    if arp[4] != 6 || arp[5] != 4 {
        log::debug!("invalid ARP hardware or protocol address length");
        return Err(PacketError::InvalidPacket);
    }
    Ok(())
}
