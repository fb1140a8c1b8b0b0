//! End-to-end scenarios: frames enter the Ethernet dispatcher exactly as
//! a worker would hand them over, and the emitted frames are inspected
//! byte for byte on scripted transmit queues.

use etherparse::{PacketBuilder, SlicedPacket, TransportSlice};
use router::error::PacketError;
use router::ethernet::handle_frame;
use router::io::{Frame, PortMap, TxQueue};
use router::{Fib, IfaceConfig, IfaceTable, MacAddr, RouteList};
use std::net::Ipv4Addr;

const IF0_MAC: MacAddr = MacAddr([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x01]);
const IF1_MAC: MacAddr = MacAddr([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x02]);
const HOST_MAC: [u8; 6] = [0x52, 0x54, 0x00, 0x00, 0x00, 0x02];
const HOP1_MAC: MacAddr = MacAddr([0x52, 0x54, 0x00, 0x00, 0x00, 0x03]);

struct TestFrame(Vec<u8>);

impl Frame for TestFrame {
    fn bytes(&self) -> &[u8] {
        &self.0
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.0
    }
}

struct CaptureTx {
    mac: MacAddr,
    sent: Vec<Vec<u8>>,
}

impl TxQueue for CaptureTx {
    type Frame = TestFrame;

    fn mac(&self) -> MacAddr {
        self.mac
    }

    fn transmit(&mut self, frame: TestFrame) -> Result<(), TestFrame> {
        self.sent.push(frame.0);
        Ok(())
    }
}

/// Two bound interfaces: port 0 = 10.0.0.1, port 1 = 192.168.0.1.
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
    routes.add(
        Ipv4Addr::new(10, 0, 0, 0),
        24,
        MacAddr([0x52, 0x54, 0x00, 0x00, 0x00, 0x02]),
        0,
    );
    routes.add(Ipv4Addr::new(192, 168, 0, 0), 16, HOP1_MAC, 1);
    Fib::build(routes).unwrap()
}

fn txs() -> PortMap<CaptureTx> {
    let mut txs = PortMap::new();
    txs.insert(
        0,
        CaptureTx {
            mac: IF0_MAC,
            sent: Vec::new(),
        },
    );
    txs.insert(
        1,
        CaptureTx {
            mac: IF1_MAC,
            sent: Vec::new(),
        },
    );
    txs
}

/// Runs one frame through the dispatcher as if received on port 0.
fn receive_with(
    fib: &Fib,
    frame: Vec<u8>,
    txs: &mut PortMap<CaptureTx>,
) -> Result<(), PacketError> {
    let ifaces = table();
    let cfg = ifaces.by_port(0).unwrap().clone();
    handle_frame(&cfg, &ifaces, fib, txs, TestFrame(frame))
}

fn receive_on_port0(
    frame: Vec<u8>,
    txs: &mut PortMap<CaptureTx>,
) -> Result<(), PacketError> {
    receive_with(&fib(), frame, txs)
}

fn udp_frame(dst_ip: [u8; 4], ttl: u8, payload: &[u8]) -> Vec<u8> {
    let builder = PacketBuilder::ethernet2(HOST_MAC, IF0_MAC.octets())
        .ipv4([10, 0, 0, 2], dst_ip, ttl)
        .udp(5000, 5001);
    let mut buf = Vec::new();
    builder.write(&mut buf, payload).unwrap();
    buf
}

#[test]
fn answers_arp_for_its_own_address() {
    // Who has 10.0.0.1? Tell 10.0.0.2.
    let mut frame = Vec::new();
    frame.extend_from_slice(&[0xFF; 6]);
    frame.extend_from_slice(&HOST_MAC);
    frame.extend_from_slice(&0x0806u16.to_be_bytes());
    frame.extend_from_slice(&1u16.to_be_bytes()); // ethernet
    frame.extend_from_slice(&0x0800u16.to_be_bytes()); // IPv4
    frame.push(6);
    frame.push(4);
    frame.extend_from_slice(&1u16.to_be_bytes()); // request
    frame.extend_from_slice(&HOST_MAC);
    frame.extend_from_slice(&[10, 0, 0, 2]);
    frame.extend_from_slice(&[0u8; 6]);
    frame.extend_from_slice(&[10, 0, 0, 1]);

    let mut txs = txs();
    receive_on_port0(frame, &mut txs).unwrap();

    // The reply leaves the ingress interface.
    let sent = &txs.get_mut(0).unwrap().sent;
    assert_eq!(sent.len(), 1);
    let reply = &sent[0];
    assert_eq!(&reply[0..6], &HOST_MAC);
    assert_eq!(&reply[6..12], IF0_MAC.as_bytes());
    assert_eq!(u16::from_be_bytes([reply[12], reply[13]]), 0x0806);
    let arp = &reply[14..];
    assert_eq!(u16::from_be_bytes([arp[6], arp[7]]), 2); // reply
    assert_eq!(&arp[8..14], IF0_MAC.as_bytes()); // sender: the router
    assert_eq!(&arp[14..18], &[10, 0, 0, 1]);
    assert_eq!(&arp[18..24], &HOST_MAC); // target: the asking host
    assert_eq!(&arp[24..28], &[10, 0, 0, 2]);
}

#[test]
fn forwards_across_ports() {
    let mut txs = txs();
    receive_on_port0(udp_frame([192, 168, 5, 7], 64, b"hello"), &mut txs).unwrap();

    assert!(txs.get_mut(0).unwrap().sent.is_empty());
    let sent = &txs.get_mut(1).unwrap().sent;
    assert_eq!(sent.len(), 1);
    let out = &sent[0];
    assert_eq!(&out[0..6], HOP1_MAC.as_bytes());
    assert_eq!(&out[6..12], IF1_MAC.as_bytes());
    assert_eq!(out[14 + 8], 63, "TTL must be aged by one");

    // The emitted frame must still be a valid UDP/IPv4 packet with a
    // correct header checksum.
    let parsed = SlicedPacket::from_ethernet(out).unwrap();
    match parsed.transport {
        Some(TransportSlice::Udp(_)) => {}
        other => panic!("not a UDP packet: {other:?}"),
    }
    let l3 = &out[14..34];
    let stored = u16::from_be_bytes([l3[10], l3[11]]);
    assert_eq!(stored, router::ipv4::header_checksum(l3));
}

#[test]
fn checksum_update_is_exact_across_many_ttls() {
    let fib = fib();
    for ttl in 2..=255u8 {
        let mut txs = txs();
        receive_with(&fib, udp_frame([192, 168, 5, 7], ttl, b"x"), &mut txs).unwrap();
        let sent = &txs.get_mut(1).unwrap().sent;
        let l3 = &sent[0][14..34];
        assert_eq!(l3[8], ttl - 1);
        let stored = u16::from_be_bytes([l3[10], l3[11]]);
        assert_eq!(stored, router::ipv4::header_checksum(l3), "ttl {ttl}");
    }
}

#[test]
fn expired_ttl_is_dropped_not_forwarded() {
    let mut txs = txs();
    let res = receive_on_port0(udp_frame([192, 168, 5, 7], 1, b"x"), &mut txs);
    // The dispatcher absorbs the TTL error; nothing may leave.
    assert_eq!(res, Ok(()));
    assert!(txs.get_mut(0).unwrap().sent.is_empty());
    assert!(txs.get_mut(1).unwrap().sent.is_empty());
}

#[test]
fn unrouted_traffic_is_dropped() {
    let mut txs = txs();
    let res = receive_on_port0(udp_frame([1, 2, 3, 4], 64, b"x"), &mut txs);
    assert_eq!(res, Ok(()));
    assert!(txs.get_mut(0).unwrap().sent.is_empty());
    assert!(txs.get_mut(1).unwrap().sent.is_empty());
}

#[test]
fn lookup_prefers_the_longest_prefix() {
    let mac_a = MacAddr([0x02, 0, 0, 0, 0, 0xA]);
    let mac_b = MacAddr([0x02, 0, 0, 0, 0, 0xB]);
    let mac_c = MacAddr([0x02, 0, 0, 0, 0, 0xC]);
    let mut routes = RouteList::new();
    routes.add(Ipv4Addr::new(0, 0, 0, 0), 0, mac_a, 0);
    routes.add(Ipv4Addr::new(10, 0, 0, 0), 8, mac_b, 1);
    routes.add(Ipv4Addr::new(10, 1, 2, 0), 24, mac_c, 1);
    let fib = Fib::build(routes).unwrap();

    let hop = |ip: [u8; 4]| fib.lookup(u32::from(Ipv4Addr::from(ip))).copied();
    assert_eq!(hop([10, 1, 2, 9]).unwrap().mac, mac_c);
    assert_eq!(hop([10, 5, 0, 1]).unwrap().mac, mac_b);
    assert_eq!(hop([8, 8, 8, 8]).unwrap().mac, mac_a);
}

#[test]
fn frames_for_other_hosts_pass_by_untouched() {
    let mut frame = udp_frame([192, 168, 5, 7], 64, b"x");
    frame[0..6].copy_from_slice(&[0x02, 0x99, 0x99, 0x99, 0x99, 0x99]);
    let mut txs = txs();
    assert_eq!(receive_on_port0(frame, &mut txs), Ok(()));
    assert!(txs.get_mut(1).unwrap().sent.is_empty());
}
