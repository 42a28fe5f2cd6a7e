//! S5: a DHCP client with no configured address observes Offer/Ack and
//! applies the resulting lease to routing. The "server" side is played
//! by this test, reading the client's broadcast frames off the TX ring
//! and feeding replies straight into the socket table, the way the tap
//! device + dispatcher would if a real server answered.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tapstack_abi::types::{EtherType, Ipv4Addr, MacAddr, Port};
use tapstack_core::ring::TxRing;
use tapstack_proto::{ethernet, ipv4, udp};
use tapstack_stack::arp_cache::ArpCache;
use tapstack_stack::packet_handler::PacketHandler;
use tapstack_stack::routing::{NextHop, RoutingState};
use tapstack_stack::udp_socket::UdpSocketTable;

const OUR_MAC: MacAddr = MacAddr([0x02, 0x00, 0x00, 0x77, 0x77, 0x77]);
const SERVER_IP: Ipv4Addr = Ipv4Addr([192, 168, 9, 1]);
const LEASED_IP: Ipv4Addr = Ipv4Addr([192, 168, 9, 50]);
const SUBNET_MASK: Ipv4Addr = Ipv4Addr([255, 255, 255, 0]);
const MAGIC_COOKIE: [u8; 4] = [0x63, 0x82, 0x53, 0x63];
const POLL: Duration = Duration::from_secs(2);

const MSG_OFFER: u8 = 2;
const MSG_ACK: u8 = 5;

/// Read the BOOTP payload carried by a broadcast UDP/67 frame popped
/// off the TX ring, returning its transaction id.
fn extract_xid(tx_ring: &TxRing) -> (u32, Vec<u8>) {
    let frame = tx_ring.pop_timeout(POLL).expect("dhcp broadcast expected");
    let eth = ethernet::parse(&frame.bytes).unwrap();
    assert_eq!(eth.header.ethertype, EtherType::Ipv4);
    let ip = ipv4::parse(eth.payload).unwrap();
    assert!(ip.header.dst.is_broadcast());
    let datagram = udp::parse(ip.payload).unwrap();
    assert_eq!(datagram.header.dst_port, Port::new(67));
    let payload = datagram.payload.to_vec();
    let xid = u32::from_be_bytes([payload[4], payload[5], payload[6], payload[7]]);
    (xid, payload)
}

fn build_reply(xid: u32, msg_type: u8) -> Vec<u8> {
    let mut out = vec![0u8; 240];
    out[0] = 2; // BOOTREPLY
    out[4..8].copy_from_slice(&xid.to_be_bytes());
    out[16..20].copy_from_slice(LEASED_IP.as_bytes());
    out[236..240].copy_from_slice(&MAGIC_COOKIE);
    out.extend_from_slice(&[53, 1, msg_type]);
    out.extend_from_slice(&[54, 4, SERVER_IP.0[0], SERVER_IP.0[1], SERVER_IP.0[2], SERVER_IP.0[3]]);
    out.extend_from_slice(&[
        1,
        4,
        SUBNET_MASK.0[0],
        SUBNET_MASK.0[1],
        SUBNET_MASK.0[2],
        SUBNET_MASK.0[3],
    ]);
    out.extend_from_slice(&[3, 4, SERVER_IP.0[0], SERVER_IP.0[1], SERVER_IP.0[2], SERVER_IP.0[3]]);
    out.push(255);
    out
}

#[test]
fn dhcp_client_acquires_lease_and_applies_it_to_routing() {
    let routing = Arc::new(RoutingState::new(vec![]));
    let arp = Arc::new(ArpCache::new());
    let tx_ring = Arc::new(TxRing::new());
    let sockets = UdpSocketTable::new();
    let handler = Arc::new(PacketHandler::new(
        OUR_MAC,
        routing.clone(),
        arp,
        tx_ring.clone(),
        sockets.clone(),
    ));

    let client = thread::spawn({
        let handler = handler.clone();
        let sockets = sockets.clone();
        let routing = routing.clone();
        move || tapstack_services::dhcp::run(handler, sockets, routing)
    });

    let (discover_xid, _) = extract_xid(&tx_ring);
    let delivered = sockets.deliver(
        Ipv4Addr::BROADCAST,
        Port::new(68),
        SERVER_IP,
        Port::new(67),
        build_reply(discover_xid, MSG_OFFER),
    );
    assert!(delivered, "offer must reach the client's bound socket");

    let (request_xid, _) = extract_xid(&tx_ring);
    assert_eq!(request_xid, discover_xid);
    let delivered = sockets.deliver(
        Ipv4Addr::BROADCAST,
        Port::new(68),
        SERVER_IP,
        Port::new(67),
        build_reply(request_xid, MSG_ACK),
    );
    assert!(delivered, "ack must reach the client's bound socket");

    let lease = client.join().unwrap();
    assert_eq!(lease, Some(LEASED_IP));
    assert!(routing.owns(LEASED_IP));
    assert_eq!(
        routing.next_hop(Ipv4Addr([10, 0, 0, 1])),
        Some(NextHop::Gateway(SERVER_IP))
    );
}
