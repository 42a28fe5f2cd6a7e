//! End-to-end scenarios exercising `PacketHandler` and the socket API
//! the way a frame actually flows through them: serialize an inbound
//! frame, feed it to `handle_inbound`, and inspect whatever lands on
//! the TX ring.

use std::sync::Arc;
use std::time::Duration;

use tapstack_abi::types::{EtherType, IpProtocol, Ipv4Addr, MacAddr, Port};
use tapstack_core::config::AddressEntry;
use tapstack_core::frame::Frame;
use tapstack_core::ring::TxRing;
use tapstack_proto::{arp, ethernet, icmpv4, ipv4, udp};
use tapstack_stack::arp_cache::ArpCache;
use tapstack_stack::packet_handler::PacketHandler;
use tapstack_stack::routing::RoutingState;
use tapstack_stack::udp_socket::UdpSocketTable;

const OUR_MAC: MacAddr = MacAddr([0x02, 0x00, 0x00, 0x77, 0x77, 0x77]);
const OUR_IP: Ipv4Addr = Ipv4Addr([192, 168, 9, 7]);
const PEER_MAC: MacAddr = MacAddr([0x00, 0x11, 0x22, 0x33, 0x44, 0x55]);
const PEER_IP: Ipv4Addr = Ipv4Addr([192, 168, 9, 1]);
const POLL: Duration = Duration::from_millis(200);

fn handler() -> (Arc<PacketHandler>, Arc<TxRing>) {
    let routing = Arc::new(RoutingState::new(vec![AddressEntry {
        address: OUR_IP,
        netmask: Ipv4Addr([255, 255, 255, 0]),
    }]));
    let arp = Arc::new(ArpCache::new());
    let tx_ring = Arc::new(TxRing::new());
    let sockets = UdpSocketTable::new();
    let h = Arc::new(PacketHandler::new(
        OUR_MAC,
        routing,
        arp,
        tx_ring.clone(),
        sockets,
    ));
    (h, tx_ring)
}

fn inbound_frame(header: ethernet::EthernetHeader, payload: Vec<u8>) -> Frame {
    Frame::received(ethernet::serialize(&header, &payload))
}

/// S1: an ARP who-has for our address gets a direct reply to the
/// requester, not a broadcast.
#[test]
fn arp_request_for_owned_address_elicits_reply() {
    let (handler, tx_ring) = handler();

    let request = arp::ArpPacket {
        operation: arp::Operation::Request,
        sender_mac: PEER_MAC,
        sender_ip: PEER_IP,
        target_mac: MacAddr::ZERO,
        target_ip: OUR_IP,
    };
    let frame = inbound_frame(
        ethernet::EthernetHeader {
            dst_mac: MacAddr::BROADCAST,
            src_mac: PEER_MAC,
            ethertype: EtherType::Arp,
        },
        arp::serialize(&request).to_vec(),
    );
    handler.handle_inbound(frame);

    let reply = tx_ring.pop_timeout(POLL).expect("arp reply expected");
    let eth = ethernet::parse(&reply.bytes).unwrap();
    assert_eq!(eth.header.dst_mac, PEER_MAC);
    assert_eq!(eth.header.ethertype, EtherType::Arp);

    let arp_reply = arp::parse(eth.payload).unwrap();
    assert_eq!(arp_reply.operation, arp::Operation::Reply);
    assert_eq!(arp_reply.sender_mac, OUR_MAC);
    assert_eq!(arp_reply.sender_ip, OUR_IP);
    assert_eq!(arp_reply.target_mac, PEER_MAC);
}

/// S2: an ICMP echo request gets a reply with the same id/seq/data and
/// addresses swapped.
#[test]
fn icmp_echo_request_elicits_matching_reply() {
    let (handler, tx_ring) = handler();

    let echo = icmpv4::serialize_echo(false, 0x1234, 0x0001, b"hello");
    let ip_header = ipv4::Ipv4Header {
        ihl_words: 5,
        total_length: 0,
        identification: 1,
        dont_fragment: false,
        ttl: 64,
        protocol: IpProtocol::Icmp,
        src: PEER_IP,
        dst: OUR_IP,
    };
    let datagram = ipv4::serialize(&ip_header, &echo);
    let frame = inbound_frame(
        ethernet::EthernetHeader {
            dst_mac: OUR_MAC,
            src_mac: PEER_MAC,
            ethertype: EtherType::Ipv4,
        },
        datagram,
    );
    handler.handle_inbound(frame);

    let reply = tx_ring.pop_timeout(POLL).expect("echo reply expected");
    let eth = ethernet::parse(&reply.bytes).unwrap();
    let ip = ipv4::parse(eth.payload).unwrap();
    assert_eq!(ip.header.src, OUR_IP);
    assert_eq!(ip.header.dst, PEER_IP);

    match icmpv4::parse(ip.payload).unwrap() {
        icmpv4::Icmpv4Message::EchoReply { id, seq, data } => {
            assert_eq!(id, 0x1234);
            assert_eq!(seq, 1);
            assert_eq!(data, b"hello");
        }
        other => panic!("unexpected reply variant: {other:?}"),
    }
}

/// S3: a UDP datagram to an unbound port on a unicast destination
/// elicits exactly one ICMP port-unreachable, quoting the IPv4 header
/// and the first 8 bytes of the UDP header.
#[test]
fn udp_to_unbound_port_elicits_port_unreachable() {
    let (handler, tx_ring) = handler();

    let udp_header = udp::UdpHeader {
        src_port: Port::new(5000),
        dst_port: Port::new(9999),
    };
    let pseudo = ipv4::PseudoHeader {
        src: PEER_IP,
        dst: OUR_IP,
        protocol: IpProtocol::Udp,
        upper_layer_length: (udp::HEADER_LEN + 1) as u16,
    };
    let datagram = udp::serialize(&udp_header, b"x", pseudo);
    let ip_header = ipv4::Ipv4Header {
        ihl_words: 5,
        total_length: 0,
        identification: 2,
        dont_fragment: false,
        ttl: 64,
        protocol: IpProtocol::Udp,
        src: PEER_IP,
        dst: OUR_IP,
    };
    let ip_bytes = ipv4::serialize(&ip_header, &datagram);
    let frame = inbound_frame(
        ethernet::EthernetHeader {
            dst_mac: OUR_MAC,
            src_mac: PEER_MAC,
            ethertype: EtherType::Ipv4,
        },
        ip_bytes,
    );
    handler.handle_inbound(frame);

    let reply = tx_ring.pop_timeout(POLL).expect("port unreachable expected");
    let eth = ethernet::parse(&reply.bytes).unwrap();
    let ip = ipv4::parse(eth.payload).unwrap();
    match icmpv4::parse(ip.payload).unwrap() {
        icmpv4::Icmpv4Message::DestUnreachable { code, .. } => {
            assert_eq!(code, icmpv4::CODE_PORT_UNREACHABLE);
        }
        other => panic!("unexpected reply variant: {other:?}"),
    }

    assert!(tx_ring.pop_timeout(Duration::from_millis(50)).is_none());
}

/// S4: a bound socket receives delivered datagrams and can reply
/// through the handler.
#[test]
fn bound_socket_receives_and_replies() {
    let routing = Arc::new(RoutingState::new(vec![AddressEntry {
        address: OUR_IP,
        netmask: Ipv4Addr([255, 255, 255, 0]),
    }]));
    let tx_ring = Arc::new(TxRing::new());
    let sockets = UdpSocketTable::new();
    let handler = Arc::new(PacketHandler::new(
        OUR_MAC,
        routing,
        Arc::new(ArpCache::new()),
        tx_ring.clone(),
        sockets.clone(),
    ));
    let socket = sockets
        .bind(handler.clone(), Ipv4Addr::UNSPECIFIED, Port::new(7))
        .unwrap();

    let udp_header = udp::UdpHeader {
        src_port: Port::new(5000),
        dst_port: Port::new(7),
    };
    let pseudo = ipv4::PseudoHeader {
        src: PEER_IP,
        dst: OUR_IP,
        protocol: IpProtocol::Udp,
        upper_layer_length: (udp::HEADER_LEN + 4) as u16,
    };
    let datagram = udp::serialize(&udp_header, b"ping", pseudo);
    let ip_header = ipv4::Ipv4Header {
        ihl_words: 5,
        total_length: 0,
        identification: 3,
        dont_fragment: false,
        ttl: 64,
        protocol: IpProtocol::Udp,
        src: PEER_IP,
        dst: OUR_IP,
    };
    let ip_bytes = ipv4::serialize(&ip_header, &datagram);
    let frame = inbound_frame(
        ethernet::EthernetHeader {
            dst_mac: OUR_MAC,
            src_mac: PEER_MAC,
            ethertype: EtherType::Ipv4,
        },
        ip_bytes,
    );
    handler.handle_inbound(frame);

    let (remote_ip, remote_port, payload) = socket.receive(Some(POLL)).unwrap();
    assert_eq!(remote_ip, PEER_IP);
    assert_eq!(remote_port, Port::new(5000));
    assert_eq!(payload, b"ping");

    socket.send(remote_ip, remote_port, &payload).unwrap();
    let reply = tx_ring.pop_timeout(POLL).expect("echo reply expected on tx ring");
    let eth = ethernet::parse(&reply.bytes).unwrap();
    let ip = ipv4::parse(eth.payload).unwrap();
    let reply_udp = udp::parse(ip.payload).unwrap();
    assert_eq!(reply_udp.payload, b"ping");
}

/// S6: two sends to an unresolved address both park on the ARP cache
/// and are both flushed, in submission order, once the reply arrives.
#[test]
fn concurrent_sends_to_unresolved_address_flush_in_order() {
    let (handler, tx_ring) = handler();
    let target = Ipv4Addr([192, 168, 9, 250]);

    handler
        .send_ipv4(OUR_IP, target, IpProtocol::Udp, b"first", None)
        .unwrap();
    handler
        .send_ipv4(OUR_IP, target, IpProtocol::Udp, b"second", None)
        .unwrap();

    // Both frames parked on the ARP cache; only the request went out.
    let request = tx_ring.pop_timeout(POLL).expect("arp request expected");
    let eth = ethernet::parse(&request.bytes).unwrap();
    assert_eq!(eth.header.ethertype, EtherType::Arp);
    assert!(tx_ring.pop_timeout(Duration::from_millis(50)).is_none());

    let reply = arp::ArpPacket {
        operation: arp::Operation::Reply,
        sender_mac: PEER_MAC,
        sender_ip: target,
        target_mac: OUR_MAC,
        target_ip: OUR_IP,
    };
    let frame = inbound_frame(
        ethernet::EthernetHeader {
            dst_mac: OUR_MAC,
            src_mac: PEER_MAC,
            ethertype: EtherType::Arp,
        },
        arp::serialize(&reply).to_vec(),
    );
    handler.handle_inbound(frame);

    let first = tx_ring.pop_timeout(POLL).expect("first flushed frame");
    let second = tx_ring.pop_timeout(POLL).expect("second flushed frame");
    let first_ip = ipv4::parse(ethernet::parse(&first.bytes).unwrap().payload).unwrap();
    let second_ip = ipv4::parse(ethernet::parse(&second.bytes).unwrap().payload).unwrap();
    assert_eq!(first_ip.payload, b"first");
    assert_eq!(second_ip.payload, b"second");
}
