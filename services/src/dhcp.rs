//! DHCP client (RFC 2131/2132): DORA over BOOTP, UDP 67/68.
//!
//! Runs once at startup, broadcasting from `0.0.0.0` to
//! `255.255.255.255` the way a host with no address yet must. On a
//! successful Ack, applies the lease to [`RoutingState`].

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};

use tapstack_abi::types::{Ipv4Addr, MacAddr, Port};
use tapstack_stack::packet_handler::PacketHandler;
use tapstack_stack::routing::RoutingState;
use tapstack_stack::udp_socket::UdpSocketTable;

pub const SERVER_PORT: u16 = 67;
pub const CLIENT_PORT: u16 = 68;

const BOOTREQUEST: u8 = 1;
const BOOTREPLY: u8 = 2;
const FLAGS_BROADCAST: u16 = 0x8000;
const MAGIC_COOKIE: [u8; 4] = [0x63, 0x82, 0x53, 0x63];

const OPTION_PAD: u8 = 0;
const OPTION_SUBNET_MASK: u8 = 1;
const OPTION_ROUTER: u8 = 3;
const OPTION_REQUESTED_IP: u8 = 50;
const OPTION_MSG_TYPE: u8 = 53;
const OPTION_SERVER_ID: u8 = 54;
const OPTION_PARAM_REQ_LIST: u8 = 55;
const OPTION_END: u8 = 255;

const MSG_DISCOVER: u8 = 1;
const MSG_OFFER: u8 = 2;
const MSG_REQUEST: u8 = 3;
const MSG_ACK: u8 = 5;

const BOOTP_HEADER_LEN: usize = 240;
const REPLY_TIMEOUT: Duration = Duration::from_secs(5);

static NEXT_XID: AtomicU32 = AtomicU32::new(1);

#[derive(Clone, Copy)]
struct DhcpOptions {
    message_type: u8,
    server_id: Ipv4Addr,
    subnet_mask: Ipv4Addr,
    router: Ipv4Addr,
}

impl DhcpOptions {
    const fn empty() -> Self {
        Self {
            message_type: 0,
            server_id: Ipv4Addr::UNSPECIFIED,
            subnet_mask: Ipv4Addr::UNSPECIFIED,
            router: Ipv4Addr::UNSPECIFIED,
        }
    }
}

struct DhcpOffer {
    yiaddr: Ipv4Addr,
    server_id: Ipv4Addr,
    subnet_mask: Ipv4Addr,
    router: Ipv4Addr,
}

fn write_bootp_header(mac: MacAddr, xid: u32) -> Vec<u8> {
    let mut out = vec![0u8; BOOTP_HEADER_LEN];
    out[0] = BOOTREQUEST;
    out[1] = 1; // htype: Ethernet
    out[2] = 6; // hlen: 6-byte MAC
    out[4..8].copy_from_slice(&xid.to_be_bytes());
    out[10..12].copy_from_slice(&FLAGS_BROADCAST.to_be_bytes());
    out[28..34].copy_from_slice(mac.as_bytes());
    out[236..240].copy_from_slice(&MAGIC_COOKIE);
    out
}

fn finish_options(out: &mut Vec<u8>) {
    out.extend_from_slice(&[OPTION_PARAM_REQ_LIST, 2, OPTION_SUBNET_MASK, OPTION_ROUTER]);
    out.push(OPTION_END);
}

fn build_discover(mac: MacAddr, xid: u32) -> Vec<u8> {
    let mut out = write_bootp_header(mac, xid);
    out.extend_from_slice(&[OPTION_MSG_TYPE, 1, MSG_DISCOVER]);
    finish_options(&mut out);
    out
}

fn build_request(mac: MacAddr, xid: u32, offer: &DhcpOffer) -> Vec<u8> {
    let mut out = write_bootp_header(mac, xid);
    out.extend_from_slice(&[OPTION_MSG_TYPE, 1, MSG_REQUEST]);
    out.push(OPTION_REQUESTED_IP);
    out.push(4);
    out.extend_from_slice(offer.yiaddr.as_bytes());
    out.push(OPTION_SERVER_ID);
    out.push(4);
    out.extend_from_slice(offer.server_id.as_bytes());
    finish_options(&mut out);
    out
}

fn parse_options(options: &[u8]) -> DhcpOptions {
    let mut opts = DhcpOptions::empty();
    let mut i = 0usize;
    while i < options.len() {
        let code = options[i];
        if code == OPTION_END {
            break;
        }
        if code == OPTION_PAD {
            i += 1;
            continue;
        }
        if i + 1 >= options.len() {
            break;
        }
        let len = options[i + 1] as usize;
        if i + 2 + len > options.len() {
            break;
        }
        let data = &options[i + 2..i + 2 + len];
        match code {
            OPTION_MSG_TYPE if len >= 1 => opts.message_type = data[0],
            OPTION_SERVER_ID if len >= 4 => {
                opts.server_id = Ipv4Addr([data[0], data[1], data[2], data[3]])
            }
            OPTION_SUBNET_MASK if len >= 4 => {
                opts.subnet_mask = Ipv4Addr([data[0], data[1], data[2], data[3]])
            }
            OPTION_ROUTER if len >= 4 => {
                opts.router = Ipv4Addr([data[0], data[1], data[2], data[3]])
            }
            _ => {}
        }
        i += 2 + len;
    }
    opts
}

fn parse_bootp_reply(payload: &[u8], xid: u32, expected_type: u8) -> Option<DhcpOffer> {
    if payload.len() < BOOTP_HEADER_LEN || payload[0] != BOOTREPLY {
        return None;
    }
    if u32::from_be_bytes([payload[4], payload[5], payload[6], payload[7]]) != xid {
        return None;
    }
    if payload[236..240] != MAGIC_COOKIE {
        return None;
    }

    let options = parse_options(&payload[BOOTP_HEADER_LEN..]);
    if options.message_type != expected_type {
        return None;
    }
    if expected_type == MSG_OFFER && options.server_id.is_unspecified() {
        return None;
    }

    Some(DhcpOffer {
        yiaddr: Ipv4Addr([payload[16], payload[17], payload[18], payload[19]]),
        server_id: options.server_id,
        subnet_mask: options.subnet_mask,
        router: options.router,
    })
}

/// Run the Discover/Offer/Request/Ack sequence once. On success, applies
/// the lease to `routing` and returns the leased address.
pub fn run(
    handler: Arc<PacketHandler>,
    sockets: Arc<UdpSocketTable>,
    routing: Arc<RoutingState>,
) -> Option<Ipv4Addr> {
    let mac = handler.our_mac();
    let socket = match sockets.bind(handler, Ipv4Addr::UNSPECIFIED, Port::new(CLIENT_PORT)) {
        Ok(s) => s,
        Err(e) => {
            warn!("dhcp: bind port {CLIENT_PORT} failed: {e}");
            return None;
        }
    };

    let xid = NEXT_XID.fetch_add(1, Ordering::Relaxed);

    if let Err(e) = socket.send(
        Ipv4Addr::BROADCAST,
        Port::new(SERVER_PORT),
        &build_discover(mac, xid),
    ) {
        warn!("dhcp: discover send failed: {e}");
        socket.close();
        return None;
    }

    let offer = loop {
        match socket.receive(Some(REPLY_TIMEOUT)) {
            Ok((_, _, payload)) => {
                if let Some(offer) = parse_bootp_reply(&payload, xid, MSG_OFFER) {
                    break offer;
                }
            }
            Err(_) => {
                warn!("dhcp: no offer received within {REPLY_TIMEOUT:?}");
                socket.close();
                return None;
            }
        }
    };

    if let Err(e) = socket.send(
        Ipv4Addr::BROADCAST,
        Port::new(SERVER_PORT),
        &build_request(mac, xid, &offer),
    ) {
        warn!("dhcp: request send failed: {e}");
        socket.close();
        return None;
    }

    let ack = loop {
        match socket.receive(Some(REPLY_TIMEOUT)) {
            Ok((_, _, payload)) => {
                if let Some(ack) = parse_bootp_reply(&payload, xid, MSG_ACK) {
                    break ack;
                }
            }
            Err(_) => {
                warn!("dhcp: no ack received within {REPLY_TIMEOUT:?}");
                socket.close();
                return None;
            }
        }
    };

    socket.close();

    routing.apply_lease(ack.yiaddr, ack.subnet_mask, ack.router);
    info!("dhcp: leased {} from {}", ack.yiaddr, ack.server_id);
    Some(ack.yiaddr)
}
