//! Central inbound/outbound dispatcher.
//!
//! Owns nothing that outlives the process: the tap device, rings, ARP
//! cache, routing state, and socket table are constructed once at
//! startup and shared via `Arc` with the three I/O threads and every
//! application thread that opens a socket.

use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;

use log::{debug, warn};

use tapstack_abi::error::StackError;
use tapstack_abi::types::{EtherType, IpProtocol, Ipv4Addr, MacAddr};
use tapstack_core::frame::Frame;
use tapstack_core::ring::TxRing;
use tapstack_core::tracker::Tracker;
use tapstack_proto::{arp, ethernet, icmpv4, ipv4, udp};

use crate::arp_cache::{ArpAction, ArpCache, PendingFrame};
use crate::routing::{NextHop, RoutingState};
use crate::udp_socket::UdpSocketTable;

pub struct PacketHandler {
    our_mac: MacAddr,
    routing: Arc<RoutingState>,
    arp: Arc<ArpCache>,
    tx_ring: Arc<TxRing>,
    sockets: Arc<UdpSocketTable>,
    next_ip_id: AtomicU16,
}

impl PacketHandler {
    pub fn new(
        our_mac: MacAddr,
        routing: Arc<RoutingState>,
        arp: Arc<ArpCache>,
        tx_ring: Arc<TxRing>,
        sockets: Arc<UdpSocketTable>,
    ) -> Self {
        Self {
            our_mac,
            routing,
            arp,
            tx_ring,
            sockets,
            next_ip_id: AtomicU16::new(1),
        }
    }

    /// Entry point for a single inbound frame, called by the dispatcher
    /// thread for every frame popped off the RX ring.
    pub fn handle_inbound(&self, frame: Frame) {
        let parsed = match ethernet::parse(&frame.bytes) {
            Ok(p) => p,
            Err(e) => {
                debug!("handle_inbound: {e}");
                return;
            }
        };

        match parsed.header.ethertype {
            EtherType::Arp => self.handle_arp(parsed.payload, &frame.tracker),
            EtherType::Ipv4 => self.handle_ipv4(parsed.payload, &frame.tracker),
        }
    }

    fn handle_arp(&self, payload: &[u8], tracker: &Tracker) {
        let pkt = match arp::parse(payload) {
            Ok(p) => p,
            Err(e) => {
                debug!("arp: {e}");
                return;
            }
        };

        let action = self.arp.observe(pkt.sender_ip, pkt.sender_mac);
        self.execute_arp_action(action, tracker);

        if pkt.operation == arp::Operation::Request && self.routing.owns(pkt.target_ip) {
            let action = self.arp.handle_request(pkt.sender_mac, pkt.target_ip);
            self.execute_arp_action(action, tracker);
        }
    }

    fn handle_ipv4(&self, payload: &[u8], tracker: &Tracker) {
        let pkt = match ipv4::parse(payload) {
            Ok(p) => p,
            Err(e) => {
                debug!("ipv4: {e}");
                return;
            }
        };

        let dst = pkt.header.dst;
        if !self.routing.owns(dst) && !dst.is_broadcast() && !dst.is_multicast() {
            debug!("ipv4: {dst} is not ours, dropping");
            return;
        }

        match pkt.header.protocol {
            IpProtocol::Icmp => self.handle_icmp(&pkt.header, pkt.payload, tracker),
            IpProtocol::Udp => self.handle_udp(&pkt.header, pkt.payload, tracker),
            IpProtocol::Tcp => debug!("tcp: reserved, dropping segment from {}", pkt.header.src),
        }
    }

    fn handle_icmp(&self, ip: &ipv4::Ipv4Header, payload: &[u8], tracker: &Tracker) {
        let message = match icmpv4::parse(payload) {
            Ok(m) => m,
            Err(e) => {
                debug!("icmp: {e}");
                return;
            }
        };

        match message {
            icmpv4::Icmpv4Message::EchoRequest { id, seq, data } => {
                let reply = icmpv4::serialize_echo(true, id, seq, data);
                if let Err(e) =
                    self.send_ipv4(ip.dst, ip.src, IpProtocol::Icmp, &reply, Some(tracker))
                {
                    warn!("icmp: failed to send echo reply: {e}");
                }
            }
            icmpv4::Icmpv4Message::DestUnreachable { data, .. } => {
                self.sockets.notify_unreachable(data);
            }
            icmpv4::Icmpv4Message::EchoReply { .. } | icmpv4::Icmpv4Message::Unknown { .. } => {
                debug!("icmp: informational message from {}, no action", ip.src);
            }
        }
    }

    fn handle_udp(&self, ip: &ipv4::Ipv4Header, payload: &[u8], tracker: &Tracker) {
        let datagram = match udp::parse(payload) {
            Ok(d) => d,
            Err(e) => {
                debug!("udp: {e}");
                return;
            }
        };

        let pseudo = ip.pseudo_header(payload.len() as u16);
        if !datagram.verify(payload, pseudo) {
            debug!("udp: checksum mismatch from {}", ip.src);
            return;
        }

        let delivered = self.sockets.deliver(
            ip.dst,
            datagram.header.dst_port,
            ip.src,
            datagram.header.src_port,
            datagram.payload.to_vec(),
        );

        if !delivered && !ip.dst.is_broadcast() && !ip.dst.is_multicast() {
            let mut quoted = Vec::new();
            quoted.extend_from_slice(&ipv4::serialize_header(ip));
            quoted.extend_from_slice(&payload[..payload.len().min(udp::HEADER_LEN)]);
            let reply = icmpv4::serialize_dest_unreachable(icmpv4::CODE_PORT_UNREACHABLE, &quoted);
            if let Err(e) =
                self.send_ipv4(ip.dst, ip.src, IpProtocol::Icmp, &reply, Some(tracker))
            {
                warn!("icmp: failed to send port-unreachable: {e}");
            }
        }
    }

    /// Construct and enqueue an IPv4 datagram from `src` to `dst`. If the
    /// next-hop MAC isn't resolved yet, the frame is parked on the ARP
    /// cache and this returns `Ok(())` immediately, the caller never
    /// blocks on address resolution.
    pub fn send_ipv4(
        &self,
        src: Ipv4Addr,
        dst: Ipv4Addr,
        protocol: IpProtocol,
        payload: &[u8],
        echo_tracker: Option<&Tracker>,
    ) -> Result<(), StackError> {
        let header = ipv4::Ipv4Header {
            ihl_words: 5,
            total_length: 0,
            identification: self.next_ip_id.fetch_add(1, Ordering::Relaxed),
            dont_fragment: false,
            ttl: ipv4::DEFAULT_TTL,
            protocol,
            src,
            dst,
        };
        let datagram = ipv4::serialize(&header, payload);
        let tracker = Tracker::tx(echo_tracker);

        // Broadcast/multicast never needs a route: there's no unicast
        // next hop to resolve, and DHCP discover in particular must work
        // before any address or gateway is configured at all.
        if dst.is_broadcast() || dst.is_multicast() {
            let frame_bytes = ethernet::serialize(
                &ethernet::EthernetHeader {
                    dst_mac: MacAddr::BROADCAST,
                    src_mac: self.our_mac,
                    ethertype: EtherType::Ipv4,
                },
                &datagram,
            );
            self.tx_ring.push(Frame::new(frame_bytes, tracker));
            return Ok(());
        }

        let next_hop = self
            .routing
            .next_hop(dst)
            .ok_or(StackError::NetworkUnreachable)?;
        let target_ip = match next_hop {
            NextHop::Direct(ip) => ip,
            NextHop::Gateway(ip) => ip,
        };

        let pending = PendingFrame {
            src_mac: self.our_mac,
            ethertype: EtherType::Ipv4,
            l3_payload: datagram.clone(),
            tracker: tracker.clone(),
        };
        let (mac, action) = self.arp.resolve(target_ip, pending);
        self.execute_arp_action(action, &tracker);

        if let Some(mac) = mac {
            // Resolved (including Stale, which is still usable), the
            // entry was already resolved, so `resolve` never queued
            // `pending`; send directly instead of waiting on a flush.
            let frame_bytes = ethernet::serialize(
                &ethernet::EthernetHeader {
                    dst_mac: mac,
                    src_mac: self.our_mac,
                    ethertype: EtherType::Ipv4,
                },
                &datagram,
            );
            self.tx_ring.push(Frame::new(frame_bytes, tracker));
        }

        Ok(())
    }

    fn execute_arp_action(&self, action: ArpAction, tracker: &Tracker) {
        match action {
            ArpAction::None => {}
            ArpAction::SendRequest { target_ip } => self.send_arp_request(target_ip, MacAddr::BROADCAST),
            ArpAction::SendUnicastRequest { target_ip, target_mac } => {
                self.send_arp_request(target_ip, target_mac)
            }
            ArpAction::SendReply {
                target_ip,
                target_mac,
            } => self.send_arp_reply(target_ip, target_mac),
            ArpAction::FlushPending { mac, frames } => {
                for pending in frames {
                    let frame_bytes = ethernet::serialize(
                        &ethernet::EthernetHeader {
                            dst_mac: mac,
                            src_mac: pending.src_mac,
                            ethertype: pending.ethertype,
                        },
                        &pending.l3_payload,
                    );
                    self.tx_ring.push(Frame::new(frame_bytes, pending.tracker));
                }
            }
            ArpAction::HostUnreachable { frames } => {
                for pending in frames {
                    warn!(
                        "arp: host unreachable, dropping frame {} ({})",
                        pending.tracker, tracker
                    );
                }
            }
        }
    }

    /// Send an ARP request for `target_ip`. `dst_mac` is the Ethernet
    /// destination: `MacAddr::BROADCAST` for a fresh `Pending` probe, or
    /// the already-known MAC for a `Stale` entry's unicast refresh.
    fn send_arp_request(&self, target_ip: Ipv4Addr, dst_mac: MacAddr) {
        let our_ip = self.routing.primary_address().unwrap_or(Ipv4Addr::UNSPECIFIED);
        let arp_pkt = arp::ArpPacket {
            operation: arp::Operation::Request,
            sender_mac: self.our_mac,
            sender_ip: our_ip,
            target_mac: MacAddr::ZERO,
            target_ip,
        };
        let frame_bytes = ethernet::serialize(
            &ethernet::EthernetHeader {
                dst_mac,
                src_mac: self.our_mac,
                ethertype: EtherType::Arp,
            },
            &arp::serialize(&arp_pkt),
        );
        self.tx_ring.push(Frame::outbound(frame_bytes, None));
    }

    fn send_arp_reply(&self, target_ip: Ipv4Addr, target_mac: MacAddr) {
        let arp_pkt = arp::ArpPacket {
            operation: arp::Operation::Reply,
            sender_mac: self.our_mac,
            sender_ip: target_ip,
            target_mac,
            target_ip,
        };
        let frame_bytes = ethernet::serialize(
            &ethernet::EthernetHeader {
                dst_mac: target_mac,
                src_mac: self.our_mac,
                ethertype: EtherType::Arp,
            },
            &arp::serialize(&arp_pkt),
        );
        self.tx_ring.push(Frame::outbound(frame_bytes, None));
    }

    /// Broadcast a gratuitous ARP (`spa == tpa == local_ip`) for every
    /// configured address; called once at interface startup.
    pub fn announce_addresses(&self) {
        for entry in self.routing.addresses() {
            let arp_pkt = arp::ArpPacket {
                operation: arp::Operation::Request,
                sender_mac: self.our_mac,
                sender_ip: entry.address,
                target_mac: MacAddr::ZERO,
                target_ip: entry.address,
            };
            let frame_bytes = ethernet::serialize(
                &ethernet::EthernetHeader {
                    dst_mac: MacAddr::BROADCAST,
                    src_mac: self.our_mac,
                    ethertype: EtherType::Arp,
                },
                &arp::serialize(&arp_pkt),
            );
            self.tx_ring.push(Frame::outbound(frame_bytes, None));
        }
    }

    pub fn our_mac(&self) -> MacAddr {
        self.our_mac
    }

    pub fn routing(&self) -> &Arc<RoutingState> {
        &self.routing
    }

    /// Drive the ARP cache's retry/stale/eviction timers, executing
    /// whatever follow-up action each entry produces. Called
    /// periodically by a dedicated timer thread.
    pub fn run_arp_tick(&self) {
        let tracker = Tracker::tx(None);
        for action in self.arp.tick() {
            self.execute_arp_action(action, &tracker);
        }
    }
}

/// Wildcard socket addressing helper shared by the socket layer:
/// resolves `0.0.0.0` to the stack's primary configured address.
pub fn resolve_local_ip(routing: &RoutingState, requested: Ipv4Addr) -> Ipv4Addr {
    if requested.is_unspecified() {
        routing.primary_address().unwrap_or(Ipv4Addr::UNSPECIFIED)
    } else {
        requested
    }
}

