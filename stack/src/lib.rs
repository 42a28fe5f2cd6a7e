//! The stateful half of the stack: ARP resolution, routing, packet
//! dispatch, and the UDP socket layer built on top of the wire codecs in
//! `tapstack-proto`.

pub mod arp_cache;
pub mod packet_handler;
pub mod routing;
pub mod tcp;
pub mod udp_socket;

pub use arp_cache::ArpCache;
pub use packet_handler::PacketHandler;
pub use routing::RoutingState;
pub use tcp::TcpSocket;
pub use udp_socket::{UdpSocket, UdpSocketTable};
