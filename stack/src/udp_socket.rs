//! UDP socket multiplexer: `(local_ip, local_port) → socket`, with a
//! wildcard `0.0.0.0` entry as the fallback match.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::time::{Duration, Instant};

use tapstack_abi::error::StackError;
use tapstack_abi::types::{IpProtocol, Ipv4Addr, Port};

use crate::packet_handler::{resolve_local_ip, PacketHandler};

const EPHEMERAL_START: u16 = 49152;
const EPHEMERAL_END: u16 = 65535;
const RX_QUEUE_CAPACITY: usize = 64;

struct SocketState {
    rx_queue: VecDeque<(Ipv4Addr, Port, Vec<u8>)>,
    closed: bool,
    unreachable: bool,
}

/// A bound UDP endpoint. Cloning an existing handle (`Arc`) is how the
/// multiplexer and the caller share ownership; the socket is removed
/// from the table only on `close()`.
pub struct UdpSocket {
    local_ip: Ipv4Addr,
    local_port: Port,
    state: Mutex<SocketState>,
    not_empty: Condvar,
    table: Weak<UdpSocketTable>,
    handler: Arc<PacketHandler>,
}

impl std::fmt::Debug for UdpSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UdpSocket")
            .field("local_ip", &self.local_ip)
            .field("local_port", &self.local_port)
            .finish()
    }
}

impl UdpSocket {
    pub fn local_addr(&self) -> (Ipv4Addr, Port) {
        (self.local_ip, self.local_port)
    }

    /// Construct and send a UDP datagram to `(remote_ip, remote_port)`.
    pub fn send(&self, remote_ip: Ipv4Addr, remote_port: Port, payload: &[u8]) -> Result<(), StackError> {
        let local_ip = resolve_local_ip(self.handler.routing(), self.local_ip);
        let header = tapstack_proto::udp::UdpHeader {
            src_port: self.local_port,
            dst_port: remote_port,
        };
        let pseudo_header = tapstack_proto::ipv4::PseudoHeader {
            src: local_ip,
            dst: remote_ip,
            protocol: IpProtocol::Udp,
            upper_layer_length: (tapstack_proto::udp::HEADER_LEN + payload.len()) as u16,
        };
        let datagram = tapstack_proto::udp::serialize(&header, payload, pseudo_header);
        self.handler
            .send_ipv4(local_ip, remote_ip, IpProtocol::Udp, &datagram, None)
    }

    /// Block until a datagram arrives, `timeout` elapses, or the socket
    /// is closed.
    pub fn receive(
        &self,
        timeout: Option<Duration>,
    ) -> Result<(Ipv4Addr, Port, Vec<u8>), StackError> {
        let mut state = self.state.lock().unwrap();
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            if let Some(datagram) = state.rx_queue.pop_front() {
                return Ok(datagram);
            }
            if state.closed {
                return Err(StackError::Closed);
            }
            if state.unreachable {
                state.unreachable = false;
                return Err(StackError::PortUnreachable);
            }
            match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(StackError::Timeout);
                    }
                    let (next, timed_out) =
                        self.not_empty.wait_timeout(state, deadline - now).unwrap();
                    state = next;
                    if timed_out.timed_out() && state.rx_queue.is_empty() && !state.closed {
                        return Err(StackError::Timeout);
                    }
                }
                None => {
                    state = self.not_empty.wait(state).unwrap();
                }
            }
        }
    }

    pub fn close(&self) {
        {
            let mut state = self.state.lock().unwrap();
            state.closed = true;
        }
        self.not_empty.notify_all();
        if let Some(table) = self.table.upgrade() {
            table.unbind(self.local_ip, self.local_port);
        }
    }

    fn deliver_datagram(&self, remote_ip: Ipv4Addr, remote_port: Port, payload: Vec<u8>) {
        let mut state = self.state.lock().unwrap();
        if state.rx_queue.len() >= RX_QUEUE_CAPACITY {
            state.rx_queue.pop_front();
        }
        state.rx_queue.push_back((remote_ip, remote_port, payload));
        drop(state);
        self.not_empty.notify_one();
    }

    fn mark_unreachable(&self) {
        let mut state = self.state.lock().unwrap();
        state.unreachable = true;
        drop(state);
        self.not_empty.notify_all();
    }
}

/// The `(local_ip, local_port) → socket` map. One mutex guards the map
/// itself; each socket's receive queue carries its own lock.
pub struct UdpSocketTable {
    sockets: Mutex<HashMap<(Ipv4Addr, Port), Arc<UdpSocket>>>,
    next_ephemeral: AtomicU16,
}

impl UdpSocketTable {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            sockets: Mutex::new(HashMap::new()),
            next_ephemeral: AtomicU16::new(EPHEMERAL_START),
        })
    }

    /// Bind a new socket. `local_port == 0` allocates from the
    /// ephemeral range; any other value fails with `AddressInUse` if
    /// already taken.
    pub fn bind(
        self: &Arc<Self>,
        handler: Arc<PacketHandler>,
        local_ip: Ipv4Addr,
        local_port: Port,
    ) -> Result<Arc<UdpSocket>, StackError> {
        let mut sockets = self.sockets.lock().unwrap();

        let port = if local_port.as_u16() == 0 {
            self.allocate_ephemeral(&sockets, local_ip)?
        } else {
            local_port
        };

        let key = (local_ip, port);
        if sockets.contains_key(&key) {
            return Err(StackError::AddressInUse);
        }

        let socket = Arc::new(UdpSocket {
            local_ip,
            local_port: port,
            state: Mutex::new(SocketState {
                rx_queue: VecDeque::new(),
                closed: false,
                unreachable: false,
            }),
            not_empty: Condvar::new(),
            table: Arc::downgrade(self),
            handler,
        });
        sockets.insert(key, socket.clone());
        Ok(socket)
    }

    fn allocate_ephemeral(
        &self,
        sockets: &HashMap<(Ipv4Addr, Port), Arc<UdpSocket>>,
        local_ip: Ipv4Addr,
    ) -> Result<Port, StackError> {
        let span = (EPHEMERAL_END - EPHEMERAL_START + 1) as u32;
        for _ in 0..span {
            let candidate = self.next_ephemeral.fetch_add(1, Ordering::Relaxed);
            let port = Port::new(if (EPHEMERAL_START..=EPHEMERAL_END).contains(&candidate) {
                candidate
            } else {
                self.next_ephemeral
                    .store(EPHEMERAL_START + 1, Ordering::Relaxed);
                EPHEMERAL_START
            });
            if !sockets.contains_key(&(local_ip, port)) {
                return Ok(port);
            }
        }
        Err(StackError::PortExhausted)
    }

    fn unbind(&self, local_ip: Ipv4Addr, local_port: Port) {
        self.sockets.lock().unwrap().remove(&(local_ip, local_port));
    }

    /// Deliver a datagram to the most specific matching socket: exact
    /// `(dst_ip, dst_port)` first, then the `0.0.0.0` wildcard. Returns
    /// `false` if nothing matched.
    pub fn deliver(
        &self,
        dst_ip: Ipv4Addr,
        dst_port: Port,
        remote_ip: Ipv4Addr,
        remote_port: Port,
        payload: Vec<u8>,
    ) -> bool {
        let sockets = self.sockets.lock().unwrap();
        let socket = sockets
            .get(&(dst_ip, dst_port))
            .or_else(|| sockets.get(&(Ipv4Addr::UNSPECIFIED, dst_port)))
            .cloned();
        drop(sockets);

        match socket {
            Some(socket) => {
                socket.deliver_datagram(remote_ip, remote_port, payload);
                true
            }
            None => false,
        }
    }

    /// Surface an inbound ICMP Destination Unreachable to whichever
    /// socket sent the quoted datagram. `quoted` is the IPv4 header plus
    /// the first 8 bytes of the UDP header that triggered it, truncated
    /// well short of a full datagram, too short for `ipv4::parse`'s
    /// `total_length` check, so the fields are read directly.
    pub fn notify_unreachable(&self, quoted: &[u8]) {
        if quoted.len() < tapstack_proto::ipv4::MIN_HEADER_LEN + 4 {
            return;
        }
        let ihl = (quoted[0] & 0x0f) as usize * 4;
        if quoted.len() < ihl + 4 {
            return;
        }
        let src = Ipv4Addr([quoted[12], quoted[13], quoted[14], quoted[15]]);
        let sport = Port::from_network_bytes([quoted[ihl], quoted[ihl + 1]]);

        let sockets = self.sockets.lock().unwrap();
        if let Some(socket) = sockets.get(&(src, sport)) {
            socket.mark_unreachable();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arp_cache::ArpCache;
    use crate::routing::RoutingState;
    use tapstack_core::ring::TxRing;

    fn handler() -> Arc<PacketHandler> {
        let routing = Arc::new(RoutingState::new(vec![]));
        let arp = Arc::new(ArpCache::new());
        let tx_ring = Arc::new(TxRing::new());
        let sockets = UdpSocketTable::new();
        Arc::new(PacketHandler::new(
            tapstack_abi::types::MacAddr::ZERO,
            routing,
            arp,
            tx_ring,
            sockets,
        ))
    }

    #[test]
    fn bind_allocates_ephemeral_port_on_zero() {
        let table = UdpSocketTable::new();
        let socket = table.bind(handler(), Ipv4Addr::UNSPECIFIED, Port::new(0)).unwrap();
        assert!(socket.local_addr().1.is_ephemeral());
    }

    #[test]
    fn bind_rejects_duplicate_explicit_port() {
        let table = UdpSocketTable::new();
        let h = handler();
        table.bind(h.clone(), Ipv4Addr::UNSPECIFIED, Port::new(7)).unwrap();
        let err = table.bind(h, Ipv4Addr::UNSPECIFIED, Port::new(7)).unwrap_err();
        assert_eq!(err, StackError::AddressInUse);
    }

    #[test]
    fn deliver_falls_back_to_wildcard() {
        let table = UdpSocketTable::new();
        let socket = table
            .bind(handler(), Ipv4Addr::UNSPECIFIED, Port::new(7))
            .unwrap();
        let delivered = table.deliver(
            Ipv4Addr([192, 168, 9, 7]),
            Port::new(7),
            Ipv4Addr([192, 168, 9, 1]),
            Port::new(5000),
            b"hi".to_vec(),
        );
        assert!(delivered);
        let (ip, port, payload) = socket.receive(Some(Duration::from_millis(50))).unwrap();
        assert_eq!(ip, Ipv4Addr([192, 168, 9, 1]));
        assert_eq!(port, Port::new(5000));
        assert_eq!(payload, b"hi");
    }

    #[test]
    fn close_wakes_waiters_with_closed_error() {
        let table = UdpSocketTable::new();
        let socket = table.bind(handler(), Ipv4Addr::UNSPECIFIED, Port::new(0)).unwrap();
        socket.close();
        assert_eq!(socket.receive(None).unwrap_err(), StackError::Closed);
    }

    #[test]
    fn receive_times_out_when_empty() {
        let table = UdpSocketTable::new();
        let socket = table.bind(handler(), Ipv4Addr::UNSPECIFIED, Port::new(0)).unwrap();
        assert_eq!(
            socket.receive(Some(Duration::from_millis(20))).unwrap_err(),
            StackError::Timeout
        );
    }
}
