//! UDP echo service: binds port 7, sends every received payload back
//! to its source.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};

use tapstack_abi::error::StackError;
use tapstack_abi::types::{Ipv4Addr, Port};
use tapstack_stack::packet_handler::PacketHandler;
use tapstack_stack::udp_socket::UdpSocketTable;

pub const ECHO_PORT: u16 = 7;
const POLL_TIMEOUT: Duration = Duration::from_millis(500);

pub fn run(handler: Arc<PacketHandler>, sockets: Arc<UdpSocketTable>, stop: Arc<AtomicBool>) {
    let socket = match sockets.bind(handler, Ipv4Addr::UNSPECIFIED, Port::new(ECHO_PORT)) {
        Ok(s) => s,
        Err(e) => {
            warn!("echo: bind port {ECHO_PORT} failed: {e}");
            return;
        }
    };
    info!("echo: listening on port {ECHO_PORT}");

    while !stop.load(Ordering::Relaxed) {
        match socket.receive(Some(POLL_TIMEOUT)) {
            Ok((remote_ip, remote_port, payload)) => {
                debug!("echo: {remote_ip}:{remote_port} sent {} bytes", payload.len());
                if let Err(e) = socket.send(remote_ip, remote_port, &payload) {
                    warn!("echo: reply to {remote_ip}:{remote_port} failed: {e}");
                }
            }
            Err(StackError::Timeout) => continue,
            Err(StackError::Closed) => break,
            Err(e) => warn!("echo: receive error: {e}"),
        }
    }
    socket.close();
}
