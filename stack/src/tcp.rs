//! TCP is reserved but not implemented.
//!
//! [`PacketHandler`](crate::packet_handler::PacketHandler) recognizes
//! `IpProtocol::Tcp` at dispatch and logs-and-drops rather than routing
//! here. `TcpSocket` mirrors [`crate::udp_socket::UdpSocket`]'s
//! bind/send/receive/close shape so a real implementation has a seam to
//! grow into, but every operation fails with `StackError::NotSupported`;
//! there is no connection state machine behind it.

use tapstack_abi::error::StackError;
use tapstack_abi::types::{Ipv4Addr, Port};

/// Placeholder for the eventual TCP connection state machine.
#[derive(Debug)]
pub struct TcpSocket {
    _private: (),
}

impl TcpSocket {
    pub fn bind(_local_ip: Ipv4Addr, _local_port: Port) -> Result<Self, StackError> {
        Err(StackError::NotSupported)
    }

    pub fn send(&self, _payload: &[u8]) -> Result<(), StackError> {
        Err(StackError::NotSupported)
    }

    pub fn receive(&self) -> Result<Vec<u8>, StackError> {
        Err(StackError::NotSupported)
    }

    pub fn close(&self) {}
}
