//! Reference users of the socket API: a UDP echo service and a DHCP
//! client. Neither is part of the stack proper, both exist to exercise
//! `UdpSocket::{bind,send,receive,close}` the way real application code
//! would.

pub mod dhcp;
pub mod echo;
