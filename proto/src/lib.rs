//! Wire codecs for the protocols this stack speaks: Ethernet II, ARP,
//! IPv4, ICMPv4, UDP.
//!
//! Every codec is a pure `parse`/`serialize` pair, no I/O, no cache
//! lookups, no socket state. Parsed values borrow from the caller's
//! buffer rather than copying it.

pub mod arp;
pub mod error;
pub mod ethernet;
pub mod icmpv4;
pub mod ipv4;
pub mod udp;

pub use error::ParseError;
