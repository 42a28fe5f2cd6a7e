//! Shared wire-level types and the crate-wide error taxonomy.
//!
//! Every other crate in the workspace depends on this one and nothing
//! else upward: it exists so that `tapstack-core`, `tapstack-proto`,
//! `tapstack-stack` and `tapstack-services` can all speak the same
//! `Ipv4Addr`/`MacAddr`/`Port`/`StackError` vocabulary without a cycle.

pub mod error;
pub mod types;

pub use error::StackError;
pub use types::{DevIndex, EtherType, IpProtocol, Ipv4Addr, MacAddr, Port, SockAddr};
