//! Ambient plumbing shared by the protocol codecs and the stack proper:
//! frame provenance tracking, checksum arithmetic, the bounded RX/TX
//! rings that decouple tap I/O from protocol work, and process
//! configuration.

pub mod checksum;
pub mod config;
pub mod frame;
pub mod ring;
pub mod tracker;

pub use config::StackConfig;
pub use frame::Frame;
pub use ring::{RxRing, TxRing};
pub use tracker::{Direction, Tracker};
