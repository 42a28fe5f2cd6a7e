//! Frame provenance tracking for log correlation.
//!
//! Every received frame is stamped with an `RX` tracker when it enters
//! the stack. Every frame emitted in response links back to it via
//! `echo_tracker`, so a `debug`-level log trace can follow one inbound
//! frame through however many outbound frames it caused (an ARP reply,
//! an ICMP echo reply, a port-unreachable, ...).

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Direction a tracker was created for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Rx,
    Tx,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Rx => write!(f, "RX"),
            Direction::Tx => write!(f, "TX"),
        }
    }
}

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Diagnostic correlation record linking an inbound frame to every frame
/// emitted because of it.
#[derive(Clone, Debug)]
pub struct Tracker {
    pub direction: Direction,
    pub id: u64,
    pub echo_of: Option<u64>,
}

impl Tracker {
    /// Start a new `RX` tracker for a frame just pulled off the wire.
    pub fn rx() -> Self {
        Self {
            direction: Direction::Rx,
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            echo_of: None,
        }
    }

    /// Start a new `TX` tracker, optionally linked back to the inbound
    /// frame that caused it.
    pub fn tx(echo_tracker: Option<&Tracker>) -> Self {
        Self {
            direction: Direction::Tx,
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            echo_of: echo_tracker.map(|t| t.id),
        }
    }
}

impl fmt::Display for Tracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.echo_of {
            Some(parent) => write!(f, "{}{:<06} <- {}", self.direction, self.id, parent),
            None => write!(f, "{}{:<06}", self.direction, self.id),
        }
    }
}
