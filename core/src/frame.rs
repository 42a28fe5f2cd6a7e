//! The unit of currency between the tap device and the protocol stack.
//!
//! A [`Frame`] owns one raw Ethernet frame's bytes plus the [`Tracker`]
//! that correlates it with whatever frame(s) it causes. Parsed packet
//! values in `tapstack-proto` borrow from a `Frame`'s buffer rather than
//! copying it; the `Frame` must outlive every packet view sliced from it.

use crate::tracker::Tracker;

/// One raw Ethernet frame in flight, tagged with its provenance.
pub struct Frame {
    pub bytes: Vec<u8>,
    pub tracker: Tracker,
}

impl Frame {
    pub fn new(bytes: Vec<u8>, tracker: Tracker) -> Self {
        Self { bytes, tracker }
    }

    /// Wrap freshly read bytes as a newly received frame.
    pub fn received(bytes: Vec<u8>) -> Self {
        Self::new(bytes, Tracker::rx())
    }

    /// Build an outbound frame that traces back to `echo_tracker`, if any.
    pub fn outbound(bytes: Vec<u8>, echo_tracker: Option<&Tracker>) -> Self {
        Self::new(bytes, Tracker::tx(echo_tracker))
    }
}
