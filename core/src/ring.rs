//! Bounded producer/consumer rings that decouple tap I/O from protocol
//! work.
//!
//! [`RxRing`] and [`TxRing`] are independent: an RX backlog never blocks
//! TX and vice versa (spec.md §5). Both are built on the same bounded
//! deque guarded by a `Mutex` + `Condvar`, differing only in their
//! overflow policy, RX drops the newest frame and counts the drop
//! (there is no one to push back on a NIC), TX blocks its producer
//! (a socket's `send` call can afford to wait a moment; silently
//! dropping outbound user data cannot be the default).

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use log::warn;

use crate::frame::Frame;

const DEFAULT_CAPACITY: usize = 128;

struct Inner {
    queue: VecDeque<Frame>,
    capacity: usize,
    closed: bool,
}

/// A bounded SPSC-shaped queue of frames. Used as the backing store for
/// both [`RxRing`] and [`TxRing`]; the overflow policy lives on the
/// wrapper type, not here.
struct Ring {
    state: Mutex<Inner>,
    not_empty: Condvar,
    not_full: Condvar,
}

impl Ring {
    fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(Inner {
                queue: VecDeque::with_capacity(capacity),
                capacity,
                closed: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        }
    }

    fn push_blocking(&self, frame: Frame) {
        let mut inner = self.state.lock().unwrap();
        while inner.queue.len() >= inner.capacity && !inner.closed {
            inner = self.not_full.wait(inner).unwrap();
        }
        if inner.closed {
            return;
        }
        inner.queue.push_back(frame);
        self.not_empty.notify_one();
    }

    /// Push, dropping the newest frame (this one) if the queue is full.
    /// Returns `true` if the frame was enqueued.
    fn push_or_drop(&self, frame: Frame) -> bool {
        let mut inner = self.state.lock().unwrap();
        if inner.closed {
            return false;
        }
        if inner.queue.len() >= inner.capacity {
            return false;
        }
        inner.queue.push_back(frame);
        self.not_empty.notify_one();
        true
    }

    fn pop_blocking(&self) -> Option<Frame> {
        let mut inner = self.state.lock().unwrap();
        while inner.queue.is_empty() && !inner.closed {
            inner = self.not_empty.wait(inner).unwrap();
        }
        let frame = inner.queue.pop_front();
        if frame.is_some() {
            self.not_full.notify_one();
        }
        frame
    }

    fn pop_timeout(&self, timeout: Duration) -> Option<Frame> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.state.lock().unwrap();
        loop {
            if let Some(frame) = inner.queue.pop_front() {
                self.not_full.notify_one();
                return Some(frame);
            }
            if inner.closed {
                return None;
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let (next, timed_out) = self
                .not_empty
                .wait_timeout(inner, deadline - now)
                .unwrap();
            inner = next;
            if timed_out.timed_out() && inner.queue.is_empty() {
                return None;
            }
        }
    }

    fn close(&self) {
        let mut inner = self.state.lock().unwrap();
        inner.closed = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }
}

/// Frames pulled off the tap fd, awaiting the dispatcher thread.
///
/// Overflow drops the newest frame and increments
/// [`RxRing::dropped_count`], a congested dispatcher must never stall
/// the RX reader thread, which has nowhere to apply backpressure to
/// (the kernel would just buffer frames for us, defeating the ring).
pub struct RxRing {
    ring: Ring,
    dropped: std::sync::atomic::AtomicU64,
}

impl RxRing {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            ring: Ring::new(capacity),
            dropped: std::sync::atomic::AtomicU64::new(0),
        }
    }

    /// Called by the RX reader thread after a frame is pulled off the
    /// tap fd and stamped with a tracker.
    pub fn push(&self, frame: Frame) {
        if !self.ring.push_or_drop(frame) {
            self.dropped
                .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            warn!("rx ring full, dropping newest frame");
        }
    }

    /// Called by the dispatcher thread; blocks until a frame is available.
    pub fn pop_blocking(&self) -> Option<Frame> {
        self.ring.pop_blocking()
    }

    pub fn pop_timeout(&self, timeout: Duration) -> Option<Frame> {
        self.ring.pop_timeout(timeout)
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(std::sync::atomic::Ordering::Relaxed)
    }

    pub fn close(&self) {
        self.ring.close();
    }
}

impl Default for RxRing {
    fn default() -> Self {
        Self::new()
    }
}

/// Frames assembled by the handler, awaiting the TX writer thread.
///
/// Unlike [`RxRing`], a full `TxRing` blocks its producer: the socket
/// (or ARP flush) submitting the frame can afford to wait a moment, and
/// silently discarding outbound application data is worse than a brief
/// stall.
pub struct TxRing {
    ring: Ring,
}

impl TxRing {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            ring: Ring::new(capacity),
        }
    }

    /// Called by any thread assembling an outbound frame. Blocks while
    /// the ring is full.
    pub fn push(&self, frame: Frame) {
        self.ring.push_blocking(frame);
    }

    /// Called by the TX writer thread; blocks until a frame is queued.
    pub fn pop_blocking(&self) -> Option<Frame> {
        self.ring.pop_blocking()
    }

    pub fn pop_timeout(&self, timeout: Duration) -> Option<Frame> {
        self.ring.pop_timeout(timeout)
    }

    pub fn close(&self) {
        self.ring.close();
    }
}

impl Default for TxRing {
    fn default() -> Self {
        Self::new()
    }
}
