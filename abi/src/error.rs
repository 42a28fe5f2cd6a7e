//! Crate-wide error taxonomy.
//!
//! Generalized from the teacher's `NetError` (a kernel syscall-boundary
//! error type that mapped each variant to an errno). This stack has no
//! syscall boundary, so `StackError` derives `std::error::Error` via
//! `thiserror` instead of carrying an `to_errno()` conversion.

use thiserror::Error;

/// Errors surfaced across the stack's public API.
///
/// Parse/checksum failures never reach this type, they are logged and
/// dropped at the point of discovery (see `tapstack_proto::ParseError`).
/// `StackError` is for conditions a caller (a socket, `bind`, the tap
/// device loop) needs to react to.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum StackError {
    /// `bind()` collided with an existing, non-reusable binding.
    #[error("address already in use")]
    AddressInUse,
    /// `bind(0)` could not find a free port in the ephemeral range.
    #[error("no ephemeral ports available")]
    PortExhausted,
    /// `receive()` timed out before a datagram arrived.
    #[error("operation timed out")]
    Timeout,
    /// The socket was closed while a caller was blocked in `receive()`.
    #[error("socket closed")]
    Closed,
    /// ARP resolution failed after the retry budget was exhausted.
    #[error("host unreachable")]
    HostUnreachable,
    /// No route to the destination network.
    #[error("network unreachable")]
    NetworkUnreachable,
    /// The destination port had no listener (surfaced via ICMP).
    #[error("port unreachable")]
    PortUnreachable,
    /// A fatal I/O error on the tap device; the process should shut down.
    #[error("device error: {0}")]
    Device(String),
    /// Argument failed basic validation (e.g. a too-large UDP payload).
    #[error("invalid argument")]
    InvalidArgument,
    /// No space left in a bounded internal queue.
    #[error("no buffer space available")]
    NoBufferSpace,
    /// The operation is recognized but not implemented by this stack.
    #[error("not supported")]
    NotSupported,
}
