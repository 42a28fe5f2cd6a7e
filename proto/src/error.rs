//! Codec-local parse failures.
//!
//! Distinct from [`tapstack_abi::error::StackError`]: a `ParseError` is
//! never propagated to a caller, the handler logs it at `debug` and
//! drops the frame, per the "malformed input is silently dropped"
//! posture every inbound handler in this stack takes.

use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParseError {
    TooShort { need: usize, got: usize },
    BadVersion(u8),
    BadHeaderLen(usize),
    BadChecksum,
    UnsupportedEtherType(u16),
    UnsupportedArpParams,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooShort { need, got } => {
                write!(f, "buffer too short: need {need}, got {got}")
            }
            Self::BadVersion(v) => write!(f, "unsupported IP version {v}"),
            Self::BadHeaderLen(len) => write!(f, "invalid header length {len}"),
            Self::BadChecksum => write!(f, "checksum mismatch"),
            Self::UnsupportedEtherType(t) => write!(f, "unsupported ethertype 0x{t:04x}"),
            Self::UnsupportedArpParams => write!(f, "unsupported ARP htype/ptype/hlen/plen"),
        }
    }
}

impl std::error::Error for ParseError {}
