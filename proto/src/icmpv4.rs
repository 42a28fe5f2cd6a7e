//! ICMPv4 (RFC 792): Echo Request/Reply and Destination Unreachable.
//!
//! The reserved field of a Destination Unreachable message is 4 bytes
//! at offset 4..8. A prior implementation this one was built from
//! unpacked it as a 4-byte big-endian integer out of a 2-byte slice,
//! an out-of-bounds read on any sane runtime. Read the full 4 bytes.

use tapstack_core::checksum::internet_checksum;

use crate::error::ParseError;

pub const HEADER_LEN: usize = 4;

/// Inbound unreachable data is quoted from the offending datagram;
/// bound the reply so one oversized or adversarial packet can't inflate
/// our own frame without limit.
pub const MAX_UNREACHABLE_DATA: usize = 520;

pub const CODE_PORT_UNREACHABLE: u8 = 3;

#[derive(Clone, Debug)]
pub enum Icmpv4Message<'a> {
    EchoRequest {
        id: u16,
        seq: u16,
        data: &'a [u8],
    },
    EchoReply {
        id: u16,
        seq: u16,
        data: &'a [u8],
    },
    DestUnreachable {
        code: u8,
        data: &'a [u8],
    },
    Unknown {
        message_type: u8,
        code: u8,
        data: &'a [u8],
    },
}

pub fn parse(buf: &[u8]) -> Result<Icmpv4Message<'_>, ParseError> {
    if buf.len() < HEADER_LEN {
        return Err(ParseError::TooShort {
            need: HEADER_LEN,
            got: buf.len(),
        });
    }
    if !tapstack_core::checksum::validate_checksum(buf) {
        return Err(ParseError::BadChecksum);
    }

    let message_type = buf[0];
    let code = buf[1];
    let rest = &buf[HEADER_LEN..];

    match message_type {
        8 | 0 if rest.len() >= 4 => {
            let id = u16::from_be_bytes([rest[0], rest[1]]);
            let seq = u16::from_be_bytes([rest[2], rest[3]]);
            let data = &rest[4..];
            if message_type == 8 {
                Ok(Icmpv4Message::EchoRequest { id, seq, data })
            } else {
                Ok(Icmpv4Message::EchoReply { id, seq, data })
            }
        }
        3 if rest.len() >= 4 => Ok(Icmpv4Message::DestUnreachable {
            code,
            data: &rest[4..],
        }),
        _ => Ok(Icmpv4Message::Unknown {
            message_type,
            code,
            data: rest,
        }),
    }
}

/// Serialize an echo message (request or reply), computing the checksum
/// over the full message with the checksum field zeroed.
pub fn serialize_echo(is_reply: bool, id: u16, seq: u16, data: &[u8]) -> Vec<u8> {
    let mut out = vec![0u8; HEADER_LEN + 4 + data.len()];
    out[0] = if is_reply { 0 } else { 8 };
    out[1] = 0;
    out[4..6].copy_from_slice(&id.to_be_bytes());
    out[6..8].copy_from_slice(&seq.to_be_bytes());
    out[8..].copy_from_slice(data);
    let cksum = internet_checksum(&out);
    out[2..4].copy_from_slice(&cksum.to_be_bytes());
    out
}

/// Serialize a Destination Unreachable message. `offending` is the
/// quoted datagram (IPv4 header + first 8 bytes of the transport
/// header, per RFC 792); it is truncated to [`MAX_UNREACHABLE_DATA`].
pub fn serialize_dest_unreachable(code: u8, offending: &[u8]) -> Vec<u8> {
    let data = &offending[..offending.len().min(MAX_UNREACHABLE_DATA)];
    let mut out = vec![0u8; HEADER_LEN + 4 + data.len()];
    out[0] = 3;
    out[1] = code;
    out[4..8].fill(0); // reserved
    out[8..].copy_from_slice(data);
    let cksum = internet_checksum(&out);
    out[2..4].copy_from_slice(&cksum.to_be_bytes());
    out
}
