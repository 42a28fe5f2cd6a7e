//! IPv4 (RFC 791): header validation, checksum, and the pseudo-header
//! UDP/TCP checksums are computed over.

use tapstack_abi::types::{IpProtocol, Ipv4Addr};
use tapstack_core::checksum::internet_checksum;

use crate::error::ParseError;

pub const MIN_HEADER_LEN: usize = 20;
const VERSION: u8 = 4;
pub const DEFAULT_TTL: u8 = 64;

#[derive(Clone, Copy, Debug)]
pub struct Ipv4Header {
    pub ihl_words: u8,
    pub total_length: u16,
    pub identification: u16,
    pub dont_fragment: bool,
    pub ttl: u8,
    pub protocol: IpProtocol,
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
}

#[derive(Clone, Copy, Debug)]
pub struct Ipv4Packet<'a> {
    pub header: Ipv4Header,
    pub options: &'a [u8],
    pub payload: &'a [u8],
}

/// `{src, dst, zero, protocol, upper_layer_length}` as required by the
/// UDP/TCP checksum (RFC 793 §3.1, RFC 768).
#[derive(Clone, Copy, Debug)]
pub struct PseudoHeader {
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
    pub protocol: IpProtocol,
    pub upper_layer_length: u16,
}

impl PseudoHeader {
    pub fn to_bytes(self) -> [u8; 12] {
        let mut out = [0u8; 12];
        out[0..4].copy_from_slice(self.src.as_bytes());
        out[4..8].copy_from_slice(self.dst.as_bytes());
        out[8] = 0;
        out[9] = self.protocol.as_u8();
        out[10..12].copy_from_slice(&self.upper_layer_length.to_be_bytes());
        out
    }
}

impl Ipv4Header {
    pub fn pseudo_header(&self, upper_layer_length: u16) -> PseudoHeader {
        PseudoHeader {
            src: self.src,
            dst: self.dst,
            protocol: self.protocol,
            upper_layer_length,
        }
    }
}

/// Parse and validate an IPv4 datagram: version, IHL, total length
/// against the buffer, and header checksum. TTL=0 is rejected, this
/// stack never forwards, so a zero TTL on arrival can only mean
/// corruption or a misbehaving peer.
pub fn parse(buf: &[u8]) -> Result<Ipv4Packet<'_>, ParseError> {
    if buf.len() < MIN_HEADER_LEN {
        return Err(ParseError::TooShort {
            need: MIN_HEADER_LEN,
            got: buf.len(),
        });
    }

    let version = (buf[0] >> 4) & 0x0f;
    if version != VERSION {
        return Err(ParseError::BadVersion(version));
    }

    let ihl_words = buf[0] & 0x0f;
    let ihl = ihl_words as usize * 4;
    if ihl < MIN_HEADER_LEN || buf.len() < ihl {
        return Err(ParseError::BadHeaderLen(ihl));
    }

    let total_length = u16::from_be_bytes([buf[2], buf[3]]);
    if total_length as usize > buf.len() {
        return Err(ParseError::TooShort {
            need: total_length as usize,
            got: buf.len(),
        });
    }

    if internet_checksum(&buf[..ihl]) != 0 {
        return Err(ParseError::BadChecksum);
    }

    let ttl = buf[8];
    if ttl == 0 {
        return Err(ParseError::BadHeaderLen(0));
    }

    let flags_frag = u16::from_be_bytes([buf[6], buf[7]]);
    let dont_fragment = flags_frag & 0x4000 != 0;

    let protocol_raw = buf[9];
    let protocol = IpProtocol::from_u8(protocol_raw).ok_or(ParseError::BadHeaderLen(ihl))?;

    let src = Ipv4Addr([buf[12], buf[13], buf[14], buf[15]]);
    let dst = Ipv4Addr([buf[16], buf[17], buf[18], buf[19]]);

    let header = Ipv4Header {
        ihl_words,
        total_length,
        identification: u16::from_be_bytes([buf[4], buf[5]]),
        dont_fragment,
        ttl,
        protocol,
        src,
        dst,
    };

    Ok(Ipv4Packet {
        header,
        options: &buf[MIN_HEADER_LEN..ihl],
        payload: &buf[ihl..total_length as usize],
    })
}

/// Serialize a 20-byte header (this stack never emits options) followed
/// by `payload`, with the header checksum computed and embedded. The
/// `total_length` field is always derived from `payload`, not taken
/// from `header.total_length`, this is for building a datagram to send,
/// not for reproducing one already on the wire.
pub fn serialize(header: &Ipv4Header, payload: &[u8]) -> Vec<u8> {
    let total_length = MIN_HEADER_LEN + payload.len();
    let mut out = [0u8; MIN_HEADER_LEN].to_vec();
    write_header(&mut out, header, total_length as u16);
    out.extend_from_slice(payload);
    out
}

/// Serialize just the header, with `header.total_length` written
/// verbatim instead of recomputed. Used to quote a received datagram's
/// header (for an ICMP error) faithfully, length included, without
/// needing the original payload on hand.
pub fn serialize_header(header: &Ipv4Header) -> [u8; MIN_HEADER_LEN] {
    let mut out = [0u8; MIN_HEADER_LEN];
    write_header(&mut out, header, header.total_length);
    out
}

fn write_header(out: &mut [u8], header: &Ipv4Header, total_length: u16) {
    out[0] = (VERSION << 4) | 5;
    out[1] = 0;
    out[2..4].copy_from_slice(&total_length.to_be_bytes());
    out[4..6].copy_from_slice(&header.identification.to_be_bytes());
    let flags = if header.dont_fragment { 0x4000u16 } else { 0 };
    out[6..8].copy_from_slice(&flags.to_be_bytes());
    out[8] = header.ttl;
    out[9] = header.protocol.as_u8();
    out[10..12].copy_from_slice(&[0, 0]);
    out[12..16].copy_from_slice(header.src.as_bytes());
    out[16..20].copy_from_slice(header.dst.as_bytes());

    let cksum = internet_checksum(&out[..MIN_HEADER_LEN]);
    out[10..12].copy_from_slice(&cksum.to_be_bytes());
}
