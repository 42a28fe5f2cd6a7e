//! Ethernet II framing: `{dst_mac[6], src_mac[6], ethertype[2]}`.

use tapstack_abi::types::{EtherType, MacAddr};

use crate::error::ParseError;

pub const HEADER_LEN: usize = 14;

#[derive(Clone, Copy, Debug)]
pub struct EthernetHeader {
    pub dst_mac: MacAddr,
    pub src_mac: MacAddr,
    pub ethertype: EtherType,
}

/// Parsed view of a frame: the header plus everything after it.
#[derive(Clone, Copy, Debug)]
pub struct EthernetFrame<'a> {
    pub header: EthernetHeader,
    pub payload: &'a [u8],
}

/// Parse an Ethernet II frame. Unrecognized ethertypes (anything but
/// ARP/IPv4) are a parse error, the caller logs and drops.
pub fn parse(buf: &[u8]) -> Result<EthernetFrame<'_>, ParseError> {
    if buf.len() < HEADER_LEN {
        return Err(ParseError::TooShort {
            need: HEADER_LEN,
            got: buf.len(),
        });
    }
    let dst_mac = MacAddr([buf[0], buf[1], buf[2], buf[3], buf[4], buf[5]]);
    let src_mac = MacAddr([buf[6], buf[7], buf[8], buf[9], buf[10], buf[11]]);
    let ethertype_raw = u16::from_be_bytes([buf[12], buf[13]]);
    let ethertype = EtherType::from_u16(ethertype_raw)
        .ok_or(ParseError::UnsupportedEtherType(ethertype_raw))?;

    Ok(EthernetFrame {
        header: EthernetHeader {
            dst_mac,
            src_mac,
            ethertype,
        },
        payload: &buf[HEADER_LEN..],
    })
}

/// Serialize a header followed by `payload` into a single frame buffer.
pub fn serialize(header: &EthernetHeader, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    out.extend_from_slice(header.dst_mac.as_bytes());
    out.extend_from_slice(header.src_mac.as_bytes());
    out.extend_from_slice(&header.ethertype.as_u16().to_be_bytes());
    out.extend_from_slice(payload);
    out
}
