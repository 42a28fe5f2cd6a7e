//! ARP (RFC 826), Ethernet/IPv4 only: fixed 28-byte body.

use tapstack_abi::types::{Ipv4Addr, MacAddr};

use crate::error::ParseError;

pub const HEADER_LEN: usize = 28;

const HTYPE_ETHERNET: u16 = 1;
const PTYPE_IPV4: u16 = 0x0800;
const HLEN_ETHERNET: u8 = 6;
const PLEN_IPV4: u8 = 4;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operation {
    Request,
    Reply,
}

#[derive(Clone, Copy, Debug)]
pub struct ArpPacket {
    pub operation: Operation,
    pub sender_mac: MacAddr,
    pub sender_ip: Ipv4Addr,
    pub target_mac: MacAddr,
    pub target_ip: Ipv4Addr,
}

pub fn parse(buf: &[u8]) -> Result<ArpPacket, ParseError> {
    if buf.len() < HEADER_LEN {
        return Err(ParseError::TooShort {
            need: HEADER_LEN,
            got: buf.len(),
        });
    }
    let htype = u16::from_be_bytes([buf[0], buf[1]]);
    let ptype = u16::from_be_bytes([buf[2], buf[3]]);
    let hlen = buf[4];
    let plen = buf[5];
    if htype != HTYPE_ETHERNET || ptype != PTYPE_IPV4 || hlen != HLEN_ETHERNET || plen != PLEN_IPV4
    {
        return Err(ParseError::UnsupportedArpParams);
    }
    let oper = u16::from_be_bytes([buf[6], buf[7]]);
    let operation = match oper {
        1 => Operation::Request,
        2 => Operation::Reply,
        _ => return Err(ParseError::UnsupportedArpParams),
    };

    Ok(ArpPacket {
        operation,
        sender_mac: MacAddr([buf[8], buf[9], buf[10], buf[11], buf[12], buf[13]]),
        sender_ip: Ipv4Addr([buf[14], buf[15], buf[16], buf[17]]),
        target_mac: MacAddr([buf[18], buf[19], buf[20], buf[21], buf[22], buf[23]]),
        target_ip: Ipv4Addr([buf[24], buf[25], buf[26], buf[27]]),
    })
}

pub fn serialize(pkt: &ArpPacket) -> [u8; HEADER_LEN] {
    let mut out = [0u8; HEADER_LEN];
    out[0..2].copy_from_slice(&HTYPE_ETHERNET.to_be_bytes());
    out[2..4].copy_from_slice(&PTYPE_IPV4.to_be_bytes());
    out[4] = HLEN_ETHERNET;
    out[5] = PLEN_IPV4;
    let oper: u16 = match pkt.operation {
        Operation::Request => 1,
        Operation::Reply => 2,
    };
    out[6..8].copy_from_slice(&oper.to_be_bytes());
    out[8..14].copy_from_slice(pkt.sender_mac.as_bytes());
    out[14..18].copy_from_slice(pkt.sender_ip.as_bytes());
    out[18..24].copy_from_slice(pkt.target_mac.as_bytes());
    out[24..28].copy_from_slice(pkt.target_ip.as_bytes());
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ArpPacket {
        ArpPacket {
            operation: Operation::Request,
            sender_mac: MacAddr([0x02, 0, 0, 0x77, 0x77, 0x77]),
            sender_ip: Ipv4Addr([192, 168, 9, 7]),
            target_mac: MacAddr::ZERO,
            target_ip: Ipv4Addr([192, 168, 9, 1]),
        }
    }

    #[test]
    fn round_trip() {
        let bytes = serialize(&sample());
        let parsed = parse(&bytes).unwrap();
        assert_eq!(parsed.operation, Operation::Request);
        assert_eq!(parsed.sender_ip, Ipv4Addr([192, 168, 9, 7]));
    }

    #[test]
    fn rejects_non_ethernet_htype() {
        let mut bytes = serialize(&sample());
        bytes[0..2].copy_from_slice(&6u16.to_be_bytes());
        assert!(matches!(parse(&bytes), Err(ParseError::UnsupportedArpParams)));
    }

    #[test]
    fn rejects_short_buffer() {
        assert!(matches!(parse(&[0; 4]), Err(ParseError::TooShort { .. })));
    }
}
