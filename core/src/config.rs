//! Process configuration, loaded once at startup from the environment.
//!
//! Mirrors `stack.py`'s module-level `STACK_INTERFACE` / `STACK_MAC_ADDRESS`
//! / `STACK_IP_ADDRESS` constants, but as environment variables rather than
//! constants baked into the binary, since this is now a deployable program
//! rather than a single hardcoded lab script.

use std::env;

use tapstack_abi::error::StackError;
use tapstack_abi::types::{Ipv4Addr, MacAddr};

const DEFAULT_IFACE: &str = "tap7";
const DEFAULT_MAC: &str = "02:00:00:77:77:77";
const DEFAULT_RING_CAPACITY: usize = 128;

/// One statically configured address on the stack: an IPv4 address plus
/// its subnet mask.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AddressEntry {
    pub address: Ipv4Addr,
    pub netmask: Ipv4Addr,
}

/// Everything the stack needs to bring itself up, resolved once at
/// process start.
#[derive(Clone, Debug)]
pub struct StackConfig {
    pub interface: String,
    pub mac_address: MacAddr,
    pub addresses: Vec<AddressEntry>,
    pub rx_ring_capacity: usize,
    pub tx_ring_capacity: usize,
}

impl StackConfig {
    /// Build configuration from environment variables, falling back to
    /// the documented defaults (`TAPSTACK_IFACE=tap7`,
    /// `TAPSTACK_MAC=02:00:00:77:77:77`) when unset.
    ///
    /// `TAPSTACK_ADDRESSES` is a comma-separated list of `addr/mask`
    /// pairs, e.g. `192.168.9.7/255.255.255.0,172.16.128.65/255.255.255.240`.
    /// Left unset, the stack starts address-less (ARP and ICMP still run;
    /// only DHCP or a later bind populates an address).
    pub fn from_env() -> Result<Self, StackError> {
        let interface = env::var("TAPSTACK_IFACE").unwrap_or_else(|_| DEFAULT_IFACE.to_string());

        let mac_str = env::var("TAPSTACK_MAC").unwrap_or_else(|_| DEFAULT_MAC.to_string());
        let mac_address = MacAddr::parse(&mac_str).ok_or_else(|| {
            StackError::InvalidArgument
        })?;

        let addresses = match env::var("TAPSTACK_ADDRESSES") {
            Ok(raw) if !raw.trim().is_empty() => parse_addresses(&raw)?,
            _ => Vec::new(),
        };

        let rx_ring_capacity = env_usize("TAPSTACK_RX_RING_CAPACITY", DEFAULT_RING_CAPACITY)?;
        let tx_ring_capacity = env_usize("TAPSTACK_TX_RING_CAPACITY", DEFAULT_RING_CAPACITY)?;

        Ok(Self {
            interface,
            mac_address,
            addresses,
            rx_ring_capacity,
            tx_ring_capacity,
        })
    }
}

fn env_usize(name: &str, default: usize) -> Result<usize, StackError> {
    match env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| StackError::InvalidArgument),
        Err(_) => Ok(default),
    }
}

fn parse_addresses(raw: &str) -> Result<Vec<AddressEntry>, StackError> {
    raw.split(',')
        .map(|entry| {
            let (addr, mask) = entry
                .split_once('/')
                .ok_or(StackError::InvalidArgument)?;
            let address: std::net::Ipv4Addr = addr
                .trim()
                .parse()
                .map_err(|_| StackError::InvalidArgument)?;
            let netmask: std::net::Ipv4Addr = mask
                .trim()
                .parse()
                .map_err(|_| StackError::InvalidArgument)?;
            Ok(AddressEntry {
                address: address.into(),
                netmask: netmask.into(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_address() {
        let entries = parse_addresses("192.168.9.7/255.255.255.0").unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(
            entries[0].address,
            std::net::Ipv4Addr::new(192, 168, 9, 7).into()
        );
    }

    #[test]
    fn parses_multiple_addresses() {
        let entries =
            parse_addresses("192.168.9.7/255.255.255.0,172.16.128.65/255.255.255.240").unwrap();
        assert_eq!(entries.len(), 2);
    }

    #[test]
    fn rejects_malformed_entry() {
        assert!(parse_addresses("not-an-address").is_err());
    }
}
