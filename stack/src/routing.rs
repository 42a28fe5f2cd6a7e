//! Single-interface routing state: the stack's own addresses and an
//! optional default gateway.
//!
//! A full prefix-bucketed route table is overkill for one interface;
//! this keeps the two things the stack actually needs to answer,
//! "is this address mine" and "what's the next hop for that
//! destination", as a flat `Vec` scanned linearly, protected by one
//! mutex per the read-mostly/DHCP-writes model.

use std::sync::RwLock;

use tapstack_abi::types::Ipv4Addr;
use tapstack_core::config::AddressEntry;

struct State {
    addresses: Vec<AddressEntry>,
    gateway: Option<Ipv4Addr>,
}

/// The stack's configured addresses and default gateway. Reads (every
/// inbound/outbound packet) take a shared lock; writes (DHCP lease
/// application) take an exclusive one.
pub struct RoutingState {
    state: RwLock<State>,
}

/// Where a packet addressed to `dst` should go next.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NextHop {
    /// `dst` is on a locally configured subnet, ARP for it directly.
    Direct(Ipv4Addr),
    /// `dst` is off-subnet, ARP for the gateway instead.
    Gateway(Ipv4Addr),
}

impl RoutingState {
    pub fn new(addresses: Vec<AddressEntry>) -> Self {
        Self {
            state: RwLock::new(State {
                addresses,
                gateway: None,
            }),
        }
    }

    /// `true` if `ip` is one of our own configured addresses.
    pub fn owns(&self, ip: Ipv4Addr) -> bool {
        self.state
            .read()
            .unwrap()
            .addresses
            .iter()
            .any(|entry| entry.address == ip)
    }

    /// Any configured address, used as the source address for traffic
    /// that doesn't already have one pinned (DHCP discover, gratuitous
    /// ARP).
    pub fn primary_address(&self) -> Option<Ipv4Addr> {
        self.state.read().unwrap().addresses.first().map(|e| e.address)
    }

    pub fn addresses(&self) -> Vec<AddressEntry> {
        self.state.read().unwrap().addresses.clone()
    }

    /// Determine the next hop for `dst`: direct if it shares a subnet
    /// with one of our addresses, otherwise via the gateway if one is
    /// configured. `None` means network-unreachable.
    pub fn next_hop(&self, dst: Ipv4Addr) -> Option<NextHop> {
        let state = self.state.read().unwrap();
        for entry in &state.addresses {
            if Ipv4Addr::in_subnet(dst, entry.address, entry.netmask) {
                return Some(NextHop::Direct(dst));
            }
        }
        state.gateway.map(NextHop::Gateway)
    }

    /// Apply a DHCP lease: add the leased `(ip, mask)` and set the
    /// gateway.
    pub fn apply_lease(&self, address: Ipv4Addr, netmask: Ipv4Addr, gateway: Ipv4Addr) {
        let mut state = self.state.write().unwrap();
        state.addresses.retain(|e| e.address != address);
        state.addresses.push(AddressEntry { address, netmask });
        state.gateway = Some(gateway);
    }
}
