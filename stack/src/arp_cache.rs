//! ARP (RFC 826) resolution state machine.
//!
//! Each entry's state mirrors what a `resolve()` caller needs to know:
//! `Pending` (request outstanding, frames queued), `Resolved` (MAC
//! known and fresh), `Stale` (MAC known but idle past the refresh
//! window, still usable, but the next `resolve` reprobes it). There is
//! no `Absent` variant; an address with no entry simply isn't in the
//! map.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use log::debug;

use tapstack_abi::types::{EtherType, MacAddr};
use tapstack_abi::types::Ipv4Addr;
use tapstack_core::tracker::Tracker;

const MAX_PENDING: usize = 8;
const MAX_RETRIES: u8 = 3;
const RETRY_INTERVAL: Duration = Duration::from_secs(1);
const STALE_AFTER: Duration = Duration::from_secs(60);
const EVICT_AFTER: Duration = Duration::from_secs(5 * 60);

/// An outbound frame parked awaiting ARP resolution: everything except
/// the destination MAC, which the cache fills in once known.
pub struct PendingFrame {
    pub src_mac: MacAddr,
    pub ethertype: EtherType,
    pub l3_payload: Vec<u8>,
    pub tracker: Tracker,
}

enum EntryState {
    Pending {
        queued: Vec<PendingFrame>,
        retries: u8,
        last_request: Instant,
    },
    Resolved {
        mac: MacAddr,
        last_refresh: Instant,
    },
    Stale {
        mac: MacAddr,
        last_refresh: Instant,
        last_probe: Instant,
    },
}

struct Entry {
    state: EntryState,
}

/// Work the caller must perform outside the cache's lock: sending an
/// ARP request/reply, or flushing resolved frames to the TX path.
pub enum ArpAction {
    None,
    SendRequest {
        target_ip: Ipv4Addr,
    },
    SendReply {
        target_ip: Ipv4Addr,
        target_mac: MacAddr,
    },
    FlushPending {
        mac: MacAddr,
        frames: Vec<PendingFrame>,
    },
    /// Resolution failed after the retry budget; tell the originators.
    HostUnreachable {
        frames: Vec<PendingFrame>,
    },
    /// Refresh a `Stale` entry: unicast, the MAC is already known and
    /// presumably still correct, a broadcast would be redundant.
    SendUnicastRequest {
        target_ip: Ipv4Addr,
        target_mac: MacAddr,
    },
}

pub struct ArpCache {
    entries: Mutex<HashMap<Ipv4Addr, Entry>>,
}

impl ArpCache {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Look up `target_ip`. Returns the MAC immediately if known
    /// (`Resolved` or `Stale`, both are usable), otherwise creates or
    /// refreshes a `Pending` entry, queues `frame`, and asks the caller
    /// to send an ARP request.
    pub fn resolve(&self, target_ip: Ipv4Addr, frame: PendingFrame) -> (Option<MacAddr>, ArpAction) {
        let mut entries = self.entries.lock().unwrap();
        match entries.get(&target_ip) {
            Some(Entry {
                state: EntryState::Resolved { mac, .. },
            }) => (Some(*mac), ArpAction::None),
            Some(Entry {
                state: EntryState::Stale { mac, .. },
            }) => {
                let mac = *mac;
                if let Some(Entry {
                    state: EntryState::Stale { last_probe, .. },
                }) = entries.get_mut(&target_ip)
                {
                    *last_probe = Instant::now();
                }
                (
                    Some(mac),
                    ArpAction::SendUnicastRequest {
                        target_ip,
                        target_mac: mac,
                    },
                )
            }
            Some(Entry {
                state: EntryState::Pending { .. },
            }) => {
                if let Some(Entry {
                    state: EntryState::Pending { queued, .. },
                }) = entries.get_mut(&target_ip)
                {
                    if queued.len() >= MAX_PENDING {
                        debug!("arp: pending queue full for {target_ip}, dropping oldest frame");
                        queued.remove(0);
                    }
                    queued.push(frame);
                }
                (None, ArpAction::None)
            }
            None => {
                entries.insert(
                    target_ip,
                    Entry {
                        state: EntryState::Pending {
                            queued: vec![frame],
                            retries: 0,
                            last_request: Instant::now(),
                        },
                    },
                );
                (None, ArpAction::SendRequest { target_ip })
            }
        }
    }

    /// Process an observed ARP packet (request or reply), per RFC 826:
    /// any packet carrying a mapping opportunistically updates the
    /// cache, independent of whether it was addressed to us.
    pub fn observe(&self, sender_ip: Ipv4Addr, sender_mac: MacAddr) -> ArpAction {
        let mut entries = self.entries.lock().unwrap();
        let now = Instant::now();
        match entries.remove(&sender_ip) {
            Some(Entry {
                state: EntryState::Pending { queued, .. },
            }) => {
                entries.insert(
                    sender_ip,
                    Entry {
                        state: EntryState::Resolved {
                            mac: sender_mac,
                            last_refresh: now,
                        },
                    },
                );
                ArpAction::FlushPending {
                    mac: sender_mac,
                    frames: queued,
                }
            }
            Some(_) => {
                entries.insert(
                    sender_ip,
                    Entry {
                        state: EntryState::Resolved {
                            mac: sender_mac,
                            last_refresh: now,
                        },
                    },
                );
                ArpAction::None
            }
            None => ArpAction::None,
        }
    }

    /// Handle an inbound ARP request: reply if `target_ip` is ours.
    pub fn handle_request(&self, sender_mac: MacAddr, target_ip: Ipv4Addr) -> ArpAction {
        ArpAction::SendReply {
            target_ip,
            target_mac: sender_mac,
        }
    }

    /// Drive timer-based transitions: retry or fail `Pending` entries
    /// past their retry interval, age `Resolved` entries into `Stale`,
    /// and evict anything idle past the eviction window. Called by the
    /// periodic timer thread.
    pub fn tick(&self) -> Vec<ArpAction> {
        let mut entries = self.entries.lock().unwrap();
        let now = Instant::now();
        let mut actions = Vec::new();
        let mut evict = Vec::new();

        for (ip, entry) in entries.iter_mut() {
            match &mut entry.state {
                EntryState::Pending {
                    queued,
                    retries,
                    last_request,
                } => {
                    if now.duration_since(*last_request) < RETRY_INTERVAL {
                        continue;
                    }
                    if *retries >= MAX_RETRIES {
                        actions.push(ArpAction::HostUnreachable {
                            frames: std::mem::take(queued),
                        });
                        evict.push(*ip);
                    } else {
                        *retries += 1;
                        *last_request = now;
                        actions.push(ArpAction::SendRequest { target_ip: *ip });
                    }
                }
                EntryState::Resolved { mac, last_refresh } => {
                    let mac = *mac;
                    let last_refresh = *last_refresh;
                    if now.duration_since(last_refresh) >= EVICT_AFTER {
                        evict.push(*ip);
                    } else if now.duration_since(last_refresh) >= STALE_AFTER {
                        entry.state = EntryState::Stale {
                            mac,
                            last_refresh,
                            last_probe: now,
                        };
                        actions.push(ArpAction::SendUnicastRequest {
                            target_ip: *ip,
                            target_mac: mac,
                        });
                    }
                }
                EntryState::Stale {
                    mac,
                    last_refresh,
                    last_probe,
                } => {
                    if now.duration_since(*last_refresh) >= EVICT_AFTER {
                        evict.push(*ip);
                    } else if now.duration_since(*last_probe) >= RETRY_INTERVAL {
                        *last_probe = now;
                        actions.push(ArpAction::SendUnicastRequest {
                            target_ip: *ip,
                            target_mac: *mac,
                        });
                    }
                }
            }
        }

        for ip in evict {
            entries.remove(&ip);
        }

        actions
    }
}

impl Default for ArpCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame() -> PendingFrame {
        frame_tagged(0)
    }

    fn frame_tagged(tag: u8) -> PendingFrame {
        PendingFrame {
            src_mac: MacAddr::ZERO,
            ethertype: EtherType::Ipv4,
            l3_payload: vec![tag],
            tracker: Tracker::tx(None),
        }
    }

    #[test]
    fn first_resolve_issues_request_and_parks_frame() {
        let cache = ArpCache::new();
        let ip = Ipv4Addr([192, 168, 9, 1]);
        let (mac, action) = cache.resolve(ip, frame());
        assert!(mac.is_none());
        assert!(matches!(action, ArpAction::SendRequest { .. }));
    }

    #[test]
    fn reply_flushes_pending_queue() {
        let cache = ArpCache::new();
        let ip = Ipv4Addr([192, 168, 9, 1]);
        cache.resolve(ip, frame());
        let action = cache.observe(ip, MacAddr([1, 2, 3, 4, 5, 6]));
        match action {
            ArpAction::FlushPending { mac, frames } => {
                assert_eq!(mac, MacAddr([1, 2, 3, 4, 5, 6]));
                assert_eq!(frames.len(), 1);
            }
            _ => panic!("expected flush"),
        }
    }

    #[test]
    fn resolved_entry_answers_immediately() {
        let cache = ArpCache::new();
        let ip = Ipv4Addr([192, 168, 9, 1]);
        cache.resolve(ip, frame());
        cache.observe(ip, MacAddr([9; 6]));
        let (mac, action) = cache.resolve(ip, frame());
        assert_eq!(mac, Some(MacAddr([9; 6])));
        assert!(matches!(action, ArpAction::None));
    }

    #[test]
    fn pending_queue_bound_drops_oldest_frames() {
        let cache = ArpCache::new();
        let ip = Ipv4Addr([192, 168, 9, 1]);
        for tag in 0..(MAX_PENDING as u8 + 2) {
            cache.resolve(ip, frame_tagged(tag));
        }
        let action = cache.observe(ip, MacAddr([1; 6]));
        match action {
            ArpAction::FlushPending { frames, .. } => {
                assert_eq!(frames.len(), MAX_PENDING);
                let tags: Vec<u8> = frames.iter().map(|f| f.l3_payload[0]).collect();
                assert_eq!(tags, (2..(MAX_PENDING as u8 + 2)).collect::<Vec<u8>>());
            }
            _ => panic!("expected flush"),
        }
    }
}
