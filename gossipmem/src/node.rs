use serde::{Deserialize, Serialize};

use crate::address::NodeAddr;
use crate::message::WireEntry;

/// A row of the membership table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberEntry {
    pub addr: NodeAddr,

    // latest heartbeat observed for this member
    pub heartbeat: u64,

    // local tick at which the heartbeat last advanced; never sent on the wire
    pub last_refresh: u64,
}

impl MemberEntry {
    pub fn new(addr: NodeAddr, heartbeat: u64, now: u64) -> Self {
        Self {
            addr,
            heartbeat,
            last_refresh: now,
        }
    }

    /// Ticks elapsed since the entry was last refreshed.
    pub fn age(&self, now: u64) -> u64 {
        now.saturating_sub(self.last_refresh)
    }

    /// Strictly younger than the suspicion timeout, so gossip may still refresh it.
    pub fn is_trusted(&self, now: u64, fail_timeout: u64) -> bool {
        self.age(now) < fail_timeout
    }

    /// Older than the suspicion timeout, so it is no longer gossiped onward.
    pub fn is_stale(&self, now: u64, fail_timeout: u64) -> bool {
        self.age(now) > fail_timeout
    }

    pub fn is_expired(&self, now: u64, remove_timeout: u64) -> bool {
        self.age(now) > remove_timeout
    }

    pub(crate) fn refresh(&mut self, heartbeat: u64, now: u64) {
        self.heartbeat = heartbeat;
        self.last_refresh = now;
    }

    pub(crate) fn to_wire(&self) -> WireEntry {
        WireEntry {
            addr: self.addr,
            heartbeat: self.heartbeat,
        }
    }
}
