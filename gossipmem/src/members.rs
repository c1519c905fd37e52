use std::collections::{BTreeMap, BTreeSet};

use crate::address::NodeAddr;
use crate::message::WireEntry;
use crate::node::MemberEntry;

/// Outcome of merging a single remote entry into the table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MergeAction {
    Added,
    Updated,
    Unchanged,
    // the local copy is suspected, gossip alone may not revive it
    IgnoredSuspect,
    // remote entry describes the local node
    IgnoredSelf,
}

/*
 *
 * ===== Membership =====
 *
 */

/// The membership table of one node.
///
/// Keyed by [`NodeAddr`], so there is never more than one entry per member.
/// The table has a single owner, the protocol engine, and no internal locking.
#[derive(Debug, Clone)]
pub struct Membership {
    local: NodeAddr,
    fail_timeout: u64,
    remove_timeout: u64,
    entries: BTreeMap<NodeAddr, MemberEntry>,
}

impl Membership {
    pub fn new(local: NodeAddr, fail_timeout: u64, remove_timeout: u64) -> Self {
        Self {
            local,
            fail_timeout,
            remove_timeout,
            entries: BTreeMap::new(),
        }
    }

    pub fn local(&self) -> NodeAddr {
        self.local
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, addr: &NodeAddr) -> Option<&MemberEntry> {
        self.entries.get(addr)
    }

    pub fn contains(&self, addr: &NodeAddr) -> bool {
        self.entries.contains_key(addr)
    }

    /// All entries, ordered by address.
    pub fn entries(&self) -> Vec<MemberEntry> {
        self.entries.values().copied().collect()
    }

    pub fn addrs(&self) -> BTreeSet<NodeAddr> {
        self.entries.keys().copied().collect()
    }

    /// Inserts or refreshes the local node's own entry.
    pub fn upsert_self(&mut self, heartbeat: u64, now: u64) {
        let local = self.local;
        self.entries
            .entry(local)
            .and_modify(|entry| entry.refresh(heartbeat, now))
            .or_insert_with(|| MemberEntry::new(local, heartbeat, now));
    }

    /// Merges a remote snapshot and returns the members that were not known
    /// before.
    pub fn merge(&mut self, remote: &[WireEntry], now: u64) -> BTreeSet<NodeAddr> {
        let mut added = BTreeSet::new();
        for entry in remote {
            if self.merge_entry(entry, now) == MergeAction::Added {
                added.insert(entry.addr);
            }
        }
        added
    }

    pub(crate) fn merge_entry(&mut self, remote: &WireEntry, now: u64) -> MergeAction {
        if remote.addr == self.local {
            return MergeAction::IgnoredSelf;
        }

        match self.entries.get_mut(&remote.addr) {
            None => {
                self.entries
                    .insert(remote.addr, MemberEntry::new(remote.addr, remote.heartbeat, now));
                MergeAction::Added
            }
            Some(local) if !local.is_trusted(now, self.fail_timeout) => MergeAction::IgnoredSuspect,
            Some(local) if remote.heartbeat > local.heartbeat => {
                local.refresh(remote.heartbeat, now);
                MergeAction::Updated
            }
            Some(_) => MergeAction::Unchanged,
        }
    }

    /// Records a member that contacted us directly with a JOINREQ.
    ///
    /// Direct contact proves liveness, so a known entry is refreshed even if
    /// suspected. The heartbeat never moves backwards.
    pub(crate) fn admit(&mut self, addr: NodeAddr, heartbeat: u64, now: u64) -> MergeAction {
        if addr == self.local {
            return MergeAction::IgnoredSelf;
        }

        match self.entries.get_mut(&addr) {
            None => {
                self.entries.insert(addr, MemberEntry::new(addr, heartbeat, now));
                MergeAction::Added
            }
            Some(local) => {
                let heartbeat = local.heartbeat.max(heartbeat);
                local.refresh(heartbeat, now);
                MergeAction::Updated
            }
        }
    }

    /// Advances the local heartbeat, refreshes the local entry and evicts
    /// every other entry older than the removal timeout.
    ///
    /// Returns the evicted members.
    pub fn bump_self_heartbeat_and_sweep(&mut self, now: u64) -> BTreeSet<NodeAddr> {
        let heartbeat = self
            .entries
            .get(&self.local)
            .map_or(0, |entry| entry.heartbeat)
            + 1;
        self.upsert_self(heartbeat, now);

        let (local, remove_timeout) = (self.local, self.remove_timeout);
        let expired: BTreeSet<NodeAddr> = self
            .entries
            .values()
            .filter(|entry| entry.addr != local && entry.is_expired(now, remove_timeout))
            .map(|entry| entry.addr)
            .collect();

        self.entries.retain(|addr, _| !expired.contains(addr));
        expired
    }

    /// Entries worth gossiping: the local entry plus every peer that is not
    /// older than the suspicion timeout.
    pub fn snapshot_excluding_stale(&self, now: u64) -> Vec<MemberEntry> {
        self.entries
            .values()
            .filter(|entry| entry.addr == self.local || !entry.is_stale(now, self.fail_timeout))
            .copied()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FAIL: u64 = 5;
    const REMOVE: u64 = 20;

    fn addr(id: u32) -> NodeAddr {
        NodeAddr::new(id, 0)
    }

    fn wire(id: u32, heartbeat: u64) -> WireEntry {
        WireEntry {
            addr: addr(id),
            heartbeat,
        }
    }

    fn table() -> Membership {
        let mut members = Membership::new(addr(1), FAIL, REMOVE);
        members.upsert_self(0, 0);
        members
    }

    #[test]
    fn test_upsert_self_keeps_single_entry() {
        let mut members = table();
        members.upsert_self(3, 4);
        members.upsert_self(4, 5);

        assert_eq!(members.len(), 1);
        let entry = members.get(&addr(1)).unwrap();
        assert_eq!(entry.heartbeat, 4);
        assert_eq!(entry.last_refresh, 5);
    }

    #[test]
    fn test_merge_adds_unknown_and_skips_self() {
        let mut members = table();
        let added = members.merge(&[wire(1, 99), wire(2, 3), wire(3, 0)], 2);

        assert_eq!(added, BTreeSet::from([addr(2), addr(3)]));
        assert_eq!(members.len(), 3);
        // remote view of ourselves never overrides the local entry
        assert_eq!(members.get(&addr(1)).unwrap().heartbeat, 0);
        assert_eq!(members.get(&addr(2)).unwrap().last_refresh, 2);
    }

    #[test]
    fn test_merge_is_monotonic_in_either_order() {
        let mut forward = table();
        forward.merge(&[wire(2, 1)], 1);
        forward.merge(&[wire(2, 2)], 2);

        let mut backward = table();
        backward.merge(&[wire(2, 2)], 1);
        backward.merge(&[wire(2, 1)], 2);

        assert_eq!(forward.get(&addr(2)).unwrap().heartbeat, 2);
        assert_eq!(backward.get(&addr(2)).unwrap().heartbeat, 2);
        // the stale update does not count as a refresh
        assert_eq!(backward.get(&addr(2)).unwrap().last_refresh, 1);
    }

    #[test]
    fn test_merge_equal_heartbeat_is_unchanged() {
        let mut members = table();
        members.merge(&[wire(2, 4)], 0);
        assert_eq!(members.merge_entry(&wire(2, 4), 3), MergeAction::Unchanged);
        assert_eq!(members.get(&addr(2)).unwrap().last_refresh, 0);
    }

    #[test]
    fn test_no_resurrection_from_stale_gossip() {
        let mut members = table();
        members.merge(&[wire(2, 1)], 0);

        // age == FAIL is already past the trust window
        assert_eq!(members.merge_entry(&wire(2, 9), FAIL), MergeAction::IgnoredSuspect);
        assert_eq!(members.merge_entry(&wire(2, 9), FAIL + 3), MergeAction::IgnoredSuspect);
        let entry = members.get(&addr(2)).unwrap();
        assert_eq!(entry.heartbeat, 1);
        assert_eq!(entry.last_refresh, 0);

        // one tick earlier it would have been refreshed
        let mut members = table();
        members.merge(&[wire(2, 1)], 0);
        assert_eq!(members.merge_entry(&wire(2, 9), FAIL - 1), MergeAction::Updated);
    }

    #[test]
    fn test_admit_refreshes_suspected_member_without_regressing() {
        let mut members = table();
        members.merge(&[wire(2, 7)], 0);

        assert_eq!(members.admit(addr(2), 0, FAIL + 1), MergeAction::Updated);
        let entry = members.get(&addr(2)).unwrap();
        assert_eq!(entry.heartbeat, 7);
        assert_eq!(entry.last_refresh, FAIL + 1);

        assert_eq!(members.admit(addr(3), 2, 1), MergeAction::Added);
        assert_eq!(members.admit(addr(1), 2, 1), MergeAction::IgnoredSelf);
    }

    #[test]
    fn test_sweep_bumps_self_and_evicts_expired() {
        let mut members = table();
        members.merge(&[wire(2, 0)], 0);
        members.merge(&[wire(3, 0)], 10);

        let evicted = members.bump_self_heartbeat_and_sweep(REMOVE);
        assert!(evicted.is_empty(), "age == REMOVE is kept");

        let evicted = members.bump_self_heartbeat_and_sweep(REMOVE + 1);
        assert_eq!(evicted, BTreeSet::from([addr(2)]));
        assert!(!members.contains(&addr(2)));
        assert!(members.contains(&addr(3)));

        let local = members.get(&addr(1)).unwrap();
        assert_eq!(local.heartbeat, 2);
        assert_eq!(local.last_refresh, REMOVE + 1);
    }

    #[test]
    fn test_evicted_member_can_be_merged_again() {
        let mut members = table();
        members.merge(&[wire(2, 5)], 0);
        members.bump_self_heartbeat_and_sweep(REMOVE + 1);
        assert!(!members.contains(&addr(2)));

        let added = members.merge(&[wire(2, 30)], REMOVE + 2);
        assert_eq!(added, BTreeSet::from([addr(2)]));
    }

    #[test]
    fn test_snapshot_excludes_stale_peers_but_never_self() {
        let mut members = Membership::new(addr(1), FAIL, REMOVE);
        members.upsert_self(0, 0);
        members.merge(&[wire(2, 0)], 0);
        members.merge(&[wire(3, 0)], 4);

        let now = FAIL + 1;
        let snapshot: Vec<NodeAddr> = members
            .snapshot_excluding_stale(now)
            .iter()
            .map(|entry| entry.addr)
            .collect();
        assert_eq!(snapshot, vec![addr(1), addr(3)]);

        // the boundary itself is still gossiped
        let snapshot = members.snapshot_excluding_stale(FAIL);
        assert_eq!(snapshot.len(), 3);
    }
}
