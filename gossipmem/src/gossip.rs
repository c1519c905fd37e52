use rand::seq::SliceRandom;
use rand::Rng;
use tracing::{debug, warn};

use crate::address::NodeAddr;
use crate::codec::MAX_ENTRIES_PER_MESSAGE;
use crate::error::Result;
use crate::message::{Message, WireEntry};
use crate::node::MemberEntry;

/// What a single gossip round did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DisperseReport {
    pub sent: Vec<NodeAddr>,
    pub failed: Vec<NodeAddr>,
}

impl DisperseReport {
    pub fn targets(&self) -> usize {
        self.sent.len() + self.failed.len()
    }
}

/// Picks the entries that fit in one datagram: the `local` entry first, then
/// every other member, or a uniform sample of them when the table is larger
/// than [`MAX_ENTRIES_PER_MESSAGE`].
pub(crate) fn bounded_entries<R>(rng: &mut R, local: NodeAddr, members: &[MemberEntry]) -> Vec<WireEntry>
where
    R: Rng + ?Sized,
{
    let (own, others): (Vec<&MemberEntry>, Vec<&MemberEntry>) =
        members.iter().partition(|entry| entry.addr == local);
    let room = MAX_ENTRIES_PER_MESSAGE.saturating_sub(own.len());

    let mut entries: Vec<WireEntry> = own.into_iter().map(MemberEntry::to_wire).collect();
    if others.len() <= room {
        entries.extend(others.into_iter().map(MemberEntry::to_wire));
    } else {
        debug!("Sampling {} of {} members to fit one datagram", room, others.len());
        entries.extend(others.choose_multiple(rng, room).map(|entry| entry.to_wire()));
    }
    entries
}

/// Sends the snapshot as a HEARTBEAT to up to `fanout` distinct members
/// picked uniformly at random, never to `local`. Large snapshots are cut
/// down by [`bounded_entries`].
///
/// The message is encoded once; an encoding error aborts the round before
/// anything is sent. Individual send failures are logged and reported, the
/// remaining targets are still tried.
pub fn disperse<R, F>(
    rng: &mut R,
    local: NodeAddr,
    snapshot: &[MemberEntry],
    fanout: usize,
    mut send: F,
) -> Result<DisperseReport>
where
    R: Rng + ?Sized,
    F: FnMut(NodeAddr, &[u8]) -> Result<()>,
{
    let eligible: Vec<NodeAddr> = snapshot
        .iter()
        .map(|entry| entry.addr)
        .filter(|addr| *addr != local)
        .collect();

    let mut report = DisperseReport::default();
    if eligible.is_empty() {
        debug!("No known nodes to gossip to");
        return Ok(report);
    }

    let entries = bounded_entries(rng, local, snapshot);
    let carried = entries.len();
    let buffer = Message::heartbeat(local, entries).to_bytes()?;

    for target in eligible.choose_multiple(rng, fanout).copied() {
        match send(target, &buffer) {
            Ok(()) => report.sent.push(target),
            Err(e) => {
                warn!("Failed to gossip to {}: {}", target, e);
                report.failed.push(target);
            }
        }
    }

    debug!(
        "Gossiped {} entries to {} of {} nodes",
        carried,
        report.sent.len(),
        eligible.len()
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MembershipError;
    use crate::message::MessagePayload;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::BTreeSet;

    fn snapshot(n: u32) -> Vec<MemberEntry> {
        (1..=n).map(|id| MemberEntry::new(NodeAddr::new(id, 0), u64::from(id), 0)).collect()
    }

    #[test]
    fn test_fanout_bound_and_never_self() {
        let local = NodeAddr::new(1, 0);
        let mut rng = StdRng::seed_from_u64(7);

        for round in 0..50 {
            let mut targets = Vec::new();
            let report = disperse(&mut rng, local, &snapshot(20), 6, |target, _| {
                targets.push(target);
                Ok(())
            })
            .unwrap();

            let distinct: BTreeSet<_> = targets.iter().copied().collect();
            assert_eq!(targets.len(), 6, "round {}", round);
            assert_eq!(distinct.len(), 6, "targets must be distinct");
            assert!(!distinct.contains(&local));
            assert_eq!(report.sent, targets);
        }
    }

    #[test]
    fn test_small_cluster_sends_to_everyone_else() {
        let local = NodeAddr::new(2, 0);
        let mut rng = StdRng::seed_from_u64(1);
        let mut targets = BTreeSet::new();

        disperse(&mut rng, local, &snapshot(4), 6, |target, _| {
            targets.insert(target);
            Ok(())
        })
        .unwrap();

        let expected: BTreeSet<_> = [1, 3, 4].into_iter().map(|id| NodeAddr::new(id, 0)).collect();
        assert_eq!(targets, expected);
    }

    #[test]
    fn test_alone_sends_nothing() {
        let local = NodeAddr::new(1, 0);
        let mut rng = StdRng::seed_from_u64(1);
        let report = disperse(&mut rng, local, &snapshot(1), 6, |_, _| {
            panic!("nothing to send to")
        })
        .unwrap();
        assert_eq!(report.targets(), 0);
    }

    #[test]
    fn test_payload_carries_whole_snapshot() {
        let local = NodeAddr::new(1, 0);
        let members = snapshot(3);
        let mut rng = StdRng::seed_from_u64(3);

        disperse(&mut rng, local, &members, 1, |_, bytes| {
            let message = Message::from_vec(bytes).unwrap();
            assert_eq!(message.sender, local);
            match message.payload {
                MessagePayload::Heartbeat(list) => {
                    assert_eq!(list.entries.len(), 3);
                    assert_eq!(list.entries[2].heartbeat, 3);
                }
                other => panic!("expected HEARTBEAT, got {:?}", other),
            }
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_oversized_snapshot_is_sampled_with_self_first() {
        let local = NodeAddr::new(7, 0);
        let members = snapshot(MAX_ENTRIES_PER_MESSAGE as u32 + 500);
        let mut rng = StdRng::seed_from_u64(5);

        let mut payloads = Vec::new();
        let report = disperse(&mut rng, local, &members, 3, |_, bytes| {
            payloads.push(Message::from_vec(bytes).unwrap());
            Ok(())
        })
        .unwrap();

        assert_eq!(report.sent.len(), 3);
        for message in payloads {
            match message.payload {
                MessagePayload::Heartbeat(list) => {
                    assert_eq!(list.entries.len(), MAX_ENTRIES_PER_MESSAGE);
                    assert_eq!(list.entries[0].addr, local);
                    assert_eq!(list.entries[0].heartbeat, 7);
                    let distinct: BTreeSet<_> = list.entries.iter().map(|entry| entry.addr).collect();
                    assert_eq!(distinct.len(), list.entries.len());
                }
                other => panic!("expected HEARTBEAT, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_bounded_entries_keeps_small_tables_whole() {
        let local = NodeAddr::new(3, 0);
        let mut rng = StdRng::seed_from_u64(2);

        let entries = bounded_entries(&mut rng, local, &snapshot(5));
        let order: Vec<u32> = entries.iter().map(|entry| entry.addr.id).collect();
        assert_eq!(order, vec![3, 1, 2, 4, 5]);

        // exactly at the limit nothing is dropped
        let full = snapshot(MAX_ENTRIES_PER_MESSAGE as u32);
        assert_eq!(bounded_entries(&mut rng, local, &full).len(), MAX_ENTRIES_PER_MESSAGE);
    }

    #[test]
    fn test_send_failure_does_not_stop_the_round() {
        let local = NodeAddr::new(1, 0);
        let mut rng = StdRng::seed_from_u64(11);
        let broken = NodeAddr::new(3, 0);

        let report = disperse(&mut rng, local, &snapshot(5), 6, |target, _| {
            if target == broken {
                Err(MembershipError::send_failure(target, "unreachable"))
            } else {
                Ok(())
            }
        })
        .unwrap();

        assert_eq!(report.failed, vec![broken]);
        assert_eq!(report.sent.len(), 3);
    }
}
