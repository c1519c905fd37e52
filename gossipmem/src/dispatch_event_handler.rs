use std::collections::BTreeSet;
use std::error::Error;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;

use crate::address::NodeAddr;

/// [`DispatchEventHandler`] trait is used for dispatching membership changes.
///
/// Called synchronously from inside the protocol engine, so implementations
/// should return quickly.
pub trait DispatchEventHandler: Send + Sync {
    /// Notifies the handler that `peer` was added to the table of `local`.
    ///
    /// A node reports itself once, when it starts.
    fn notify_join(&self, local: NodeAddr, peer: NodeAddr, now: u64) -> Result<(), Box<dyn Error + Send + Sync>>;

    /// Notifies the handler that `local` evicted `peer` after the removal
    /// timeout elapsed.
    fn notify_remove(&self, local: NodeAddr, peer: NodeAddr, now: u64) -> Result<(), Box<dyn Error + Send + Sync>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EventKind {
    Join,
    Remove,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MembershipEvent {
    pub tick: u64,
    pub local: NodeAddr,
    pub peer: NodeAddr,
    pub kind: EventKind,
}

/// Records every event in memory. Clones share the same log, so one log can
/// be attached to many nodes.
#[derive(Debug, Clone, Default)]
pub struct MembershipLog {
    events: Arc<Mutex<Vec<MembershipEvent>>>,
}

impl MembershipLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<MembershipEvent> {
        self.events.lock().clone()
    }

    /// Peers that `local` ever added, including itself.
    pub fn joined_by(&self, local: NodeAddr) -> BTreeSet<NodeAddr> {
        self.peers_for(local, EventKind::Join)
    }

    /// Peers that `local` ever evicted.
    pub fn removed_by(&self, local: NodeAddr) -> BTreeSet<NodeAddr> {
        self.peers_for(local, EventKind::Remove)
    }

    fn peers_for(&self, local: NodeAddr, kind: EventKind) -> BTreeSet<NodeAddr> {
        self.events
            .lock()
            .iter()
            .filter(|event| event.local == local && event.kind == kind)
            .map(|event| event.peer)
            .collect()
    }

    fn record(&self, local: NodeAddr, peer: NodeAddr, now: u64, kind: EventKind) {
        self.events.lock().push(MembershipEvent {
            tick: now,
            local,
            peer,
            kind,
        });
    }
}

impl DispatchEventHandler for MembershipLog {
    fn notify_join(&self, local: NodeAddr, peer: NodeAddr, now: u64) -> Result<(), Box<dyn Error + Send + Sync>> {
        self.record(local, peer, now, EventKind::Join);
        Ok(())
    }

    fn notify_remove(&self, local: NodeAddr, peer: NodeAddr, now: u64) -> Result<(), Box<dyn Error + Send + Sync>> {
        self.record(local, peer, now, EventKind::Remove);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_is_shared_and_filtered_by_local() {
        let log = MembershipLog::new();
        let handler: Arc<dyn DispatchEventHandler> = Arc::new(log.clone());
        let (a, b, c) = (NodeAddr::new(1, 0), NodeAddr::new(2, 0), NodeAddr::new(3, 0));

        handler.notify_join(a, a, 0).unwrap();
        handler.notify_join(a, b, 1).unwrap();
        handler.notify_join(c, b, 1).unwrap();
        handler.notify_remove(a, b, 30).unwrap();

        assert_eq!(log.events().len(), 4);
        assert_eq!(log.joined_by(a), BTreeSet::from([a, b]));
        assert_eq!(log.removed_by(a), BTreeSet::from([b]));
        assert!(log.removed_by(c).is_empty());
    }

    #[test]
    fn test_event_json_shape() {
        let event = MembershipEvent {
            tick: 3,
            local: NodeAddr::new(1, 0),
            peer: NodeAddr::new(2, 8080),
            kind: EventKind::Remove,
        };
        assert_eq!(
            serde_json::to_value(event).unwrap(),
            serde_json::json!({
                "tick": 3,
                "local": { "id": 1, "port": 0 },
                "peer": { "id": 2, "port": 8080 },
                "kind": "Remove",
            })
        );
    }
}
