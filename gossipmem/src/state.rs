use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of a membership node.
///
/// `Uninitialized -> Joining -> Joined -> Stopped`, where the introducer
/// skips `Joining`. Fault injection is tracked separately, see
/// [`crate::MembershipNode::mark_failed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum NodeStatus {
    #[default]
    Uninitialized,
    Joining,
    Joined,
    Stopped,
}

impl NodeStatus {
    /// Whether the node has started and not yet stopped
    pub fn is_active(&self) -> bool {
        matches!(self, NodeStatus::Joining | NodeStatus::Joined)
    }

    pub fn is_joined(&self) -> bool {
        matches!(self, NodeStatus::Joined)
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeStatus::Uninitialized => write!(f, "UNINITIALIZED"),
            NodeStatus::Joining => write!(f, "JOINING"),
            NodeStatus::Joined => write!(f, "JOINED"),
            NodeStatus::Stopped => write!(f, "STOPPED"),
        }
    }
}
