use thiserror::Error;

use crate::address::NodeAddr;

/// Errors raised by the membership protocol.
///
/// Steady-state errors (`MalformedMessage`, `SendFailure`) are logged and
/// recovered inside a tick. Only bootstrap errors reach the caller of
/// [`crate::MembershipNode::start`].
#[derive(Debug, Error)]
pub enum MembershipError {
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    #[error("failed to send to {target}: {reason}")]
    SendFailure { target: NodeAddr, reason: String },

    #[error("bootstrap failed: {0}")]
    BootstrapFailure(String),

    #[error("unable to join group: {0}")]
    JoinFailure(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl MembershipError {
    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        MembershipError::MalformedMessage(reason.into())
    }

    pub(crate) fn send_failure(target: NodeAddr, reason: impl ToString) -> Self {
        MembershipError::SendFailure {
            target,
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, MembershipError>;
