use crate::address::NodeAddr;
use crate::error::{MembershipError, Result};

// Default configuration constants, all timeouts are in ticks
pub(crate) const DEFAULT_FAIL_TIMEOUT: u64 = 5;
pub(crate) const DEFAULT_REMOVE_TIMEOUT: u64 = 20;
pub(crate) const DEFAULT_FANOUT: usize = 6;

/// Largest payload a single UDP datagram can carry over IPv4.
pub const MAX_DATAGRAM_SIZE: usize = 65_507;

/// [`MembershipConfig`] configuration structure for a membership node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MembershipConfig {
    /// Identity of this node, also the address peers send to
    pub(crate) addr: NodeAddr,

    /// Well-known rendezvous node that new members contact to join
    pub(crate) introducer: NodeAddr,

    /// Age (in ticks) after which a peer is suspected: it is no longer
    /// gossiped onward and can no longer be refreshed by gossip alone
    pub(crate) fail_timeout: u64,

    /// Age (in ticks) after which a peer is evicted from the table
    pub(crate) remove_timeout: u64,

    /// Number of peers targeted by every gossip round
    pub(crate) fanout: usize,
}

impl MembershipConfig {
    pub fn addr(&self) -> NodeAddr {
        self.addr
    }

    pub fn introducer(&self) -> NodeAddr {
        self.introducer
    }

    pub fn fail_timeout(&self) -> u64 {
        self.fail_timeout
    }

    pub fn remove_timeout(&self) -> u64 {
        self.remove_timeout
    }

    pub fn fanout(&self) -> usize {
        self.fanout
    }

    /// Whether this node originates the group instead of joining it.
    pub fn is_introducer(&self) -> bool {
        self.addr == self.introducer
    }
}

pub struct MembershipConfigBuilder {
    pub(crate) addr: Option<NodeAddr>,
    pub(crate) introducer: NodeAddr,
    pub(crate) fail_timeout: u64,
    pub(crate) remove_timeout: u64,
    pub(crate) fanout: usize,
}

impl Default for MembershipConfigBuilder {
    fn default() -> MembershipConfigBuilder {
        Self {
            addr: None,
            introducer: NodeAddr::default_introducer(),
            fail_timeout: DEFAULT_FAIL_TIMEOUT,
            remove_timeout: DEFAULT_REMOVE_TIMEOUT,
            fanout: DEFAULT_FANOUT,
        }
    }
}

impl MembershipConfigBuilder {
    /// Creates a new [`MembershipConfigBuilder`] with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the identity of this node
    pub fn with_addr(mut self, addr: impl Into<NodeAddr>) -> Self {
        self.addr = Some(addr.into());
        self
    }

    /// Sets the introducer every other node sends its JOINREQ to
    pub fn with_introducer(mut self, introducer: impl Into<NodeAddr>) -> Self {
        self.introducer = introducer.into();
        self
    }

    /// Sets the suspicion timeout
    ///
    /// A peer silent for at least this many ticks is excluded from outgoing
    /// gossip and is no longer refreshed by incoming gossip.
    pub fn with_fail_timeout(mut self, ticks: u64) -> Self {
        self.fail_timeout = ticks;
        self
    }

    /// Sets the removal timeout
    ///
    /// A peer silent for more than this many ticks is deleted. Must be larger
    /// than the suspicion timeout.
    pub fn with_remove_timeout(mut self, ticks: u64) -> Self {
        self.remove_timeout = ticks;
        self
    }

    /// Sets the gossip fanout
    pub fn with_fanout(mut self, fanout: usize) -> Self {
        self.fanout = fanout;
        self
    }

    /// Validates the current configuration
    pub(crate) fn validate(&self) -> Result<()> {
        let bail = |reason: &str| -> Result<()> {
            Err(MembershipError::BootstrapFailure(reason.to_string()))
        };

        match self.addr {
            None => return bail("node address is not set"),
            Some(addr) if addr == NodeAddr::new(0, 0) => {
                return bail("node address 0.0.0.0:0 is not a usable identity")
            }
            Some(_) => {}
        }
        if self.fail_timeout == 0 {
            return bail("fail timeout must be greater than zero(0)");
        }
        if self.remove_timeout <= self.fail_timeout {
            return bail("remove timeout must be greater than fail timeout");
        }
        if self.fanout == 0 {
            return bail("fanout must be greater than zero(0)");
        }
        Ok(())
    }

    /// Builds the final [`MembershipConfig`]
    pub fn build(self) -> Result<MembershipConfig> {
        self.validate()?;
        let addr = self
            .addr
            .ok_or_else(|| MembershipError::BootstrapFailure("node address is not set".into()))?;

        Ok(MembershipConfig {
            addr,
            introducer: self.introducer,
            fail_timeout: self.fail_timeout,
            remove_timeout: self.remove_timeout,
            fanout: self.fanout,
        })
    }
}
