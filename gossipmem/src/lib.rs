use std::collections::BTreeSet;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, error, info, instrument, warn};
use utils::{format_members, pretty_debug};

pub use crate::{
    address::NodeAddr,
    clock::{Clock, IntervalClock, TickClock},
    codec::{MessageCodec, MAX_ENTRIES_PER_MESSAGE},
    config::{MembershipConfig, MembershipConfigBuilder, MAX_DATAGRAM_SIZE},
    dispatch_event_handler::{DispatchEventHandler, EventKind, MembershipEvent, MembershipLog},
    emulnet::{EmulNet, EmulNetConfig, EmulNetHandle, NetStats},
    error::{MembershipError, Result},
    gossip::{disperse, DisperseReport},
    members::Membership,
    message::{JoinReqPayload, MemberListPayload, Message, MessagePayload, MessageType, WireEntry},
    node::MemberEntry,
    state::NodeStatus,
    transport::{Datagram, DatagramTransport, UdpTransport, DATAGRAM_QUEUE_CAPACITY},
};

mod address;
mod backoff;
mod clock;
mod codec;
pub mod config;
mod dispatch_event_handler;
mod emulnet;
mod error;
mod gossip;
mod members;
mod message;
mod node;
mod state;
mod transport;
mod utils;

#[cfg(test)]
mod mock_transport;

//  # Gossip Group Membership for GOSSIPMEM

/// Every node keeps a table of the members it knows about, each with the
/// latest heartbeat it has seen and the local tick at which that heartbeat
/// last advanced. Once per tick a joined node increments its own heartbeat,
/// evicts peers it has not heard from in `remove_timeout` ticks and sends its
/// table to `fanout` random peers. Peers silent for `fail_timeout` ticks are
/// suspected: they are no longer gossiped onward and gossip alone cannot
/// refresh them.
///
/// * Joining: a new node sends JOINREQ to the introducer, which replies with
/// a JOINREP carrying its whole table and records the new node.
///
/// * Gossip: HEARTBEAT messages carry the sender's table minus suspected
/// peers. Receivers merge it, keeping the greater heartbeat per member.
///
/// The engine is a plain state machine driven by [`MembershipNode::tick`].
/// Inbound datagrams are drained and processed before the round runs, so the
/// table has a single mutator and needs no locking. Transport and time are
/// collaborators ([`DatagramTransport`], [`Clock`]), which lets the same node
/// run over UDP or over the in-memory [`EmulNet`].
pub struct MembershipNode<T: DatagramTransport, C: Clock> {
    /// Configuration settings for the node
    config: MembershipConfig,

    /// Protocol state, owned by this node only
    state: NodeState,

    /// Communication layer for sending and receiving datagrams
    transport: T,

    /// Source of protocol time
    clock: C,

    /// Picks gossip targets
    rng: StdRng,

    /// Optional handler notified of every membership change
    dispatch_event_handler: Option<Arc<dyn DispatchEventHandler>>,
}

#[derive(Debug)]
struct NodeState {
    status: NodeStatus,

    /// Set by fault injection, turns every operation into a no-op
    failed: bool,

    members: Membership,
}

impl<T: DatagramTransport, C: Clock> MembershipNode<T, C> {
    /// Creates a node. The transport must already be bound to the configured
    /// address, since that address is the node's identity.
    pub fn new(config: MembershipConfig, transport: T, clock: C) -> Result<Self> {
        Self::with_dispatch_event_handler(config, transport, clock, None)
    }

    /// Creates a node that reports table changes to `dispatch_event_handler`.
    pub fn with_event_handler(
        config: MembershipConfig,
        transport: T,
        clock: C,
        dispatch_event_handler: Arc<dyn DispatchEventHandler>,
    ) -> Result<Self> {
        Self::with_dispatch_event_handler(config, transport, clock, Some(dispatch_event_handler))
    }

    fn with_dispatch_event_handler(
        config: MembershipConfig,
        transport: T,
        clock: C,
        dispatch_event_handler: Option<Arc<dyn DispatchEventHandler>>,
    ) -> Result<Self> {
        if transport.local_addr() != config.addr() {
            let err = MembershipError::BootstrapFailure(format!(
                "transport is bound to {} but the node is configured as {}",
                transport.local_addr(),
                config.addr()
            ));
            error!("{}", err);
            return Err(err);
        }
        debug!("{}", pretty_debug("Membership Config:", &config));

        let members = Membership::new(config.addr(), config.fail_timeout(), config.remove_timeout());
        Ok(Self {
            config,
            state: NodeState {
                status: NodeStatus::Uninitialized,
                failed: false,
                members,
            },
            transport,
            clock,
            rng: StdRng::from_entropy(),
            dispatch_event_handler,
        })
    }

    /// Replaces the gossip target RNG with a seeded one, for reproducible runs.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Bootstraps the node: the introducer originates the group, every other
    /// node sends a JOINREQ to the introducer.
    ///
    /// Calling `start` on a node that is already joining or joined does
    /// nothing. If the JOINREQ cannot be sent the node returns to
    /// `Uninitialized` and [`MembershipError::JoinFailure`] is returned, so
    /// the caller may give up or retry.
    pub fn start(&mut self) -> Result<()> {
        if self.state.failed {
            debug!("Node {} is marked failed, ignoring start", self.addr());
            return Ok(());
        }

        match self.state.status {
            NodeStatus::Joining | NodeStatus::Joined => return Ok(()),
            NodeStatus::Stopped => {
                let err = MembershipError::BootstrapFailure(format!("node {} has been stopped", self.addr()));
                error!("{}", err);
                return Err(err);
            }
            NodeStatus::Uninitialized => {}
        }

        let now = self.clock.now();
        let addr = self.addr();
        self.state.members.upsert_self(0, now);

        if self.config.is_introducer() {
            self.state.status = NodeStatus::Joined;
            info!("> [GOSSIPMEM] Starting up group at {}", addr);
        } else {
            let introducer = self.config.introducer();
            let request = Message::join_req(addr, self.heartbeat());
            let sent = request
                .to_bytes()
                .and_then(|buffer| self.transport.send_to(introducer, &buffer));

            if let Err(e) = sent {
                self.state.members = Membership::new(addr, self.config.fail_timeout(), self.config.remove_timeout());
                let err = MembershipError::JoinFailure(format!("JOINREQ to {} failed: {}", introducer, e));
                error!("{}", err);
                return Err(err);
            }
            self.state.status = NodeStatus::Joining;
            info!("> [GOSSIPMEM] {} sent JOINREQ to introducer {}", addr, introducer);
        }

        self.dispatch_join(addr, now);
        Ok(())
    }

    /// Drains every queued datagram through the state machine, then runs one
    /// gossip round if the node has joined.
    ///
    /// Never fails: malformed input and send errors are logged and dropped.
    pub fn tick(&mut self) {
        if self.state.failed || !self.state.status.is_active() {
            return;
        }

        for datagram in self.transport.drain() {
            self.handle_datagram(datagram);
        }

        if self.state.status.is_joined() {
            self.run_round();
        }
    }

    fn handle_datagram(&mut self, datagram: Datagram) {
        let message = match Message::from_vec(&datagram.data) {
            Ok(message) => message,
            Err(e) => {
                warn!("Dropping datagram from {}: {}", datagram.from, e);
                return;
            }
        };
        debug!("[RECV] {} from {}", message.msg_type(), message.sender);

        match message.payload {
            MessagePayload::JoinReq(payload) => self.handle_join_req(message.sender, payload),
            MessagePayload::JoinRep(payload) => self.handle_join_rep(message.sender, payload),
            MessagePayload::Heartbeat(payload) => self.handle_heartbeat(message.sender, payload),
        }
    }

    fn handle_join_req(&mut self, sender: NodeAddr, payload: JoinReqPayload) {
        if !self.state.status.is_joined() {
            debug!("Ignoring JOINREQ from {} while {}", sender, self.state.status);
            return;
        }
        if sender == self.addr() {
            warn!("Ignoring JOINREQ that claims to come from this node");
            return;
        }

        // reply with the table as it was before the newcomer is added
        let own_addr = self.addr();
        let entries = gossip::bounded_entries(&mut self.rng, own_addr, &self.state.members.entries());
        let reply = Message::join_rep(self.addr(), entries);
        match reply.to_bytes() {
            Ok(buffer) => {
                if let Err(e) = self.transport.send_to(sender, &buffer) {
                    warn!("Failed to send JOINREP to {}: {}", sender, e);
                }
            }
            Err(e) => warn!("Failed to encode JOINREP for {}: {}", sender, e),
        }

        let now = self.clock.now();
        if self.state.members.admit(sender, payload.heartbeat, now) == members::MergeAction::Added {
            info!("Admitted {} into the group", sender);
            self.dispatch_join(sender, now);
        }
    }

    fn handle_join_rep(&mut self, sender: NodeAddr, payload: MemberListPayload) {
        let now = self.clock.now();
        let added = self.state.members.merge(&payload.entries, now);

        if self.state.status == NodeStatus::Joining {
            self.state.status = NodeStatus::Joined;
            info!(
                "> [GOSSIPMEM] {} joined the group through {} with {} members",
                self.addr(),
                sender,
                self.state.members.len()
            );
        } else {
            debug!("Duplicate JOINREP from {}", sender);
        }
        self.dispatch_joins(added, now);
    }

    fn handle_heartbeat(&mut self, sender: NodeAddr, payload: MemberListPayload) {
        if !self.state.status.is_joined() {
            debug!("Ignoring HEARTBEAT from {} while {}", sender, self.state.status);
            return;
        }

        let now = self.clock.now();
        let added = self.state.members.merge(&payload.entries, now);
        for addr in &added {
            info!("Discovered {} via gossip from {}", addr, sender);
        }
        self.dispatch_joins(added, now);
    }

    #[instrument(skip(self), fields(node = %self.config.addr()))]
    fn run_round(&mut self) {
        let now = self.clock.now();
        let addr = self.addr();

        let evicted = self.state.members.bump_self_heartbeat_and_sweep(now);
        for peer in evicted {
            info!("Removed {} after {} silent ticks", peer, self.config.remove_timeout());
            if let Some(handler) = &self.dispatch_event_handler {
                if let Err(e) = handler.notify_remove(addr, peer, now) {
                    warn!("Unable to notify removal of {}: {}", peer, e);
                }
            }
        }

        let snapshot = self.state.members.snapshot_excluding_stale(now);
        debug!("Members at tick {}:\n{}", now, format_members(&snapshot, now));

        let transport = &self.transport;
        if let Err(e) = disperse(&mut self.rng, addr, &snapshot, self.config.fanout(), |target, buffer| {
            transport.send_to(target, buffer)
        }) {
            warn!("Gossip round aborted: {}", e);
        }
    }

    fn dispatch_joins(&self, added: BTreeSet<NodeAddr>, now: u64) {
        for peer in added {
            self.dispatch_join(peer, now);
        }
    }

    fn dispatch_join(&self, peer: NodeAddr, now: u64) {
        if let Some(handler) = &self.dispatch_event_handler {
            if let Err(e) = handler.notify_join(self.addr(), peer, now) {
                warn!("Unable to notify join of {}: {}", peer, e);
            }
        }
    }

    /// Simulates a crash: the node stops reacting to anything.
    pub fn mark_failed(&mut self) {
        if !self.state.failed {
            info!("> [GOSSIPMEM] Node {} marked failed", self.addr());
        }
        self.state.failed = true;
    }

    /// Leaves the protocol for good; later ticks do nothing.
    pub fn stop(&mut self) {
        if self.state.status != NodeStatus::Stopped {
            info!("> [GOSSIPMEM] Node {} stopped with {} members", self.addr(), self.state.members.len());
        }
        self.state.status = NodeStatus::Stopped;
    }

    pub fn is_joined(&self) -> bool {
        self.state.status.is_joined()
    }

    pub fn is_failed(&self) -> bool {
        self.state.failed
    }

    pub fn status(&self) -> NodeStatus {
        self.state.status
    }

    pub fn addr(&self) -> NodeAddr {
        self.config.addr()
    }

    /// The node's own heartbeat, zero before it starts.
    pub fn heartbeat(&self) -> u64 {
        self.state.members.get(&self.addr()).map_or(0, |entry| entry.heartbeat)
    }

    pub fn members(&self) -> Vec<MemberEntry> {
        self.state.members.entries()
    }

    pub fn membership(&self) -> &Membership {
        &self.state.members
    }

    pub fn config(&self) -> &MembershipConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }
}
