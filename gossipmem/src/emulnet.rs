use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tracing::trace;

use crate::address::NodeAddr;
use crate::clock::{Clock, TickClock};
use crate::config::MAX_DATAGRAM_SIZE;
use crate::error::{MembershipError, Result};
use crate::transport::{Datagram, DatagramTransport};

/// Settings of an [`EmulNet`].
#[derive(Debug, Clone, PartialEq)]
pub struct EmulNetConfig {
    /// Probability in `[0, 1]` that a datagram is silently lost
    pub drop_rate: f64,

    /// Each datagram is delayed by a random number of ticks in `[0, max_delay]`,
    /// which also reorders them
    pub max_delay: u64,

    pub seed: u64,

    pub max_datagram_size: usize,
}

impl Default for EmulNetConfig {
    fn default() -> Self {
        Self {
            drop_rate: 0.0,
            max_delay: 0,
            seed: 0,
            max_datagram_size: MAX_DATAGRAM_SIZE,
        }
    }
}

/// Traffic counters of one node
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct NetStats {
    pub sent: u64,
    pub received: u64,
    pub dropped: u64,
}

#[derive(Debug)]
struct InFlight {
    deliver_at: u64,
    sequence: u64,
    datagram: Datagram,
}

#[derive(Debug)]
struct EmulNetInner {
    rng: StdRng,
    drop_rate: f64,
    max_delay: u64,
    max_datagram_size: usize,
    sequence: u64,
    inboxes: HashMap<NodeAddr, Vec<InFlight>>,
    stats: HashMap<NodeAddr, NetStats>,
}

/// An in-memory, lossy datagram network shared by many nodes in one process.
///
/// Time comes from a shared [`TickClock`], so delivery delays are measured in
/// the same ticks the nodes use.
#[derive(Debug, Clone)]
pub struct EmulNet {
    inner: Arc<Mutex<EmulNetInner>>,
    clock: TickClock,
}

impl EmulNet {
    pub fn new(config: EmulNetConfig, clock: TickClock) -> Result<Self> {
        if !(0.0..=1.0).contains(&config.drop_rate) {
            return Err(MembershipError::BootstrapFailure(format!(
                "drop rate {} is outside [0, 1]",
                config.drop_rate
            )));
        }

        Ok(Self {
            inner: Arc::new(Mutex::new(EmulNetInner {
                rng: StdRng::seed_from_u64(config.seed),
                drop_rate: config.drop_rate,
                max_delay: config.max_delay,
                max_datagram_size: config.max_datagram_size,
                sequence: 0,
                inboxes: HashMap::new(),
                stats: HashMap::new(),
            })),
            clock,
        })
    }

    /// Attaches a node to the network and returns its transport.
    pub fn register(&self, addr: NodeAddr) -> EmulNetHandle {
        let mut inner = self.inner.lock();
        inner.inboxes.entry(addr).or_default();
        inner.stats.entry(addr).or_default();
        EmulNetHandle {
            addr,
            net: self.clone(),
        }
    }

    /// Changes the loss probability, e.g. to open a lossy window mid-run.
    pub fn set_drop_rate(&self, drop_rate: f64) {
        self.inner.lock().drop_rate = drop_rate.clamp(0.0, 1.0);
    }

    pub fn stats(&self, addr: NodeAddr) -> NetStats {
        self.inner.lock().stats.get(&addr).copied().unwrap_or_default()
    }

    pub fn total_stats(&self) -> NetStats {
        self.inner
            .lock()
            .stats
            .values()
            .fold(NetStats::default(), |acc, s| NetStats {
                sent: acc.sent + s.sent,
                received: acc.received + s.received,
                dropped: acc.dropped + s.dropped,
            })
    }

    /// Datagrams queued for `addr`, including ones not yet due.
    pub fn in_flight(&self, addr: NodeAddr) -> usize {
        self.inner.lock().inboxes.get(&addr).map_or(0, Vec::len)
    }

    fn send(&self, from: NodeAddr, target: NodeAddr, data: &[u8]) -> Result<()> {
        let now = self.clock.now();
        let mut inner = self.inner.lock();

        if data.len() > inner.max_datagram_size {
            return Err(MembershipError::send_failure(
                target,
                format!("{} byte datagram exceeds {} bytes", data.len(), inner.max_datagram_size),
            ));
        }
        inner.stats.entry(from).or_default().sent += 1;

        let lost = inner.drop_rate > 0.0 && {
            let drop_rate = inner.drop_rate;
            inner.rng.gen_bool(drop_rate)
        };
        if lost || !inner.inboxes.contains_key(&target) {
            trace!("Dropped datagram {} -> {}", from, target);
            inner.stats.entry(from).or_default().dropped += 1;
            return Ok(());
        }

        let delay = if inner.max_delay > 0 {
            let max_delay = inner.max_delay;
            inner.rng.gen_range(0..=max_delay)
        } else {
            0
        };
        inner.sequence += 1;
        let in_flight = InFlight {
            deliver_at: now + delay,
            sequence: inner.sequence,
            datagram: Datagram {
                from,
                data: Bytes::copy_from_slice(data),
            },
        };
        if let Some(inbox) = inner.inboxes.get_mut(&target) {
            inbox.push(in_flight);
        }
        Ok(())
    }

    fn receive(&self, addr: NodeAddr) -> Vec<Datagram> {
        let now = self.clock.now();
        let mut inner = self.inner.lock();

        let Some(inbox) = inner.inboxes.get_mut(&addr) else {
            return Vec::new();
        };
        let (mut due, pending): (Vec<InFlight>, Vec<InFlight>) =
            std::mem::take(inbox).into_iter().partition(|m| m.deliver_at <= now);
        *inbox = pending;

        due.sort_by_key(|m| (m.deliver_at, m.sequence));
        inner.stats.entry(addr).or_default().received += due.len() as u64;
        due.into_iter().map(|m| m.datagram).collect()
    }
}

/// One node's view of an [`EmulNet`].
#[derive(Debug, Clone)]
pub struct EmulNetHandle {
    addr: NodeAddr,
    net: EmulNet,
}

impl DatagramTransport for EmulNetHandle {
    fn local_addr(&self) -> NodeAddr {
        self.addr
    }

    fn send_to(&self, target: NodeAddr, data: &[u8]) -> Result<()> {
        self.net.send(self.addr, target, data)
    }

    fn drain(&mut self) -> Vec<Datagram> {
        self.net.receive(self.addr)
    }
}
