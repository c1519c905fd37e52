#![allow(dead_code)]

use std::collections::BTreeSet;
use std::sync::Arc;

use gossipmem::{
    Clock, EmulNet, EmulNetConfig, EmulNetHandle, MembershipConfigBuilder, MembershipLog, MembershipNode,
    NodeAddr, TickClock,
};

pub const FAIL: u64 = 5;
pub const REMOVE: u64 = 20;

pub type Node = MembershipNode<EmulNetHandle, TickClock>;

/// N nodes on one emulated network, ids `1..=N`, node 1 is the introducer.
pub struct Cluster {
    pub clock: TickClock,
    pub net: EmulNet,
    pub log: MembershipLog,
    pub nodes: Vec<Node>,
}

pub fn addr(id: u32) -> NodeAddr {
    NodeAddr::new(id, 0)
}

impl Cluster {
    pub fn new(size: u32, net_config: EmulNetConfig) -> Self {
        let clock = TickClock::new();
        let net = EmulNet::new(net_config, clock.clone()).unwrap();
        let log = MembershipLog::new();

        let nodes = (1..=size)
            .map(|id| {
                let config = MembershipConfigBuilder::new()
                    .with_addr(addr(id))
                    .with_fail_timeout(FAIL)
                    .with_remove_timeout(REMOVE)
                    .build()
                    .unwrap();
                MembershipNode::with_event_handler(config, net.register(addr(id)), clock.clone(), Arc::new(log.clone()))
                    .unwrap()
                    .with_seed(u64::from(id) * 31)
            })
            .collect();

        Self { clock, net, log, nodes }
    }

    pub fn start_all(&mut self) {
        for node in &mut self.nodes {
            node.start().unwrap();
        }
    }

    /// Advances time by one tick and ticks every node in id order.
    pub fn step(&mut self) {
        self.clock.advance();
        for node in &mut self.nodes {
            node.tick();
        }
    }

    pub fn run(&mut self, ticks: u64) {
        for _ in 0..ticks {
            self.step();
        }
    }

    pub fn now(&self) -> u64 {
        self.clock.now()
    }

    pub fn node(&mut self, id: u32) -> &mut Node {
        &mut self.nodes[(id - 1) as usize]
    }

    pub fn live_addrs(&self) -> BTreeSet<NodeAddr> {
        self.nodes.iter().filter(|node| !node.is_failed()).map(|node| node.addr()).collect()
    }

    /// Live nodes whose table differs from the set of live nodes.
    pub fn unconverged(&self) -> Vec<NodeAddr> {
        let live = self.live_addrs();
        self.nodes
            .iter()
            .filter(|node| !node.is_failed())
            .filter(|node| node.membership().addrs() != live)
            .map(|node| node.addr())
            .collect()
    }
}
