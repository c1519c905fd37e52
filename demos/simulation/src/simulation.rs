use std::collections::BTreeSet;
use std::sync::Arc;
use anyhow::{bail, ensure, Context, Result};

use gossipmem::{
    config::MembershipConfigBuilder, Clock, EmulNet, EmulNetConfig, EmulNetHandle, MembershipLog, MembershipNode,
    NetStats, NodeAddr, NodeStatus, TickClock,
};
use rand::rngs::StdRng;
use rand::seq::IteratorRandom;
use rand::SeedableRng;
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;
use clap::Parser;
use tracing_subscriber::EnvFilter;

type Node = MembershipNode<EmulNetHandle, TickClock>;

#[derive(Parser, Debug)]
#[command(author, version, about = "Runs a gossip membership group on an emulated network", long_about = None)]
struct Args {
    /// Number of nodes; node 0.0.0.1:0 is the introducer
    #[arg(long, default_value_t = 10)]
    nodes: u32,

    /// Total number of ticks to run
    #[arg(long, default_value_t = 200)]
    ticks: u64,

    #[arg(long, default_value_t = 5)]
    fail_timeout: u64,

    #[arg(long, default_value_t = 20)]
    remove_timeout: u64,

    #[arg(long, default_value_t = 6)]
    fanout: usize,

    /// Probability of losing a datagram once every node has started
    #[arg(long, default_value_t = 0.0)]
    drop_rate: f64,

    /// Maximum delivery delay in ticks
    #[arg(long, default_value_t = 0)]
    max_delay: u64,

    /// Seed for the network and the nodes; random if omitted
    #[arg(long)]
    seed: Option<u64>,

    /// Tick at which nodes are crashed
    #[arg(long)]
    fail_at: Option<u64>,

    /// How many randomly chosen nodes crash at `--fail-at`
    #[arg(long, default_value_t = 1)]
    fail_count: u32,

    /// Print the report as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Serialize)]
struct NodeReport {
    addr: NodeAddr,
    status: NodeStatus,
    failed: bool,
    heartbeat: u64,
    members: usize,
    /// Live nodes absent from the table
    missing: Vec<NodeAddr>,
    /// Crashed nodes still in the table
    lingering: Vec<NodeAddr>,
    /// Live nodes this node evicted at some point
    false_removals: Vec<NodeAddr>,
    net: NetStats,
}

#[derive(Debug, Serialize)]
struct Report {
    seed: u64,
    ticks: u64,
    nodes: u32,
    crashed: Vec<NodeAddr>,
    converged: bool,
    join_events: usize,
    remove_events: usize,
    net: NetStats,
    node_reports: Vec<NodeReport>,
}

struct Simulation {
    args: Args,
    seed: u64,
    clock: TickClock,
    net: EmulNet,
    log: MembershipLog,
    nodes: Vec<Node>,
    crashed: BTreeSet<NodeAddr>,
}

impl Simulation {
    fn new(args: Args) -> Result<Self> {
        ensure!(args.nodes > 0, "at least one node is required");
        ensure!(args.fail_count <= args.nodes, "cannot crash more nodes than exist");
        ensure!((0.0..=1.0).contains(&args.drop_rate), "drop rate must be within [0, 1]");

        let seed = args.seed.unwrap_or_else(rand::random);
        let clock = TickClock::new();
        let net = EmulNet::new(
            EmulNetConfig {
                // lossless until every node has started
                drop_rate: 0.0,
                max_delay: args.max_delay,
                seed,
                ..EmulNetConfig::default()
            },
            clock.clone(),
        )
        .context("Invalid network configuration")?;

        let log = MembershipLog::new();
        let mut nodes = Vec::with_capacity(args.nodes as usize);
        for id in 1..=args.nodes {
            let addr = NodeAddr::new(id, 0);
            let config = MembershipConfigBuilder::new()
                .with_addr(addr)
                .with_fail_timeout(args.fail_timeout)
                .with_remove_timeout(args.remove_timeout)
                .with_fanout(args.fanout)
                .build()
                .context("Invalid membership configuration")?;
            let node = MembershipNode::with_event_handler(config, net.register(addr), clock.clone(), Arc::new(log.clone()))?
                .with_seed(seed.wrapping_add(u64::from(id)));
            nodes.push(node);
        }

        Ok(Self {
            args,
            seed,
            clock,
            net,
            log,
            nodes,
            crashed: BTreeSet::new(),
        })
    }

    /// Nodes start one per tick, in id order.
    fn run(&mut self) -> Result<()> {
        let mut rng = StdRng::seed_from_u64(self.seed);
        let join_phase = u64::from(self.args.nodes);

        for now in 0..self.args.ticks {
            if let Some(node) = self.nodes.get_mut(now as usize) {
                node.start()?;
            }

            if now == join_phase && self.args.drop_rate > 0.0 {
                info!("Opening lossy window with drop rate {}", self.args.drop_rate);
                self.net.set_drop_rate(self.args.drop_rate);
            }

            if self.args.fail_at == Some(now) {
                let victims = self.nodes.iter_mut().choose_multiple(&mut rng, self.args.fail_count as usize);
                for node in victims {
                    node.mark_failed();
                    self.crashed.insert(node.addr());
                }
                warn!("Crashed {:?} at tick {}", self.crashed, now);
            }

            self.clock.advance();
            for node in &mut self.nodes {
                node.tick();
            }
        }
        Ok(())
    }

    fn report(&self) -> Report {
        let live: BTreeSet<NodeAddr> = self
            .nodes
            .iter()
            .filter(|node| !node.is_failed())
            .map(|node| node.addr())
            .collect();

        let node_reports: Vec<NodeReport> = self
            .nodes
            .iter()
            .map(|node| {
                let known = node.membership().addrs();
                NodeReport {
                    addr: node.addr(),
                    status: node.status(),
                    failed: node.is_failed(),
                    heartbeat: node.heartbeat(),
                    members: known.len(),
                    missing: live.difference(&known).copied().collect(),
                    lingering: self.crashed.intersection(&known).copied().collect(),
                    false_removals: self
                        .log
                        .removed_by(node.addr())
                        .intersection(&live)
                        .copied()
                        .collect(),
                    net: self.net.stats(node.addr()),
                }
            })
            .collect();

        let converged = node_reports
            .iter()
            .filter(|node| !node.failed)
            .all(|node| node.status == NodeStatus::Joined && node.missing.is_empty() && node.lingering.is_empty());

        let events = self.log.events();
        let remove_events = events
            .iter()
            .filter(|event| event.kind == gossipmem::EventKind::Remove)
            .count();

        Report {
            seed: self.seed,
            ticks: self.clock.now(),
            nodes: self.args.nodes,
            crashed: self.crashed.iter().copied().collect(),
            converged,
            join_events: events.len() - remove_events,
            remove_events,
            net: self.net.total_stats(),
            node_reports,
        }
    }
}

fn print_report(report: &Report) {
    println!(
        "seed={} ticks={} nodes={} crashed={:?}",
        report.seed, report.ticks, report.nodes, report.crashed
    );
    println!(
        "events: {} joins, {} removals | net: {} sent, {} received, {} dropped",
        report.join_events, report.remove_events, report.net.sent, report.net.received, report.net.dropped
    );
    for node in &report.node_reports {
        if node.failed {
            println!("{:<14} CRASHED", node.addr.to_string());
            continue;
        }
        println!(
            "{:<14} {:<8} hb={:<6} members={:<4} missing={:?} lingering={:?} false_removals={:?}",
            node.addr.to_string(),
            node.status.to_string(),
            node.heartbeat,
            node.members,
            node.missing,
            node.lingering,
            node.false_removals,
        );
    }
    println!("converged: {}", report.converged);
}

fn setup_tracing() {
    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_ansi(true)
        .with_level(true)
        .with_writer(std::io::stderr);

    let filter_layer = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .init();
}

fn main() -> Result<()> {
    let args = Args::parse();
    setup_tracing();

    let json = args.json;
    let mut simulation = Simulation::new(args)?;
    simulation.run()?;

    let report = simulation.report();
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }

    if !report.converged {
        bail!("membership did not converge after {} ticks", report.ticks);
    }
    Ok(())
}
