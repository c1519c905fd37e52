use std::error::Error;
use std::sync::Arc;
use std::time::Duration;
use anyhow::{Context, Result};

use gossipmem::{
    config::MembershipConfigBuilder, DispatchEventHandler, IntervalClock, MembershipNode, NodeAddr, UdpTransport,
};
use tracing::{info, warn};
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;
use tokio::time;
use clap::Parser;
use tracing_subscriber::EnvFilter;

const BIND_ADDR: &str = "127.0.0.1:7948";
const TICK_MS: u64 = 1000;

struct EventHandler;

type DispatchError = Box<dyn Error + Send + Sync>;

impl DispatchEventHandler for EventHandler {
    fn notify_join(&self, local: NodeAddr, peer: NodeAddr, now: u64) -> Result<(), DispatchError> {
        if local != peer {
            info!("[tick {}] Node {} has joined the group", now, peer);
        }
        Ok(())
    }

    fn notify_remove(&self, _local: NodeAddr, peer: NodeAddr, now: u64) -> Result<(), DispatchError> {
        warn!("[tick {}] Node {} was removed from the group", now, peer);
        Ok(())
    }
}

struct UdpNode {
    node: MembershipNode<UdpTransport, IntervalClock>,
    tick: Duration,
}

impl UdpNode {
    async fn new(args: &Args) -> Result<Self> {
        let config = MembershipConfigBuilder::new()
            .with_addr(args.addr)
            .with_introducer(args.introducer)
            .with_fail_timeout(args.fail_timeout)
            .with_remove_timeout(args.remove_timeout)
            .with_fanout(args.fanout)
            .build()
            .context("Invalid membership configuration")?;

        let tick = Duration::from_millis(args.tick_ms);
        let transport = UdpTransport::bind(args.addr)
            .await
            .with_context(|| format!("Failed to bind {}", args.addr))?;

        let node = MembershipNode::with_event_handler(config, transport, IntervalClock::new(tick), Arc::new(EventHandler))
            .context("Failed to initialize membership node")?;

        Ok(UdpNode { node, tick })
    }

    fn start(&mut self) -> Result<()> {
        self.node.start().context("Failed to join the group")?;
        info!("Local node: {} ({})", self.node.addr(), self.node.status());
        Ok(())
    }

    async fn run(&mut self) -> Result<()> {
        let mut ticker = time::interval(self.tick);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.node.tick();
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("Signal received, stopping node...");
                    self.node.stop();
                    self.node.transport().shutdown();
                    return Ok(());
                }
            }
        }
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to bind, also the identity of this node
    #[arg(long, default_value = BIND_ADDR)]
    addr: NodeAddr,

    /// Well-known node to join through; a node started with its own address originates the group
    #[arg(long, default_value = BIND_ADDR)]
    introducer: NodeAddr,

    #[arg(long, default_value_t = TICK_MS)]
    tick_ms: u64,

    #[arg(long, default_value_t = 5)]
    fail_timeout: u64,

    #[arg(long, default_value_t = 20)]
    remove_timeout: u64,

    #[arg(long, default_value_t = 6)]
    fanout: usize,
}

fn setup_tracing() {
    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_ansi(true)
        .with_level(true);

    let filter_layer = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    setup_tracing();

    let mut node = UdpNode::new(&args).await?;
    node.start()?;

    node.run().await?;

    info!("Node stopped. Goodbye!");
    Ok(())
}
