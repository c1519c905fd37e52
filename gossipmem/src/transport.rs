use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc};
use tokio::time;
use tracing::{debug, error, info, warn};

use crate::address::NodeAddr;
use crate::backoff::BackOff;
use crate::config::MAX_DATAGRAM_SIZE;
use crate::error::{MembershipError, Result};

/// Datagrams queued between two drains before new ones are dropped.
pub const DATAGRAM_QUEUE_CAPACITY: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datagram {
    pub from: NodeAddr,
    pub data: Bytes,
}

/// Unreliable datagram delivery between members.
///
/// Sends are fire-and-forget: `Ok` means the datagram was handed to the
/// network, not that it arrived. `drain` never blocks.
pub trait DatagramTransport {
    fn local_addr(&self) -> NodeAddr;

    fn send_to(&self, target: NodeAddr, data: &[u8]) -> Result<()>;

    /// Takes every datagram queued for this node at the time of the call.
    fn drain(&mut self) -> Vec<Datagram>;
}

/// [`DatagramTransport`] over a tokio UDP socket.
///
/// A background task reads the socket and queues datagrams until the next
/// `drain`. When the queue is full, incoming datagrams are dropped and
/// counted. Must be created inside a tokio runtime.
pub struct UdpTransport {
    local_addr: NodeAddr,
    udp_socket: Arc<UdpSocket>,
    datagram_rx: mpsc::Receiver<Datagram>,
    dropped: Arc<AtomicU64>,
    shutdown_signal: broadcast::Sender<()>,
}

impl UdpTransport {
    /// Binds the socket. Bind to a concrete IPv4 address: the bound address
    /// is the node's identity, and `0.0.0.0` is not reachable by peers.
    pub async fn bind(addr: NodeAddr) -> Result<Self> {
        Self::bind_with_queue_capacity(addr, DATAGRAM_QUEUE_CAPACITY).await
    }

    pub async fn bind_with_queue_capacity(addr: NodeAddr, capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(MembershipError::BootstrapFailure(
                "datagram queue capacity must be positive".to_string(),
            ));
        }
        let udp_socket = UdpSocket::bind(addr.socket_addr()).await.map_err(|e| {
            MembershipError::BootstrapFailure(format!("failed to bind UDP socket {}: {}", addr, e))
        })?;
        let local_addr = NodeAddr::try_from(udp_socket.local_addr()?)?;

        let (datagram_tx, datagram_rx) = mpsc::channel(capacity);
        let (shutdown_signal, _) = broadcast::channel(1);

        let transport = Self {
            local_addr,
            udp_socket: Arc::new(udp_socket),
            datagram_rx,
            dropped: Arc::new(AtomicU64::new(0)),
            shutdown_signal,
        };
        info!("> [GOSSIPMEM] Bound UDP socket on {}", local_addr);

        transport.spawn_datagram_listener(datagram_tx);
        Ok(transport)
    }

    fn spawn_datagram_listener(&self, tx: mpsc::Sender<Datagram>) {
        let socket = self.udp_socket.clone();
        let dropped = self.dropped.clone();
        let mut shutdown_rx = self.shutdown_signal.subscribe();
        let mut backoff = BackOff::new();

        tokio::spawn(async move {
            let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
            loop {
                tokio::select! {
                    result = socket.recv_from(&mut buf) => {
                        match result {
                            Ok((len, SocketAddr::V4(src))) => {
                                backoff.record_success();
                                let datagram = Datagram {
                                    from: NodeAddr::from(src),
                                    data: Bytes::copy_from_slice(&buf[..len]),
                                };
                                match tx.try_send(datagram) {
                                    Ok(()) => {}
                                    Err(TrySendError::Full(datagram)) => {
                                        let total = dropped.fetch_add(1, Ordering::Relaxed) + 1;
                                        warn!(
                                            "Dropping datagram from {}: receive queue full ({} dropped so far)",
                                            datagram.from, total
                                        );
                                    }
                                    Err(TrySendError::Closed(_)) => {
                                        debug!("Transport dropped, stopping UDP listener");
                                        break;
                                    }
                                }
                                continue;
                            }
                            Ok((_, src)) => {
                                warn!("Ignoring datagram from non-IPv4 peer {}", src);
                                continue;
                            }
                            Err(e) => {
                                let failures = backoff.record_failure();
                                error!("Error receiving UDP datagram: {} Consecutive failures: {}", e, failures);
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("[RECV] UDP listener received shutdown signal");
                        break;
                    }
                }

                let delay = backoff.calculate_delay();
                if !delay.is_zero() {
                    time::sleep(delay).await;
                }
            }
            info!("UDP listener shut down");
        });
    }

    /// Datagrams discarded because the receive queue was full.
    pub fn dropped_datagrams(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Stops the background receive task.
    pub fn shutdown(&self) {
        // no receiver means the listener is already gone
        let _ = self.shutdown_signal.send(());
    }
}

impl Drop for UdpTransport {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl DatagramTransport for UdpTransport {
    fn local_addr(&self) -> NodeAddr {
        self.local_addr
    }

    fn send_to(&self, target: NodeAddr, data: &[u8]) -> Result<()> {
        self.udp_socket
            .try_send_to(data, target.socket_addr())
            .map_err(|e| MembershipError::send_failure(target, e))?;
        Ok(())
    }

    fn drain(&mut self) -> Vec<Datagram> {
        let mut datagrams = Vec::new();
        while let Ok(datagram) = self.datagram_rx.try_recv() {
            datagrams.push(datagram);
        }
        datagrams
    }
}
