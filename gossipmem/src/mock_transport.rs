use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;

use crate::address::NodeAddr;
use crate::error::{MembershipError, Result};
use crate::message::Message;
use crate::transport::{Datagram, DatagramTransport};

/// Records outbound datagrams and replays injected inbound ones.
///
/// Clones share state, so a test keeps one clone to inspect what the node
/// sent while the node owns the other.
#[derive(Debug, Clone)]
pub(crate) struct MockTransport {
    local_addr: NodeAddr,
    sent: Arc<Mutex<Vec<(NodeAddr, Vec<u8>)>>>,
    inbox: Arc<Mutex<VecDeque<Datagram>>>,
    failing_targets: Arc<Mutex<BTreeSet<NodeAddr>>>,
}

impl MockTransport {
    pub(crate) fn new(local_addr: NodeAddr) -> Self {
        Self {
            local_addr,
            sent: Arc::new(Mutex::new(Vec::new())),
            inbox: Arc::new(Mutex::new(VecDeque::new())),
            failing_targets: Arc::new(Mutex::new(BTreeSet::new())),
        }
    }

    pub(crate) fn inject(&self, from: NodeAddr, data: &[u8]) {
        self.inbox.lock().push_back(Datagram {
            from,
            data: Bytes::copy_from_slice(data),
        });
    }

    pub(crate) fn inject_message(&self, message: &Message) {
        let bytes = message.to_bytes().expect("encodable message");
        self.inject(message.sender, &bytes);
    }

    /// Makes every later send to `target` fail.
    pub(crate) fn fail_sends_to(&self, target: NodeAddr) {
        self.failing_targets.lock().insert(target);
    }

    pub(crate) fn sent(&self) -> Vec<(NodeAddr, Vec<u8>)> {
        self.sent.lock().clone()
    }

    /// Sent datagrams decoded back into messages.
    pub(crate) fn sent_messages(&self) -> Vec<(NodeAddr, Message)> {
        self.sent
            .lock()
            .iter()
            .map(|(target, bytes)| (*target, Message::from_vec(bytes).expect("decodable message")))
            .collect()
    }

    pub(crate) fn clear(&self) {
        self.sent.lock().clear();
    }
}

impl DatagramTransport for MockTransport {
    fn local_addr(&self) -> NodeAddr {
        self.local_addr
    }

    fn send_to(&self, target: NodeAddr, data: &[u8]) -> Result<()> {
        if self.failing_targets.lock().contains(&target) {
            return Err(MembershipError::send_failure(target, "mock send failure"));
        }
        self.sent.lock().push((target, data.to_vec()));
        Ok(())
    }

    fn drain(&mut self) -> Vec<Datagram> {
        self.inbox.lock().drain(..).collect()
    }
}
