// Membership protocol messages and message types.
use bytes::BytesMut;
use core::fmt;
use tokio_util::codec::{Decoder, Encoder};

use crate::address::NodeAddr;
use crate::codec::MessageCodec;
use crate::error::{MembershipError, Result};

/// A membership entry as carried on the wire; the receiver stamps its own
/// refresh time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WireEntry {
    pub addr: NodeAddr,
    pub heartbeat: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinReqPayload {
    pub heartbeat: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MemberListPayload {
    pub entries: Vec<WireEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessagePayload {
    JoinReq(JoinReqPayload),
    JoinRep(MemberListPayload),
    Heartbeat(MemberListPayload),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub sender: NodeAddr,
    pub payload: MessagePayload,
}

impl Message {
    pub fn join_req(sender: NodeAddr, heartbeat: u64) -> Self {
        Self {
            sender,
            payload: MessagePayload::JoinReq(JoinReqPayload { heartbeat }),
        }
    }

    pub fn join_rep(sender: NodeAddr, entries: Vec<WireEntry>) -> Self {
        Self {
            sender,
            payload: MessagePayload::JoinRep(MemberListPayload { entries }),
        }
    }

    pub fn heartbeat(sender: NodeAddr, entries: Vec<WireEntry>) -> Self {
        Self {
            sender,
            payload: MessagePayload::Heartbeat(MemberListPayload { entries }),
        }
    }

    pub fn msg_type(&self) -> MessageType {
        match self.payload {
            MessagePayload::JoinReq(_) => MessageType::JoinReq,
            MessagePayload::JoinRep(_) => MessageType::JoinRep,
            MessagePayload::Heartbeat(_) => MessageType::Heartbeat,
        }
    }

    /// Decodes a whole datagram. Trailing bytes after the message are
    /// rejected as malformed.
    pub fn from_vec(data: &[u8]) -> Result<Self> {
        let mut codec = MessageCodec::new();
        let mut bytes = BytesMut::from(data);
        let message = codec
            .decode(&mut bytes)?
            .ok_or_else(|| MembershipError::malformed("empty datagram"))?;

        if !bytes.is_empty() {
            return Err(MembershipError::malformed(format!(
                "{} trailing bytes after {} message",
                bytes.len(),
                message.msg_type()
            )));
        }
        Ok(message)
    }

    pub fn to_bytes(&self) -> Result<BytesMut> {
        let mut codec = MessageCodec::new();
        let mut buffer = BytesMut::new();
        codec.encode(self, &mut buffer)?;
        Ok(buffer)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    JoinReq = 0,
    JoinRep = 1,
    Heartbeat = 2,
}

impl MessageType {
    pub(crate) fn from_u8(value: u8) -> Result<Self> {
        match value {
            0 => Ok(MessageType::JoinReq),
            1 => Ok(MessageType::JoinRep),
            2 => Ok(MessageType::Heartbeat),
            _ => Err(MembershipError::malformed(format!(
                "invalid MessageType value: {}",
                value
            ))),
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageType::JoinReq => write!(f, "JOINREQ"),
            MessageType::JoinRep => write!(f, "JOINREP"),
            MessageType::Heartbeat => write!(f, "HEARTBEAT"),
        }
    }
}
