use bytes::{Buf as _, BufMut as _, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::address::NodeAddr;
use crate::config::MAX_DATAGRAM_SIZE;
use crate::error::{MembershipError, Result};
use crate::message::{
    JoinReqPayload, MemberListPayload, Message, MessagePayload, MessageType, WireEntry,
};

// tag(1) + id(4) + port(2)
pub(crate) const HEADER_LEN: usize = 7;
// id(4) + port(2) + heartbeat(8)
pub(crate) const ENTRY_LEN: usize = 14;
const COUNT_LEN: usize = 4;
const HEARTBEAT_LEN: usize = 8;

/// Most entries a HEARTBEAT or JOINREP can carry and still fit one datagram.
pub const MAX_ENTRIES_PER_MESSAGE: usize = (MAX_DATAGRAM_SIZE - HEADER_LEN - COUNT_LEN) / ENTRY_LEN;

/// Fixed-width, big-endian wire format:
///
/// ```text
/// +-----+---------+-----------+----------------------------------------+
/// | tag | id: u32 | port: u16 | body                                   |
/// +-----+---------+-----------+----------------------------------------+
/// JOINREQ body:            heartbeat: u64
/// JOINREP/HEARTBEAT body:  count: u32, count x (id: u32, port: u16, heartbeat: u64)
/// ```
pub struct MessageCodec;

impl MessageCodec {
    pub fn new() -> Self {
        MessageCodec
    }
}

impl Default for MessageCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Encoder<Message> for MessageCodec {
    type Error = MembershipError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<()> {
        self.encode(&item, dst)
    }
}

impl<'a> Encoder<&'a Message> for MessageCodec {
    type Error = MembershipError;

    /// Encodes a borrowed `Message` into a `BytesMut` buffer for transmission.
    fn encode(&mut self, item: &'a Message, dst: &mut BytesMut) -> Result<()> {
        let msg_type = item.msg_type();
        match &item.payload {
            MessagePayload::JoinReq(p) => {
                dst.reserve(HEADER_LEN + HEARTBEAT_LEN);
                Self::encode_header(msg_type, &item.sender, dst);
                dst.put_u64(p.heartbeat);
            }
            MessagePayload::JoinRep(p) | MessagePayload::Heartbeat(p) => {
                if p.entries.len() > MAX_ENTRIES_PER_MESSAGE {
                    return Err(MembershipError::malformed(format!(
                        "{} entries exceed the {} that fit in one datagram",
                        p.entries.len(),
                        MAX_ENTRIES_PER_MESSAGE
                    )));
                }
                dst.reserve(HEADER_LEN + COUNT_LEN + p.entries.len() * ENTRY_LEN);
                Self::encode_header(msg_type, &item.sender, dst);
                dst.put_u32(p.entries.len() as u32);
                for entry in &p.entries {
                    Self::encode_addr(&entry.addr, dst);
                    dst.put_u64(entry.heartbeat);
                }
            }
        }
        Ok(())
    }
}

impl Decoder for MessageCodec {
    type Item = Message;
    type Error = MembershipError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        if src.is_empty() {
            return Ok(None);
        }
        if src.len() < HEADER_LEN {
            return Err(MembershipError::malformed(format!(
                "{} bytes is shorter than the {} byte header",
                src.len(),
                HEADER_LEN
            )));
        }

        let msg_type = MessageType::from_u8(src.get_u8())?;
        let sender = Self::decode_addr(src)?;

        let payload = match msg_type {
            MessageType::JoinReq => {
                let heartbeat = Self::read_bytes(src, HEARTBEAT_LEN)?.get_u64();
                MessagePayload::JoinReq(JoinReqPayload { heartbeat })
            }
            MessageType::JoinRep => MessagePayload::JoinRep(Self::decode_member_list(src)?),
            MessageType::Heartbeat => MessagePayload::Heartbeat(Self::decode_member_list(src)?),
        };

        Ok(Some(Message { sender, payload }))
    }
}

impl MessageCodec {
    /// read a fixed number of bytes
    pub(crate) fn read_bytes(src: &mut BytesMut, size: usize) -> Result<BytesMut> {
        if src.remaining() < size {
            return Err(MembershipError::malformed(format!(
                "buffer underflow: wanted {} bytes, {} left",
                size,
                src.remaining()
            )));
        }
        Ok(src.split_to(size))
    }

    /// Reads the entry count, then the entries. The count is checked against
    /// the bytes actually present before anything is allocated.
    fn decode_member_list(src: &mut BytesMut) -> Result<MemberListPayload> {
        let count = Self::read_bytes(src, COUNT_LEN)?.get_u32() as usize;
        let max_entries = src.remaining() / ENTRY_LEN;
        if count > max_entries {
            return Err(MembershipError::malformed(format!(
                "declared {} entries but the buffer holds at most {}",
                count, max_entries
            )));
        }

        let mut entries = Vec::with_capacity(count);
        for _ in 0..count {
            let addr = Self::decode_addr(src)?;
            let heartbeat = Self::read_bytes(src, HEARTBEAT_LEN)?.get_u64();
            entries.push(WireEntry { addr, heartbeat });
        }
        Ok(MemberListPayload { entries })
    }

    fn encode_header(msg_type: MessageType, sender: &NodeAddr, dst: &mut BytesMut) {
        dst.put_u8(msg_type as u8);
        Self::encode_addr(sender, dst);
    }

    pub(crate) fn encode_addr(addr: &NodeAddr, dst: &mut BytesMut) {
        dst.put_u32(addr.id);
        dst.put_u16(addr.port);
    }

    pub(crate) fn decode_addr(src: &mut BytesMut) -> Result<NodeAddr> {
        let mut bytes = Self::read_bytes(src, 6)?;
        let id = bytes.get_u32();
        let port = bytes.get_u16();
        Ok(NodeAddr::new(id, port))
    }
}
