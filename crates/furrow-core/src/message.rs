//! Message model
//!
//! A message is the unit handed to the reliable channel: identity, priority
//! class, sender, causal-clock snapshot, opaque payload, and whether the
//! sender requires delivery confirmation. The codec is a compact manual
//! little-endian form suitable for fragmentation over the bus.

use crate::{AgentId, CausalClock, FurrowError, FurrowResult, MessageId, Priority};

const FLAG_REQUIRE_ACK: u8 = 0b0000_0001;

/// A coordination message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    /// Unique id (per sender sequence, see [`MessageId::derive`]).
    pub id: MessageId,
    /// Priority class.
    pub priority: Priority,
    /// Sending agent.
    pub sender: AgentId,
    /// Causal clock snapshot at send time.
    pub clock: CausalClock,
    /// Opaque payload; the coordination layer defines its encoding.
    pub payload: Vec<u8>,
    /// Whether the sender expects an acknowledgment.
    pub require_ack: bool,
}

impl Message {
    pub fn new(
        id: MessageId,
        priority: Priority,
        sender: AgentId,
        clock: CausalClock,
        payload: Vec<u8>,
        require_ack: bool,
    ) -> Self {
        Message {
            id,
            priority,
            sender,
            clock,
            payload,
            require_ack,
        }
    }

    /// The sender's own counter in the carried snapshot. Within one
    /// sender->receiver pair this is the causal delivery order key.
    pub fn sender_seq(&self) -> u64 {
        self.clock.get(&self.sender)
    }

    /// Encode to wire bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(32 + self.payload.len());
        buf.extend_from_slice(&self.id.to_bytes());
        buf.push(self.priority.to_byte());
        buf.push(if self.require_ack { FLAG_REQUIRE_ACK } else { 0 });
        self.sender.encode(&mut buf);
        self.clock.encode(&mut buf);
        // u32 length: full-state resync deltas can exceed 64 KiB
        buf.extend_from_slice(&(self.payload.len() as u32).to_le_bytes());
        buf.extend_from_slice(&self.payload);
        buf
    }

    /// Decode from wire bytes. Fails atomically: a corrupt buffer yields an
    /// error and no partial message.
    pub fn decode(buf: &[u8]) -> FurrowResult<Self> {
        if buf.len() < 10 {
            return Err(FurrowError::BufferTooShort {
                expected: 10,
                actual: buf.len(),
            });
        }

        let id = MessageId::from_bytes(buf[0..8].try_into().unwrap());
        let priority =
            Priority::from_byte(buf[8]).ok_or(FurrowError::UnknownPriority(buf[8]))?;
        let require_ack = buf[9] & FLAG_REQUIRE_ACK != 0;
        let mut offset = 10;

        let (sender, used) = AgentId::decode(&buf[offset..])
            .ok_or_else(|| FurrowError::CorruptMessage("sender id".into()))?;
        offset += used;

        let (clock, used) = CausalClock::decode(&buf[offset..])
            .ok_or_else(|| FurrowError::CorruptMessage("causal clock".into()))?;
        offset += used;

        if buf.len() < offset + 4 {
            return Err(FurrowError::CorruptMessage("payload length".into()));
        }
        let payload_len =
            u32::from_le_bytes(buf[offset..offset + 4].try_into().unwrap()) as usize;
        offset += 4;

        if buf.len() < offset + payload_len {
            return Err(FurrowError::CorruptMessage("payload".into()));
        }
        let payload = buf[offset..offset + payload_len].to_vec();

        Ok(Message {
            id,
            priority,
            sender,
            clock,
            payload,
            require_ack,
        })
    }
}

/// Outbound delivery lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeliveryState {
    /// Queued, not yet on the wire.
    Pending,
    /// Transmitted, waiting for acknowledgment.
    AwaitingAck,
    /// Acknowledged (terminal).
    Delivered,
    /// Retry budget exhausted (terminal; never reached by Emergency).
    Abandoned,
}
