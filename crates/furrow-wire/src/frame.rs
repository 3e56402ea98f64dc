//! Bus frame format
//!
//! The underlying bus is half-duplex with CAN-FD-class frame sizes, so a
//! frame is at most 64 bytes. Fixed header is 15 bytes:
//! - Byte 0: Version (4 bits) + Frame kind (4 bits)
//! - Byte 1: Priority class
//! - Bytes 2-9: Message ID (LE)
//! - Bytes 10-11: Fragment index (LE)
//! - Bytes 12-13: Fragment count (LE)
//! - Byte 14: Payload length
//!
//! Ack frames carry no payload and a zero fragment count.

use furrow_core::{FurrowError, FurrowResult, MessageId, Priority};

/// Maximum bus frame size (CAN-FD-class payload budget).
pub const MAX_FRAME_SIZE: usize = 64;

/// Fixed header size in bytes.
pub const FRAME_HEADER_SIZE: usize = 15;

/// Payload bytes available per data frame.
pub const MAX_FRAGMENT_PAYLOAD: usize = MAX_FRAME_SIZE - FRAME_HEADER_SIZE;

/// Current wire protocol version.
pub const WIRE_VERSION: u8 = 0;

/// Frame kind nibble.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameKind {
    /// One fragment of an encoded message.
    Data = 0x0,
    /// Acknowledgment of a fully applied message.
    Ack = 0x1,
}

impl FrameKind {
    pub fn from_nibble(n: u8) -> Option<Self> {
        match n {
            0x0 => Some(FrameKind::Data),
            0x1 => Some(FrameKind::Ack),
            _ => None,
        }
    }

    #[inline]
    pub fn to_nibble(self) -> u8 {
        self as u8
    }
}

/// One frame on the bus.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BusFrame {
    pub kind: FrameKind,
    pub priority: Priority,
    pub message_id: MessageId,
    /// Index of this fragment within the message.
    pub frag_index: u16,
    /// Total fragments in the message (0 for acks).
    pub frag_count: u16,
    pub payload: Vec<u8>,
}

impl BusFrame {
    /// Data fragment frame.
    pub fn data(
        message_id: MessageId,
        priority: Priority,
        frag_index: u16,
        frag_count: u16,
        payload: Vec<u8>,
    ) -> Self {
        BusFrame {
            kind: FrameKind::Data,
            priority,
            message_id,
            frag_index,
            frag_count,
            payload,
        }
    }

    /// Acknowledgment frame for a message.
    pub fn ack(message_id: MessageId, priority: Priority) -> Self {
        BusFrame {
            kind: FrameKind::Ack,
            priority,
            message_id,
            frag_index: 0,
            frag_count: 0,
            payload: Vec::new(),
        }
    }

    /// Serialize to bus bytes.
    pub fn serialize(&self) -> FurrowResult<Vec<u8>> {
        if self.payload.len() > MAX_FRAGMENT_PAYLOAD {
            return Err(FurrowError::InvalidWireFormat(format!(
                "fragment payload too large: {} > {}",
                self.payload.len(),
                MAX_FRAGMENT_PAYLOAD
            )));
        }

        let mut buf = vec![0u8; FRAME_HEADER_SIZE + self.payload.len()];
        buf[0] = (WIRE_VERSION << 4) | self.kind.to_nibble();
        buf[1] = self.priority.to_byte();
        buf[2..10].copy_from_slice(&self.message_id.to_bytes());
        buf[10..12].copy_from_slice(&self.frag_index.to_le_bytes());
        buf[12..14].copy_from_slice(&self.frag_count.to_le_bytes());
        buf[14] = self.payload.len() as u8;
        buf[FRAME_HEADER_SIZE..].copy_from_slice(&self.payload);
        Ok(buf)
    }

    /// Parse from bus bytes.
    pub fn parse(buf: &[u8]) -> FurrowResult<Self> {
        if buf.len() < FRAME_HEADER_SIZE {
            return Err(FurrowError::BufferTooShort {
                expected: FRAME_HEADER_SIZE,
                actual: buf.len(),
            });
        }

        let version = buf[0] >> 4;
        if version != WIRE_VERSION {
            return Err(FurrowError::InvalidWireFormat(format!(
                "unsupported wire version {version}"
            )));
        }
        let kind = FrameKind::from_nibble(buf[0] & 0x0F)
            .ok_or(FurrowError::UnknownFrameKind(buf[0] & 0x0F))?;
        let priority = Priority::from_byte(buf[1]).ok_or(FurrowError::UnknownPriority(buf[1]))?;
        let message_id = MessageId::from_bytes(buf[2..10].try_into().unwrap());
        let frag_index = u16::from_le_bytes([buf[10], buf[11]]);
        let frag_count = u16::from_le_bytes([buf[12], buf[13]]);
        let payload_len = buf[14] as usize;

        if buf.len() < FRAME_HEADER_SIZE + payload_len {
            return Err(FurrowError::BufferTooShort {
                expected: FRAME_HEADER_SIZE + payload_len,
                actual: buf.len(),
            });
        }
        let payload = buf[FRAME_HEADER_SIZE..FRAME_HEADER_SIZE + payload_len].to_vec();

        Ok(BusFrame {
            kind,
            priority,
            message_id,
            frag_index,
            frag_count,
            payload,
        })
    }

    /// Total size on the bus.
    pub fn size(&self) -> usize {
        FRAME_HEADER_SIZE + self.payload.len()
    }
}
