//! Coordination payload encoding
//!
//! What the coordination layer puts inside channel messages: allocation
//! state deltas and emergency stop commands. Tagged-byte encoding in the
//! same style as the rest of the wire formats; decode fails atomically.

use furrow_alloc::AllocationDelta;
use furrow_core::{FurrowError, FurrowResult};

const TAG_ALLOCATION_SYNC: u8 = 0x01;
const TAG_EMERGENCY_STOP: u8 = 0x02;

/// Payload of a coordination message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CorePayload {
    /// Allocation records to merge into the receiver's replica.
    AllocationSync(AllocationDelta),
    /// Fleet-wide stop command. `code` identifies the cause class
    /// (operator stop, collision avoidance, implement fault, ...).
    EmergencyStop { code: u8 },
}

impl CorePayload {
    pub fn encode(&self) -> Vec<u8> {
        match self {
            CorePayload::AllocationSync(delta) => {
                let mut buf = vec![TAG_ALLOCATION_SYNC];
                buf.extend_from_slice(&delta.encode());
                buf
            }
            CorePayload::EmergencyStop { code } => vec![TAG_EMERGENCY_STOP, *code],
        }
    }

    pub fn decode(buf: &[u8]) -> FurrowResult<Self> {
        match buf.first() {
            Some(&TAG_ALLOCATION_SYNC) => {
                Ok(CorePayload::AllocationSync(AllocationDelta::decode(&buf[1..])?))
            }
            Some(&TAG_EMERGENCY_STOP) => {
                if buf.len() != 2 {
                    return Err(FurrowError::CorruptMessage("emergency stop length".into()));
                }
                Ok(CorePayload::EmergencyStop { code: buf[1] })
            }
            Some(&tag) => Err(FurrowError::CorruptMessage(format!(
                "unknown payload tag {tag:#04x}"
            ))),
            None => Err(FurrowError::BufferTooShort {
                expected: 1,
                actual: 0,
            }),
        }
    }
}
