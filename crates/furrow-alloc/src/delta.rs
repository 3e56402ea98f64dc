//! Delta codec for allocation state
//!
//! Full-state transfer does not fit a half-duplex CAN-class bus once the
//! field is subdivided finely, so replicas exchange deltas: only the
//! records written since the last drain. Decoding is atomic - a corrupt
//! buffer yields an error and nothing is applied.

use furrow_core::{FurrowError, FurrowResult, SectionId};

use crate::OwnershipRecord;

/// Delta codec version.
pub const DELTA_VERSION: u8 = 1;

/// A batch of section records to merge into a remote replica.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AllocationDelta {
    pub records: Vec<(SectionId, OwnershipRecord)>,
}

impl AllocationDelta {
    pub fn new(records: Vec<(SectionId, OwnershipRecord)>) -> Self {
        AllocationDelta { records }
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Encode: version byte, u16 record count, then per-record
    /// section id + ownership record.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(3 + self.records.len() * 48);
        buf.push(DELTA_VERSION);
        buf.extend_from_slice(&(self.records.len() as u16).to_le_bytes());
        for (section, record) in &self.records {
            section.encode(&mut buf);
            record.encode(&mut buf);
        }
        buf
    }

    /// Decode a delta. Rejected wholesale on any malformation.
    pub fn decode(buf: &[u8]) -> FurrowResult<Self> {
        if buf.len() < 3 {
            return Err(FurrowError::BufferTooShort {
                expected: 3,
                actual: buf.len(),
            });
        }
        if buf[0] != DELTA_VERSION {
            return Err(FurrowError::CorruptDelta(format!(
                "unsupported version {}",
                buf[0]
            )));
        }

        let count = u16::from_le_bytes([buf[1], buf[2]]) as usize;
        let mut offset = 3;
        let mut records = Vec::with_capacity(count);

        for _ in 0..count {
            let (section, used) = SectionId::decode(&buf[offset..])
                .ok_or_else(|| FurrowError::CorruptDelta("section id".into()))?;
            offset += used;

            let (record, used) = OwnershipRecord::decode(&buf[offset..])
                .ok_or_else(|| FurrowError::CorruptDelta("ownership record".into()))?;
            offset += used;

            records.push((section, record));
        }

        if offset != buf.len() {
            return Err(FurrowError::CorruptDelta("trailing bytes".into()));
        }

        Ok(AllocationDelta { records })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use furrow_core::{AgentId, CausalClock};

    fn sample_delta() -> AllocationDelta {
        let owner = AgentId::new("tractor-01");
        let mut clock = CausalClock::new();
        clock.increment(&owner);
        AllocationDelta::new(vec![
            (
                SectionId::new("s1"),
                OwnershipRecord::claim(owner.clone(), clock.clone(), 100),
            ),
            (
                SectionId::new("s2"),
                OwnershipRecord::release(owner, clock, 120),
            ),
        ])
    }

    #[test]
    fn test_delta_roundtrip() {
        let delta = sample_delta();
        let bytes = delta.encode();
        let decoded = AllocationDelta::decode(&bytes).unwrap();
        assert_eq!(decoded, delta);
    }

    #[test]
    fn test_delta_rejects_corruption_wholesale() {
        let bytes = sample_delta().encode();

        // Truncation anywhere fails
        assert!(AllocationDelta::decode(&bytes[..bytes.len() - 1]).is_err());
        // Trailing garbage fails
        let mut padded = bytes.clone();
        padded.push(0xFF);
        assert!(AllocationDelta::decode(&padded).is_err());
        // Bad version fails
        let mut bad = bytes;
        bad[0] = 0x7F;
        assert!(AllocationDelta::decode(&bad).is_err());
    }
}
