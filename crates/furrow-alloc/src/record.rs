//! Ownership records and conflict resolution
//!
//! Each field section is a last-writer-wins register. A record with
//! `owner: None` is a release tombstone: releases must propagate and
//! converge exactly like claims, otherwise a released section could be
//! resurrected by an old claim arriving after the release.
//!
//! Resolution between a local and a remote record is a three-level
//! deterministic tie-break:
//! 1. causal dominance - the record whose clock is strictly after wins;
//! 2. if concurrent, the later wall-clock timestamp wins;
//! 3. if timestamps tie, the lexicographically smaller writer id wins.

use furrow_core::{AgentId, CausalClock, CausalOrder};

/// Result of a local claim attempt. Denial is routine, not an error, and
/// may itself be stale until merge-based resolution completes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClaimResult {
    /// Ownership recorded locally.
    Granted,
    /// Section currently owned by another agent.
    Denied { owner: AgentId },
}

/// One LWW register entry for a section.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OwnershipRecord {
    /// Current owner; `None` marks the section released.
    pub owner: Option<AgentId>,
    /// Agent that performed this write. Equals `owner` for claims and the
    /// releasing agent for tombstones; this is the level-3 tie-break key.
    pub writer: AgentId,
    /// Causal clock snapshot at write time.
    pub clock: CausalClock,
    /// Wall-clock milliseconds, tie-break only.
    pub stamped_at_ms: u64,
}

impl OwnershipRecord {
    /// Record for a fresh claim.
    pub fn claim(owner: AgentId, clock: CausalClock, now_ms: u64) -> Self {
        OwnershipRecord {
            owner: Some(owner.clone()),
            writer: owner,
            clock,
            stamped_at_ms: now_ms,
        }
    }

    /// Release tombstone.
    pub fn release(writer: AgentId, clock: CausalClock, now_ms: u64) -> Self {
        OwnershipRecord {
            owner: None,
            writer,
            clock,
            stamped_at_ms: now_ms,
        }
    }

    /// Does the remote record win over the local one? Deterministic and
    /// symmetric: `resolve(a, b)` and `resolve(b, a)` never both hold for
    /// differing records, so merge order cannot affect the outcome.
    pub fn remote_wins(local: &OwnershipRecord, remote: &OwnershipRecord) -> bool {
        if local == remote {
            return false;
        }

        match CausalClock::compare(&local.clock, &remote.clock) {
            CausalOrder::Before => true,
            CausalOrder::After => false,
            CausalOrder::Equal | CausalOrder::Concurrent => {
                if remote.stamped_at_ms != local.stamped_at_ms {
                    return remote.stamped_at_ms > local.stamped_at_ms;
                }
                if remote.writer != local.writer {
                    return remote.writer < local.writer;
                }
                // Same writer, clock, and timestamp with differing content
                // only occurs on corrupt input; still resolve totally.
                remote.owner < local.owner
            }
        }
    }

    /// Encode: flag byte, optional owner, writer, clock, timestamp.
    pub fn encode(&self, buf: &mut Vec<u8>) {
        buf.push(self.owner.is_some() as u8);
        if let Some(owner) = &self.owner {
            owner.encode(buf);
        }
        self.writer.encode(buf);
        self.clock.encode(buf);
        buf.extend_from_slice(&self.stamped_at_ms.to_le_bytes());
    }

    /// Decode, returning the record and bytes consumed.
    pub fn decode(buf: &[u8]) -> Option<(Self, usize)> {
        if buf.is_empty() {
            return None;
        }
        let has_owner = match buf[0] {
            0 => false,
            1 => true,
            _ => return None,
        };
        let mut offset = 1;

        let owner = if has_owner {
            let (id, used) = AgentId::decode(&buf[offset..])?;
            offset += used;
            Some(id)
        } else {
            None
        };

        let (writer, used) = AgentId::decode(&buf[offset..])?;
        offset += used;

        let (clock, used) = CausalClock::decode(&buf[offset..])?;
        offset += used;

        if buf.len() < offset + 8 {
            return None;
        }
        let stamped_at_ms = u64::from_le_bytes(buf[offset..offset + 8].try_into().ok()?);
        offset += 8;

        Some((
            OwnershipRecord {
                owner,
                writer,
                clock,
                stamped_at_ms,
            },
            offset,
        ))
    }
}
