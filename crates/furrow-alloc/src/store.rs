//! Replicated allocation store
//!
//! One instance per agent, fully replicated. Local claims and releases
//! complete instantly with no network round-trip; replicas converge by
//! exchanging deltas and merging with the deterministic resolution in
//! [`OwnershipRecord`]. Merge is idempotent, commutative, and associative,
//! so merge order and duplication cannot affect the final state.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, warn};

use furrow_core::{AgentId, CausalClock, FurrowResult, SectionId};

use crate::{AllocationDelta, ClaimResult, OwnershipRecord};

/// Per-agent replica of field section ownership.
#[derive(Clone, Debug, Default)]
pub struct AllocationStore {
    /// Section registers. Keys are never deleted: a release writes a
    /// tombstone so it propagates like any other write.
    records: BTreeMap<SectionId, OwnershipRecord>,
    /// Sections written since the last delta drain.
    dirty: BTreeSet<SectionId>,
}

impl AllocationStore {
    pub fn new() -> Self {
        AllocationStore::default()
    }

    /// Attempt to claim a section. Grants immediately when the section is
    /// unowned or already held by `agent`; denial is routine and may be
    /// stale until merge-based resolution completes.
    pub fn claim(
        &mut self,
        section: &SectionId,
        agent: &AgentId,
        clock: CausalClock,
        now_ms: u64,
    ) -> ClaimResult {
        if let Some(record) = self.records.get(section) {
            if let Some(owner) = &record.owner {
                if owner != agent {
                    return ClaimResult::Denied {
                        owner: owner.clone(),
                    };
                }
            }
        }

        self.write(
            section.clone(),
            OwnershipRecord::claim(agent.clone(), clock, now_ms),
        );
        ClaimResult::Granted
    }

    /// Release a section. No-op unless `agent` is the current owner in
    /// local state - a stale release is harmless.
    pub fn release(
        &mut self,
        section: &SectionId,
        agent: &AgentId,
        clock: CausalClock,
        now_ms: u64,
    ) {
        let owned_by_agent = self
            .records
            .get(section)
            .map_or(false, |r| r.owner.as_ref() == Some(agent));
        if !owned_by_agent {
            return;
        }

        self.write(
            section.clone(),
            OwnershipRecord::release(agent.clone(), clock, now_ms),
        );
    }

    /// Current owner of a section, if any.
    pub fn owner_of(&self, section: &SectionId) -> Option<&AgentId> {
        self.records.get(section).and_then(|r| r.owner.as_ref())
    }

    /// True when no agent currently owns the section (never claimed, or
    /// released).
    pub fn is_unowned(&self, section: &SectionId) -> bool {
        self.owner_of(section).is_none()
    }

    /// All sections currently owned by one agent.
    pub fn sections_owned_by(&self, agent: &AgentId) -> BTreeSet<SectionId> {
        self.records
            .iter()
            .filter(|(_, r)| r.owner.as_ref() == Some(agent))
            .map(|(s, _)| s.clone())
            .collect()
    }

    /// Sections with a register entry (claimed or released).
    pub fn sections(&self) -> impl Iterator<Item = &SectionId> {
        self.records.keys()
    }

    /// The register entry for a section.
    pub fn record(&self, section: &SectionId) -> Option<&OwnershipRecord> {
        self.records.get(section)
    }

    /// Merge one remote record. Returns true when the remote record was
    /// adopted. An adopted record is marked dirty so it propagates onward.
    pub fn merge_record(&mut self, section: SectionId, remote: OwnershipRecord) -> bool {
        match self.records.get(&section) {
            Some(local) if !OwnershipRecord::remote_wins(local, &remote) => false,
            _ => {
                debug!(
                    section = %section,
                    owner = remote.owner.as_ref().map(|a| a.as_str()).unwrap_or("<released>"),
                    "adopting remote ownership record"
                );
                self.write(section, remote);
                true
            }
        }
    }

    /// Merge a typed delta.
    pub fn merge(&mut self, delta: &AllocationDelta) {
        for (section, record) in &delta.records {
            self.merge_record(section.clone(), record.clone());
        }
    }

    /// Merge an entire remote replica.
    pub fn merge_store(&mut self, remote: &AllocationStore) {
        for (section, record) in &remote.records {
            self.merge_record(section.clone(), record.clone());
        }
    }

    /// Decode and merge a serialized delta. A corrupt payload is rejected
    /// wholesale - nothing is applied - and the error is absorbed here
    /// after logging, per the propagation policy.
    pub fn merge_encoded(&mut self, buf: &[u8]) -> FurrowResult<()> {
        match AllocationDelta::decode(buf) {
            Ok(delta) => {
                self.merge(&delta);
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "rejecting corrupt allocation delta");
                Err(e)
            }
        }
    }

    /// Drain the records written since the last drain, for broadcast.
    /// Returns `None` when nothing changed.
    pub fn take_delta(&mut self) -> Option<AllocationDelta> {
        if self.dirty.is_empty() {
            return None;
        }
        let records = std::mem::take(&mut self.dirty)
            .into_iter()
            .filter_map(|s| self.records.get(&s).map(|r| (s.clone(), r.clone())))
            .collect();
        Some(AllocationDelta::new(records))
    }

    /// Full-state delta, for resynchronizing a peer after partition.
    pub fn full_delta(&self) -> AllocationDelta {
        AllocationDelta::new(
            self.records
                .iter()
                .map(|(s, r)| (s.clone(), r.clone()))
                .collect(),
        )
    }

    fn write(&mut self, section: SectionId, record: OwnershipRecord) {
        self.dirty.insert(section.clone());
        self.records.insert(section, record);
    }
}
