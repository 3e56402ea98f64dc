//! Per-agent coordination core
//!
//! Synchronous, virtual-time state machine owning this agent's causal
//! clock, allocation replica, and reliable channel. Claims and releases
//! apply locally first and then gossip as deltas; inbound deltas merge
//! and propagate onward until replicas are identical. The async runtime
//! drives `step` on a timer and feeds raw frames in; tests drive it with
//! a hand-advanced clock.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::Duration;

use tracing::{debug, warn};

use furrow_alloc::{AllocationDelta, AllocationStore, ClaimResult};
use furrow_channel::{DeliveryEvent, Outgoing, ReliableChannel};
use furrow_core::{AgentId, CausalClock, FurrowResult, MessageId, Priority, SectionId};

use crate::{AgentConfig, CorePayload};

/// Coordination-level outcome surfaced to the consumer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CoreEvent {
    /// A state sync to one peer exhausted its retry budget. The named
    /// sections may be stale on that peer until the next sync reaches it.
    SyncAbandoned {
        peer: AgentId,
        sections: Vec<SectionId>,
    },
    /// An emergency broadcast has gone unacknowledged past the escalation
    /// threshold. Retries continue; the operator should be told.
    EmergencyFault { retries: u32 },
    /// A peer commanded a fleet-wide stop.
    EmergencyReceived { from: AgentId, code: u8 },
}

/// One agent's coordination state.
pub struct CoordinationCore {
    cfg: AgentConfig,
    clock: CausalClock,
    store: AllocationStore,
    channel: ReliableChannel,
    /// In-flight state sync per peer. A newer sync supersedes the pending
    /// one: its records are folded into the new delta and the old message
    /// cancelled, so a peer never needs two generations in flight.
    pending_sync: HashMap<AgentId, (MessageId, AllocationDelta)>,
    events: Vec<CoreEvent>,
    halted: bool,
}

impl CoordinationCore {
    pub fn new(cfg: AgentConfig) -> Self {
        let clock = CausalClock::seeded(cfg.fleet.iter().cloned());
        let channel = ReliableChannel::new(cfg.agent_id.clone(), cfg.channel.clone());
        CoordinationCore {
            cfg,
            clock,
            store: AllocationStore::new(),
            channel,
            pending_sync: HashMap::new(),
            events: Vec::new(),
            halted: false,
        }
    }

    pub fn agent_id(&self) -> &AgentId {
        &self.cfg.agent_id
    }

    /// True once an emergency stop has been issued or received. The flag
    /// is advisory for the implement controller; coordination keeps
    /// running so the fleet converges on who stopped where.
    pub fn is_halted(&self) -> bool {
        self.halted
    }

    pub fn owner_of(&self, section: &SectionId) -> Option<&AgentId> {
        self.store.owner_of(section)
    }

    pub fn sections_owned(&self) -> BTreeSet<SectionId> {
        self.store.sections_owned_by(&self.cfg.agent_id)
    }

    pub fn clock(&self) -> &CausalClock {
        &self.clock
    }

    pub fn store(&self) -> &AllocationStore {
        &self.store
    }

    fn wall_ms(&self, now: Duration) -> u64 {
        self.cfg.wall_base_ms + now.as_millis() as u64
    }

    /// Claim a field section. Applies locally and gossips the new record
    /// to every peer; the grant is optimistic and concurrent claims are
    /// settled deterministically by merge.
    pub fn claim(&mut self, section: &SectionId, now: Duration) -> ClaimResult {
        let snap = self.clock.increment(&self.cfg.agent_id);
        let result = self
            .store
            .claim(section, &self.cfg.agent_id, snap, self.wall_ms(now));
        self.sync_dirty(now);
        result
    }

    /// Release a held section. A release by a non-owner is a no-op.
    pub fn release(&mut self, section: &SectionId, now: Duration) {
        let snap = self.clock.increment(&self.cfg.agent_id);
        self.store
            .release(section, &self.cfg.agent_id, snap, self.wall_ms(now));
        self.sync_dirty(now);
    }

    /// Halt this agent and command the rest of the fleet to stop. The
    /// broadcast is Emergency class: retried until acknowledged, with an
    /// escalation fault if a peer stays silent.
    pub fn emergency_stop(&mut self, code: u8, now: Duration) {
        self.halted = true;
        let snap = self.clock.increment(&self.cfg.agent_id);
        let payload = CorePayload::EmergencyStop { code }.encode();
        self.channel.broadcast(
            &self.cfg.peers(),
            payload,
            Priority::Emergency,
            true,
            snap,
            now,
        );
    }

    /// Fire-and-forget telemetry to the whole fleet. Droppable under
    /// congestion by class.
    pub fn publish_telemetry(&mut self, payload: Vec<u8>, now: Duration) {
        let snap = self.clock.increment(&self.cfg.agent_id);
        self.channel.broadcast(
            &self.cfg.peers(),
            payload,
            Priority::Telemetry,
            false,
            snap,
            now,
        );
    }

    /// Feed one raw frame from the bus.
    pub fn handle_frame(&mut self, bytes: &[u8], now: Duration) -> FurrowResult<()> {
        self.channel.handle_frame(bytes, now)
    }

    /// One coordination pass: apply everything the channel has ready,
    /// gossip adopted records onward, translate delivery outcomes, and
    /// return the frames to put on the bus.
    pub fn step(&mut self, now: Duration) -> FurrowResult<Vec<Outgoing>> {
        while let Some(msg) = self.channel.receive() {
            match CorePayload::decode(&msg.payload) {
                Ok(CorePayload::AllocationSync(delta)) => {
                    self.store.merge(&delta);
                    self.clock.merge(&msg.clock);
                    self.channel.commit(&msg.sender, msg.id);
                }
                Ok(CorePayload::EmergencyStop { code }) => {
                    warn!(from = ?msg.sender, code, "emergency stop received");
                    self.halted = true;
                    self.clock.merge(&msg.clock);
                    self.channel.commit(&msg.sender, msg.id);
                    self.events.push(CoreEvent::EmergencyReceived {
                        from: msg.sender,
                        code,
                    });
                }
                Err(e) => {
                    // No commit means no ack; the sender retries with an
                    // intact copy.
                    warn!(id = ?msg.id, error = %e, "dropping corrupt coordination payload");
                }
            }
        }

        // Records adopted above are dirty; push them onward so state
        // reaches agents the writer could not.
        self.sync_dirty(now);

        for event in self.channel.take_events() {
            match event {
                DeliveryEvent::Delivered { id } => {
                    self.pending_sync.retain(|_, (mid, _)| *mid != id);
                }
                DeliveryEvent::Abandoned { id, priority } => {
                    let peer = self
                        .pending_sync
                        .iter()
                        .find(|(_, (mid, _))| *mid == id)
                        .map(|(peer, _)| peer.clone());
                    if let Some((peer, (_, delta))) =
                        peer.and_then(|p| self.pending_sync.remove_entry(&p))
                    {
                        let sections = delta.records.iter().map(|(s, _)| s.clone()).collect();
                        self.events.push(CoreEvent::SyncAbandoned { peer, sections });
                    } else {
                        debug!(?id, ?priority, "droppable delivery abandoned");
                    }
                }
                DeliveryEvent::EscalationRaised { retries, .. } => {
                    self.events.push(CoreEvent::EmergencyFault { retries });
                }
            }
        }

        self.channel.poll(now)
    }

    /// Drain coordination events for the consumer.
    pub fn take_events(&mut self) -> Vec<CoreEvent> {
        std::mem::take(&mut self.events)
    }

    /// Send any dirty records to every peer. A pending unacked sync to a
    /// peer is cancelled and its records folded into the new delta, so
    /// nothing is lost by superseding it.
    fn sync_dirty(&mut self, now: Duration) {
        let Some(delta) = self.store.take_delta() else {
            return;
        };

        for peer in self.cfg.peers() {
            let mut combined: BTreeMap<SectionId, _> = BTreeMap::new();
            if let Some((old_id, old_delta)) = self.pending_sync.remove(&peer) {
                if self.channel.cancel(old_id) {
                    combined.extend(old_delta.records);
                }
            }
            // Newer records replace the superseded sync's copy per section
            combined.extend(delta.records.iter().cloned());

            let combined = AllocationDelta::new(combined.into_iter().collect());
            let payload = CorePayload::AllocationSync(combined.clone()).encode();
            let id = self.channel.send(
                peer.clone(),
                payload,
                Priority::Control,
                true,
                self.clock.clone(),
                now,
            );
            self.pending_sync.insert(peer, (id, combined));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fleet(names: &[&str]) -> Vec<AgentId> {
        names.iter().map(|n| AgentId::new(*n)).collect()
    }

    fn core(name: &str, members: &[&str]) -> CoordinationCore {
        CoordinationCore::new(AgentConfig::new(AgentId::new(name), fleet(members)))
    }

    /// Step every core and deliver all output to its destination, looping
    /// until a full round produces no frames. Lossless virtual bus.
    fn settle(cores: &mut [CoordinationCore], now: Duration) {
        for _ in 0..32 {
            let mut batches = Vec::new();
            for core in cores.iter_mut() {
                batches.extend(core.step(now).unwrap());
            }
            if batches.is_empty() {
                return;
            }
            for outgoing in batches {
                let dest = cores
                    .iter_mut()
                    .find(|c| *c.agent_id() == outgoing.destination)
                    .unwrap();
                for frame in &outgoing.frames {
                    dest.handle_frame(&frame.serialize().unwrap(), now).unwrap();
                }
            }
        }
        panic!("fleet did not quiesce");
    }

    #[test]
    fn test_claim_propagates_to_peers() {
        let members = ["tractor-01", "tractor-02", "tractor-03"];
        let mut cores = vec![
            core("tractor-01", &members),
            core("tractor-02", &members),
            core("tractor-03", &members),
        ];
        let s = SectionId::new("field-7/strip-3");

        assert_eq!(cores[0].claim(&s, Duration::ZERO), ClaimResult::Granted);
        settle(&mut cores, Duration::ZERO);

        for c in &cores {
            assert_eq!(c.owner_of(&s), Some(&AgentId::new("tractor-01")));
        }
    }

    #[test]
    fn test_concurrent_claims_settle_identically() {
        let members = ["tractor-01", "tractor-02"];
        let mut cores = vec![core("tractor-01", &members), core("tractor-02", &members)];
        let s = SectionId::new("strip-9");

        // Both claim before hearing from the other; both grants are
        // optimistic and one is revoked by merge.
        assert_eq!(cores[0].claim(&s, Duration::ZERO), ClaimResult::Granted);
        assert_eq!(cores[1].claim(&s, Duration::ZERO), ClaimResult::Granted);
        settle(&mut cores, Duration::ZERO);

        let owner = cores[0].owner_of(&s).cloned();
        assert!(owner.is_some());
        assert_eq!(cores[1].owner_of(&s), owner.as_ref());
    }

    #[test]
    fn test_release_frees_section_for_peer() {
        let members = ["tractor-01", "tractor-02"];
        let mut cores = vec![core("tractor-01", &members), core("tractor-02", &members)];
        let s = SectionId::new("strip-1");

        cores[0].claim(&s, Duration::ZERO);
        settle(&mut cores, Duration::ZERO);

        let later = Duration::from_millis(100);
        cores[0].release(&s, later);
        settle(&mut cores, later);

        assert_eq!(cores[1].claim(&s, Duration::from_millis(200)), ClaimResult::Granted);
        let after = Duration::from_millis(200);
        settle(&mut cores, after);
        for c in &cores {
            assert_eq!(c.owner_of(&s), Some(&AgentId::new("tractor-02")));
        }
    }

    #[test]
    fn test_emergency_stop_halts_fleet() {
        let members = ["tractor-01", "tractor-02", "tractor-03"];
        let mut cores = vec![
            core("tractor-01", &members),
            core("tractor-02", &members),
            core("tractor-03", &members),
        ];

        cores[1].emergency_stop(4, Duration::ZERO);
        settle(&mut cores, Duration::ZERO);

        for c in &cores {
            assert!(c.is_halted());
        }
        let events = cores[2].take_events();
        assert_eq!(
            events,
            vec![CoreEvent::EmergencyReceived {
                from: AgentId::new("tractor-02"),
                code: 4,
            }]
        );
        // Every peer acked, so no retries remain outstanding
        let out = cores[1].step(Duration::from_secs(60)).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_newer_sync_supersedes_pending_one() {
        let members = ["tractor-01", "tractor-02"];
        let mut cores = vec![core("tractor-01", &members), core("tractor-02", &members)];
        let s1 = SectionId::new("strip-1");
        let s2 = SectionId::new("strip-2");

        // Two claims with the first sync never delivered: the second sync
        // must carry both records.
        cores[0].claim(&s1, Duration::ZERO);
        cores[0].claim(&s2, Duration::ZERO);
        settle(&mut cores, Duration::ZERO);

        assert_eq!(cores[1].owner_of(&s1), Some(&AgentId::new("tractor-01")));
        assert_eq!(cores[1].owner_of(&s2), Some(&AgentId::new("tractor-01")));
    }
}
