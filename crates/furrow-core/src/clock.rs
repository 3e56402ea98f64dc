//! Causal clock
//!
//! A per-agent vector clock giving a partial order over fleet events
//! without synchronized wall time. An agent only increments its own entry;
//! merge is entrywise max; unknown agents are admitted at zero so the
//! clock grows as fleet members are discovered. Entries are never pruned
//! while the agent is active.

use std::collections::BTreeMap;

use crate::AgentId;

/// Result of comparing two causal clocks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CausalOrder {
    /// Every entry of `a` <= `b`, at least one strictly less.
    Before,
    /// Every entry of `b` <= `a`, at least one strictly less.
    After,
    /// All entries match.
    Equal,
    /// Neither dominates.
    Concurrent,
}

/// Vector clock over the fleet. Keys are kept in a `BTreeMap` so the wire
/// encoding is deterministic.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CausalClock {
    counters: BTreeMap<AgentId, u64>,
}

impl CausalClock {
    /// Empty clock.
    pub fn new() -> Self {
        CausalClock {
            counters: BTreeMap::new(),
        }
    }

    /// Clock seeded with zero for every known fleet member.
    pub fn seeded<I>(fleet: I) -> Self
    where
        I: IntoIterator<Item = AgentId>,
    {
        CausalClock {
            counters: fleet.into_iter().map(|id| (id, 0)).collect(),
        }
    }

    /// Counter for one agent (0 if unknown).
    #[inline]
    pub fn get(&self, agent: &AgentId) -> u64 {
        self.counters.get(agent).copied().unwrap_or(0)
    }

    /// Number of known agents.
    pub fn len(&self) -> usize {
        self.counters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }

    /// Increment this agent's own entry and return the new snapshot.
    pub fn increment(&mut self, self_id: &AgentId) -> CausalClock {
        *self.counters.entry(self_id.clone()).or_insert(0) += 1;
        self.clone()
    }

    /// Entrywise max with another clock. Idempotent and commutative;
    /// agents unknown to either side are admitted at zero.
    pub fn merge(&mut self, other: &CausalClock) {
        for (agent, &counter) in &other.counters {
            self.counters
                .entry(agent.clone())
                .and_modify(|c| *c = (*c).max(counter))
                .or_insert(counter);
        }
    }

    /// Compare two clocks under the causal partial order.
    pub fn compare(a: &CausalClock, b: &CausalClock) -> CausalOrder {
        let mut a_less = false;
        let mut b_less = false;

        for (agent, &ac) in &a.counters {
            let bc = b.get(agent);
            if ac < bc {
                a_less = true;
            } else if ac > bc {
                b_less = true;
            }
        }
        // Entries present only in b
        for (agent, &bc) in &b.counters {
            if !a.counters.contains_key(agent) && bc > 0 {
                a_less = true;
            }
        }

        match (a_less, b_less) {
            (false, false) => CausalOrder::Equal,
            (true, false) => CausalOrder::Before,
            (false, true) => CausalOrder::After,
            (true, true) => CausalOrder::Concurrent,
        }
    }

    /// Iterate entries in id order.
    pub fn entries(&self) -> impl Iterator<Item = (&AgentId, u64)> {
        self.counters.iter().map(|(a, &c)| (a, c))
    }

    /// Encode as u16 count followed by (id, u64 counter) entries.
    pub fn encode(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&(self.counters.len() as u16).to_le_bytes());
        for (agent, &counter) in &self.counters {
            agent.encode(buf);
            buf.extend_from_slice(&counter.to_le_bytes());
        }
    }

    /// Decode, returning the clock and bytes consumed.
    pub fn decode(buf: &[u8]) -> Option<(Self, usize)> {
        if buf.len() < 2 {
            return None;
        }
        let count = u16::from_le_bytes([buf[0], buf[1]]) as usize;
        let mut offset = 2;
        let mut counters = BTreeMap::new();

        for _ in 0..count {
            let (agent, used) = AgentId::decode(&buf[offset..])?;
            offset += used;
            if buf.len() < offset + 8 {
                return None;
            }
            let counter = u64::from_le_bytes(buf[offset..offset + 8].try_into().ok()?);
            offset += 8;
            counters.insert(agent, counter);
        }

        Some((CausalClock { counters }, offset))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent(s: &str) -> AgentId {
        AgentId::new(s)
    }

    #[test]
    fn test_increment_returns_snapshot() {
        let mut clock = CausalClock::new();
        let snap = clock.increment(&agent("a"));
        assert_eq!(snap.get(&agent("a")), 1);
        clock.increment(&agent("a"));
        // Snapshot unaffected by later increments
        assert_eq!(snap.get(&agent("a")), 1);
        assert_eq!(clock.get(&agent("a")), 2);
    }

    #[test]
    fn test_seeded_starts_at_zero() {
        let clock = CausalClock::seeded([agent("a"), agent("b")]);
        assert_eq!(clock.len(), 2);
        assert_eq!(clock.get(&agent("a")), 0);
        assert_eq!(clock.get(&agent("b")), 0);
    }

    #[test]
    fn test_compare_before_after() {
        let mut a = CausalClock::new();
        a.increment(&agent("x"));

        let mut b = a.clone();
        b.increment(&agent("x"));

        assert_eq!(CausalClock::compare(&a, &b), CausalOrder::Before);
        assert_eq!(CausalClock::compare(&b, &a), CausalOrder::After);
        assert_eq!(CausalClock::compare(&a, &a), CausalOrder::Equal);
    }

    #[test]
    fn test_compare_concurrent() {
        let mut a = CausalClock::new();
        a.increment(&agent("x"));

        let mut b = CausalClock::new();
        b.increment(&agent("y"));

        assert_eq!(CausalClock::compare(&a, &b), CausalOrder::Concurrent);
        assert_eq!(CausalClock::compare(&b, &a), CausalOrder::Concurrent);
    }

    #[test]
    fn test_compare_unequal_id_sets() {
        // a knows {x}, b knows {x, y}; b dominates
        let mut a = CausalClock::new();
        a.increment(&agent("x"));

        let mut b = a.clone();
        b.increment(&agent("y"));

        assert_eq!(CausalClock::compare(&a, &b), CausalOrder::Before);

        // A zero entry on one side only does not break equality
        let seeded = CausalClock::seeded([agent("x"), agent("z")]);
        let mut bare = CausalClock::new();
        bare.increment(&agent("x"));
        let mut seeded_x = seeded.clone();
        seeded_x.increment(&agent("x"));
        assert_eq!(CausalClock::compare(&bare, &seeded_x), CausalOrder::Equal);
    }

    #[test]
    fn test_merge_entrywise_max_and_idempotent() {
        let mut a = CausalClock::new();
        a.increment(&agent("x"));
        a.increment(&agent("x"));

        let mut b = CausalClock::new();
        b.increment(&agent("x"));
        b.increment(&agent("y"));

        a.merge(&b);
        assert_eq!(a.get(&agent("x")), 2);
        assert_eq!(a.get(&agent("y")), 1);

        let before = a.clone();
        a.merge(&b);
        assert_eq!(a, before);
    }

    #[test]
    fn test_merge_commutative() {
        let mut a = CausalClock::new();
        a.increment(&agent("x"));
        a.increment(&agent("z"));

        let mut b = CausalClock::new();
        b.increment(&agent("y"));
        b.increment(&agent("y"));

        let mut ab = a.clone();
        ab.merge(&b);
        let mut ba = b.clone();
        ba.merge(&a);
        assert_eq!(ab, ba);
    }

    #[test]
    fn test_clock_codec_roundtrip() {
        let mut clock = CausalClock::seeded([agent("tractor-01"), agent("tractor-02")]);
        clock.increment(&agent("tractor-01"));
        clock.increment(&agent("tractor-03"));

        let mut buf = Vec::new();
        clock.encode(&mut buf);

        let (decoded, used) = CausalClock::decode(&buf).unwrap();
        assert_eq!(used, buf.len());
        assert_eq!(decoded, clock);
    }

    #[test]
    fn test_clock_decode_truncated() {
        let mut clock = CausalClock::new();
        clock.increment(&agent("a"));
        let mut buf = Vec::new();
        clock.encode(&mut buf);

        assert!(CausalClock::decode(&buf[..buf.len() - 1]).is_none());
        assert!(CausalClock::decode(&[0x01]).is_none());
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        fn arb_clock() -> impl Strategy<Value = CausalClock> {
            proptest::collection::btree_map(0..6u8, 1..40u64, 0..6).prop_map(|entries| {
                let mut clock = CausalClock::new();
                for (id, count) in entries {
                    let a = agent(&format!("t-{id:02}"));
                    for _ in 0..count {
                        clock.increment(&a);
                    }
                }
                clock
            })
        }

        proptest! {
            #[test]
            fn prop_merge_commutative(a in arb_clock(), b in arb_clock()) {
                let mut ab = a.clone();
                ab.merge(&b);
                let mut ba = b.clone();
                ba.merge(&a);
                prop_assert_eq!(ab, ba);
            }

            #[test]
            fn prop_merge_idempotent(a in arb_clock(), b in arb_clock()) {
                let mut once = a.clone();
                once.merge(&b);
                let mut twice = once.clone();
                twice.merge(&b);
                prop_assert_eq!(twice, once);
            }

            #[test]
            fn prop_compare_antisymmetric(a in arb_clock(), b in arb_clock()) {
                let forward = CausalClock::compare(&a, &b);
                let backward = CausalClock::compare(&b, &a);
                let expected = match forward {
                    CausalOrder::Before => CausalOrder::After,
                    CausalOrder::After => CausalOrder::Before,
                    other => other,
                };
                prop_assert_eq!(backward, expected);
            }
        }
    }
}
