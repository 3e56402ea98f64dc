//! Inbound message pipeline
//!
//! Frames are reassembled, decoded (corrupt input rejected wholesale),
//! deduplicated against a bounded per-sender window, and queued in
//! priority-then-causal order. Acks are emitted on `commit` - after the
//! caller has successfully applied the message - not on receipt; a
//! duplicate of a committed message is re-acked and discarded without
//! reprocessing.

use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::time::Duration;

use tracing::warn;

use furrow_core::{AgentId, FurrowResult, Message, MessageId, Priority};
use furrow_wire::{BusFrame, Reassembler};

use crate::ChannelConfig;

#[derive(Clone, Copy, Debug)]
struct SeenEntry {
    committed: bool,
    require_ack: bool,
    priority: Priority,
}

/// Bounded record of recently seen message ids for one sender. Oldest
/// entries are evicted - bounded memory is traded for perfect dedup under
/// sustained partition.
struct SeenWindow {
    entries: HashMap<MessageId, SeenEntry>,
    order: VecDeque<MessageId>,
    capacity: usize,
}

impl SeenWindow {
    fn new(capacity: usize) -> Self {
        SeenWindow {
            entries: HashMap::new(),
            order: VecDeque::new(),
            capacity,
        }
    }

    fn get(&self, id: MessageId) -> Option<&SeenEntry> {
        self.entries.get(&id)
    }

    fn insert(&mut self, id: MessageId, entry: SeenEntry) {
        if self.entries.insert(id, entry).is_none() {
            self.order.push_back(id);
            while self.order.len() > self.capacity {
                if let Some(old) = self.order.pop_front() {
                    self.entries.remove(&old);
                }
            }
        }
    }

    fn mark_committed(&mut self, id: MessageId) -> Option<SeenEntry> {
        let entry = self.entries.get_mut(&id)?;
        entry.committed = true;
        Some(*entry)
    }
}

/// Heap entry; `Ord` is reversed so the `BinaryHeap` pops the highest
/// priority (lowest rank), then lowest sender counter, then arrival.
struct Ready {
    message: Message,
    sender_seq: u64,
    arrival: u64,
}

impl Ready {
    fn key(&self) -> (u8, u64, u64) {
        (self.message.priority.rank(), self.sender_seq, self.arrival)
    }
}

impl PartialEq for Ready {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}
impl Eq for Ready {}
impl PartialOrd for Ready {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Ready {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        other.key().cmp(&self.key())
    }
}

/// The receive side of the channel.
pub struct InboundQueue {
    reassembler: Reassembler,
    seen: HashMap<AgentId, SeenWindow>,
    ready: BinaryHeap<Ready>,
    acks_out: Vec<(AgentId, BusFrame)>,
    dedup_window: usize,
    arrival_seq: u64,
}

impl InboundQueue {
    pub fn new(cfg: &ChannelConfig) -> Self {
        InboundQueue {
            reassembler: Reassembler::new(cfg.max_partials, cfg.reassembly_max_age),
            seen: HashMap::new(),
            ready: BinaryHeap::new(),
            acks_out: Vec::new(),
            dedup_window: cfg.dedup_window,
            arrival_seq: 0,
        }
    }

    /// Feed one data frame. Completing a message decodes, dedups, and
    /// queues it; corrupt messages are rejected wholesale and logged.
    pub fn handle_data(&mut self, frame: BusFrame, now: Duration) -> FurrowResult<()> {
        let Some(bytes) = self.reassembler.insert(frame, now) else {
            return Ok(());
        };

        let message = match Message::decode(&bytes) {
            Ok(m) => m,
            Err(e) => {
                warn!(error = %e, "rejecting corrupt inbound message");
                return Err(e);
            }
        };

        let window = self
            .seen
            .entry(message.sender.clone())
            .or_insert_with(|| SeenWindow::new(self.dedup_window));

        if let Some(entry) = window.get(message.id) {
            // Duplicate. Re-ack only if the original was already applied;
            // an uncommitted original will be acked at commit time.
            if entry.committed && entry.require_ack {
                self.acks_out
                    .push((message.sender.clone(), BusFrame::ack(message.id, entry.priority)));
            }
            return Ok(());
        }

        window.insert(
            message.id,
            SeenEntry {
                committed: false,
                require_ack: message.require_ack,
                priority: message.priority,
            },
        );

        self.arrival_seq += 1;
        let ready = Ready {
            sender_seq: message.sender_seq(),
            arrival: self.arrival_seq,
            message,
        };
        self.ready.push(ready);
        Ok(())
    }

    /// Next message in priority-then-causal order; poll-based, never
    /// blocks.
    pub fn next_ready(&mut self) -> Option<Message> {
        self.ready.pop().map(|r| r.message)
    }

    /// Record successful local application of a message; emits the ack if
    /// the sender asked for one.
    pub fn commit(&mut self, sender: &AgentId, id: MessageId) {
        let Some(window) = self.seen.get_mut(sender) else {
            return;
        };
        if let Some(entry) = window.mark_committed(id) {
            if entry.require_ack {
                self.acks_out
                    .push((sender.clone(), BusFrame::ack(id, entry.priority)));
            }
        }
    }

    /// Drain pending outgoing ack frames.
    pub fn take_acks(&mut self) -> Vec<(AgentId, BusFrame)> {
        std::mem::take(&mut self.acks_out)
    }

    /// Drop stale partial reassemblies.
    pub fn sweep(&mut self, now: Duration) {
        self.reassembler.sweep(now);
    }

    /// Messages queued for the caller.
    pub fn ready_count(&self) -> usize {
        self.ready.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use furrow_core::CausalClock;
    use furrow_wire::fragment;

    fn cfg() -> ChannelConfig {
        ChannelConfig::default()
    }

    fn msg(sender: &str, seq: u64, priority: Priority, require_ack: bool) -> Message {
        let sender = AgentId::new(sender);
        let mut clock = CausalClock::new();
        for _ in 0..seq {
            clock.increment(&sender);
        }
        Message::new(
            MessageId::derive(&sender, seq),
            priority,
            sender,
            clock,
            vec![seq as u8; 40],
            require_ack,
        )
    }

    fn feed(q: &mut InboundQueue, m: &Message) {
        for frame in fragment(m.id, m.priority, &m.encode()).unwrap() {
            q.handle_data(frame, Duration::ZERO).unwrap();
        }
    }

    #[test]
    fn test_reassembles_and_queues() {
        let mut q = InboundQueue::new(&cfg());
        let m = msg("a", 1, Priority::Control, true);
        feed(&mut q, &m);

        assert_eq!(q.ready_count(), 1);
        assert_eq!(q.next_ready(), Some(m));
        // No ack before commit
        assert!(q.take_acks().is_empty());
    }

    #[test]
    fn test_commit_emits_ack() {
        let mut q = InboundQueue::new(&cfg());
        let m = msg("a", 1, Priority::Control, true);
        feed(&mut q, &m);
        let got = q.next_ready().unwrap();

        q.commit(&got.sender, got.id);
        let acks = q.take_acks();
        assert_eq!(acks.len(), 1);
        assert_eq!(acks[0].0, got.sender);
        assert_eq!(acks[0].1.message_id, got.id);
    }

    #[test]
    fn test_no_ack_when_not_required() {
        let mut q = InboundQueue::new(&cfg());
        let m = msg("a", 1, Priority::Telemetry, false);
        feed(&mut q, &m);
        let got = q.next_ready().unwrap();
        q.commit(&got.sender, got.id);
        assert!(q.take_acks().is_empty());
    }

    #[test]
    fn test_duplicate_applied_once_acked_twice() {
        let mut q = InboundQueue::new(&cfg());
        let m = msg("a", 1, Priority::Control, true);

        feed(&mut q, &m);
        let got = q.next_ready().unwrap();
        q.commit(&got.sender, got.id);

        // Retry arrives after commit
        feed(&mut q, &m);

        // Exactly one state change...
        assert_eq!(q.ready_count(), 0);
        // ...and two acks in total (one at commit, one for the duplicate)
        assert_eq!(q.take_acks().len(), 2);
    }

    #[test]
    fn test_duplicate_before_commit_not_acked() {
        let mut q = InboundQueue::new(&cfg());
        let m = msg("a", 1, Priority::Control, true);

        feed(&mut q, &m);
        feed(&mut q, &m); // duplicate while still uncommitted

        assert_eq!(q.ready_count(), 1);
        assert!(q.take_acks().is_empty());
    }

    #[test]
    fn test_priority_order_over_arrival_order() {
        let mut q = InboundQueue::new(&cfg());
        let t = msg("a", 1, Priority::Telemetry, false);
        let c = msg("a", 2, Priority::Control, true);
        let e = msg("a", 3, Priority::Emergency, true);

        feed(&mut q, &t);
        feed(&mut q, &c);
        feed(&mut q, &e);

        assert_eq!(q.next_ready().unwrap().priority, Priority::Emergency);
        assert_eq!(q.next_ready().unwrap().priority, Priority::Control);
        assert_eq!(q.next_ready().unwrap().priority, Priority::Telemetry);
    }

    #[test]
    fn test_same_priority_causal_order_within_sender() {
        let mut q = InboundQueue::new(&cfg());
        let first = msg("a", 1, Priority::Control, true);
        let second = msg("a", 2, Priority::Control, true);

        // Arrive out of order
        feed(&mut q, &second);
        feed(&mut q, &first);

        assert_eq!(q.next_ready().unwrap().sender_seq(), 1);
        assert_eq!(q.next_ready().unwrap().sender_seq(), 2);
    }

    #[test]
    fn test_corrupt_message_rejected() {
        let mut q = InboundQueue::new(&cfg());
        let m = msg("a", 1, Priority::Control, true);
        let mut bytes = m.encode();
        bytes[8] = 0x7F; // invalid priority class

        let frames = fragment(m.id, m.priority, &bytes).unwrap();
        let mut failed = false;
        for frame in frames {
            if q.handle_data(frame, Duration::ZERO).is_err() {
                failed = true;
            }
        }
        assert!(failed);
        assert_eq!(q.ready_count(), 0);
    }

    #[test]
    fn test_dedup_window_bounded() {
        let mut config = cfg();
        config.dedup_window = 4;
        let mut q = InboundQueue::new(&config);

        for seq in 1..=10u64 {
            feed(&mut q, &msg("a", seq, Priority::Control, true));
        }
        // Window holds only the 4 newest ids; an old id replays as new
        while q.next_ready().is_some() {}
        feed(&mut q, &msg("a", 1, Priority::Control, true));
        assert_eq!(q.ready_count(), 1);
    }
}
