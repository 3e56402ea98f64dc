//! Outbound delivery tracking
//!
//! A pending-delivery table re-scanned on every poll: entries past their
//! backoff deadline are retransmitted with exponential backoff (jittered,
//! capped), bounded retry budgets for Control/Telemetry, and an
//! escalation fault for Emergency - which is never abandoned. All timing
//! uses an injected virtual `now`, so tests never sleep.

use std::collections::HashMap;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, error};

use furrow_core::{AgentId, DeliveryState, FurrowResult, Message, MessageId, Priority};
use furrow_wire::{fragment, BusFrame};

use crate::ChannelConfig;

/// Caller-visible delivery outcome.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeliveryEvent {
    /// Acknowledged by the receiver.
    Delivered { id: MessageId },
    /// Retry budget exhausted (Control/Telemetry only). Routine and
    /// actionable, not an error.
    Abandoned { id: MessageId, priority: Priority },
    /// An Emergency message has exceeded the escalation threshold without
    /// acknowledgment. The one caller-visible fault; retries continue.
    EscalationRaised { id: MessageId, retries: u32 },
}

/// Per-message tracking record. Owned by this queue; destroyed on
/// acknowledgment or abandonment.
#[derive(Clone, Debug)]
pub struct PendingDelivery {
    pub message: Message,
    pub destination: AgentId,
    pub state: DeliveryState,
    /// Retransmissions so far (the first transmission is not a retry).
    pub retries: u32,
    pub backoff: Duration,
    pub next_deadline: Duration,
    escalated: bool,
}

/// Frames bound for one destination.
#[derive(Clone, Debug)]
pub struct Outgoing {
    pub destination: AgentId,
    pub frames: Vec<BusFrame>,
}

/// The pending-delivery table.
pub struct OutboundQueue {
    cfg: ChannelConfig,
    pending: HashMap<MessageId, PendingDelivery>,
    events: Vec<DeliveryEvent>,
    rng: StdRng,
}

impl OutboundQueue {
    pub fn new(cfg: ChannelConfig) -> Self {
        let seed = cfg.jitter_seed;
        OutboundQueue {
            cfg,
            pending: HashMap::new(),
            events: Vec::new(),
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Queue a message for transmission on the next poll. Sheds droppable
    /// traffic when the table is over its bound; safety classes are never
    /// shed.
    pub fn enqueue(&mut self, message: Message, destination: AgentId, now: Duration) {
        if self.pending.len() >= self.cfg.max_pending && !self.shed_droppable() {
            if message.priority.is_droppable() {
                self.events.push(DeliveryEvent::Abandoned {
                    id: message.id,
                    priority: message.priority,
                });
                return;
            }
        }

        let backoff = self.cfg.initial_backoff(message.priority);
        self.pending.insert(
            message.id,
            PendingDelivery {
                message,
                destination,
                state: DeliveryState::Pending,
                retries: 0,
                backoff,
                next_deadline: now,
                escalated: false,
            },
        );
    }

    /// Re-scan the table: transmit everything past its deadline, highest
    /// priority first. Fire-and-forget messages are removed after their
    /// single transmission.
    pub fn poll(&mut self, now: Duration) -> FurrowResult<Vec<Outgoing>> {
        let mut due: Vec<MessageId> = self
            .pending
            .iter()
            .filter(|(_, p)| p.next_deadline <= now)
            .map(|(id, _)| *id)
            .collect();
        due.sort_by_key(|id| {
            let p = &self.pending[id];
            (p.message.priority.rank(), id.0)
        });

        let mut out = Vec::with_capacity(due.len());
        for id in due {
            if let Some(outgoing) = self.transmit(id, now)? {
                out.push(outgoing);
            }
        }
        Ok(out)
    }

    fn transmit(&mut self, id: MessageId, now: Duration) -> FurrowResult<Option<Outgoing>> {
        let Some(pending) = self.pending.get_mut(&id) else {
            return Ok(None);
        };
        let priority = pending.message.priority;

        // Budget check applies to retransmissions only
        if pending.state == DeliveryState::AwaitingAck {
            if let Some(budget) = self.cfg.retry_budget(priority) {
                if pending.retries >= budget {
                    debug!(?id, ?priority, retries = pending.retries, "abandoning delivery");
                    self.pending.remove(&id);
                    self.events.push(DeliveryEvent::Abandoned { id, priority });
                    return Ok(None);
                }
            } else if pending.retries >= self.cfg.emergency_escalation_after && !pending.escalated {
                error!(?id, retries = pending.retries, "emergency delivery unacknowledged, raising fault");
                pending.escalated = true;
                let retries = pending.retries;
                self.events.push(DeliveryEvent::EscalationRaised { id, retries });
            }
            pending.retries += 1;
        }

        let frames = fragment(id, priority, &pending.message.encode())?;
        let destination = pending.destination.clone();

        if !pending.message.require_ack {
            self.pending.remove(&id);
        } else {
            let pending = self.pending.get_mut(&id).unwrap();
            pending.state = DeliveryState::AwaitingAck;
            let jitter_ms = (pending.backoff.as_millis() as u64) / 4;
            let jitter = Duration::from_millis(self.rng.gen_range(0..=jitter_ms));
            pending.next_deadline = now + pending.backoff + jitter;
            pending.backoff = (pending.backoff * 2).min(self.cfg.max_backoff);
        }

        Ok(Some(Outgoing {
            destination,
            frames,
        }))
    }

    /// Record an acknowledgment. Unknown ids (already delivered, cancelled,
    /// or duplicate acks) are ignored.
    pub fn ack(&mut self, id: MessageId) {
        if self.pending.remove(&id).is_some() {
            self.events.push(DeliveryEvent::Delivered { id });
        }
    }

    /// Suppress all further retries of a superseded message.
    pub fn cancel(&mut self, id: MessageId) -> bool {
        self.pending.remove(&id).is_some()
    }

    /// Drain delivery events for the caller.
    pub fn take_events(&mut self) -> Vec<DeliveryEvent> {
        std::mem::take(&mut self.events)
    }

    /// Tracked deliveries.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Inspect one pending delivery.
    pub fn pending(&self, id: MessageId) -> Option<&PendingDelivery> {
        self.pending.get(&id)
    }

    /// Drop one droppable entry to make room. Returns true if something
    /// was shed.
    fn shed_droppable(&mut self) -> bool {
        let victim = self
            .pending
            .iter()
            .filter(|(_, p)| p.message.priority.is_droppable())
            .map(|(id, p)| (*id, p.message.priority))
            .min_by_key(|(id, _)| id.0);
        match victim {
            Some((id, priority)) => {
                self.pending.remove(&id);
                self.events.push(DeliveryEvent::Abandoned { id, priority });
                true
            }
            None => false,
        }
    }
}
