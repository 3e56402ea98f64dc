//! Reliable message channel
//!
//! Ties the outbound retry table and inbound pipeline together behind a
//! synchronous, virtual-time interface. `send` is fire-and-forget,
//! `receive` is poll-based; all wire output (transmissions, retries,
//! acks) flows out of `poll`, which the runtime calls on a timer and
//! tests call with a hand-advanced clock.

use std::time::Duration;

use furrow_core::{
    AgentId, CausalClock, FurrowResult, Message, MessageId, Priority,
};
use furrow_wire::{BusFrame, FrameKind};

use crate::{ChannelConfig, DeliveryEvent, InboundQueue, Outgoing, OutboundQueue};

/// Reliable prioritized channel for one agent.
pub struct ReliableChannel {
    self_id: AgentId,
    seq: u64,
    outbound: OutboundQueue,
    inbound: InboundQueue,
}

impl ReliableChannel {
    pub fn new(self_id: AgentId, cfg: ChannelConfig) -> Self {
        ReliableChannel {
            self_id,
            seq: 0,
            inbound: InboundQueue::new(&cfg),
            outbound: OutboundQueue::new(cfg),
        }
    }

    pub fn self_id(&self) -> &AgentId {
        &self.self_id
    }

    /// Enqueue a message. Non-blocking: transmission happens on the next
    /// poll. The clock snapshot stamps the message for causal ordering at
    /// the receiver.
    pub fn send(
        &mut self,
        destination: AgentId,
        payload: Vec<u8>,
        priority: Priority,
        require_ack: bool,
        clock: CausalClock,
        now: Duration,
    ) -> MessageId {
        self.seq += 1;
        let id = MessageId::derive(&self.self_id, self.seq);
        let message = Message::new(id, priority, self.self_id.clone(), clock, payload, require_ack);
        self.outbound.enqueue(message, destination, now);
        id
    }

    /// Send the same payload to several destinations. Each copy is
    /// tracked independently; returns the per-destination message ids.
    pub fn broadcast(
        &mut self,
        destinations: &[AgentId],
        payload: Vec<u8>,
        priority: Priority,
        require_ack: bool,
        clock: CausalClock,
        now: Duration,
    ) -> Vec<(AgentId, MessageId)> {
        destinations
            .iter()
            .map(|dest| {
                let id = self.send(
                    dest.clone(),
                    payload.clone(),
                    priority,
                    require_ack,
                    clock.clone(),
                    now,
                );
                (dest.clone(), id)
            })
            .collect()
    }

    /// One scheduling pass: retransmissions past their deadline plus any
    /// queued acks, highest priority first. Also sweeps stale partial
    /// reassemblies.
    pub fn poll(&mut self, now: Duration) -> FurrowResult<Vec<Outgoing>> {
        self.inbound.sweep(now);

        let mut out = self.outbound.poll(now)?;
        for (dest, ack) in self.inbound.take_acks() {
            out.push(Outgoing {
                destination: dest,
                frames: vec![ack],
            });
        }
        Ok(out)
    }

    /// Feed one raw frame from the bus.
    pub fn handle_frame(&mut self, bytes: &[u8], now: Duration) -> FurrowResult<()> {
        let frame = BusFrame::parse(bytes)?;
        match frame.kind {
            FrameKind::Ack => {
                self.outbound.ack(frame.message_id);
                Ok(())
            }
            FrameKind::Data => self.inbound.handle_data(frame, now),
        }
    }

    /// Next inbound message in priority-then-causal order. Poll-based;
    /// returns immediately.
    pub fn receive(&mut self) -> Option<Message> {
        self.inbound.next_ready()
    }

    /// Report successful local application of a received message; emits
    /// the ack on the next poll.
    pub fn commit(&mut self, sender: &AgentId, id: MessageId) {
        self.inbound.commit(sender, id);
    }

    /// Suppress further retries of a superseded message.
    pub fn cancel(&mut self, id: MessageId) -> bool {
        self.outbound.cancel(id)
    }

    /// Drain delivery events (Delivered / Abandoned / EscalationRaised).
    pub fn take_events(&mut self) -> Vec<DeliveryEvent> {
        self.outbound.take_events()
    }

    /// Deliveries still awaiting acknowledgment.
    pub fn pending_count(&self) -> usize {
        self.outbound.pending_count()
    }
}
