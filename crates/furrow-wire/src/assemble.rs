//! Fragmentation and reassembly
//!
//! Messages routinely exceed one bus frame, and frames can be lost,
//! duplicated, or reordered. The fragmenter splits an encoded message
//! across data frames; the reassembler collects fragments per message id,
//! bounded in both partial count and age so a sustained partition cannot
//! grow it without limit.

use std::collections::HashMap;
use std::time::Duration;

use furrow_core::{FurrowError, FurrowResult, MessageId, Priority};

use crate::{BusFrame, MAX_FRAGMENT_PAYLOAD};

/// Upper bound on fragments per message (u16 index space).
pub const MAX_FRAGMENTS: usize = u16::MAX as usize;

/// Split an encoded message into data frames.
pub fn fragment(
    message_id: MessageId,
    priority: Priority,
    bytes: &[u8],
) -> FurrowResult<Vec<BusFrame>> {
    let count = bytes.len().div_ceil(MAX_FRAGMENT_PAYLOAD).max(1);
    if count > MAX_FRAGMENTS {
        return Err(FurrowError::PayloadTooLarge(bytes.len()));
    }

    Ok((0..count)
        .map(|i| {
            let start = i * MAX_FRAGMENT_PAYLOAD;
            let end = (start + MAX_FRAGMENT_PAYLOAD).min(bytes.len());
            BusFrame::data(
                message_id,
                priority,
                i as u16,
                count as u16,
                bytes[start..end].to_vec(),
            )
        })
        .collect())
}

struct Partial {
    fragments: Vec<Option<Vec<u8>>>,
    received: usize,
    first_seen: Duration,
}

/// Collects out-of-order fragments until a message is complete.
pub struct Reassembler {
    partials: HashMap<MessageId, Partial>,
    /// Maximum simultaneous partial messages; oldest evicted beyond this.
    max_partials: usize,
    /// Partials older than this are dropped by `sweep`.
    max_age: Duration,
}

impl Reassembler {
    pub fn new(max_partials: usize, max_age: Duration) -> Self {
        Reassembler {
            partials: HashMap::new(),
            max_partials,
            max_age,
        }
    }

    /// Insert a data frame. Returns the reassembled message bytes once all
    /// fragments have arrived. Duplicate fragments are ignored; a frame
    /// whose fragment geometry contradicts an existing partial resets it.
    pub fn insert(&mut self, frame: BusFrame, now: Duration) -> Option<Vec<u8>> {
        let count = frame.frag_count as usize;
        if count == 0 || (frame.frag_index as usize) >= count {
            return None;
        }

        // Single-fragment fast path
        if count == 1 {
            return Some(frame.payload);
        }

        let partial = self
            .partials
            .entry(frame.message_id)
            .or_insert_with(|| Partial {
                fragments: vec![None; count],
                received: 0,
                first_seen: now,
            });

        if partial.fragments.len() != count {
            // Geometry mismatch: stale or corrupt partial, start over
            *partial = Partial {
                fragments: vec![None; count],
                received: 0,
                first_seen: now,
            };
        }

        let slot = &mut partial.fragments[frame.frag_index as usize];
        if slot.is_none() {
            *slot = Some(frame.payload);
            partial.received += 1;
        }

        if partial.received == count {
            let partial = self.partials.remove(&frame.message_id).unwrap();
            let mut bytes = Vec::new();
            for frag in partial.fragments {
                bytes.extend_from_slice(&frag.unwrap());
            }
            return Some(bytes);
        }

        self.enforce_capacity();
        None
    }

    /// Drop partials past the age limit.
    pub fn sweep(&mut self, now: Duration) {
        let max_age = self.max_age;
        self.partials
            .retain(|_, p| now.saturating_sub(p.first_seen) <= max_age);
    }

    /// Number of in-progress partial messages.
    pub fn pending(&self) -> usize {
        self.partials.len()
    }

    fn enforce_capacity(&mut self) {
        while self.partials.len() > self.max_partials {
            let oldest = self
                .partials
                .iter()
                .min_by_key(|(_, p)| p.first_seen)
                .map(|(id, _)| *id);
            match oldest {
                Some(id) => {
                    self.partials.remove(&id);
                }
                None => break,
            }
        }
    }
}

impl Default for Reassembler {
    fn default() -> Self {
        Reassembler::new(64, Duration::from_secs(30))
    }
}
