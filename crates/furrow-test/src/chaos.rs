//! Chaos bus link
//!
//! Simulates a degraded field bus link in virtual time: latency with
//! uniform jitter, independent and burst frame loss, reordering, and
//! duplication. Deterministic for a given seed so failures replay.

use std::collections::VecDeque;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Link degradation profile.
#[derive(Clone, Debug)]
pub struct ChaosConfig {
    pub base_latency: Duration,
    /// Uniform jitter added on top of base latency.
    pub jitter_max: Duration,
    /// Independent per-frame loss probability.
    pub loss_rate: f64,
    /// Probability of entering a loss burst on any frame.
    pub burst_loss_prob: f64,
    /// Burst length range, inclusive.
    pub burst_length: (u32, u32),
    pub reorder_prob: f64,
    pub duplicate_prob: f64,
}

impl Default for ChaosConfig {
    fn default() -> Self {
        ChaosConfig {
            base_latency: Duration::from_millis(5),
            jitter_max: Duration::from_millis(5),
            loss_rate: 0.01,
            burst_loss_prob: 0.02,
            burst_length: (2, 4),
            reorder_prob: 0.05,
            duplicate_prob: 0.01,
        }
    }
}

impl ChaosConfig {
    /// Healthy bus segment: fixed latency, no loss. Zero jitter keeps
    /// delivery strictly in send order.
    pub fn clean() -> Self {
        ChaosConfig {
            base_latency: Duration::from_millis(2),
            jitter_max: Duration::ZERO,
            loss_rate: 0.0,
            burst_loss_prob: 0.0,
            burst_length: (0, 0),
            reorder_prob: 0.0,
            duplicate_prob: 0.0,
        }
    }

    /// Long cable run with interference.
    pub fn lossy() -> Self {
        ChaosConfig {
            base_latency: Duration::from_millis(10),
            jitter_max: Duration::from_millis(20),
            loss_rate: 0.10,
            burst_loss_prob: 0.05,
            burst_length: (2, 6),
            reorder_prob: 0.10,
            duplicate_prob: 0.02,
        }
    }

    /// Barely usable: heavy loss with long bursts.
    pub fn hostile() -> Self {
        ChaosConfig {
            base_latency: Duration::from_millis(20),
            jitter_max: Duration::from_millis(50),
            loss_rate: 0.25,
            burst_loss_prob: 0.10,
            burst_length: (4, 10),
            reorder_prob: 0.15,
            duplicate_prob: 0.05,
        }
    }
}

#[derive(Clone, Debug)]
struct InFlight {
    data: Vec<u8>,
    delivery_time: Duration,
}

/// Delivery statistics for one link.
#[derive(Clone, Debug, Default)]
pub struct ChaosStats {
    pub frames_sent: u64,
    pub frames_delivered: u64,
    pub frames_lost: u64,
    pub frames_duplicated: u64,
}

impl ChaosStats {
    pub fn loss_rate(&self) -> f64 {
        if self.frames_sent == 0 {
            0.0
        } else {
            self.frames_lost as f64 / self.frames_sent as f64
        }
    }
}

/// One directed lossy link.
pub struct ChaosLink {
    cfg: ChaosConfig,
    rng: StdRng,
    in_flight: VecDeque<InFlight>,
    now: Duration,
    burst_remaining: u32,
    stats: ChaosStats,
}

impl ChaosLink {
    pub fn new(cfg: ChaosConfig, seed: u64) -> Self {
        ChaosLink {
            cfg,
            rng: StdRng::seed_from_u64(seed),
            in_flight: VecDeque::new(),
            now: Duration::ZERO,
            burst_remaining: 0,
            stats: ChaosStats::default(),
        }
    }

    /// Put one frame on the link at the current link time.
    pub fn send(&mut self, data: Vec<u8>) {
        self.stats.frames_sent += 1;

        if self.should_drop() {
            self.stats.frames_lost += 1;
            return;
        }

        let delivery_time = self.now + self.latency();
        let frame = InFlight {
            data: data.clone(),
            delivery_time,
        };

        if self.rng.gen::<f64>() < self.cfg.reorder_prob && !self.in_flight.is_empty() {
            let pos = self.rng.gen_range(0..self.in_flight.len());
            self.in_flight.insert(pos, frame);
        } else {
            self.in_flight.push_back(frame);
        }

        if self.rng.gen::<f64>() < self.cfg.duplicate_prob {
            let dup = InFlight {
                data,
                delivery_time: delivery_time + self.latency(),
            };
            self.in_flight.push_back(dup);
            self.stats.frames_duplicated += 1;
        }
    }

    fn latency(&mut self) -> Duration {
        let jitter_ms = self.cfg.jitter_max.as_millis() as u64;
        let jitter = if jitter_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(self.rng.gen_range(0..=jitter_ms))
        };
        self.cfg.base_latency + jitter
    }

    fn should_drop(&mut self) -> bool {
        if self.burst_remaining > 0 {
            self.burst_remaining -= 1;
            return true;
        }
        if self.rng.gen::<f64>() < self.cfg.burst_loss_prob {
            let (min, max) = self.cfg.burst_length;
            self.burst_remaining = self.rng.gen_range(min..=max);
            return true;
        }
        self.rng.gen::<f64>() < self.cfg.loss_rate
    }

    /// Advance link time and take everything now due.
    pub fn tick(&mut self, dt: Duration) -> Vec<Vec<u8>> {
        self.now += dt;

        let mut delivered = Vec::new();
        // Reordered entries are not sorted by delivery time, so scan the
        // whole queue rather than popping from the front.
        let mut i = 0;
        while i < self.in_flight.len() {
            if self.in_flight[i].delivery_time <= self.now {
                let frame = self.in_flight.remove(i).unwrap();
                self.stats.frames_delivered += 1;
                delivered.push(frame.data);
            } else {
                i += 1;
            }
        }
        delivered
    }

    pub fn stats(&self) -> &ChaosStats {
        &self.stats
    }
}
