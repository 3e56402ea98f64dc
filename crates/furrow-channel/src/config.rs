//! Channel configuration

use std::time::Duration;

use furrow_core::Priority;

/// Tuning for the reliable channel.
#[derive(Clone, Debug)]
pub struct ChannelConfig {
    /// Base retry interval; per-class backoff starts at
    /// `base_backoff * Priority::backoff_factor()`.
    pub base_backoff: Duration,
    /// Backoff cap.
    pub max_backoff: Duration,
    /// Retry budget for Control-class messages.
    pub control_retry_budget: u32,
    /// Retry budget for Telemetry-class messages.
    pub telemetry_retry_budget: u32,
    /// Emergency messages raise an escalation fault after this many
    /// unacknowledged retries. They keep retrying regardless.
    pub emergency_escalation_after: u32,
    /// Pending-delivery table bound; droppable classes are shed beyond it.
    pub max_pending: usize,
    /// Per-sender dedup window (recently seen message ids).
    pub dedup_window: usize,
    /// Reassembler bounds.
    pub max_partials: usize,
    pub reassembly_max_age: Duration,
    /// Seed for retry jitter (deterministic in tests).
    pub jitter_seed: u64,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        ChannelConfig {
            base_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_secs(2),
            control_retry_budget: 8,
            telemetry_retry_budget: 3,
            emergency_escalation_after: 10,
            max_pending: 256,
            dedup_window: 256,
            max_partials: 64,
            reassembly_max_age: Duration::from_secs(30),
            jitter_seed: 0x5EED,
        }
    }
}

impl ChannelConfig {
    /// Retry budget for a class; `None` means retry forever.
    pub fn retry_budget(&self, priority: Priority) -> Option<u32> {
        match priority {
            Priority::Emergency => None,
            Priority::Control => Some(self.control_retry_budget),
            Priority::Telemetry => Some(self.telemetry_retry_budget),
        }
    }

    /// Initial backoff for a class.
    pub fn initial_backoff(&self, priority: Priority) -> Duration {
        self.base_backoff * priority.backoff_factor()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emergency_has_no_budget() {
        let cfg = ChannelConfig::default();
        assert_eq!(cfg.retry_budget(Priority::Emergency), None);
        assert!(cfg.retry_budget(Priority::Control).is_some());
        assert!(cfg.retry_budget(Priority::Telemetry).is_some());
    }

    #[test]
    fn test_emergency_backoff_most_aggressive() {
        let cfg = ChannelConfig::default();
        assert!(cfg.initial_backoff(Priority::Emergency) < cfg.initial_backoff(Priority::Control));
        assert!(cfg.initial_backoff(Priority::Control) < cfg.initial_backoff(Priority::Telemetry));
    }
}
