//! Message priority classes
//!
//! FURROW schedules bus traffic through exactly three classes:
//! - Emergency: stop / collision avoidance - preempts everything, never abandoned
//! - Control: allocation claims and releases - bounded retries
//! - Telemetry: routine status - best effort, shed first under congestion
//!
//! The retry-policy matrix is exhaustively defined over these three; the
//! enum is closed on purpose.

/// Message priority class.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum Priority {
    /// Safety-critical: emergency stop, collision avoidance.
    /// Retried indefinitely; escalates to a local fault, never abandoned.
    Emergency = 0x00,

    /// Coordination traffic: allocation claims, releases, state deltas.
    #[default]
    Control = 0x01,

    /// Routine status. Droppable under congestion.
    Telemetry = 0x02,
}

impl Priority {
    /// Parse from wire byte.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x00 => Some(Priority::Emergency),
            0x01 => Some(Priority::Control),
            0x02 => Some(Priority::Telemetry),
            _ => None,
        }
    }

    /// Convert to wire byte.
    #[inline]
    pub fn to_byte(self) -> u8 {
        self as u8
    }

    /// Scheduling rank (lower = delivered and retransmitted first).
    #[inline]
    pub fn rank(self) -> u8 {
        self as u8
    }

    /// Can this class be shed under congestion instead of retried?
    pub fn is_droppable(self) -> bool {
        matches!(self, Priority::Telemetry)
    }

    /// Backoff multiplier relative to the configured base interval.
    /// Emergency uses the most aggressive (shortest) schedule.
    pub fn backoff_factor(self) -> u32 {
        match self {
            Priority::Emergency => 1,
            Priority::Control => 2,
            Priority::Telemetry => 4,
        }
    }
}
