//! FURROW Channel - reliable prioritized messaging over a lossy bus
//!
//! At-least-once delivery for ack-required messages over a bus that can
//! drop, reorder, or duplicate frames, with strict priority scheduling:
//! Emergency preempts Control preempts Telemetry. Retry state lives in an
//! inspectable pending-delivery table driven by an injected clock.

pub mod bus;
pub mod channel;
pub mod config;
pub mod inbound;
pub mod outbound;

pub use bus::*;
pub use channel::*;
pub use config::*;
pub use inbound::*;
pub use outbound::*;
