//! FURROW Allocation - conflict-free section ownership
//!
//! Replicated per-agent state tracking which agent owns which field
//! section. Each section is a last-writer-wins register resolved by
//! causal dominance, then wall-clock timestamp, then lexicographic
//! writer id; replicas converge under arbitrary merge order.

pub mod delta;
pub mod record;
pub mod store;

pub use delta::*;
pub use record::*;
pub use store::*;
