//! FURROW Test Harness - chaos links and fleet simulation
//!
//! Validation tooling for the coordination stack: seeded lossy links,
//! a virtual-time fleet simulator, and the scenario suite built on them.

pub mod chaos;
pub mod simulator;

pub use chaos::*;
pub use simulator::*;
