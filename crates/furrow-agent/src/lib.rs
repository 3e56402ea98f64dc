//! FURROW Agent - per-agent coordination core and async runtime
//!
//! The synchronous CoordinationCore ties the causal clock, the allocation
//! replica, and the reliable channel into one state machine per agent;
//! AgentRuntime drives it over UDP under tokio.

pub mod config;
pub mod coordination;
pub mod payload;
pub mod runtime;

pub use config::*;
pub use coordination::*;
pub use payload::*;
pub use runtime::*;
