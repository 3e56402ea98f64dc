//! FURROW Core - Fundamental types for the fleet coordination core
//!
//! This crate defines the types shared by every FURROW layer:
//! - Identifiers (AgentId, SectionId, MessageId)
//! - Priority classes for bus traffic
//! - The causal clock (vector clock over the fleet)
//! - The message model and delivery lifecycle
//! - The error taxonomy

pub mod class;
pub mod clock;
pub mod error;
pub mod id;
pub mod message;

pub use class::*;
pub use clock::*;
pub use error::*;
pub use id::*;
pub use message::*;
