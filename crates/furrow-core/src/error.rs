//! Error types for the FURROW coordination core
//!
//! Routine contention (claim denied, delivery abandoned, duplicate message)
//! is NOT represented here - those are ordinary return values. Errors cover
//! genuinely corrupt input and transport failures only.

use thiserror::Error;

/// Core FURROW errors
#[derive(Error, Debug)]
pub enum FurrowError {
    // Wire errors
    #[error("Invalid wire format: {0}")]
    InvalidWireFormat(String),

    #[error("Buffer too short: expected {expected}, got {actual}")]
    BufferTooShort { expected: usize, actual: usize },

    #[error("Unknown priority class: {0}")]
    UnknownPriority(u8),

    #[error("Unknown frame kind: {0}")]
    UnknownFrameKind(u8),

    #[error("Payload too large for fragmentation: {0} bytes")]
    PayloadTooLarge(usize),

    // Codec errors
    #[error("Corrupt message: {0}")]
    CorruptMessage(String),

    #[error("Corrupt allocation delta: {0}")]
    CorruptDelta(String),

    // Channel errors
    #[error("Unknown destination agent: {0}")]
    UnknownDestination(String),

    // Transport errors
    #[error("Transport error: {0}")]
    TransportError(String),
}

/// Result type for FURROW operations
pub type FurrowResult<T> = Result<T, FurrowError>;
