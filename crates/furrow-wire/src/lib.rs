//! FURROW Wire - bus frame format and fragmentation
//!
//! Frames are sized for a CAN-FD-class half-duplex bus (64 bytes).
//! Anything larger than one frame is fragmented and reassembled here;
//! loss, duplication, and reordering at the frame level are tolerated.

pub mod assemble;
pub mod frame;

pub use assemble::*;
pub use frame::*;
