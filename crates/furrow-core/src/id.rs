//! Identity types for the FURROW coordination core
//!
//! Agent and section identifiers are opaque strings assigned by fleet
//! provisioning. Their `Ord` is plain lexicographic byte order, which is
//! also the final deterministic tie-break between concurrent claims.

use std::fmt;

/// Maximum encoded length of a string identifier on the wire.
pub const MAX_ID_LEN: usize = 255;

/// Agent identity - stable for the agent's operational lifetime.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct AgentId(String);

impl AgentId {
    /// Panics if the id exceeds [`MAX_ID_LEN`] bytes; ids come from fleet
    /// provisioning and an over-long one is a configuration error.
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        assert!(id.len() <= MAX_ID_LEN, "agent id exceeds {MAX_ID_LEN} bytes");
        AgentId(id)
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Encode as length-prefixed UTF-8.
    pub fn encode(&self, buf: &mut Vec<u8>) {
        let bytes = self.0.as_bytes();
        buf.push(bytes.len() as u8);
        buf.extend_from_slice(bytes);
    }

    /// Decode a length-prefixed UTF-8 identifier, returning the id and
    /// the number of bytes consumed.
    pub fn decode(buf: &[u8]) -> Option<(Self, usize)> {
        let (s, used) = decode_str(buf)?;
        Some((AgentId(s), used))
    }
}

impl fmt::Debug for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Agent({})", self.0)
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for AgentId {
    fn from(s: &str) -> Self {
        AgentId::new(s)
    }
}

/// Section identity - one unit of partitionable field work.
/// The set of sections for a field is finite and known in advance.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct SectionId(String);

impl SectionId {
    /// Panics if the id exceeds [`MAX_ID_LEN`] bytes.
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        assert!(id.len() <= MAX_ID_LEN, "section id exceeds {MAX_ID_LEN} bytes");
        SectionId(id)
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn encode(&self, buf: &mut Vec<u8>) {
        let bytes = self.0.as_bytes();
        buf.push(bytes.len() as u8);
        buf.extend_from_slice(bytes);
    }

    pub fn decode(buf: &[u8]) -> Option<(Self, usize)> {
        let (s, used) = decode_str(buf)?;
        Some((SectionId(s), used))
    }
}

impl fmt::Debug for SectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Section({})", self.0)
    }
}

impl fmt::Display for SectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SectionId {
    fn from(s: &str) -> Self {
        SectionId::new(s)
    }
}

fn decode_str(buf: &[u8]) -> Option<(String, usize)> {
    if buf.is_empty() {
        return None;
    }
    let len = buf[0] as usize;
    if buf.len() < 1 + len {
        return None;
    }
    let s = std::str::from_utf8(&buf[1..1 + len]).ok()?.to_string();
    Some((s, 1 + len))
}

/// Message identity - unique per outbound message, used for ack matching
/// and receiver-side deduplication (keyed together with the sender id).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct MessageId(pub u64);

impl MessageId {
    #[inline]
    pub fn new(id: u64) -> Self {
        MessageId(id)
    }

    /// Derive from the sender id and a per-sender monotonic sequence.
    pub fn derive(sender: &AgentId, seq: u64) -> Self {
        // FNV-1a over the sender, mixed with the sequence
        let mut h: u64 = 0xcbf29ce484222325;
        for b in sender.as_str().as_bytes() {
            h ^= *b as u64;
            h = h.wrapping_mul(0x100000001b3);
        }
        MessageId((h ^ seq).wrapping_mul(0x517cc1b727220a95))
    }

    #[inline]
    pub fn to_bytes(self) -> [u8; 8] {
        self.0.to_le_bytes()
    }

    #[inline]
    pub fn from_bytes(bytes: [u8; 8]) -> Self {
        MessageId(u64::from_le_bytes(bytes))
    }
}

impl fmt::Debug for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Msg({:016x})", self.0)
    }
}
