//! Wire packet model for published frames.
//!
//! One packet carries one compressed frame. The model is deliberately
//! transport-independent: the in-process bus moves packets by value,
//! the UDP transport serialises them with bincode via
//! [`VideoPacket::to_bytes`] / [`VideoPacket::from_bytes`].

use serde::{Deserialize, Serialize};

use crate::error::StreamError;

/// Hard bound on the compressed payload carried by one packet.
///
/// Chosen to keep a bincode-framed packet inside a single UDP datagram
/// (65 507 bytes of payload) with headroom for the envelope fields.
pub const MAX_PAYLOAD_BYTES: usize = 65_000;

/// Source identifier used when only one camera exists.
pub const DEFAULT_SOURCE_ID: u32 = 0;

// ── VideoPacket ──────────────────────────────────────────────────

/// A single published unit: compressed frame plus origin and timing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VideoPacket {
    /// Logical origin/camera identifier.
    pub source: u32,

    /// Compressed frame payload (JPEG).
    pub data: Vec<u8>,

    /// Monotonic capture timestamp in nanoseconds.
    pub timestamp_ns: u64,
}

impl VideoPacket {
    /// Wraps an encoded payload into a packet.
    pub fn new(source: u32, data: Vec<u8>, timestamp_ns: u64) -> Self {
        Self {
            source,
            data,
            timestamp_ns,
        }
    }

    /// Checks the payload against the wire capacity bound.
    ///
    /// The encode path enforces this before a packet is ever built; a
    /// transport may re-check cheaply before committing bytes to a
    /// socket.
    pub fn validate(&self) -> Result<(), StreamError> {
        if self.data.len() > MAX_PAYLOAD_BYTES {
            return Err(StreamError::PayloadTooLarge {
                size: self.data.len(),
                max: MAX_PAYLOAD_BYTES,
            });
        }
        Ok(())
    }

    /// Serialize to bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, StreamError> {
        Ok(bincode::serialize(self)?)
    }

    /// Deserialize from bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StreamError> {
        Ok(bincode::deserialize(bytes)?)
    }
}
