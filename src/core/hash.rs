//! Move Log Hashing
//!
//! Deterministic SHA-256 digest over a session's move log, stored on the
//! finished session for replay/audit. Order of updates is significant.

use sha2::{Digest, Sha256};

/// Hash output type (256 bits / 32 bytes)
pub type LogDigest = [u8; 32];

/// Domain-separated hasher for audit digests.
pub struct MoveLogHasher {
    hasher: Sha256,
}

impl MoveLogHasher {
    /// Create a new hasher with domain separator.
    pub fn new(domain: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(domain);
        Self { hasher }
    }

    /// Create hasher for session move logs.
    pub fn for_move_log() -> Self {
        Self::new(b"TILE_DUEL_MOVES_V1")
    }

    /// Update with raw bytes.
    #[inline]
    pub fn update_bytes(&mut self, bytes: &[u8]) {
        self.hasher.update(bytes);
    }

    /// Update with a u8 value.
    #[inline]
    pub fn update_u8(&mut self, value: u8) {
        self.hasher.update([value]);
    }

    /// Update with a u16 value (little-endian).
    #[inline]
    pub fn update_u16(&mut self, value: u16) {
        self.hasher.update(value.to_le_bytes());
    }

    /// Update with a u32 value (little-endian).
    #[inline]
    pub fn update_u32(&mut self, value: u32) {
        self.hasher.update(value.to_le_bytes());
    }

    /// Update with an i64 value (little-endian).
    #[inline]
    pub fn update_i64(&mut self, value: i64) {
        self.hasher.update(value.to_le_bytes());
    }

    /// Update with a length-prefixed string.
    pub fn update_str(&mut self, value: &str) {
        self.update_u32(value.len() as u32);
        self.hasher.update(value.as_bytes());
    }

    /// Finalize and get digest.
    pub fn finalize(self) -> LogDigest {
        self.hasher.finalize().into()
    }
}
