//! State Hashing
//!
//! SHA-256 helpers used for:
//! - World file checksums
//! - Determinism checks on the world model in tests

use sha2::{Sha256, Digest};

/// Hash output type (256 bits / 32 bytes)
pub type StateHash = [u8; 32];

/// Deterministic hasher for world state.
///
/// Order of updates is significant.
pub struct StateHasher {
    hasher: Sha256,
}

impl StateHasher {
    /// Create a new hasher with domain separator.
    pub fn new(domain: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(domain);
        Self { hasher }
    }

    /// Create hasher for world state.
    pub fn for_world_state() -> Self {
        Self::new(b"ROBOFRONT_WORLD_V1")
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

    /// Update with a u16 value.
    #[inline]
    pub fn update_u16(&mut self, value: u16) {
        self.hasher.update(value.to_be_bytes());
    }

    /// Update with an i32 value.
    #[inline]
    pub fn update_i32(&mut self, value: i32) {
        self.hasher.update(value.to_be_bytes());
    }

    /// Update with an identity key (16 bytes).
    #[inline]
    pub fn update_key(&mut self, key: &[u8; 16]) {
        self.hasher.update(key);
    }

    /// Finalize and return the hash.
    pub fn finalize(self) -> StateHash {
        self.hasher.finalize().into()
    }
}

/// Compute a simple hash of arbitrary data.
pub fn hash_bytes(data: &[u8]) -> StateHash {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}
