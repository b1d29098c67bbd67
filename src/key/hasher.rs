use crate::core::Result;
use std::fmt::Debug;
use std::io::Cursor;

/// Seed the server uses when hashing shard keys.
pub const DEFAULT_HASH_SEED: u32 = 10;

/// 128-bit hash strategy applied to key buffers and string key values.
///
/// Routing is only correct when this matches the server's key hash bit-for-bit,
/// so swapping it is meant for tests and for servers with a different scheme.
pub trait KeyHasher: Send + Sync + Debug {
    /// Returns the two 64-bit halves `(h1, h2)` of the hash of `bytes`.
    fn hash128(&self, bytes: &[u8]) -> Result<(u64, u64)>;
}

/// MurmurHash3 x64/128.
#[derive(Debug, Clone, Copy)]
pub struct Murmur3KeyHasher {
    seed: u32,
}

impl Murmur3KeyHasher {
    pub fn new(seed: u32) -> Self {
        Self { seed }
    }

    pub fn seed(&self) -> u32 {
        self.seed
    }
}

impl Default for Murmur3KeyHasher {
    fn default() -> Self {
        Self::new(DEFAULT_HASH_SEED)
    }
}

impl KeyHasher for Murmur3KeyHasher {
    fn hash128(&self, bytes: &[u8]) -> Result<(u64, u64)> {
        let hash = murmur3::murmur3_x64_128(&mut Cursor::new(bytes), self.seed)?;
        Ok((hash as u64, (hash >> 64) as u64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_is_deterministic() {
        let hasher = Murmur3KeyHasher::default();
        let a = hasher.hash128(b"shard-key").unwrap();
        let b = hasher.hash128(b"shard-key").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_seed_changes_hash() {
        let a = Murmur3KeyHasher::new(10).hash128(b"abc").unwrap();
        let b = Murmur3KeyHasher::new(11).hash128(b"abc").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_empty_input_with_zero_seed_hashes_to_zero() {
        assert_eq!(Murmur3KeyHasher::new(0).hash128(&[]).unwrap(), (0, 0));
    }
}
