//! # Cache Types

use std::fmt;

use sha2::{Digest, Sha256};

/// Number of two-character shard directories above each entry.
pub const DEFAULT_SHARD_DEPTH: usize = 2;

/// Lowercase hex SHA-256 of an object's canonical path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Derive the key for a canonical path such as `"bucket/key"`.
    pub fn derive(canonical: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Split the leading `depth * 2` hex characters into two-character segments.
    pub fn shards(&self, depth: usize) -> Vec<&str> {
        (0..depth)
            .map(|m| &self.0[2 * m..2 * m + 2])
            .collect()
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_is_sha256_hex() {
        let key = CacheKey::derive("abc");
        assert_eq!(
            key.as_str(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_derive_is_deterministic() {
        assert_eq!(
            CacheKey::derive("media/clip.mp4"),
            CacheKey::derive("media/clip.mp4")
        );
        assert_ne!(
            CacheKey::derive("media/clip.mp4"),
            CacheKey::derive("media/clip.mp3")
        );
    }

    #[test]
    fn test_shards() {
        let key = CacheKey::derive("media/clip.mp4");
        assert_eq!(key.shards(2), vec!["a5", "94"]);
        assert_eq!(key.shards(0), Vec::<&str>::new());
        assert_eq!(key.shards(3), vec!["a5", "94", "86"]);
    }
}
