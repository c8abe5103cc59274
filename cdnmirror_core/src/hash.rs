//! Content hashes and hash-sharded paths.
//!
//! Objects on the network are addressed by the MD5 digest of their bytes,
//! written as 32 lowercase hex characters. Both the remote URL and the local
//! cache file are laid out as `xx/yy/hash`, where `xx` and `yy` are the first
//! and second pair of hex characters.

use crate::error::{Error, Result};
use std::fmt;
use std::path::{Path, PathBuf};

/// Hash digest size in bytes (MD5 produces 128-bit digests).
pub const HASH_SIZE: usize = 16;

/// Length of the truncated digests used inside block indexes.
pub const SHORT_HASH_SIZE: usize = 8;

/// A 16-byte MD5 content hash.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContentHash([u8; HASH_SIZE]);

impl ContentHash {
    /// Create a ContentHash from raw bytes.
    pub fn from_bytes(bytes: [u8; HASH_SIZE]) -> Self {
        ContentHash(bytes)
    }

    /// Create a ContentHash from a hex string (32 hex characters, any case).
    pub fn from_hex(hex_str: &str) -> Result<Self> {
        if hex_str.len() != HASH_SIZE * 2 {
            return Err(Error::malformed_hash(
                hex_str,
                format!(
                    "expected {} hex characters, got {}",
                    HASH_SIZE * 2,
                    hex_str.len()
                ),
            ));
        }

        let bytes = hex::decode(hex_str)
            .map_err(|e| Error::malformed_hash(hex_str, format!("invalid hex: {}", e)))?;

        let mut hash = [0u8; HASH_SIZE];
        hash.copy_from_slice(&bytes);
        Ok(ContentHash(hash))
    }

    /// Convert to lowercase hex string (32 characters).
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Get the raw bytes.
    pub fn as_bytes(&self) -> &[u8; HASH_SIZE] {
        &self.0
    }

    /// Two-level shard of this hash.
    pub fn shard(&self) -> ShardedPath {
        let hex = self.to_hex();
        ShardedPath {
            prefix2: hex[0..2].to_string(),
            prefix4: hex[2..4].to_string(),
            full: hex,
        }
    }

    /// Hash raw bytes.
    pub fn digest(data: &[u8]) -> Self {
        ContentHash(md5::compute(data).0)
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", self.to_hex())
    }
}

impl serde::Serialize for ContentHash {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl std::str::FromStr for ContentHash {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_hex(s)
    }
}

/// First 8 bytes of the MD5 digest of `data`.
pub fn short_digest(data: &[u8]) -> [u8; SHORT_HASH_SIZE] {
    let full = md5::compute(data).0;
    let mut short = [0u8; SHORT_HASH_SIZE];
    short.copy_from_slice(&full[..SHORT_HASH_SIZE]);
    short
}

/// The `xx/yy/hash` decomposition of a hash string.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ShardedPath {
    /// First two hex characters.
    pub prefix2: String,
    /// Third and fourth hex characters.
    pub prefix4: String,
    /// The full (lowercased) hash.
    pub full: String,
}

impl ShardedPath {
    /// Slash-joined form used in URLs: `xx/yy/hash`.
    pub fn to_url_path(&self) -> String {
        format!("{}/{}/{}", self.prefix2, self.prefix4, self.full)
    }

    /// Relative filesystem path: `xx/yy/hash`.
    pub fn to_path(&self) -> PathBuf {
        Path::new(&self.prefix2)
            .join(&self.prefix4)
            .join(&self.full)
    }
}

impl fmt::Display for ShardedPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_url_path())
    }
}

/// Shard an arbitrary hash string.
///
/// Accepts any even-length hex string of at least 4 characters, so it also
/// covers hashes that are not MD5-sized. The result is lowercased.
pub fn shard(hash: &str) -> Result<ShardedPath> {
    if hash.len() < 4 {
        return Err(Error::malformed_hash(hash, "shorter than 4 characters"));
    }
    if hash.len() % 2 != 0 {
        return Err(Error::malformed_hash(hash, "odd number of characters"));
    }
    if !hash.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(Error::malformed_hash(hash, "non-hex character"));
    }

    let full = hash.to_ascii_lowercase();
    Ok(ShardedPath {
        prefix2: full[0..2].to_string(),
        prefix4: full[2..4].to_string(),
        full,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_empty() {
        assert_eq!(
            ContentHash::digest(b"").to_hex(),
            "d41d8cd98f00b204e9800998ecf8427e"
        );
    }

    #[test]
    fn test_digest_hello_world() {
        assert_eq!(
            ContentHash::digest(b"hello world").to_hex(),
            "5eb63bbbe01eeed093cb22bb8f5acdc3"
        );
    }

    #[test]
    fn test_from_hex_accepts_uppercase() {
        let hash = ContentHash::from_hex("5EB63BBBE01EEED093CB22BB8F5ACDC3").unwrap();
        assert_eq!(hash.to_hex(), "5eb63bbbe01eeed093cb22bb8f5acdc3");
    }

    #[test]
    fn test_from_hex_invalid_length() {
        assert!(ContentHash::from_hex("abcd").is_err());
        assert!(ContentHash::from_hex("").is_err());
    }

    #[test]
    fn test_from_hex_invalid_chars() {
        let invalid = "z".repeat(32);
        assert!(matches!(
            ContentHash::from_hex(&invalid),
            Err(Error::MalformedHash { .. })
        ));
    }

    #[test]
    fn test_shard_layout() {
        let sharded = shard("b5056174e18346a7c6c5a1e06cc0e828").unwrap();
        assert_eq!(sharded.prefix2, "b5");
        assert_eq!(sharded.prefix4, "05");
        assert_eq!(
            sharded.to_url_path(),
            "b5/05/b5056174e18346a7c6c5a1e06cc0e828"
        );
        assert_eq!(
            sharded.to_path(),
            Path::new("b5").join("05").join("b5056174e18346a7c6c5a1e06cc0e828")
        );
    }

    #[test]
    fn test_shard_rejects_malformed() {
        assert!(shard("abc").is_err());
        assert!(shard("abcde").is_err());
        assert!(shard("abcg").is_err());
        assert!(shard("").is_err());
    }

    #[test]
    fn test_shard_matches_content_hash_shard() {
        let hash = ContentHash::digest(b"catalog");
        assert_eq!(shard(&hash.to_hex()).unwrap(), hash.shard());
    }

    #[test]
    fn test_short_digest_is_prefix() {
        let full = ContentHash::digest(b"block");
        assert_eq!(&short_digest(b"block")[..], &full.as_bytes()[..8]);
    }

    // Property-based tests
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Sharding is deterministic and both prefixes are two characters
        #[test]
        fn prop_shard_deterministic(s in "([0-9a-f]{2}){2,32}") {
            let a = shard(&s)?;
            let b = shard(&s)?;
            prop_assert_eq!(a.prefix2.len(), 2);
            prop_assert_eq!(a.prefix4.len(), 2);
            prop_assert_eq!(&a.full, &s);
            prop_assert_eq!(a, b);
        }

        /// Distinct hashes never share a full path
        #[test]
        fn prop_shard_injective(
            a in prop::array::uniform16(any::<u8>()),
            b in prop::array::uniform16(any::<u8>()),
        ) {
            let ha = ContentHash::from_bytes(a);
            let hb = ContentHash::from_bytes(b);
            prop_assert_eq!(ha == hb, ha.shard().to_path() == hb.shard().to_path());
        }

        /// Hex encoding round-trips through from_hex
        #[test]
        fn prop_hex_roundtrip(bytes in prop::array::uniform16(any::<u8>())) {
            let hash = ContentHash::from_bytes(bytes);
            prop_assert_eq!(ContentHash::from_hex(&hash.to_hex())?, hash);
        }
    }
}
