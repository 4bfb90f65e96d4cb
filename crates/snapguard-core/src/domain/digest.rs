//! Content hashing for snapshot deduplication.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// SHA-256 hex digest of snapshot content.
///
/// Equal content always yields an equal hash. The empty string is never
/// hashed by the pool codec; it is represented by `ContentHash::is_empty`.
/// Deserialized keys are lowercased, so pool files written by other tools
/// with uppercase hex still resolve.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct ContentHash(String);

impl ContentHash {
    /// Hash the UTF-8 bytes of `content`.
    pub fn of(content: &str) -> Self {
        Self::from_bytes(content.as_bytes())
    }

    /// Hash raw bytes.
    pub fn from_bytes(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        ContentHash(hex::encode(hasher.finalize()))
    }

    /// Wrap an already computed hex string.
    pub fn from_hex(hex: impl Into<String>) -> Self {
        ContentHash(hex.into().to_ascii_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Short form (first 12 chars). Keys read from untrusted files need not
    /// be hex, so the cut falls on a char boundary.
    pub fn short(&self) -> &str {
        match self.0.char_indices().nth(12) {
            Some((end, _)) => &self.0[..end],
            None => &self.0,
        }
    }

    /// True if this hash was computed from `content`.
    pub fn matches(&self, content: &str) -> bool {
        !self.is_empty() && *self == Self::of(content)
    }
}

impl From<String> for ContentHash {
    fn from(raw: String) -> Self {
        Self::from_hex(raw)
    }
}

impl From<ContentHash> for String {
    fn from(hash: ContentHash) -> Self {
        hash.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
