//! Cache keys derived from source URLs.

use sha2::{Digest, Sha256};

/// Filesystem-safe identifier for a cached image.
///
/// Used as the lookup key in the memory tier, as the filename in the disk
/// tier and as the key of the in-flight download map.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Derives a key from a URL by hashing it.
    ///
    /// The same URL always yields the same key and distinct URLs only collide
    /// with SHA-256 probability.
    #[must_use]
    pub fn from_url(url: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(url.as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    /// Returns the inner string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
