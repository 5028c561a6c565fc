use std::fmt;
use std::sync::Arc;

use sha2::{Digest, Sha256};

/// Cache key for decoded images.
///
/// Keys are opaque strings chosen by the caller, typically a stringified
/// resource id or a path. The same key must be used for the same source
/// across process runs so that disk entries stay addressable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(Arc<str>);

impl CacheKey {
    pub fn new(key: impl Into<Arc<str>>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Stable on-disk name for this key: the lowercase hex SHA-256 of the key.
    ///
    /// Always 64 characters of `[0-9a-f]`, so it is safe as a filename and as
    /// a single journal token.
    pub fn digest(&self) -> String {
        hex::encode(Sha256::digest(self.0.as_bytes()))
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CacheKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

impl From<String> for CacheKey {
    fn from(key: String) -> Self {
        Self::new(key)
    }
}

/// Whether `token` looks like a [`CacheKey::digest`].
pub fn is_digest(token: &str) -> bool {
    token.len() == 64 && token.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}
