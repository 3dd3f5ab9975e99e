//! Cache keys.
//!
//! A key is the hash of everything that determines a build product: the
//! source content, the version of the generator that turns it into an
//! artifact, and any toolchain identity folded in with [`CacheKey::with`].
//! A new generator version therefore never reuses an old artifact.

use std::fmt;

use kestrel_common::ContentHash;
use serde::{Deserialize, Serialize};

/// Identifies one cached build product.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey(ContentHash);

impl CacheKey {
    /// Key for content already hashed to `source`, produced by `generator_version`.
    pub fn new(source: ContentHash, generator_version: &str) -> Self {
        Self(ContentHash::from_parts(&[
            source.as_bytes(),
            generator_version.as_bytes(),
        ]))
    }

    /// Key for raw source bytes.
    pub fn for_source(source: &[u8], generator_version: &str) -> Self {
        Self::new(ContentHash::from_bytes(source), generator_version)
    }

    /// Folds another input (a compiler version, an option string) into the key.
    pub fn with(self, extra: &str) -> Self {
        Self(ContentHash::from_parts(&[self.0.as_bytes(), extra.as_bytes()]))
    }

    /// The underlying digest.
    pub fn digest(&self) -> ContentHash {
        self.0
    }

    /// Parses the hex form produced by `Display`.
    pub fn from_hex(text: &str) -> Option<Self> {
        ContentHash::from_hex(text).map(Self)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CacheKey({:?})", self.0)
    }
}
