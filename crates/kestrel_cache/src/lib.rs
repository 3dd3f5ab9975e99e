//! Content-addressed build cache.
//!
//! Generated artifacts (native libraries for the compiled backend, lowered
//! netlists) are keyed by a [`CacheKey`] derived from the hash of their source
//! plus the version of the generator that produced them. The cache is an
//! explicit [`BuildCache`] object passed to each build step.

#![warn(missing_docs)]

pub mod artifact;
pub mod cache;
pub mod error;
pub mod key;
pub mod manifest;

pub use artifact::{ArtifactHeader, ArtifactStore};
pub use cache::{BuildCache, CacheStats, KESTREL_VERSION};
pub use error::CacheError;
pub use key::CacheKey;
pub use manifest::{ArtifactKind, CacheManifest, ManifestEntry};
