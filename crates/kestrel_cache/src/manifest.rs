//! Cache manifest recording every stored artifact.
//!
//! Stored as `manifest.json` in the cache root. Native libraries cannot carry
//! an artifact header, so their checksums live here and are verified before a
//! library is handed out.

use std::collections::BTreeMap;
use std::path::Path;

use kestrel_common::ContentHash;
use serde::{Deserialize, Serialize};

use crate::error::CacheError;

/// Name of the manifest file within the cache directory.
pub const MANIFEST_FILE: &str = "manifest.json";

/// What kind of product an entry holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    /// A serialized value with an artifact header.
    Blob,
    /// A shared library loaded by the compiled backend.
    NativeLibrary,
}

/// One stored artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Product kind.
    pub kind: ArtifactKind,
    /// Artifact subdirectory (the namespace passed to the cache).
    pub namespace: String,
    /// Path relative to the cache root.
    pub file: String,
    /// Generator version that produced it.
    pub generator_version: String,
    /// Hash of the file (native libraries) or payload (blobs).
    pub checksum: ContentHash,
    /// Size in bytes.
    pub size: u64,
}

/// All entries of a cache directory, keyed by cache key hex.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheManifest {
    /// Kestrel version that wrote this manifest. A different version starts fresh.
    pub kestrel_version: String,
    /// Entries by key.
    pub entries: BTreeMap<String, ManifestEntry>,
}

impl CacheManifest {
    /// Creates an empty manifest.
    pub fn new(kestrel_version: &str) -> Self {
        Self {
            kestrel_version: kestrel_version.to_string(),
            entries: BTreeMap::new(),
        }
    }

    /// Reads the manifest, distinguishing a missing file from a corrupt one.
    pub fn read(cache_dir: &Path) -> Result<Option<Self>, CacheError> {
        let path = cache_dir.join(MANIFEST_FILE);
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(CacheError::Io { path, source: e }),
        };
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| CacheError::ManifestParse {
                reason: e.to_string(),
            })
    }

    /// Loads the manifest; a missing or corrupt one yields `None`.
    pub fn load(cache_dir: &Path) -> Option<Self> {
        match Self::read(cache_dir) {
            Ok(manifest) => manifest,
            Err(err) => {
                tracing::warn!(error = %err, "ignoring unreadable cache manifest");
                None
            }
        }
    }

    /// Saves the manifest, creating the cache directory if needed.
    pub fn save(&self, cache_dir: &Path) -> Result<(), CacheError> {
        std::fs::create_dir_all(cache_dir).map_err(CacheError::io(cache_dir))?;
        let path = cache_dir.join(MANIFEST_FILE);
        let json = serde_json::to_string_pretty(self).map_err(|e| CacheError::Serialization {
            reason: e.to_string(),
        })?;
        std::fs::write(&path, json).map_err(CacheError::io(&path))
    }

    /// Whether this manifest was written by `current_version`.
    pub fn is_compatible(&self, current_version: &str) -> bool {
        self.kestrel_version == current_version
    }
}
