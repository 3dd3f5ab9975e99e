//! The build cache object handed to artifact producers.
//!
//! [`BuildCache`] ties the manifest and the artifact store together. It is an
//! explicit value passed to whatever builds artifacts (the compiled backend,
//! the lowering), never a process-wide singleton. All methods take `&self`, so
//! one cache can be shared across threads behind an `Arc`.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use kestrel_common::ContentHash;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::artifact::ArtifactStore;
use crate::error::CacheError;
use crate::key::CacheKey;
use crate::manifest::{ArtifactKind, CacheManifest, ManifestEntry};

/// Subdirectory for native libraries.
const NATIVE_SUBDIR: &str = "native";

/// Extension for serialized artifacts.
const BLOB_EXT: &str = "bin";

/// Version recorded in manifests written by this build.
pub const KESTREL_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Hit and miss counters since the cache was opened.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups that returned an artifact.
    pub hits: u64,
    /// Lookups that found nothing usable.
    pub misses: u64,
}

/// Content-addressed cache of generated artifacts.
#[derive(Debug)]
pub struct BuildCache {
    root: PathBuf,
    store: ArtifactStore,
    manifest: Mutex<CacheManifest>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl BuildCache {
    /// Opens (creating if needed) the cache rooted at `root`.
    ///
    /// A manifest from another Kestrel version, or an unreadable one, is
    /// replaced by an empty manifest.
    pub fn open(root: &Path) -> Result<Self, CacheError> {
        std::fs::create_dir_all(root).map_err(CacheError::io(root))?;
        let manifest = CacheManifest::load(root)
            .filter(|m| m.is_compatible(KESTREL_VERSION))
            .unwrap_or_else(|| CacheManifest::new(KESTREL_VERSION));
        tracing::debug!(
            root = %root.display(),
            entries = manifest.entries.len(),
            "opened build cache"
        );
        Ok(Self {
            root: root.to_path_buf(),
            store: ArtifactStore::new(root),
            manifest: Mutex::new(manifest),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        })
    }

    /// The cache root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Hit and miss counts so far.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    /// Number of entries in the manifest.
    pub fn len(&self) -> usize {
        self.manifest().entries.len()
    }

    /// Whether the manifest has no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `key` has a manifest entry.
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.manifest().entries.contains_key(&key.to_string())
    }

    /// Stores raw bytes under `namespace`.
    pub fn store_bytes(
        &self,
        namespace: &str,
        key: &CacheKey,
        data: &[u8],
        generator_version: &str,
    ) -> Result<(), CacheError> {
        let path = self
            .store
            .write_artifact(namespace, BLOB_EXT, key, data, generator_version)?;
        self.record(
            key,
            ManifestEntry {
                kind: ArtifactKind::Blob,
                namespace: namespace.to_string(),
                file: self.relative(&path),
                generator_version: generator_version.to_string(),
                checksum: ContentHash::from_bytes(data),
                size: data.len() as u64,
            },
        )
    }

    /// Loads raw bytes stored under `namespace`; any problem is a miss.
    pub fn load_bytes(&self, namespace: &str, key: &CacheKey) -> Option<Vec<u8>> {
        let found = self.store.read_artifact(namespace, key, BLOB_EXT);
        self.count(found.is_some());
        found
    }

    /// Serializes `value` with bincode and stores it.
    pub fn store<T: Serialize>(
        &self,
        namespace: &str,
        key: &CacheKey,
        value: &T,
        generator_version: &str,
    ) -> Result<(), CacheError> {
        let data = bincode::serde::encode_to_vec(value, bincode::config::standard()).map_err(
            |e| CacheError::Serialization {
                reason: e.to_string(),
            },
        )?;
        self.store_bytes(namespace, key, &data, generator_version)
    }

    /// Loads and deserializes a value; a payload that no longer decodes is a miss.
    pub fn load<T: DeserializeOwned>(&self, namespace: &str, key: &CacheKey) -> Option<T> {
        let data = self.store.read_artifact(namespace, key, BLOB_EXT);
        let value = data.and_then(|data| {
            bincode::serde::decode_from_slice(&data, bincode::config::standard())
                .map(|(value, _)| value)
                .map_err(|e| tracing::debug!(%key, error = %e, "cached value no longer decodes"))
                .ok()
        });
        self.count(value.is_some());
        value
    }

    /// The slot where the native library for `key` lives.
    pub fn library_path(&self, key: &CacheKey) -> PathBuf {
        self.root
            .join(NATIVE_SUBDIR)
            .join(format!("{key}.{}", std::env::consts::DLL_EXTENSION))
    }

    /// Moves a freshly built library into the slot for `key` and records its checksum.
    pub fn store_native(
        &self,
        key: &CacheKey,
        built: &Path,
        generator_version: &str,
    ) -> Result<PathBuf, CacheError> {
        let slot = self.library_path(key);
        self.store.ensure_dirs(NATIVE_SUBDIR)?;
        if built != slot.as_path() && std::fs::rename(built, &slot).is_err() {
            std::fs::copy(built, &slot).map_err(CacheError::io(&slot))?;
        }
        let bytes = std::fs::read(&slot).map_err(CacheError::io(&slot))?;
        self.record(
            key,
            ManifestEntry {
                kind: ArtifactKind::NativeLibrary,
                namespace: NATIVE_SUBDIR.to_string(),
                file: self.relative(&slot),
                generator_version: generator_version.to_string(),
                checksum: ContentHash::from_bytes(&bytes),
                size: bytes.len() as u64,
            },
        )?;
        tracing::info!(%key, path = %slot.display(), "cached native library");
        Ok(slot)
    }

    /// Returns the cached library for `key` if its bytes still match the manifest.
    pub fn lookup_native(&self, key: &CacheKey) -> Option<PathBuf> {
        let found = self.verify_native(key).unwrap_or_else(|err| {
            tracing::warn!(%key, error = %err, "discarding cached native library");
            None
        });
        self.count(found.is_some());
        if found.is_some() {
            tracing::info!(%key, "native library cache hit");
        }
        found
    }

    fn verify_native(&self, key: &CacheKey) -> Result<Option<PathBuf>, CacheError> {
        let Some(entry) = self.manifest().entries.get(&key.to_string()).cloned() else {
            return Ok(None);
        };
        let slot = self.library_path(key);
        if !slot.exists() {
            return Ok(None);
        }
        let bytes = std::fs::read(&slot).map_err(CacheError::io(&slot))?;
        let actual = ContentHash::from_bytes(&bytes);
        if actual != entry.checksum {
            return Err(CacheError::ChecksumMismatch {
                path: slot,
                expected: entry.checksum.to_string(),
                actual: actual.to_string(),
            });
        }
        Ok(Some(slot))
    }

    /// Deletes every artifact not referenced by the manifest. Returns the count removed.
    pub fn gc(&self) -> Result<usize, CacheError> {
        let manifest = self.manifest().clone();
        let mut namespaces: Vec<&str> = manifest
            .entries
            .values()
            .filter(|e| e.kind == ArtifactKind::Blob)
            .map(|e| e.namespace.as_str())
            .collect();
        namespaces.sort_unstable();
        namespaces.dedup();

        let live_in = |namespace: &str, kind: ArtifactKind| -> Vec<CacheKey> {
            manifest
                .entries
                .iter()
                .filter(|(_, e)| e.kind == kind && e.namespace == namespace)
                .filter_map(|(k, _)| CacheKey::from_hex(k))
                .collect()
        };
        let mut removed = 0;
        for namespace in namespaces {
            removed += self
                .store
                .gc(namespace, BLOB_EXT, &live_in(namespace, ArtifactKind::Blob))?;
        }
        removed += self.store.gc(
            NATIVE_SUBDIR,
            std::env::consts::DLL_EXTENSION,
            &live_in(NATIVE_SUBDIR, ArtifactKind::NativeLibrary),
        )?;
        Ok(removed)
    }

    /// Drops `key` from the manifest. The file is reclaimed by the next [`gc`](Self::gc).
    pub fn forget(&self, key: &CacheKey) -> Result<bool, CacheError> {
        let mut manifest = self.manifest();
        let existed = manifest.entries.remove(&key.to_string()).is_some();
        manifest.save(&self.root)?;
        Ok(existed)
    }

    fn record(&self, key: &CacheKey, entry: ManifestEntry) -> Result<(), CacheError> {
        let mut manifest = self.manifest();
        manifest.entries.insert(key.to_string(), entry);
        manifest.save(&self.root)
    }

    fn relative(&self, path: &Path) -> String {
        path.strip_prefix(&self.root)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/")
    }

    fn count(&self, hit: bool) {
        let counter = if hit { &self.hits } else { &self.misses };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn manifest(&self) -> MutexGuard<'_, CacheManifest> {
        self.manifest.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::MANIFEST_FILE;

    fn make_cache() -> (tempfile::TempDir, BuildCache) {
        let dir = tempfile::tempdir().unwrap();
        let cache = BuildCache::open(dir.path()).unwrap();
        (dir, cache)
    }

    fn key(text: &str) -> CacheKey {
        CacheKey::for_source(text.as_bytes(), "gen-1")
    }

    #[test]
    fn fresh_cache_is_empty() {
        let (_dir, cache) = make_cache();
        assert!(cache.is_empty());
        assert_eq!(cache.stats(), CacheStats::default());
    }

    #[test]
    fn typed_values_round_trip() {
        let (_dir, cache) = make_cache();
        let k = key("plan");
        let value: Vec<(String, u64)> = vec![("a".into(), 1), ("b".into(), 2)];
        cache.store("plans", &k, &value, "gen-1").unwrap();
        let back: Vec<(String, u64)> = cache.load("plans", &k).unwrap();
        assert_eq!(back, value);
        assert!(cache.contains(&k));
        assert_eq!(cache.stats().hits, 1);
    }

    #[test]
    fn miss_is_counted() {
        let (_dir, cache) = make_cache();
        assert!(cache.load_bytes("plans", &key("absent")).is_none());
        assert!(cache.load::<u32>("plans", &key("absent")).is_none());
        assert_eq!(cache.stats().misses, 2);
    }

    #[test]
    fn manifest_persists_across_opens() {
        let dir = tempfile::tempdir().unwrap();
        let k = key("netlist");
        {
            let cache = BuildCache::open(dir.path()).unwrap();
            cache.store_bytes("netlist", &k, b"gates", "lower-1").unwrap();
        }
        assert!(dir.path().join(MANIFEST_FILE).exists());
        let cache = BuildCache::open(dir.path()).unwrap();
        assert!(cache.contains(&k));
        assert_eq!(cache.load_bytes("netlist", &k).unwrap(), b"gates");
    }

    #[test]
    fn other_version_manifest_starts_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let mut old = CacheManifest::new("0.0.0-old");
        old.entries.insert(
            "00".into(),
            ManifestEntry {
                kind: ArtifactKind::Blob,
                namespace: "x".into(),
                file: "x/00.bin".into(),
                generator_version: "g".into(),
                checksum: ContentHash::from_bytes(b""),
                size: 0,
            },
        );
        old.save(dir.path()).unwrap();
        assert!(BuildCache::open(dir.path()).unwrap().is_empty());
    }

    #[test]
    fn native_library_slot_round_trip() {
        let (dir, cache) = make_cache();
        let k = key("model.rs");
        let built = dir.path().join("build-output");
        std::fs::write(&built, b"\x7fELF fake library").unwrap();

        assert!(cache.lookup_native(&k).is_none());
        let slot = cache.store_native(&k, &built, "compiled-1").unwrap();
        assert_eq!(slot, cache.library_path(&k));
        assert!(!built.exists());
        assert_eq!(cache.lookup_native(&k), Some(slot));
        assert_eq!(cache.stats(), CacheStats { hits: 1, misses: 1 });
    }

    #[test]
    fn tampered_native_library_is_a_miss() {
        let (dir, cache) = make_cache();
        let k = key("model.rs");
        let built = dir.path().join("lib");
        std::fs::write(&built, b"original").unwrap();
        let slot = cache.store_native(&k, &built, "compiled-1").unwrap();
        std::fs::write(&slot, b"changed").unwrap();
        assert!(cache.lookup_native(&k).is_none());
    }

    #[test]
    fn gc_removes_forgotten_artifacts() {
        let (_dir, cache) = make_cache();
        let a = key("a");
        let b = key("b");
        cache.store_bytes("netlist", &a, b"A", "g").unwrap();
        cache.store_bytes("netlist", &b, b"B", "g").unwrap();
        assert!(cache.forget(&b).unwrap());
        assert!(!cache.forget(&b).unwrap());
        assert_eq!(cache.gc().unwrap(), 1);
        assert!(cache.load_bytes("netlist", &a).is_some());
        assert!(cache.load_bytes("netlist", &b).is_none());
    }

    #[test]
    fn shared_across_threads() {
        let (_dir, cache) = make_cache();
        let cache = std::sync::Arc::new(cache);
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let cache = cache.clone();
                std::thread::spawn(move || {
                    let k = key(&format!("t{i}"));
                    cache.store("plans", &k, &i, "g").unwrap();
                    cache.load::<i32>("plans", &k)
                })
            })
            .collect();
        for (i, h) in handles.into_iter().enumerate() {
            assert_eq!(h.join().unwrap(), Some(i as i32));
        }
        assert_eq!(cache.len(), 4);
    }
}
