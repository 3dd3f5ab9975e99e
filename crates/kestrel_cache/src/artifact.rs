//! Header-validated binary artifact files.
//!
//! Every serialized artifact (lowered netlists, checked plans) is written as
//! `<u32 LE header length><bincode header><payload>`. The header carries
//! magic bytes, the file format version, the generator that produced the
//! payload and a checksum of the payload.

use std::path::{Path, PathBuf};

use kestrel_common::ContentHash;
use serde::{Deserialize, Serialize};

use crate::error::CacheError;
use crate::key::CacheKey;

/// Magic bytes identifying a Kestrel cache artifact.
const ARTIFACT_MAGIC: [u8; 4] = *b"KSTL";

/// Current artifact file format version.
pub const ARTIFACT_FORMAT_VERSION: u32 = 1;

/// Header prepended to every cached artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactHeader {
    /// Must be `b"KSTL"`.
    pub magic: [u8; 4],
    /// Artifact file format version.
    pub format_version: u32,
    /// Version of the generator that produced the payload.
    pub generator_version: String,
    /// Hash of the payload.
    pub checksum: ContentHash,
}

/// Reads and writes artifacts under `<root>/<subdir>/<key>.<ext>`.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    /// Creates a store rooted at `root`. Nothing is touched on disk yet.
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    /// Ensures that the subdirectory for an artifact kind exists.
    pub fn ensure_dirs(&self, subdir: &str) -> Result<(), CacheError> {
        let dir = self.root.join(subdir);
        std::fs::create_dir_all(&dir).map_err(CacheError::io(&dir))
    }

    /// Returns the file path for an artifact with the given key.
    pub fn artifact_path(&self, subdir: &str, key: &CacheKey, ext: &str) -> PathBuf {
        self.root.join(subdir).join(format!("{key}.{ext}"))
    }

    /// Writes an artifact and returns its path.
    ///
    /// The file is written to a temporary name and renamed into place, so a
    /// concurrent reader sees either the old file or the complete new one.
    pub fn write_artifact(
        &self,
        subdir: &str,
        ext: &str,
        key: &CacheKey,
        data: &[u8],
        generator_version: &str,
    ) -> Result<PathBuf, CacheError> {
        self.ensure_dirs(subdir)?;
        let path = self.artifact_path(subdir, key, ext);

        let header = ArtifactHeader {
            magic: ARTIFACT_MAGIC,
            format_version: ARTIFACT_FORMAT_VERSION,
            generator_version: generator_version.to_string(),
            checksum: ContentHash::from_bytes(data),
        };
        let output = encode(&header, data)?;

        let staging = path.with_extension(format!("{ext}.tmp"));
        std::fs::write(&staging, &output).map_err(CacheError::io(&staging))?;
        std::fs::rename(&staging, &path).map_err(CacheError::io(&path))?;
        Ok(path)
    }

    /// Reads an artifact, validating every header field.
    pub fn read_artifact_checked(
        &self,
        subdir: &str,
        key: &CacheKey,
        ext: &str,
    ) -> Result<Vec<u8>, CacheError> {
        let path = self.artifact_path(subdir, key, ext);
        let raw = std::fs::read(&path).map_err(CacheError::io(&path))?;
        let invalid = |reason: &str| CacheError::InvalidHeader {
            path: path.clone(),
            reason: reason.to_string(),
        };

        let len_bytes: [u8; 4] = raw
            .get(..4)
            .and_then(|b| b.try_into().ok())
            .ok_or_else(|| invalid("file shorter than the length prefix"))?;
        let header_len = u32::from_le_bytes(len_bytes) as usize;
        let header_bytes = raw
            .get(4..4 + header_len)
            .ok_or_else(|| invalid("truncated header"))?;
        let (header, _): (ArtifactHeader, usize) =
            bincode::serde::decode_from_slice(header_bytes, bincode::config::standard())
                .map_err(|e| invalid(&e.to_string()))?;

        if header.magic != ARTIFACT_MAGIC {
            return Err(invalid("missing magic bytes"));
        }
        if header.format_version != ARTIFACT_FORMAT_VERSION {
            return Err(CacheError::VersionMismatch {
                path,
                expected: ARTIFACT_FORMAT_VERSION,
                actual: header.format_version,
            });
        }
        let payload = &raw[4 + header_len..];
        let actual = ContentHash::from_bytes(payload);
        if actual != header.checksum {
            return Err(CacheError::ChecksumMismatch {
                path,
                expected: header.checksum.to_string(),
                actual: actual.to_string(),
            });
        }
        Ok(payload.to_vec())
    }

    /// Reads an artifact; any problem is a miss.
    pub fn read_artifact(&self, subdir: &str, key: &CacheKey, ext: &str) -> Option<Vec<u8>> {
        match self.read_artifact_checked(subdir, key, ext) {
            Ok(data) => Some(data),
            Err(CacheError::Io { source, .. })
                if source.kind() == std::io::ErrorKind::NotFound =>
            {
                None
            }
            Err(err) => {
                tracing::debug!(%key, error = %err, "discarding unreadable artifact");
                None
            }
        }
    }

    /// Removes files with extension `ext` in `subdir` whose key is not live.
    ///
    /// Returns the number of files removed.
    pub fn gc(&self, subdir: &str, ext: &str, live: &[CacheKey]) -> Result<usize, CacheError> {
        let dir = self.root.join(subdir);
        if !dir.exists() {
            return Ok(0);
        }
        let live: Vec<String> = live.iter().map(|k| k.to_string()).collect();
        let mut removed = 0;
        for entry in std::fs::read_dir(&dir).map_err(CacheError::io(&dir))? {
            let path = entry.map_err(CacheError::io(&dir))?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(ext) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if !live.iter().any(|k| k == stem) {
                std::fs::remove_file(&path).map_err(CacheError::io(&path))?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

fn encode(header: &ArtifactHeader, data: &[u8]) -> Result<Vec<u8>, CacheError> {
    let header_bytes = bincode::serde::encode_to_vec(header, bincode::config::standard())
        .map_err(|e| CacheError::Serialization {
            reason: e.to_string(),
        })?;
    let mut output = Vec::with_capacity(4 + header_bytes.len() + data.len());
    output.extend_from_slice(&(header_bytes.len() as u32).to_le_bytes());
    output.extend_from_slice(&header_bytes);
    output.extend_from_slice(data);
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_store() -> (tempfile::TempDir, ArtifactStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        (dir, store)
    }

    fn key(text: &str) -> CacheKey {
        CacheKey::for_source(text.as_bytes(), "test-1")
    }

    fn write_raw(store: &ArtifactStore, k: &CacheKey, header: &ArtifactHeader, payload: &[u8]) {
        store.ensure_dirs("netlist").unwrap();
        let bytes = encode(header, payload).unwrap();
        std::fs::write(store.artifact_path("netlist", k, "bin"), bytes).unwrap();
    }

    #[test]
    fn write_and_read_back() {
        let (_dir, store) = make_store();
        let k = key("adder");
        let path = store
            .write_artifact("netlist", "bin", &k, b"gate data", "lower-1")
            .unwrap();
        assert!(path.ends_with(format!("netlist/{k}.bin")));
        assert_eq!(store.read_artifact("netlist", &k, "bin").unwrap(), b"gate data");
    }

    #[test]
    fn read_missing_returns_none() {
        let (_dir, store) = make_store();
        assert!(store.read_artifact("netlist", &key("nope"), "bin").is_none());
    }

    #[test]
    fn garbage_is_invalid_header() {
        let (_dir, store) = make_store();
        store.ensure_dirs("netlist").unwrap();
        let k = key("corrupt");
        std::fs::write(store.artifact_path("netlist", &k, "bin"), b"AB").unwrap();
        assert!(matches!(
            store.read_artifact_checked("netlist", &k, "bin"),
            Err(CacheError::InvalidHeader { .. })
        ));
        assert!(store.read_artifact("netlist", &k, "bin").is_none());
    }

    #[test]
    fn wrong_magic_rejected() {
        let (_dir, store) = make_store();
        let k = key("magic");
        let header = ArtifactHeader {
            magic: *b"BAAD",
            format_version: ARTIFACT_FORMAT_VERSION,
            generator_version: "test-1".to_string(),
            checksum: ContentHash::from_bytes(b"data"),
        };
        write_raw(&store, &k, &header, b"data");
        let err = store.read_artifact_checked("netlist", &k, "bin").unwrap_err();
        assert!(err.to_string().contains("missing magic bytes"));
    }

    #[test]
    fn wrong_version_rejected() {
        let (_dir, store) = make_store();
        let k = key("old");
        let header = ArtifactHeader {
            magic: ARTIFACT_MAGIC,
            format_version: 999,
            generator_version: "test-1".to_string(),
            checksum: ContentHash::from_bytes(b"data"),
        };
        write_raw(&store, &k, &header, b"data");
        assert!(matches!(
            store.read_artifact_checked("netlist", &k, "bin"),
            Err(CacheError::VersionMismatch { actual: 999, .. })
        ));
    }

    #[test]
    fn tampered_payload_rejected() {
        let (_dir, store) = make_store();
        let k = key("tampered");
        let header = ArtifactHeader {
            magic: ARTIFACT_MAGIC,
            format_version: ARTIFACT_FORMAT_VERSION,
            generator_version: "test-1".to_string(),
            checksum: ContentHash::from_bytes(b"data"),
        };
        write_raw(&store, &k, &header, b"tampered");
        assert!(matches!(
            store.read_artifact_checked("netlist", &k, "bin"),
            Err(CacheError::ChecksumMismatch { .. })
        ));
        assert!(store.read_artifact("netlist", &k, "bin").is_none());
    }

    #[test]
    fn gc_keeps_live_keys_only() {
        let (_dir, store) = make_store();
        let a = key("a");
        let b = key("b");
        store.write_artifact("netlist", "bin", &a, b"A", "v").unwrap();
        store.write_artifact("netlist", "bin", &b, b"B", "v").unwrap();
        assert_eq!(store.gc("netlist", "bin", &[a]).unwrap(), 1);
        assert!(store.read_artifact("netlist", &a, "bin").is_some());
        assert!(store.read_artifact("netlist", &b, "bin").is_none());
        assert_eq!(store.gc("absent", "bin", &[]).unwrap(), 0);
    }

    #[test]
    fn overwrite_replaces_payload() {
        let (_dir, store) = make_store();
        let k = key("same");
        store.write_artifact("netlist", "bin", &k, b"one", "v").unwrap();
        store.write_artifact("netlist", "bin", &k, b"two", "v").unwrap();
        assert_eq!(store.read_artifact("netlist", &k, "bin").unwrap(), b"two");
    }
}
