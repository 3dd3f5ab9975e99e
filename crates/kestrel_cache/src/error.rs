//! Errors raised while storing or verifying cached build outputs.

use std::path::PathBuf;

/// Errors from the build cache.
///
/// Lookups of lowered netlists and native libraries are fail-safe and turn
/// these into misses, so a damaged cache only costs a rebuild. Stores
/// surface them to the build step that produced the artifact.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Reading or writing a file under the cache root failed.
    #[error("cache I/O error at {path}: {source}")]
    Io {
        /// The netlist, library or manifest path involved.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// `manifest.json` is not valid JSON for the current manifest layout.
    #[error("failed to parse cache manifest: {reason}")]
    ManifestParse {
        /// Description of the parse failure.
        reason: String,
    },

    /// A serialized artifact such as a lowered netlist is truncated or lacks
    /// the `KSTL` magic.
    #[error("invalid artifact header in {path}: {reason}")]
    InvalidHeader {
        /// The artifact file path.
        path: PathBuf,
        /// Description of the header problem.
        reason: String,
    },

    /// A netlist payload or native library no longer hashes to the recorded
    /// checksum.
    #[error("checksum mismatch in {path}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        /// The artifact file path.
        path: PathBuf,
        /// Checksum recorded when the artifact was stored.
        expected: String,
        /// Checksum of the bytes found on disk.
        actual: String,
    },

    /// The artifact was written by another artifact file format version.
    #[error("version mismatch in {path}: expected {expected}, got {actual}")]
    VersionMismatch {
        /// The artifact file path.
        path: PathBuf,
        /// The format version this build reads.
        expected: u32,
        /// The format version found in the file.
        actual: u32,
    },

    /// Encoding a netlist or the manifest failed.
    #[error("serialization error: {reason}")]
    Serialization {
        /// Description of the serialization failure.
        reason: String,
    },
}

impl CacheError {
    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> CacheError {
        let path = path.into();
        move |source| CacheError::Io { path, source }
    }
}
