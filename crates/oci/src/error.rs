//! Error types for OCI pull operations.
//!
//! Most registry failures are not errors here: the fetchers report them as
//! status codes or absent values and leave the fatal/non-fatal decision to
//! the caller. This type covers the local side (files, archives, digests).

use std::path::PathBuf;
use thiserror::Error;

/// Result type for OCI pull operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during OCI operations.
#[derive(Error, Debug)]
pub enum Error {
    /// The layer archive could not be opened.
    #[error("Failed to open archive {}: {source}", path.display())]
    ArchiveOpen {
        /// Path of the archive.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The archive stream is corrupt or not a tar archive.
    #[error("Failed to read archive {}: {message}", path.display())]
    Archive {
        /// Path of the archive.
        path: PathBuf,
        /// Error message.
        message: String,
    },

    /// Blob request returned a non-success status or no data.
    #[error("Failed to fetch blob {digest} (HTTP {status})")]
    BlobFetch {
        /// The blob digest.
        digest: String,
        /// HTTP status, 0 for transport failures.
        status: u16,
    },

    /// A layer descriptor carried no digest, so there is nothing to fetch.
    #[error("Layer {ordinal} has no digest")]
    MissingDigest {
        /// Position of the layer in the manifest.
        ordinal: usize,
    },

    /// Digest mismatch after download.
    #[error("Digest mismatch for blob: expected {expected}, got {actual}")]
    DigestMismatch {
        /// The expected digest.
        expected: String,
        /// The computed digest.
        actual: String,
    },

    /// A blocking task panicked or was cancelled.
    #[error("Background task failed: {0}")]
    Join(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Create an archive open error.
    #[must_use]
    pub fn archive_open(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::ArchiveOpen {
            path: path.into(),
            source,
        }
    }

    /// Create an archive read error.
    #[must_use]
    pub fn archive(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Archive {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a blob fetch error.
    #[must_use]
    pub fn blob_fetch(digest: impl Into<String>, status: u16) -> Self {
        Self::BlobFetch {
            digest: digest.into(),
            status,
        }
    }

    /// Create a digest mismatch error.
    #[must_use]
    pub fn digest_mismatch(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::DigestMismatch {
            expected: expected.into(),
            actual: actual.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_mismatch_error() {
        let err = Error::digest_mismatch("sha256:expected", "sha256:actual");
        let msg = err.to_string();
        assert!(msg.contains("sha256:expected"));
        assert!(msg.contains("sha256:actual"));
    }

    #[test]
    fn test_blob_fetch_error() {
        let err = Error::blob_fetch("sha256:abc123", 404);
        assert_eq!(err.to_string(), "Failed to fetch blob sha256:abc123 (HTTP 404)");
    }

    #[test]
    fn test_archive_open_error_mentions_path() {
        let err = Error::archive_open(
            "/missing/layer.tar.gz",
            std::io::Error::from(std::io::ErrorKind::NotFound),
        );
        assert!(err.to_string().contains("/missing/layer.tar.gz"));
    }
}
