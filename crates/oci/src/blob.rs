//! Layer blob fetching.

use reqwest::header::HeaderMap;
use std::path::Path;
use tokio::io::BufWriter;
use tracing::{debug, warn};

use crate::http::{BlobDownload, FetchResult, HttpFetcher, apply_bearer, registry_url};
use crate::token::PullToken;
use crate::{Error, Result};

/// Build the blob URL for a digest.
#[must_use]
pub fn blob_url(registry: &str, repo: &str, digest: &str) -> String {
    registry_url(registry, &format!("v2/{repo}/blobs/{digest}"))
}

fn blob_headers(token: Option<&PullToken>) -> HeaderMap {
    let mut headers = HeaderMap::new();
    apply_bearer(&mut headers, token);
    headers
}

/// Fetch a blob into memory.
///
/// Whatever the registry sent is returned, unverified; the status lets the
/// caller classify failures.
pub async fn fetch_blob(
    http: &HttpFetcher,
    registry: &str,
    repo: &str,
    digest: &str,
    token: Option<&PullToken>,
) -> FetchResult {
    let url = blob_url(registry, repo, digest);
    debug!(%digest, %url, "Fetching blob");
    http.get(&url, blob_headers(token)).await
}

/// Stream a blob into `dest`, creating parent directories.
///
/// The returned [`BlobDownload`] carries the status and the digest of the
/// bytes actually written.
pub async fn download_blob(
    http: &HttpFetcher,
    registry: &str,
    repo: &str,
    digest: &str,
    token: Option<&PullToken>,
    dest: &Path,
) -> Result<BlobDownload> {
    let url = blob_url(registry, repo, digest);
    debug!(%digest, ?dest, "Downloading blob");

    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let file = tokio::fs::File::create(dest).await?;
    let mut writer = BufWriter::new(file);
    http.download(&url, blob_headers(token), &mut writer).await
}

/// Check a completed download against the digest named in the manifest.
///
/// Only `sha256` digests can be checked; other algorithms are accepted with
/// a warning.
pub fn verify_digest(expected: &str, download: &BlobDownload) -> Result<()> {
    let Some(actual) = download.digest.as_deref() else {
        return Err(Error::blob_fetch(expected, download.status));
    };

    if !expected.starts_with("sha256:") {
        warn!(%expected, "Cannot verify digests of this algorithm, accepting blob");
        return Ok(());
    }

    if actual.eq_ignore_ascii_case(expected) {
        Ok(())
    } else {
        Err(Error::digest_mismatch(expected, actual))
    }
}
