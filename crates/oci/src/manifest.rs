//! Manifest resolution.
//!
//! A tag may point at a single image manifest or at an image index listing
//! one manifest per platform. Indexes are dereferenced once: the entry for
//! the requested platform (or the first entry when none matches) is fetched
//! by digest and returned in place of the index.

use bytes::Bytes;
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::http::{HttpFetcher, apply_bearer, registry_url};
use crate::platform::Platform;
use crate::token::PullToken;
use crate::{
    DOCKER_MANIFEST_LIST_MEDIA_TYPE, DOCKER_MANIFEST_MEDIA_TYPE, OCI_INDEX_MEDIA_TYPE,
    OCI_MANIFEST_MEDIA_TYPE,
};

/// Media types sent in `Accept`, one header line each.
const ACCEPTED_MEDIA_TYPES: [&str; 4] = [
    OCI_MANIFEST_MEDIA_TYPE,
    OCI_INDEX_MEDIA_TYPE,
    DOCKER_MANIFEST_MEDIA_TYPE,
    DOCKER_MANIFEST_LIST_MEDIA_TYPE,
];

/// The index entry chosen for a platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedManifest {
    /// Position of the entry in the index's `manifests` array.
    pub index: usize,
    /// Digest of the platform manifest.
    pub digest: String,
    /// False when the entry was picked by the first-entry fallback.
    pub exact: bool,
}

/// Build the manifest URL for a tag or digest.
#[must_use]
pub fn manifest_url(registry: &str, repo: &str, reference: &str) -> String {
    registry_url(registry, &format!("v2/{repo}/manifests/{reference}"))
}

/// Headers for manifest requests: media type negotiation plus optional bearer.
#[must_use]
pub fn manifest_headers(token: Option<&PullToken>) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for media_type in ACCEPTED_MEDIA_TYPES {
        headers.append(ACCEPT, HeaderValue::from_static(media_type));
    }
    apply_bearer(&mut headers, token);
    headers
}

/// Whether a parsed document is an image index (OCI or Docker list).
#[must_use]
pub fn is_index(document: &Value) -> bool {
    matches!(
        document.get("mediaType").and_then(Value::as_str),
        Some(OCI_INDEX_MEDIA_TYPE | DOCKER_MANIFEST_LIST_MEDIA_TYPE)
    )
}

/// Pick the manifest digest for `platform` from an index document.
///
/// The first entry whose `platform.architecture` and `platform.os` both match
/// and that carries a string digest wins. Without such an entry, the first
/// entry of the array is used. Returns `None` when `manifests` is absent or
/// empty, or the fallback entry has no string digest.
#[must_use]
pub fn select_platform_digest(index: &Value, platform: &Platform) -> Option<SelectedManifest> {
    let manifests = index.get("manifests")?.as_array()?;

    let exact = manifests.iter().enumerate().find_map(|(position, entry)| {
        if !entry_matches(entry, platform) {
            return None;
        }
        entry_digest(entry).map(|digest| SelectedManifest {
            index: position,
            digest,
            exact: true,
        })
    });

    exact.or_else(|| {
        manifests.first().and_then(entry_digest).map(|digest| SelectedManifest {
            index: 0,
            digest,
            exact: false,
        })
    })
}

fn entry_matches(entry: &Value, platform: &Platform) -> bool {
    let Some(entry_platform) = entry.get("platform") else {
        return false;
    };
    let architecture = entry_platform.get("architecture").and_then(Value::as_str);
    let os = entry_platform.get("os").and_then(Value::as_str);
    matches!((architecture, os), (Some(a), Some(o)) if platform.matches(a, o))
}

fn entry_digest(entry: &Value) -> Option<String> {
    entry.get("digest")?.as_str().map(str::to_owned)
}

/// Fetch the manifest for `tag`, resolving an index to `platform`.
///
/// Returns `None` when the registry sends no bytes. A body that is not JSON
/// is returned unchanged, as is an index without any usable entry.
pub async fn fetch_manifest(
    http: &HttpFetcher,
    registry: &str,
    repo: &str,
    tag: &str,
    platform: &Platform,
    token: Option<&PullToken>,
) -> Option<Bytes> {
    let headers = manifest_headers(token);
    let url = manifest_url(registry, repo, tag);
    info!(%url, %platform, "Fetching manifest");

    let result = http.get(&url, headers.clone()).await;
    if result.is_empty() {
        warn!(status = result.status, %url, "Manifest response was empty");
        return None;
    }
    if !(200..300).contains(&result.status) {
        warn!(status = result.status, %url, "Manifest request returned a non-success status");
    }

    let Ok(document) = serde_json::from_slice::<Value>(&result.body) else {
        debug!("Manifest is not JSON, passing it through");
        return Some(result.body);
    };

    if !is_index(&document) {
        return Some(result.body);
    }

    let Some(selected) = select_platform_digest(&document, platform) else {
        debug!("Index has no usable manifest entries, returning it unchanged");
        return Some(result.body);
    };

    if selected.exact {
        debug!(digest = %selected.digest, %platform, "Selected platform manifest");
    } else {
        warn!(
            digest = %selected.digest,
            %platform,
            "No manifest for the requested platform, falling back to the first entry"
        );
    }

    let url = manifest_url(registry, repo, &selected.digest);
    let resolved = http.get(&url, headers).await;
    if resolved.is_empty() {
        warn!(status = resolved.status, %url, "Platform manifest response was empty");
        return None;
    }

    Some(resolved.body)
}
