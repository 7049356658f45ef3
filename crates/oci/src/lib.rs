//! OCI registry pull client for ocipull.
//!
//! This crate provides the pieces of a single-image pull:
//! - Acquire an anonymous pull token from a Harbor-style token service
//! - Resolve a tag to a platform-specific manifest, dereferencing image indexes
//! - Enumerate and download layer blobs
//! - Extract layer archives into a destination tree
//!
//! Every call takes a shared [`HttpFetcher`]; nothing here keeps global state.
//!
//! # Example
//!
//! ```ignore
//! use ocipull_oci::{HttpFetcher, Platform, fetch_manifest, fetch_token, parse_layers};
//!
//! let http = HttpFetcher::new()?;
//! let token = fetch_token(&http, "https://harbor.example", "org/app").await;
//! let manifest = fetch_manifest(
//!     &http,
//!     "https://harbor.example",
//!     "org/app",
//!     "latest",
//!     &Platform::new("amd64", "linux"),
//!     token.as_ref(),
//! )
//! .await;
//! let layers = manifest.map(|m| parse_layers(&m)).unwrap_or_default();
//! ```

#![warn(missing_docs)]

pub mod blob;
mod error;
pub mod extract;
pub mod http;
pub mod layers;
pub mod manifest;
mod platform;
pub mod token;

pub use blob::{download_blob, fetch_blob, verify_digest};
pub use error::{Error, Result};
pub use extract::{ExtractReport, extract_layer, extract_tar_gz};
pub use http::{BlobDownload, FetchResult, HttpFetcher};
pub use layers::{LayerDescriptor, parse_layers};
pub use manifest::{SelectedManifest, fetch_manifest, select_platform_digest};
pub use platform::{Platform, current_platform, normalize_arch};
pub use token::{DEFAULT_TOKEN_SERVICE, PullToken, fetch_token, fetch_token_for_service};

/// Media type of an OCI image manifest.
pub const OCI_MANIFEST_MEDIA_TYPE: &str = "application/vnd.oci.image.manifest.v1+json";

/// Media type of an OCI image index.
pub const OCI_INDEX_MEDIA_TYPE: &str = "application/vnd.oci.image.index.v1+json";

/// Media type of a Docker v2 schema 2 manifest.
pub const DOCKER_MANIFEST_MEDIA_TYPE: &str =
    "application/vnd.docker.distribution.manifest.v2+json";

/// Media type of a Docker manifest list.
pub const DOCKER_MANIFEST_LIST_MEDIA_TYPE: &str =
    "application/vnd.docker.distribution.manifest.list.v2+json";
