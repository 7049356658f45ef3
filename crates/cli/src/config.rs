//! Settings for one pull run.

use ocipull_oci::{DEFAULT_TOKEN_SERVICE, Platform};
use std::path::PathBuf;

/// Registry pulled from when none is given.
pub const DEFAULT_REGISTRY: &str = "https://harbor.nbfc.io";
/// Repository pulled when none is given.
pub const DEFAULT_REPO: &str = "nubificus/torchscript-v2-vaccel-gpu";
/// Tag pulled when none is given.
pub const DEFAULT_TAG: &str = "x86_64";
/// Default target architecture.
pub const DEFAULT_ARCH: &str = "amd64";
/// Default target operating system.
pub const DEFAULT_OS: &str = "linux";
/// Default extraction directory.
pub const DEFAULT_DEST: &str = "output";

/// Everything the pipeline needs to know about a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullConfig {
    /// Registry base URL, scheme included.
    pub registry: String,
    /// Repository path within the registry.
    pub repo: String,
    /// Tag to resolve.
    pub tag: String,
    /// Platform used to pick an entry out of an image index.
    pub platform: Platform,
    /// Directory layers are extracted into.
    pub dest: PathBuf,
    /// Token service name sent to the token endpoint.
    pub token_service: String,
    /// Continue without a token when the token endpoint fails.
    pub anonymous: bool,
    /// Check each downloaded layer against its manifest digest.
    pub verify: bool,
    /// Keep `layer-N.tar.gz` files in `work_dir` after extraction.
    pub keep_layers: bool,
    /// Directory holding downloaded layer archives.
    pub work_dir: PathBuf,
}

impl Default for PullConfig {
    fn default() -> Self {
        Self {
            registry: DEFAULT_REGISTRY.to_string(),
            repo: DEFAULT_REPO.to_string(),
            tag: DEFAULT_TAG.to_string(),
            platform: Platform::new(DEFAULT_ARCH, DEFAULT_OS),
            dest: PathBuf::from(DEFAULT_DEST),
            token_service: DEFAULT_TOKEN_SERVICE.to_string(),
            anonymous: false,
            verify: true,
            keep_layers: false,
            work_dir: PathBuf::from("."),
        }
    }
}

impl PullConfig {
    /// Config for `registry`/`repo`:`tag` with every other setting defaulted.
    #[must_use]
    pub fn new(
        registry: impl Into<String>,
        repo: impl Into<String>,
        tag: impl Into<String>,
    ) -> Self {
        Self {
            registry: registry.into(),
            repo: repo.into(),
            tag: tag.into(),
            ..Self::default()
        }
    }

    /// Human-readable image reference, used in logs.
    #[must_use]
    pub fn reference(&self) -> String {
        let host = self
            .registry
            .trim_start_matches("https://")
            .trim_start_matches("http://")
            .trim_end_matches('/');
        format!("{host}/{}:{}", self.repo, self.tag)
    }
}
