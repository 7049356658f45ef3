//! Run-level errors with miette diagnostics
//!
//! Only conditions that end the whole pull live here. Per-layer failures are
//! logged and counted by the pipeline instead.

use miette::Diagnostic;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that abort a pull run
#[derive(Error, Debug, Diagnostic)]
pub enum PipelineError {
    #[error("Failed to fetch authentication token from {registry}")]
    #[diagnostic(
        code(ocipull::token_unavailable),
        help("Check the registry URL and repository, or pass --anonymous to pull without a token")
    )]
    TokenUnavailable { registry: String },

    #[error("Failed to fetch manifest for {repo}:{tag}")]
    #[diagnostic(
        code(ocipull::manifest_unavailable),
        help("Check that the tag exists and publishes the requested platform")
    )]
    ManifestUnavailable { repo: String, tag: String },

    #[error("No layers found in the manifest")]
    #[diagnostic(
        code(ocipull::no_layers),
        help("The tag may point at an artifact without filesystem layers")
    )]
    NoLayers,

    #[error("Failed to prepare directory {}", path.display())]
    #[diagnostic(
        code(ocipull::destination),
        help("Check permissions on the destination path")
    )]
    Destination {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to initialize the HTTP client")]
    #[diagnostic(code(ocipull::http_client))]
    HttpClient {
        #[source]
        source: reqwest::Error,
    },
}

impl PipelineError {
    pub fn token_unavailable(registry: impl Into<String>) -> Self {
        Self::TokenUnavailable {
            registry: registry.into(),
        }
    }

    pub fn manifest_unavailable(repo: impl Into<String>, tag: impl Into<String>) -> Self {
        Self::ManifestUnavailable {
            repo: repo.into(),
            tag: tag.into(),
        }
    }

    pub fn destination(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Destination {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_error_names_registry() {
        let err = PipelineError::token_unavailable("https://harbor.example");
        assert_eq!(
            err.to_string(),
            "Failed to fetch authentication token from https://harbor.example"
        );
        assert_eq!(
            err.code().map(|c| c.to_string()).as_deref(),
            Some("ocipull::token_unavailable")
        );
    }

    #[test]
    fn test_manifest_error_names_reference() {
        let err = PipelineError::manifest_unavailable("org/app", "v1");
        assert!(err.to_string().contains("org/app:v1"));
    }

    #[test]
    fn test_no_layers_has_help() {
        assert!(PipelineError::NoLayers.help().is_some());
    }
}
