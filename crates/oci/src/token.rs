//! Pull-token acquisition.
//!
//! Harbor-style registries hand out anonymous pull tokens from
//! `{registry}/service/token`. An unusable answer is not an error: the caller
//! gets `None` and decides whether to continue anonymously.

use reqwest::header::HeaderMap;
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use tracing::{debug, info};

use crate::http::{HttpFetcher, registry_url};

/// Token service name used when none is configured.
pub const DEFAULT_TOKEN_SERVICE: &str = "harbor-registry";

/// Bearer token presented on every request of a run.
///
/// The value is kept out of `Debug` output.
#[derive(Debug)]
pub struct PullToken(SecretString);

impl PullToken {
    /// Wrap a raw token string.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(SecretString::from(token.into()))
    }

    /// The wrapped secret.
    #[must_use]
    pub fn secret(&self) -> &SecretString {
        &self.0
    }

    /// Whether the token is the empty string.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.expose_secret().is_empty()
    }
}

/// Build the token endpoint URL for `repo`.
#[must_use]
pub fn token_url(registry: &str, repo: &str, service: &str) -> String {
    registry_url(
        registry,
        &format!("service/token?service={service}&scope=repository:{repo}:pull"),
    )
}

/// Fetch a pull token using the default Harbor service name.
pub async fn fetch_token(http: &HttpFetcher, registry: &str, repo: &str) -> Option<PullToken> {
    fetch_token_for_service(http, registry, repo, DEFAULT_TOKEN_SERVICE).await
}

/// Fetch a pull token for `repo` from `service`.
///
/// Returns `None` for a non-200 status, a body that is not JSON, or JSON
/// without a string `token` field.
pub async fn fetch_token_for_service(
    http: &HttpFetcher,
    registry: &str,
    repo: &str,
    service: &str,
) -> Option<PullToken> {
    let url = token_url(registry, repo, service);
    debug!(%url, "Fetching pull token");

    let result = http.get(&url, HeaderMap::new()).await;
    if !result.is_ok() {
        debug!(status = result.status, "Token endpoint did not return 200");
        return None;
    }

    let token = parse_token(&result.body);
    if token.is_some() {
        info!(%registry, %repo, "Acquired pull token");
    } else {
        debug!("Token response had no usable token field");
    }
    token
}

fn parse_token(body: &[u8]) -> Option<PullToken> {
    let document: Value = serde_json::from_slice(body).ok()?;
    document.get("token")?.as_str().map(PullToken::new)
}
