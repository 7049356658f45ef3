//! HTTP transport shared by every registry call.
//!
//! Transport failures are reported as status `0` with an empty body rather
//! than as errors: the registry components only ever need to know whether
//! they got usable bytes, and the pipeline decides what is fatal.

use bytes::Bytes;
use reqwest::Client;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use secrecy::ExposeSecret;
use sha2::{Digest, Sha256};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace, warn};

use crate::Result;
use crate::token::PullToken;

/// Status reported when no HTTP response was received.
pub const TRANSPORT_FAILURE: u16 = 0;

/// A fully buffered response.
#[derive(Debug, Clone, Default)]
pub struct FetchResult {
    /// HTTP status code, [`TRANSPORT_FAILURE`] if the request never completed.
    pub status: u16,
    /// Response body. Empty on transport failure.
    pub body: Bytes,
}

impl FetchResult {
    /// Result for a request that produced no response.
    #[must_use]
    pub fn transport_failure() -> Self {
        Self {
            status: TRANSPORT_FAILURE,
            body: Bytes::new(),
        }
    }

    /// Whether the registry answered `200 OK`.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.status == 200
    }

    /// Whether the body is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }
}

/// Outcome of a streamed download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobDownload {
    /// HTTP status code, [`TRANSPORT_FAILURE`] if the transfer broke off.
    pub status: u16,
    /// Bytes handed to the writer.
    pub bytes_written: u64,
    /// `sha256:<hex>` of the written bytes, present only for completed transfers.
    pub digest: Option<String>,
}

impl BlobDownload {
    fn failed(status: u16) -> Self {
        Self {
            status,
            bytes_written: 0,
            digest: None,
        }
    }

    /// Whether the transfer completed with `200 OK` and produced data.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.status == 200 && self.bytes_written > 0 && self.digest.is_some()
    }
}

/// Handle to the HTTP stack.
///
/// Built once at process start and passed by reference to every registry
/// call. Redirects are followed (reqwest's default policy).
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    /// Create a fetcher with a fresh client.
    pub fn new() -> reqwest::Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("ocipull/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }

    /// GET `url` and buffer the whole body.
    pub async fn get(&self, url: &str, headers: HeaderMap) -> FetchResult {
        trace!(%url, "GET");

        let response = match self.client.get(url).headers(headers).send().await {
            Ok(response) => response,
            Err(e) => {
                warn!(%url, error = %e, "Request failed");
                return FetchResult::transport_failure();
            }
        };

        let status = response.status().as_u16();
        match response.bytes().await {
            Ok(body) => {
                debug!(%url, status, bytes = body.len(), "Fetched");
                FetchResult { status, body }
            }
            Err(e) => {
                warn!(%url, status, error = %e, "Failed to read response body");
                FetchResult {
                    status,
                    body: Bytes::new(),
                }
            }
        }
    }

    /// GET `url` and stream the body into `writer`, hashing it on the way.
    ///
    /// Only a `2xx` body is written. Write errors are returned as
    /// [`crate::Error::Io`]; network errors become a [`BlobDownload`] with
    /// status [`TRANSPORT_FAILURE`].
    pub async fn download<W>(
        &self,
        url: &str,
        headers: HeaderMap,
        writer: &mut W,
    ) -> Result<BlobDownload>
    where
        W: AsyncWrite + Unpin,
    {
        trace!(%url, "GET (streaming)");

        let mut response = match self.client.get(url).headers(headers).send().await {
            Ok(response) => response,
            Err(e) => {
                warn!(%url, error = %e, "Request failed");
                return Ok(BlobDownload::failed(TRANSPORT_FAILURE));
            }
        };

        let status = response.status().as_u16();
        if !response.status().is_success() {
            debug!(%url, status, "Download refused");
            return Ok(BlobDownload::failed(status));
        }

        let mut hasher = Sha256::new();
        let mut bytes_written = 0u64;
        loop {
            match response.chunk().await {
                Ok(Some(chunk)) => {
                    hasher.update(&chunk);
                    writer.write_all(&chunk).await?;
                    bytes_written += chunk.len() as u64;
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(%url, bytes_written, error = %e, "Transfer interrupted");
                    return Ok(BlobDownload {
                        status: TRANSPORT_FAILURE,
                        bytes_written,
                        digest: None,
                    });
                }
            }
        }
        writer.flush().await?;

        let digest = format!("sha256:{:x}", hasher.finalize());
        debug!(%url, status, bytes_written, %digest, "Downloaded");

        Ok(BlobDownload {
            status,
            bytes_written,
            digest: Some(digest),
        })
    }
}

/// Add `Authorization: Bearer <token>` when a non-empty token is present.
pub fn apply_bearer(headers: &mut HeaderMap, token: Option<&PullToken>) {
    let Some(token) = token.filter(|t| !t.is_empty()) else {
        return;
    };

    match HeaderValue::from_str(&format!("Bearer {}", token.secret().expose_secret())) {
        Ok(mut value) => {
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }
        Err(_) => {
            warn!("Pull token contains characters not allowed in a header, sending no credentials");
        }
    }
}

/// Join a registry base URL and a path, tolerating a trailing `/` on the base.
#[must_use]
pub fn registry_url(registry: &str, path: &str) -> String {
    format!("{}/{}", registry.trim_end_matches('/'), path.trim_start_matches('/'))
}
