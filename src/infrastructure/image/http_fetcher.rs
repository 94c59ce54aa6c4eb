//! HTTP implementation of the fetcher port.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, trace};

use crate::domain::errors::{CacheError, CacheResult};
use crate::domain::ports::ImageFetcherPort;

/// Default request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Fetches image bytes over HTTP(S) with `reqwest`.
///
/// Dropping the fetcher drops its connection pool.
#[derive(Debug, Clone)]
pub struct HttpImageFetcher {
    client: reqwest::Client,
}

impl HttpImageFetcher {
    /// Creates a fetcher whose requests time out after `timeout`.
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be built.
    pub fn new(timeout: Duration) -> CacheResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| CacheError::network(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

/// Parses `url` as an absolute http(s) URL.
///
/// # Errors
/// Returns [`CacheError::InvalidUrl`] otherwise.
pub fn parse_http_url(url: &str) -> CacheResult<reqwest::Url> {
    let parsed =
        reqwest::Url::parse(url).map_err(|e| CacheError::invalid_url(url, e.to_string()))?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        other => Err(CacheError::invalid_url(url, format!("unsupported scheme {other}"))),
    }
}

#[async_trait]
impl ImageFetcherPort for HttpImageFetcher {
    async fn fetch_bytes(&self, url: &str) -> CacheResult<Bytes> {
        let parsed = parse_http_url(url)?;
        debug!(url = %url, "Downloading image from network");

        let response = self
            .client
            .get(parsed)
            .send()
            .await
            .map_err(|e| CacheError::network(format!("Request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(CacheError::Http {
                status: status.as_u16(),
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| CacheError::network(format!("Failed to read body: {e}")))?;

        trace!(url = %url, size = bytes.len(), "Downloaded image bytes");
        Ok(bytes)
    }
}
