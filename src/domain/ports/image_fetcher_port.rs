//! Port definition for fetching raw image bytes.

use async_trait::async_trait;
use bytes::Bytes;

use crate::domain::errors::CacheResult;

/// Port for retrieving the encoded bytes behind an image URL.
#[async_trait]
pub trait ImageFetcherPort: Send + Sync {
    /// Fetches the body at `url`.
    ///
    /// Any non-success status or transport failure is an error.
    async fn fetch_bytes(&self, url: &str) -> CacheResult<Bytes>;
}
