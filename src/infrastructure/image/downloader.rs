//! Network tier: fetch, decode, bound and re-encode.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::domain::entities::CachedImage;
use crate::domain::errors::{CacheError, CacheResult};
use crate::domain::ports::ImageFetcherPort;

use super::processing::{self, ProcessingOptions};

/// Default cap on simultaneous downloads.
pub const DEFAULT_MAX_CONCURRENT_DOWNLOADS: usize = 4;

/// A downloaded image after processing.
#[derive(Debug, Clone)]
pub struct DownloadedImage {
    /// Re-encoded bytes to persist in the disk tier.
    pub bytes: Vec<u8>,
    /// Decoded, bounded image.
    pub image: CachedImage,
}

/// Rejects strings that cannot name a resource at all.
///
/// Only empty strings and strings holding whitespace or control characters
/// are refused. Anything else is handed to the fetcher, which reports its
/// own failure to every caller waiting on that URL.
///
/// # Errors
/// Returns [`CacheError::InvalidUrl`] for unusable strings.
pub fn validate_url(url: &str) -> CacheResult<()> {
    if url.is_empty() {
        return Err(CacheError::invalid_url(url, "empty"));
    }
    if let Some(c) = url.chars().find(|c| c.is_whitespace() || c.is_control()) {
        return Err(CacheError::invalid_url(url, format!("contains {c:?}")));
    }
    Ok(())
}

/// Fetches images and turns them into bounded, re-encoded entries.
pub struct Downloader {
    fetcher: Arc<dyn ImageFetcherPort>,
    permits: Arc<Semaphore>,
    options: ProcessingOptions,
}

impl std::fmt::Debug for Downloader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Downloader")
            .field("options", &self.options)
            .field("available_permits", &self.permits.available_permits())
            .finish_non_exhaustive()
    }
}

impl Downloader {
    /// Creates a downloader allowing `max_concurrent` fetches at once.
    #[must_use]
    pub fn new(
        fetcher: Arc<dyn ImageFetcherPort>,
        max_concurrent: usize,
        options: ProcessingOptions,
    ) -> Self {
        Self {
            fetcher,
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            options,
        }
    }

    /// Downloads `url` and processes the result.
    ///
    /// # Errors
    /// Returns error on network failure, non-success status, or if the body
    /// is not a decodable image.
    pub async fn fetch(&self, url: &str) -> CacheResult<DownloadedImage> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| CacheError::Cancelled)?;

        let body = self.fetcher.fetch_bytes(url).await?;
        let options = self.options;

        let (bytes, image) =
            tokio::task::spawn_blocking(move || processing::reencode(&body, options))
                .await
                .map_err(|e| CacheError::decode(format!("Decode task panicked: {e}")))?
                .inspect_err(|e| warn!(url = %url, error = %e, "Downloaded body is not an image"))?;

        debug!(
            url = %url,
            width = image.width(),
            height = image.height(),
            size = bytes.len(),
            "Image downloaded and re-encoded"
        );
        Ok(DownloadedImage { bytes, image })
    }

    /// Stops handing out download slots; pending and future fetches fail
    /// with [`CacheError::Cancelled`].
    pub fn close(&self) {
        self.permits.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::mocks::MockImageFetcher;
    use crate::infrastructure::image::processing::test_support::png_bytes;
    use test_case::test_case;

    fn downloader(fetcher: MockImageFetcher) -> (Downloader, Arc<MockImageFetcher>) {
        let fetcher = Arc::new(fetcher);
        (
            Downloader::new(fetcher.clone(), 2, ProcessingOptions::default()),
            fetcher,
        )
    }

    #[test_case("https://x/a.jpg", true ; "https")]
    #[test_case("http://example.com/img.png?size=2", true ; "http_with_query")]
    #[test_case("u1", true ; "bare_identifier")]
    #[test_case("/relative/path.png", true ; "relative")]
    #[test_case("not a url", false ; "whitespace")]
    #[test_case("https://x/a\n.jpg", false ; "control")]
    #[test_case("", false ; "empty")]
    fn test_validate_url(url: &str, valid: bool) {
        assert_eq!(validate_url(url).is_ok(), valid);
    }

    #[tokio::test]
    async fn test_fetch_bounds_and_reencodes() {
        let (downloader, fetcher) =
            downloader(MockImageFetcher::offline().with_response("https://x/a.png", png_bytes(1000, 500)));

        let downloaded = downloader.fetch("https://x/a.png").await.unwrap();

        assert_eq!(fetcher.calls(), 1);
        assert_eq!(
            (downloaded.image.width(), downloaded.image.height()),
            (200, 100)
        );
        assert_eq!(downloaded.image.encoded_size(), downloaded.bytes.len());
    }

    #[tokio::test]
    async fn test_fetch_network_failure() {
        let (downloader, _) = downloader(MockImageFetcher::offline());
        let err = downloader.fetch("https://x/a.png").await.unwrap_err();
        assert!(err.is_network_error());
    }

    #[tokio::test]
    async fn test_fetch_http_status_failure() {
        let (downloader, _) = downloader(
            MockImageFetcher::offline().with_error("https://x/a.png", CacheError::Http { status: 404 }),
        );
        let err = downloader.fetch("https://x/a.png").await.unwrap_err();
        assert!(matches!(err, CacheError::Http { status: 404 }));
    }

    #[tokio::test]
    async fn test_fetch_malformed_body() {
        let (downloader, _) = downloader(
            MockImageFetcher::offline().with_response("https://x/a.png", b"<html>nope</html>".to_vec()),
        );
        let err = downloader.fetch("https://x/a.png").await.unwrap_err();
        assert!(matches!(err, CacheError::Decode { .. }));
    }

    #[tokio::test]
    async fn test_fetch_unreachable_identifier_fails() {
        let (downloader, fetcher) = downloader(MockImageFetcher::offline());
        let err = downloader.fetch("u1").await.unwrap_err();
        assert!(err.is_network_error());
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_closed_downloader_cancels() {
        let (downloader, fetcher) = downloader(MockImageFetcher::offline());
        downloader.close();
        let err = downloader.fetch("https://x/a.png").await.unwrap_err();
        assert!(matches!(err, CacheError::Cancelled));
        assert_eq!(fetcher.calls(), 0);
    }
}
