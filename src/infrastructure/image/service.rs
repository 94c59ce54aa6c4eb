//! Image cache service.
//!
//! Implements a three-tier lookup: Memory -> Disk -> Network. Concurrent
//! requests for the same URL share a single download.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, trace, warn};

use crate::domain::entities::{CacheKey, CachedImage, ImageCallback, ImageLoadedEvent, ImageSource};
use crate::domain::errors::{CacheError, CacheResult};
use crate::domain::ports::{ImageCachePort, ImageFetcherPort};
use crate::infrastructure::config::CacheConfig;

use super::disk_cache::DiskImageCache;
use super::downloader::{DownloadedImage, Downloader, validate_url};
use super::http_fetcher::HttpImageFetcher;
use super::in_flight::{InFlightRegistry, JoinOutcome};
use super::memory_cache::{CacheStats, MemoryImageCache};
use super::processing::{self, ProcessingOptions};

/// State shared with the I/O tasks.
struct Tiers {
    memory: MemoryImageCache,
    disk: Option<DiskImageCache>,
    downloader: Downloader,
    options: ProcessingOptions,
}

/// Façade over the memory, disk and network tiers.
///
/// Construct once at the composition root and share it behind an `Arc`.
/// Dropping it cancels every outstanding download.
pub struct ImageCacheService {
    tiers: Arc<Tiers>,
    in_flight: Arc<InFlightRegistry<CachedImage>>,
    runtime: Handle,
    closed: AtomicBool,
}

impl std::fmt::Debug for ImageCacheService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageCacheService")
            .field("disk", &self.tiers.disk)
            .field("options", &self.tiers.options)
            .field("in_flight", &self.in_flight)
            .finish_non_exhaustive()
    }
}

impl ImageCacheService {
    /// Creates a service fetching over HTTP, running its I/O on the current
    /// Tokio runtime.
    ///
    /// # Errors
    /// Returns error if called outside a Tokio runtime or if the HTTP client
    /// cannot be built. A cache directory that cannot be created is not an
    /// error: the service then runs memory-only.
    pub fn new(config: &CacheConfig) -> CacheResult<Self> {
        let runtime = Handle::try_current()
            .map_err(|e| CacheError::io(format!("No async runtime available: {e}")))?;
        let fetcher = Arc::new(HttpImageFetcher::new(config.timeout())?);
        Ok(Self::with_fetcher(config, fetcher, runtime))
    }

    /// Creates a service with an explicit fetcher and runtime.
    #[must_use]
    pub fn with_fetcher(
        config: &CacheConfig,
        fetcher: Arc<dyn ImageFetcherPort>,
        runtime: Handle,
    ) -> Self {
        let cache_dir = config.effective_cache_dir();
        let disk = match DiskImageCache::open(cache_dir) {
            Ok(disk) => Some(disk),
            Err(e) => {
                warn!(error = %e, "Disk cache unavailable, running memory-only");
                None
            }
        };
        let options = config.processing_options();

        let tiers = Tiers {
            memory: MemoryImageCache::new(config.memory_count_limit, config.memory_cost_limit),
            disk,
            downloader: Downloader::new(fetcher, config.max_concurrent_downloads, options),
            options,
        };

        info!(
            memory_count_limit = config.memory_count_limit,
            memory_cost_limit = config.memory_cost_limit,
            disk = tiers.disk.is_some(),
            "Image cache service started"
        );

        Self {
            tiers: Arc::new(tiers),
            in_flight: Arc::new(InFlightRegistry::new(runtime.clone())),
            runtime,
            closed: AtomicBool::new(false),
        }
    }

    /// Resolves `url` and hands the outcome to `on_result`.
    ///
    /// Memory hits (and rejected URLs) resolve before this returns; everything
    /// else resolves later on an I/O worker.
    pub fn load_image(&self, url: &str, on_result: ImageCallback) {
        if self.closed.load(Ordering::Acquire) {
            on_result(None);
            return;
        }

        if let Err(e) = validate_url(url) {
            debug!(error = %e, "Rejected image url");
            on_result(None);
            return;
        }

        let key = CacheKey::from_url(url);
        if let Some(img) = self.tiers.memory.get(&key) {
            trace!(key = %key, source = %ImageSource::MemoryCache, "Image loaded");
            on_result(Some(img));
            return;
        }

        let tiers = Arc::clone(&self.tiers);
        let in_flight = Arc::clone(&self.in_flight);
        let url = url.to_string();
        self.runtime.spawn(async move {
            if let Some(img) = tiers.load_from_disk(&key).await {
                tiers.memory.put(key, img.clone());
                on_result(Some(img));
                return;
            }

            let download_key = key.clone();
            let outcome = in_flight.join_or_start(key.clone(), on_result, move || async move {
                tiers.download(&download_key, &url).await
            });
            if outcome == JoinOutcome::Joined {
                debug!(key = %key, "Waiting on in-flight download");
            }
        });
    }

    /// Async wrapper around [`Self::load_image`].
    pub async fn load(&self, url: &str) -> Option<CachedImage> {
        let (tx, rx) = oneshot::channel();
        self.load_image(
            url,
            Box::new(move |img| {
                let _ = tx.send(img);
            }),
        );
        rx.await.ok().flatten()
    }

    /// Loads `url` and reports the outcome as an [`ImageLoadedEvent`] on `tx`.
    pub fn load_to_channel(&self, url: &str, tx: mpsc::UnboundedSender<ImageLoadedEvent>) {
        let event_url = url.to_string();
        self.load_image(
            url,
            Box::new(move |image| {
                let key = CacheKey::from_url(&event_url);
                if tx
                    .send(ImageLoadedEvent {
                        url: event_url,
                        key,
                        image,
                    })
                    .is_err()
                {
                    debug!("Image event receiver dropped");
                }
            }),
        );
    }

    /// Warms the cache for `urls`, discarding the results.
    pub fn preload<S: AsRef<str>>(&self, urls: &[S]) {
        for url in urls {
            self.load_image(url.as_ref(), Box::new(|_| {}));
        }
    }

    /// Clears both tiers.
    ///
    /// Downloads still in flight complete normally and may repopulate them.
    pub async fn clear_cache(&self) {
        self.tiers.memory.clear();
        let removed = match &self.tiers.disk {
            Some(disk) => disk.clear().await,
            None => 0,
        };
        info!(removed, "Cleared image caches");
    }

    /// Total size of the disk tier in bytes. The memory tier is not counted.
    pub async fn cache_size_bytes(&self) -> u64 {
        match &self.tiers.disk {
            Some(disk) => disk.total_size().await,
            None => 0,
        }
    }

    /// Handler for the host's memory-pressure signal.
    pub fn on_memory_pressure(&self) {
        self.tiers.memory.on_memory_pressure();
    }

    /// Returns true if a download for `url` is running.
    #[must_use]
    pub fn is_loading(&self, url: &str) -> bool {
        self.in_flight.is_loading(&CacheKey::from_url(url))
    }

    /// Number of downloads in flight.
    #[must_use]
    pub fn pending_downloads(&self) -> usize {
        self.in_flight.pending_count()
    }

    /// Returns memory tier statistics.
    #[must_use]
    pub fn memory_stats(&self) -> CacheStats {
        self.tiers.memory.stats()
    }

    /// Returns true if the disk tier is available.
    #[must_use]
    pub fn has_disk_cache(&self) -> bool {
        self.tiers.disk.is_some()
    }

    /// Cancels every outstanding download and stops accepting requests.
    ///
    /// Waiters of cancelled downloads receive `None`, as do later calls to
    /// [`Self::load_image`]. Idempotent.
    pub fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.tiers.downloader.close();
        self.in_flight.cancel_all();
        info!("Image cache service shut down");
    }
}

impl Drop for ImageCacheService {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Tiers {
    async fn load_from_disk(&self, key: &CacheKey) -> Option<CachedImage> {
        let disk = self.disk.as_ref()?;
        let bytes = disk.get_bytes(key).await?;
        let options = self.options;

        match tokio::task::spawn_blocking(move || processing::decode_stored(&bytes, options)).await
        {
            Ok(Ok(img)) => {
                debug!(key = %key, source = %ImageSource::DiskCache, "Image loaded");
                Some(img)
            }
            Ok(Err(e)) => {
                warn!(key = %key, error = %e, "Failed to decode cached image");
                None
            }
            Err(e) => {
                error!(key = %key, error = %e, "Decode task panicked");
                None
            }
        }
    }

    async fn download(&self, key: &CacheKey, url: &str) -> Option<CachedImage> {
        let DownloadedImage { bytes, image } = match self.downloader.fetch(url).await {
            Ok(downloaded) => downloaded,
            Err(e) => {
                warn!(key = %key, error = %e, "Image download failed");
                return None;
            }
        };

        self.memory.put(key.clone(), image.clone());
        if let Some(disk) = &self.disk
            && let Err(e) = disk.put_bytes(key, &bytes).await
        {
            warn!(key = %key, error = %e, "Failed to cache to disk");
        }

        debug!(key = %key, source = %ImageSource::Network, "Image loaded");
        Some(image)
    }
}

#[async_trait::async_trait]
impl ImageCachePort for ImageCacheService {
    fn load_image(&self, url: &str, on_result: ImageCallback) {
        Self::load_image(self, url, on_result);
    }

    async fn clear_cache(&self) {
        Self::clear_cache(self).await;
    }

    async fn cache_size_bytes(&self) -> u64 {
        Self::cache_size_bytes(self).await
    }

    fn preload(&self, urls: &[String]) {
        Self::preload(self, urls);
    }
}
