//! Port definition for image caching.

use crate::domain::entities::ImageCallback;

/// Contract between the image cache and the view layer.
///
/// Best-effort: every failure resolves to an absent image, never to an error.
/// Implementations must be thread-safe.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait ImageCachePort: Send + Sync {
    /// Resolves `url` to an image and hands the outcome to `on_result`.
    ///
    /// Never blocks the caller. The callback may run before this returns
    /// (memory hit) or later on an I/O worker.
    fn load_image(&self, url: &str, on_result: ImageCallback);

    /// Clears the memory and disk tiers.
    async fn clear_cache(&self);

    /// Returns the total size of the disk tier in bytes.
    async fn cache_size_bytes(&self) -> u64;

    /// Warms the cache for `urls` without waiting for the results.
    fn preload(&self, urls: &[String]);
}
