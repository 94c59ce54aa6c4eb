//! Disk-based image cache for persistence across sessions.
//!
//! One file per key, named after the key, holding the re-encoded bytes.
//! There is no index: the directory listing is the source of truth.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::{debug, trace, warn};

use crate::domain::entities::CacheKey;
use crate::domain::errors::{CacheError, CacheResult};

const TEMP_PREFIX: char = '.';

/// Disk-based image cache that persists encoded image bytes.
#[derive(Debug, Clone)]
pub struct DiskImageCache {
    cache_dir: PathBuf,
}

impl DiskImageCache {
    /// Opens a cache rooted at `cache_dir`, creating the directory.
    ///
    /// # Errors
    /// Returns error if the cache directory cannot be created.
    pub fn open(cache_dir: PathBuf) -> CacheResult<Self> {
        std::fs::create_dir_all(&cache_dir).map_err(|e| {
            CacheError::io(format!(
                "Failed to create cache dir {}: {e}",
                cache_dir.display()
            ))
        })?;
        debug!(path = %cache_dir.display(), "Opened disk image cache");
        Ok(Self { cache_dir })
    }

    /// Returns the cache directory.
    #[must_use]
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    fn cache_path(&self, key: &CacheKey) -> PathBuf {
        self.cache_dir.join(key.as_str())
    }

    /// Reads the bytes stored for `key`. A missing file is a plain miss.
    pub async fn get_bytes(&self, key: &CacheKey) -> Option<Vec<u8>> {
        let path = self.cache_path(key);
        match fs::read(&path).await {
            Ok(bytes) => {
                trace!(key = %key, path = %path.display(), "Disk cache hit");
                Some(bytes)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                trace!(key = %key, "Disk cache miss");
                None
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to read cached image");
                None
            }
        }
    }

    /// Stores bytes for `key`.
    ///
    /// Writes to a temporary file in the same directory and renames it into
    /// place, so readers see either the old file, the new one, or nothing.
    ///
    /// # Errors
    /// Returns error if the file cannot be written or renamed.
    pub async fn put_bytes(&self, key: &CacheKey, bytes: &[u8]) -> CacheResult<()> {
        fs::create_dir_all(&self.cache_dir)
            .await
            .map_err(|e| CacheError::io(format!("Failed to create cache dir: {e}")))?;

        let path = self.cache_path(key);
        let temp_path = self
            .cache_dir
            .join(format!("{TEMP_PREFIX}{key}.{}.tmp", uuid::Uuid::new_v4().simple()));

        fs::write(&temp_path, bytes)
            .await
            .map_err(|e| CacheError::io(format!("Failed to write cache file: {e}")))?;

        if let Err(e) = fs::rename(&temp_path, &path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(CacheError::io(format!("Failed to move cache file: {e}")));
        }

        debug!(key = %key, path = %path.display(), size = bytes.len(), "Stored image in disk cache");
        Ok(())
    }

    /// Deletes every file in the cache directory.
    ///
    /// Best-effort: files that cannot be removed are skipped. Returns the
    /// number of files removed.
    pub async fn clear(&self) -> usize {
        let mut entries = match fs::read_dir(&self.cache_dir).await {
            Ok(entries) => entries,
            Err(e) => {
                if e.kind() != ErrorKind::NotFound {
                    warn!(error = %e, "Failed to read cache dir");
                }
                return 0;
            }
        };

        let mut removed = 0usize;
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "Failed to read cache dir entry");
                    break;
                }
            };
            let path = entry.path();
            let is_file = entry.file_type().await.is_ok_and(|t| t.is_file());
            if !is_file {
                continue;
            }
            match fs::remove_file(&path).await {
                Ok(()) => removed += 1,
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove cache file"),
            }
        }

        debug!(removed, "Cleared disk cache");
        removed
    }

    /// Sums the sizes of all cached files.
    ///
    /// Walks the directory; keep it off latency-sensitive paths.
    pub async fn total_size(&self) -> u64 {
        self.scan().await.0
    }

    /// Returns the number of cached files.
    pub async fn len(&self) -> usize {
        self.scan().await.1
    }

    /// Returns true if nothing is cached.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    async fn scan(&self) -> (u64, usize) {
        let Ok(mut entries) = fs::read_dir(&self.cache_dir).await else {
            return (0, 0);
        };

        let mut total = 0u64;
        let mut count = 0usize;
        while let Ok(Some(entry)) = entries.next_entry().await {
            if entry.file_name().to_string_lossy().starts_with(TEMP_PREFIX) {
                continue;
            }
            if let Ok(meta) = entry.metadata().await
                && meta.is_file()
            {
                total += meta.len();
                count += 1;
            }
        }
        (total, count)
    }
}

/// Returns the default cache directory path.
#[must_use]
pub fn default_cache_dir() -> PathBuf {
    directories::ProjectDirs::from("com", "linuxmobile", "thumbcache").map_or_else(
        || {
            std::env::temp_dir()
                .join("thumbcache")
                .join("cache")
                .join("images")
        },
        |dirs| dirs.cache_dir().join("images"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::image::processing::{self, ProcessingOptions};
    use tempfile::TempDir;

    fn create_test_cache() -> (DiskImageCache, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let cache = DiskImageCache::open(temp_dir.path().join("images")).unwrap();
        (cache, temp_dir)
    }

    #[tokio::test]
    async fn test_put_and_get_bytes() {
        let (cache, _temp) = create_test_cache();
        let key = CacheKey::from_url("https://x/1.png");
        let data = b"test image data";

        cache.put_bytes(&key, data).await.unwrap();

        assert_eq!(cache.get_bytes(&key).await.unwrap(), data);
        assert_eq!(cache.get_bytes(&key).await.unwrap(), data);
    }

    #[tokio::test]
    async fn test_file_named_after_key() {
        let (cache, _temp) = create_test_cache();
        let key = CacheKey::from_url("https://x/1.png");
        cache.put_bytes(&key, b"abc").await.unwrap();

        assert!(cache.cache_dir().join(key.as_str()).is_file());
    }

    #[tokio::test]
    async fn test_cache_miss() {
        let (cache, _temp) = create_test_cache();
        assert!(cache.get_bytes(&CacheKey::from_url("nope")).await.is_none());
    }

    #[tokio::test]
    async fn test_round_trip_decodes() {
        let (cache, _temp) = create_test_cache();
        let key = CacheKey::from_url("https://x/photo.jpg");
        let (encoded, original) = processing::reencode(
            &processing::test_support::png_bytes(640, 480),
            ProcessingOptions::default(),
        )
        .unwrap();

        cache.put_bytes(&key, &encoded).await.unwrap();
        let bytes = cache.get_bytes(&key).await.unwrap();
        let decoded = processing::decode_stored(&bytes, ProcessingOptions::default()).unwrap();

        assert_eq!(decoded.width(), original.width());
        assert_eq!(decoded.height(), original.height());
        assert_eq!(decoded.encoded_size(), encoded.len());
    }

    #[tokio::test]
    async fn test_put_recreates_missing_dir() {
        let (cache, _temp) = create_test_cache();
        std::fs::remove_dir_all(cache.cache_dir()).unwrap();

        let key = CacheKey::from_url("https://x/1.png");
        cache.put_bytes(&key, b"data").await.unwrap();
        assert_eq!(cache.get_bytes(&key).await.unwrap(), b"data");
    }

    #[tokio::test]
    async fn test_overwrite_leaves_no_temp_files() {
        let (cache, _temp) = create_test_cache();
        let key = CacheKey::from_url("https://x/1.png");
        cache.put_bytes(&key, b"first").await.unwrap();
        cache.put_bytes(&key, b"second!").await.unwrap();

        let names: Vec<_> = std::fs::read_dir(cache.cache_dir())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names.len(), 1);
        assert_eq!(cache.get_bytes(&key).await.unwrap(), b"second!");
    }

    #[tokio::test]
    async fn test_total_size_and_len() {
        let (cache, _temp) = create_test_cache();
        assert_eq!(cache.total_size().await, 0);

        cache.put_bytes(&CacheKey::from_url("1"), b"hello").await.unwrap();
        cache.put_bytes(&CacheKey::from_url("2"), b"world!").await.unwrap();
        assert_eq!(cache.len().await, 2);
        assert_eq!(cache.total_size().await, 11);

        cache.put_bytes(&CacheKey::from_url("1"), b"hey").await.unwrap();
        assert_eq!(cache.len().await, 2);
        assert_eq!(cache.total_size().await, 9);
    }

    #[tokio::test]
    async fn test_clear_is_idempotent() {
        let (cache, _temp) = create_test_cache();
        cache.put_bytes(&CacheKey::from_url("1"), b"data1").await.unwrap();
        cache.put_bytes(&CacheKey::from_url("2"), b"data2").await.unwrap();

        assert_eq!(cache.clear().await, 2);
        assert_eq!(cache.total_size().await, 0);
        assert_eq!(cache.clear().await, 0);
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_clear_skips_directories() {
        let (cache, _temp) = create_test_cache();
        std::fs::create_dir(cache.cache_dir().join("nested")).unwrap();
        cache.put_bytes(&CacheKey::from_url("1"), b"x").await.unwrap();

        assert_eq!(cache.clear().await, 1);
        assert!(cache.cache_dir().join("nested").is_dir());
    }

    #[tokio::test]
    async fn test_missing_dir_reports_empty() {
        let (cache, _temp) = create_test_cache();
        std::fs::remove_dir_all(cache.cache_dir()).unwrap();

        assert_eq!(cache.total_size().await, 0);
        assert_eq!(cache.clear().await, 0);
    }
}
