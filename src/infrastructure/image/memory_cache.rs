//! In-memory LRU image cache bounded by entry count and total cost.

use std::sync::atomic::{AtomicU64, Ordering};

use lru::LruCache;
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::domain::entities::{CacheKey, CachedImage};

/// Default maximum number of images kept in memory.
pub const DEFAULT_COUNT_LIMIT: usize = 200;

/// Default maximum total cost in bytes (100 MiB).
pub const DEFAULT_COST_LIMIT: usize = 100 * 1024 * 1024;

struct Inner {
    entries: LruCache<CacheKey, CachedImage>,
    total_cost: usize,
}

/// In-memory LRU cache for decoded images.
///
/// Every operation is synchronous and runs under a short lock, so it is safe
/// to call from any thread, including the caller's.
pub struct MemoryImageCache {
    inner: Mutex<Inner>,
    count_limit: usize,
    cost_limit: usize,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl MemoryImageCache {
    /// Creates a new cache with the given entry-count and cost limits.
    #[must_use]
    pub fn new(count_limit: usize, cost_limit: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: LruCache::unbounded(),
                total_cost: 0,
            }),
            count_limit: count_limit.max(1),
            cost_limit,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Looks up an image, promoting it in the LRU order.
    pub fn get(&self, key: &CacheKey) -> Option<CachedImage> {
        let mut inner = self.inner.lock();
        if let Some(img) = inner.entries.get(key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            trace!(key = %key, "Memory cache hit");
            Some(img.clone())
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            trace!(key = %key, "Memory cache miss");
            None
        }
    }

    /// Inserts or replaces an image, then evicts least recently used entries
    /// until both limits hold again.
    pub fn put(&self, key: CacheKey, image: CachedImage) {
        let cost = image.cost();
        let mut inner = self.inner.lock();
        debug!(key = %key, cost, "Storing image in memory cache");

        if let Some(old) = inner.entries.put(key, image) {
            inner.total_cost -= old.cost();
        }
        inner.total_cost += cost;

        let mut evicted = 0usize;
        while inner.entries.len() > self.count_limit
            || (inner.total_cost > self.cost_limit && !inner.entries.is_empty())
        {
            let Some((_, old)) = inner.entries.pop_lru() else {
                break;
            };
            inner.total_cost -= old.cost();
            evicted += 1;
        }
        if evicted > 0 {
            debug!(evicted, total_cost = inner.total_cost, "Evicted images from memory cache");
        }
    }

    /// Drops every entry.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.total_cost = 0;
        debug!("Cleared memory image cache");
    }

    /// Handler for the host's memory-pressure signal.
    pub fn on_memory_pressure(&self) {
        debug!("Memory pressure signalled");
        self.clear();
    }

    /// Returns the number of cached images.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Returns true if nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the summed cost of all entries.
    #[must_use]
    pub fn total_cost(&self) -> usize {
        self.inner.lock().total_cost
    }

    /// Returns cache statistics.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let hit_rate = if total > 0 {
            (hits as f64 / total as f64) * 100.0
        } else {
            0.0
        };
        let inner = self.inner.lock();
        CacheStats {
            hits,
            misses,
            hit_rate,
            size: inner.entries.len(),
            total_cost: inner.total_cost,
        }
    }
}

/// Statistics about cache performance.
#[derive(Debug, Clone)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses.
    pub misses: u64,
    /// Hit rate as a percentage.
    pub hit_rate: f64,
    /// Current number of cached images.
    pub size: usize,
    /// Summed cost of the cached images in bytes.
    pub total_cost: usize,
}

impl std::fmt::Display for CacheStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Cache: {} images ({} bytes), {:.1}% hit rate ({} hits, {} misses)",
            self.size, self.total_cost, self.hit_rate, self.hits, self.misses
        )
    }
}
