//! Image caching infrastructure.
//!
//! This module provides:
//! - Memory caching with LRU eviction bounded by count and cost
//! - Disk caching for persistence
//! - Network download with bounding and re-encoding
//! - Single-flight coordination of concurrent downloads
//! - The service tying the tiers together

pub mod disk_cache;
pub mod downloader;
pub mod http_fetcher;
pub mod in_flight;
pub mod memory_cache;
pub mod processing;
pub mod service;

pub use disk_cache::DiskImageCache;
pub use downloader::{DownloadedImage, Downloader};
pub use http_fetcher::HttpImageFetcher;
pub use in_flight::{InFlightRegistry, JoinOutcome};
pub use memory_cache::{CacheStats, MemoryImageCache};
pub use processing::ProcessingOptions;
pub use service::ImageCacheService;
