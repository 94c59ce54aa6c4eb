//! Infrastructure layer with external service adapters.

/// Application configuration.
pub mod config;
/// Image caching (memory, disk, network).
pub mod image;

pub use config::{AppConfig, CacheConfig, CliArgs, Command, LogLevel, StorageManager};
pub use self::image::{
    CacheStats, DiskImageCache, Downloader, HttpImageFetcher, ImageCacheService,
    InFlightRegistry, MemoryImageCache, ProcessingOptions,
};
