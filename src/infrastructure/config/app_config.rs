//! Application configuration.

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::infrastructure::image::disk_cache::default_cache_dir;
use crate::infrastructure::image::downloader::DEFAULT_MAX_CONCURRENT_DOWNLOADS;
use crate::infrastructure::image::http_fetcher::DEFAULT_TIMEOUT_SECS;
use crate::infrastructure::image::memory_cache::{DEFAULT_COST_LIMIT, DEFAULT_COUNT_LIMIT};
use crate::infrastructure::image::processing::{
    DEFAULT_JPEG_QUALITY, DEFAULT_MAX_DIMENSION, ProcessingOptions,
};

const APP_NAME: &str = "thumbcache";
const APP_QUALIFIER: &str = "com";
const APP_ORGANIZATION: &str = "linuxmobile";

/// Log level configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Trace level.
    Trace,
    /// Debug level.
    Debug,
    /// Info level.
    #[default]
    Info,
    /// Warning level.
    Warn,
    /// Error level.
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Trace => write!(f, "trace"),
            Self::Debug => write!(f, "debug"),
            Self::Info => write!(f, "info"),
            Self::Warn => write!(f, "warn"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Application configuration.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Configuration file path.
    #[serde(skip)]
    pub config: Option<PathBuf>,

    /// Log file path.
    #[serde(skip)]
    pub log_path: Option<PathBuf>,

    /// Log verbosity level.
    #[serde(default)]
    pub log_level: LogLevel,

    /// Image cache configuration.
    #[serde(default)]
    pub cache: CacheConfig,
}

/// Image cache configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum number of images kept in memory.
    #[serde(default = "default_memory_count_limit")]
    pub memory_count_limit: usize,

    /// Maximum total cost of in-memory images, in bytes.
    #[serde(default = "default_memory_cost_limit")]
    pub memory_cost_limit: usize,

    /// Bounding box edge applied to stored images.
    #[serde(default = "default_max_dimension")]
    pub max_dimension: u32,

    /// JPEG quality of stored images (1-100).
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,

    /// HTTP request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Maximum simultaneous downloads.
    #[serde(default = "default_max_concurrent_downloads")]
    pub max_concurrent_downloads: usize,

    /// Overrides the disk cache directory.
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
}

fn default_memory_count_limit() -> usize {
    DEFAULT_COUNT_LIMIT
}

fn default_memory_cost_limit() -> usize {
    DEFAULT_COST_LIMIT
}

fn default_max_dimension() -> u32 {
    DEFAULT_MAX_DIMENSION
}

fn default_jpeg_quality() -> u8 {
    DEFAULT_JPEG_QUALITY
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_max_concurrent_downloads() -> usize {
    DEFAULT_MAX_CONCURRENT_DOWNLOADS
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            memory_count_limit: default_memory_count_limit(),
            memory_cost_limit: default_memory_cost_limit(),
            max_dimension: default_max_dimension(),
            jpeg_quality: default_jpeg_quality(),
            timeout_secs: default_timeout_secs(),
            max_concurrent_downloads: default_max_concurrent_downloads(),
            cache_dir: None,
        }
    }
}

impl CacheConfig {
    /// Returns the processing limits for stored images.
    #[must_use]
    pub fn processing_options(&self) -> ProcessingOptions {
        ProcessingOptions {
            max_dimension: self.max_dimension.max(1),
            jpeg_quality: self.jpeg_quality.clamp(1, 100),
        }
    }

    /// Returns the request timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Returns the effective disk cache directory.
    #[must_use]
    pub fn effective_cache_dir(&self) -> PathBuf {
        self.cache_dir.clone().unwrap_or_else(default_cache_dir)
    }
}

use super::args::CliArgs;

impl AppConfig {
    /// Merges CLI arguments into the configuration.
    pub fn merge_with_args(&mut self, args: &CliArgs) {
        if let Some(config_path) = &args.config {
            self.config = Some(config_path.clone());
        }
        if let Some(log_path) = &args.log_path {
            self.log_path = Some(log_path.clone());
        }
        if let Some(log_level) = args.log_level {
            self.log_level = log_level;
        }
        if let Some(cache_dir) = &args.cache_dir {
            self.cache.cache_dir = Some(cache_dir.clone());
        }
        if let Some(max) = args.max_concurrent_downloads {
            self.cache.max_concurrent_downloads = max;
        }
        if let Some(timeout) = args.timeout_secs {
            self.cache.timeout_secs = timeout;
        }
    }

    /// Returns default config directory.
    #[must_use]
    pub fn default_config_dir() -> Option<PathBuf> {
        ProjectDirs::from(APP_QUALIFIER, APP_ORGANIZATION, APP_NAME)
            .map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Returns default log file path.
    #[must_use]
    pub fn default_log_path() -> Option<PathBuf> {
        ProjectDirs::from(APP_QUALIFIER, APP_ORGANIZATION, APP_NAME)
            .map(|dirs| dirs.data_dir().join("thumbcache.log"))
    }

    /// Returns effective log path.
    #[must_use]
    pub fn effective_log_path(&self) -> Option<PathBuf> {
        self.log_path.clone().or_else(Self::default_log_path)
    }
}
