use super::app_config::LogLevel;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(
    name = "thumbcache",
    version,
    about = "Memory, disk and network thumbnail cache",
    long_about = None
)]
pub struct CliArgs {
    /// Configuration file path.
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Log file path.
    #[arg(long, value_name = "PATH")]
    pub log_path: Option<PathBuf>,

    /// Log verbosity level.
    #[arg(long, value_enum)]
    pub log_level: Option<LogLevel>,

    /// Disk cache directory.
    #[arg(long, value_name = "PATH", env = "THUMBCACHE_DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Maximum simultaneous downloads.
    #[arg(long)]
    pub max_concurrent_downloads: Option<usize>,

    /// HTTP request timeout in seconds.
    #[arg(long)]
    pub timeout_secs: Option<u64>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Load images and print their dimensions.
    Fetch {
        /// Image URLs.
        #[arg(required = true)]
        urls: Vec<String>,
    },
    /// Warm the cache for the given URLs.
    Preload {
        /// Image URLs.
        #[arg(required = true)]
        urls: Vec<String>,
    },
    /// Print the disk cache size.
    Size,
    /// Clear the memory and disk caches.
    Clear,
}
