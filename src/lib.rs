//! Thumbcache - a multi-tier image cache.
//!
//! Images are looked up in memory, then on disk, then downloaded. Concurrent
//! requests for the same URL share one download, and every failure resolves
//! to "no image" rather than an error.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

/// Application layer containing services for the settings surface.
pub mod application;
/// Domain layer containing entities, errors, and port definitions.
pub mod domain;
/// Infrastructure layer containing the cache tiers and configuration.
pub mod infrastructure;

/// Current version of the application.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name.
pub const NAME: &str = "thumbcache";
