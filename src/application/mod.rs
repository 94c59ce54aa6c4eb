//! Application layer with services built on the domain ports.

/// Application services.
pub mod services;

pub use services::{CacheSettingsService, format_byte_count};
