pub mod cache_settings;

pub use cache_settings::{CacheSettingsService, format_byte_count};
