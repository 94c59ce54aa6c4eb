//! Cache section of a settings screen: size label and clear action.

use std::sync::Arc;

use tracing::info;

use crate::domain::ports::ImageCachePort;

const KB: u64 = 1_000;
const MB: u64 = 1_000_000;
const GB: u64 = 1_000_000_000;

/// Formats a byte count the way file managers do (decimal units).
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn format_byte_count(bytes: u64) -> String {
    match bytes {
        0 => "Zero KB".to_string(),
        1 => "1 byte".to_string(),
        b if b < KB => format!("{b} bytes"),
        b if b < MB => {
            let kb = (b as f64 / KB as f64).round();
            if kb >= 1_000.0 {
                "1 MB".to_string()
            } else {
                format!("{kb:.0} KB")
            }
        }
        b if b < GB => format!("{:.1} MB", b as f64 / MB as f64),
        b => format!("{:.2} GB", b as f64 / GB as f64),
    }
}

/// Settings-facing operations over the image cache.
pub struct CacheSettingsService {
    cache: Arc<dyn ImageCachePort>,
}

impl CacheSettingsService {
    /// Creates a new settings service.
    #[must_use]
    pub fn new(cache: Arc<dyn ImageCachePort>) -> Self {
        Self { cache }
    }

    /// Returns the disk cache size, formatted for display.
    pub async fn cache_size_label(&self) -> String {
        format_byte_count(self.cache.cache_size_bytes().await)
    }

    /// Clears every tier and returns the new size label.
    pub async fn clear_cache(&self) -> String {
        self.cache.clear_cache().await;
        info!("Image cache cleared from settings");
        self.cache_size_label().await
    }
}
