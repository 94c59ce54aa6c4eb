//! Domain types for cached images.

use std::sync::Arc;

use super::CacheKey;

/// A decoded image ready to be handed to the view layer.
///
/// Cheap to clone: the pixel data is shared.
#[derive(Debug, Clone)]
pub struct CachedImage {
    image: Arc<image::DynamicImage>,
    encoded_size: usize,
}

impl CachedImage {
    /// Wraps a decoded image together with the size of its encoded form.
    #[must_use]
    pub fn new(image: image::DynamicImage, encoded_size: usize) -> Self {
        Self {
            image: Arc::new(image),
            encoded_size,
        }
    }

    /// Returns the decoded image.
    #[must_use]
    pub fn image(&self) -> &Arc<image::DynamicImage> {
        &self.image
    }

    /// Width in pixels.
    #[must_use]
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    /// Height in pixels.
    #[must_use]
    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Size of the encoded bytes this image was stored as.
    #[must_use]
    pub const fn encoded_size(&self) -> usize {
        self.encoded_size
    }

    /// Cost charged against the memory tier budget.
    ///
    /// Falls back to four bytes per pixel when the encoded size is unknown.
    #[must_use]
    pub fn cost(&self) -> usize {
        if self.encoded_size > 0 {
            self.encoded_size
        } else {
            (self.width() as usize) * (self.height() as usize) * 4
        }
    }
}

/// Where an image was resolved from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageSource {
    /// In-memory LRU tier.
    MemoryCache,
    /// On-disk tier.
    DiskCache,
    /// Downloaded from the network.
    Network,
}

impl std::fmt::Display for ImageSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MemoryCache => write!(f, "memory"),
            Self::DiskCache => write!(f, "disk"),
            Self::Network => write!(f, "network"),
        }
    }
}

/// Callback receiving the outcome of a load: the image, or `None` when it is
/// unavailable for any reason.
pub type ImageCallback = Box<dyn FnOnce(Option<CachedImage>) + Send + 'static>;

/// Message sent when an image finishes loading.
#[derive(Debug, Clone)]
pub struct ImageLoadedEvent {
    /// The requested URL.
    pub url: String,
    /// Key derived from the URL.
    pub key: CacheKey,
    /// The loaded image, or None if unavailable.
    pub image: Option<CachedImage>,
}
