mod image_cache_port;
mod image_fetcher_port;

pub use image_cache_port::ImageCachePort;
pub use image_fetcher_port::ImageFetcherPort;

#[cfg(test)]
pub mod mocks {
    pub use super::image_cache_port::MockImageCachePort;
    pub use super::image_fetcher_port::mock::MockImageFetcher;
}
