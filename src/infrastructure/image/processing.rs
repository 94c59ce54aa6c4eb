//! Decode, bound and re-encode helpers shared by the disk and network tiers.

use std::io::Cursor;

use image::DynamicImage;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;

use crate::domain::entities::CachedImage;
use crate::domain::errors::{CacheError, CacheResult};

/// Longest edge an image may have once stored in a tier.
pub const DEFAULT_MAX_DIMENSION: u32 = 200;

/// JPEG quality used for stored images.
pub const DEFAULT_JPEG_QUALITY: u8 = 85;

/// Limits applied to every image before it is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessingOptions {
    /// Bounding box edge in pixels.
    pub max_dimension: u32,
    /// JPEG quality (1-100).
    pub jpeg_quality: u8,
}

impl Default for ProcessingOptions {
    fn default() -> Self {
        Self {
            max_dimension: DEFAULT_MAX_DIMENSION,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
        }
    }
}

/// Computes the size of a `width`x`height` image scaled to fit a
/// `max`x`max` box, keeping the aspect ratio.
///
/// Images already inside the box are returned unchanged.
#[must_use]
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
pub fn fit_within(width: u32, height: u32, max: u32) -> (u32, u32) {
    if width <= max && height <= max {
        return (width, height);
    }
    let max = max.max(1);
    let aspect = f64::from(width) / f64::from(height.max(1));
    if aspect > 1.0 {
        let h = (f64::from(max) / aspect).round() as u32;
        (max, h.clamp(1, max))
    } else {
        let w = (f64::from(max) * aspect).round() as u32;
        (w.clamp(1, max), max)
    }
}

/// Scales `img` down to fit the bounding box.
#[must_use]
pub fn bound_image(img: DynamicImage, max_dimension: u32) -> DynamicImage {
    let (w, h) = fit_within(img.width(), img.height(), max_dimension);
    if (w, h) == (img.width(), img.height()) {
        img
    } else {
        img.resize_exact(w, h, FilterType::Lanczos3)
    }
}

/// Decodes an encoded image, guessing the format from its content.
///
/// # Errors
/// Returns [`CacheError::Decode`] if the bytes are not a supported image.
pub fn decode(bytes: &[u8]) -> CacheResult<DynamicImage> {
    image::load_from_memory(bytes).map_err(|e| CacheError::decode(format!("{e}")))
}

/// Encodes `img` as a JPEG with the given quality.
///
/// Alpha is dropped since JPEG cannot carry it.
///
/// # Errors
/// Returns [`CacheError::Encode`] if the encoder fails.
pub fn encode_jpeg(img: &DynamicImage, quality: u8) -> CacheResult<Vec<u8>> {
    let rgb = img.to_rgb8();
    let mut buf = Cursor::new(Vec::new());
    let mut encoder = JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100));
    encoder
        .encode_image(&rgb)
        .map_err(|e| CacheError::encode(format!("{e}")))?;
    Ok(buf.into_inner())
}

/// Full pipeline for freshly downloaded bytes: decode, bound, re-encode.
///
/// Returns the bytes to persist and the image to hand out. CPU bound; run it
/// on a blocking thread.
///
/// # Errors
/// Returns an error if decoding or encoding fails.
pub fn reencode(bytes: &[u8], options: ProcessingOptions) -> CacheResult<(Vec<u8>, CachedImage)> {
    let decoded = decode(bytes)?;
    let bounded = bound_image(decoded, options.max_dimension);
    let encoded = encode_jpeg(&bounded, options.jpeg_quality)?;
    let size = encoded.len();
    Ok((encoded, CachedImage::new(bounded, size)))
}

/// Decodes bytes read back from the disk tier.
///
/// Stored files are already bounded, but older or foreign files are bounded
/// again so the tier invariant holds regardless of what sits on disk.
///
/// # Errors
/// Returns [`CacheError::Decode`] if the bytes are not a supported image.
pub fn decode_stored(bytes: &[u8], options: ProcessingOptions) -> CacheResult<CachedImage> {
    let decoded = decode(bytes)?;
    let bounded = bound_image(decoded, options.max_dimension);
    Ok(CachedImage::new(bounded, bytes.len()))
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::io::Cursor;

    /// Encodes a solid-colour PNG of the given size.
    pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = image::DynamicImage::ImageRgb8(image::RgbImage::from_pixel(
            width,
            height,
            image::Rgb([200, 40, 90]),
        ));
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, image::ImageFormat::Png)
            .expect("png encode");
        buf.into_inner()
    }
}
