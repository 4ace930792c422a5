//! Image normalization: decode, scale into the canonical bounds, re-encode
//! as JPEG.
//!
//! Scaling always targets the bounding box, so images smaller than the box
//! are scaled *up*.

use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageError};
use thiserror::Error;

/// Bounding box for cached images.
pub const MAX_WIDTH: u32 = 800;
pub const MAX_HEIGHT: u32 = 600;

/// JPEG quality used for cached images.
pub const JPEG_QUALITY: u8 = 85;

/// File extension of the canonical cached format.
pub const CANONICAL_EXT: &str = "jpg";

#[derive(Debug, Error)]
pub enum TranscodeError {
    #[error("Failed to decode image: {0}")]
    Decode(#[source] ImageError),

    #[error("Image has zero width or height")]
    EmptyImage,

    #[error("Failed to encode image: {0}")]
    Encode(#[source] ImageError),
}

/// Output dimensions for an image of `width`×`height`.
///
/// `ratio = min(MAX_WIDTH / width, MAX_HEIGHT / height)`, applied to both
/// sides and truncated, with each side at least 1px. The ratio is not capped
/// at 1. Computed in integers so the limiting side lands exactly on its
/// bound.
pub fn target_dimensions(width: u32, height: u32) -> (u32, u32) {
    let (w, h) = (u64::from(width.max(1)), u64::from(height.max(1)));
    let (max_w, max_h) = (u64::from(MAX_WIDTH), u64::from(MAX_HEIGHT));
    let (out_w, out_h) = if max_w * h <= max_h * w {
        (max_w, h * max_w / w)
    } else {
        (w * max_h / h, max_h)
    };
    (out_w.max(1) as u32, out_h.max(1) as u32)
}

/// Transcode raw image bytes (JPEG, PNG, WebP or GIF) into a bounded JPEG.
pub fn transcode(raw: &[u8]) -> Result<Vec<u8>, TranscodeError> {
    let decoded = image::load_from_memory(raw).map_err(TranscodeError::Decode)?;
    if decoded.width() == 0 || decoded.height() == 0 {
        return Err(TranscodeError::EmptyImage);
    }

    let (width, height) = target_dimensions(decoded.width(), decoded.height());
    let resized = if (width, height) == (decoded.width(), decoded.height()) {
        decoded
    } else {
        decoded.resize_exact(width, height, FilterType::CatmullRom)
    };

    // JPEG has no alpha channel; flatten everything to 8-bit RGB.
    let rgb = DynamicImage::ImageRgb8(resized.to_rgb8());

    let mut out = Cursor::new(Vec::new());
    let encoder = JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY);
    rgb.write_with_encoder(encoder).map_err(TranscodeError::Encode)?;
    Ok(out.into_inner())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::{ImageFormat, RgbImage, RgbaImage};

    /// Encode a gradient test image in the given format.
    pub(crate) fn sample_image(width: u32, height: u32, format: ImageFormat) -> Vec<u8> {
        let img = RgbImage::from_fn(width, height, |x, y| {
            image::Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
        });
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img).write_to(&mut out, format).unwrap();
        out.into_inner()
    }

    #[test]
    fn test_target_dimensions_downscale() {
        assert_eq!(target_dimensions(1600, 1200), (800, 600));
        assert_eq!(target_dimensions(4000, 1000), (800, 200));
        assert_eq!(target_dimensions(600, 1200), (300, 600));
    }

    #[test]
    fn test_target_dimensions_upscale_small_image() {
        // ratio = min(800/100, 600/80) = 7.5
        assert_eq!(target_dimensions(100, 80), (750, 600));
    }

    #[test]
    fn test_target_dimensions_never_below_one_pixel() {
        assert_eq!(target_dimensions(100_000, 1), (800, 1));
        assert_eq!(target_dimensions(1, 100_000), (1, 600));
    }

    #[test]
    fn test_transcode_large_jpeg_fits_bounds() {
        let raw = sample_image(1600, 1200, ImageFormat::Jpeg);
        let out = transcode(&raw).unwrap();
        let img = image::load_from_memory(&out).unwrap();
        assert!(img.width() <= MAX_WIDTH && img.height() <= MAX_HEIGHT);
        assert_eq!((img.width(), img.height()), (800, 600));
        assert_eq!(
            image::guess_format(&out).unwrap(),
            ImageFormat::Jpeg,
            "output must be canonical JPEG"
        );
    }

    #[test]
    fn test_transcode_preserves_aspect_ratio() {
        let raw = sample_image(1000, 300, ImageFormat::Png);
        let out = transcode(&raw).unwrap();
        let img = image::load_from_memory(&out).unwrap();
        assert_eq!((img.width(), img.height()), (800, 240));
    }

    #[test]
    fn test_transcode_small_image_upscales() {
        let raw = sample_image(100, 80, ImageFormat::Png);
        let out = transcode(&raw).unwrap();
        let img = image::load_from_memory(&out).unwrap();
        assert_eq!((img.width(), img.height()), (750, 600));
    }

    #[test]
    fn test_transcode_flattens_alpha() {
        let img = RgbaImage::from_pixel(40, 30, image::Rgba([255, 0, 0, 128]));
        let mut raw = Cursor::new(Vec::new());
        DynamicImage::ImageRgba8(img)
            .write_to(&mut raw, ImageFormat::Png)
            .unwrap();
        let out = transcode(raw.get_ref()).unwrap();
        let decoded = image::load_from_memory(&out).unwrap();
        assert!(!decoded.color().has_alpha());
    }

    #[test]
    fn test_transcode_rejects_garbage() {
        let err = transcode(b"definitely not an image").unwrap_err();
        assert!(matches!(err, TranscodeError::Decode(_)));
    }
}
