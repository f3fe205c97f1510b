// SPDX-License-Identifier: GPL-3.0-or-later
use image::{DynamicImage, GenericImageView, ImageFormat, ImageReader};
use sha2::{Digest, Sha256};
use std::io::Cursor;
use thiserror::Error;
use tracing::trace;

use crate::phash::{average_hash, difference_hash};

#[derive(Debug, Error)]
pub enum ImagingError {
    #[error("could not detect image format")]
    UnknownFormat,

    #[error("image decoding failed: {0}")]
    Decode(#[from] image::ImageError),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Everything the enrichment analysis phase needs from one downloaded image.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageAnalysis {
    pub width: u32,
    pub height: u32,
    /// Lowercase file extension for the detected format ("jpeg", "png", …).
    pub format: String,
    pub content_hash: String,
    pub perceptual_hash: u64,
    pub difference_hash: u64,
    /// Fraction of pixels that are not fully opaque. Logos keep transparency;
    /// posters should not.
    pub alpha_ratio: f64,
    /// Fraction of pixels carrying visible content (non-transparent and not
    /// near-black), a cheap foreground estimate for logo quality.
    pub foreground_ratio: f64,
}

/// Hex-encoded SHA-256 of raw bytes. Used for images, videos and any other
/// payload that ends up content-addressed in the cache.
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    let mut out = String::with_capacity(64);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// Decode and measure one image held in memory.
pub fn analyze_image(bytes: &[u8]) -> Result<ImageAnalysis, ImagingError> {
    let reader = ImageReader::new(Cursor::new(bytes)).with_guessed_format()?;
    let format = reader.format().ok_or(ImagingError::UnknownFormat)?;
    let image = reader.decode()?;
    let (width, height) = image.dimensions();

    let (alpha_ratio, foreground_ratio) = coverage_ratios(&image);
    let analysis = ImageAnalysis {
        width,
        height,
        format: format_extension(format),
        content_hash: content_hash(bytes),
        perceptual_hash: average_hash(&image),
        difference_hash: difference_hash(&image),
        alpha_ratio,
        foreground_ratio,
    };
    trace!(
        target: "imaging",
        width,
        height,
        format = %analysis.format,
        "image analyzed"
    );
    Ok(analysis)
}

fn format_extension(format: ImageFormat) -> String {
    format
        .extensions_str()
        .first()
        .map(|ext| ext.to_string())
        .unwrap_or_else(|| "bin".to_string())
}

fn coverage_ratios(image: &DynamicImage) -> (f64, f64) {
    let rgba = image.to_rgba8();
    let total = (rgba.width() * rgba.height()) as f64;
    if total == 0.0 {
        return (0.0, 0.0);
    }

    let mut transparent = 0u64;
    let mut foreground = 0u64;
    for pixel in rgba.pixels() {
        let [r, g, b, a] = pixel.0;
        if a < 255 {
            transparent += 1;
        }
        if a > 16 && (r as u16 + g as u16 + b as u16) > 30 {
            foreground += 1;
        }
    }
    (transparent as f64 / total, foreground as f64 / total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    fn png_bytes(image: RgbaImage) -> Vec<u8> {
        let mut bytes = Vec::new();
        DynamicImage::ImageRgba8(image)
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        bytes
    }

    #[test]
    fn content_hash_is_stable_sha256() {
        assert_eq!(
            content_hash(b"hello"),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn analysis_reports_dimensions_and_format() {
        let bytes = png_bytes(RgbaImage::from_pixel(120, 80, Rgba([200, 10, 10, 255])));
        let analysis = analyze_image(&bytes).unwrap();
        assert_eq!(analysis.width, 120);
        assert_eq!(analysis.height, 80);
        assert_eq!(analysis.format, "png");
        assert_eq!(analysis.alpha_ratio, 0.0);
        assert!(analysis.foreground_ratio > 0.99);
    }

    #[test]
    fn transparent_logo_has_high_alpha_ratio() {
        let mut img = RgbaImage::from_pixel(64, 64, Rgba([0, 0, 0, 0]));
        for x in 0..32 {
            for y in 0..32 {
                img.put_pixel(x, y, Rgba([255, 255, 255, 255]));
            }
        }
        let analysis = analyze_image(&png_bytes(img)).unwrap();
        assert!(analysis.alpha_ratio > 0.7);
        assert!((analysis.foreground_ratio - 0.25).abs() < 0.01);
    }

    #[test]
    fn garbage_bytes_are_rejected() {
        assert!(analyze_image(b"definitely not an image").is_err());
    }
}
