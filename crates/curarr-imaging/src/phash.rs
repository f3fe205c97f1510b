// SPDX-License-Identifier: GPL-3.0-or-later
use image::imageops::FilterType;
use image::{DynamicImage, GrayImage};

/// 64-bit average hash: 8x8 grayscale thumbnail, one bit per pixel above the
/// mean luma. Row-major, most significant bit first.
pub fn average_hash(image: &DynamicImage) -> u64 {
    let thumb: GrayImage = image
        .resize_exact(8, 8, FilterType::Triangle)
        .to_luma8();
    let pixels: Vec<u64> = thumb.pixels().map(|p| p.0[0] as u64).collect();
    let mean = pixels.iter().sum::<u64>() / pixels.len() as u64;

    let mut hash = 0u64;
    for (i, value) in pixels.iter().enumerate() {
        if *value > mean {
            hash |= 1 << (63 - i);
        }
    }
    hash
}

/// 64-bit difference hash: 9x8 grayscale thumbnail, one bit per horizontal
/// neighbor comparison. More stable than aHash under brightness shifts.
pub fn difference_hash(image: &DynamicImage) -> u64 {
    let thumb: GrayImage = image
        .resize_exact(9, 8, FilterType::Triangle)
        .to_luma8();

    let mut hash = 0u64;
    let mut bit = 0;
    for y in 0..8 {
        for x in 0..8 {
            let left = thumb.get_pixel(x, y).0[0];
            let right = thumb.get_pixel(x + 1, y).0[0];
            if left > right {
                hash |= 1 << (63 - bit);
            }
            bit += 1;
        }
    }
    hash
}

/// Similarity in [0, 1]: fraction of matching bits between two 64-bit hashes.
/// 1.0 is identical; the 0.85/0.90 thresholds correspond to <= 9 / <= 6
/// differing bits.
pub fn hamming_similarity(a: u64, b: u64) -> f64 {
    let differing = (a ^ b).count_ones();
    1.0 - (differing as f64 / 64.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    fn gradient_image() -> DynamicImage {
        let mut img = RgbaImage::new(64, 64);
        for (x, _, pixel) in img.enumerate_pixels_mut() {
            let v = (x * 4) as u8;
            *pixel = Rgba([v, v, v, 255]);
        }
        DynamicImage::ImageRgba8(img)
    }

    fn noisy_gradient_image() -> DynamicImage {
        let mut img = RgbaImage::new(64, 64);
        for (x, y, pixel) in img.enumerate_pixels_mut() {
            let v = (x * 4) as u8;
            // Small deterministic perturbation, visually the same image.
            let n = ((x * 7 + y * 13) % 5) as u8;
            *pixel = Rgba([v.saturating_add(n), v.saturating_add(n), v.saturating_add(n), 255]);
        }
        DynamicImage::ImageRgba8(img)
    }

    #[test]
    fn identical_images_have_similarity_one() {
        let hash = average_hash(&gradient_image());
        assert_eq!(hamming_similarity(hash, hash), 1.0);
    }

    #[test]
    fn near_duplicates_stay_above_dedup_threshold() {
        let a = difference_hash(&gradient_image());
        let b = difference_hash(&noisy_gradient_image());
        assert!(hamming_similarity(a, b) >= 0.90);
    }

    #[test]
    fn inverted_images_diverge() {
        let a = difference_hash(&gradient_image());
        let inverted = DynamicImage::ImageRgba8(RgbaImage::from_fn(64, 64, |x, _| {
            let v = 255 - (x * 4) as u8;
            Rgba([v, v, v, 255])
        }));
        let b = difference_hash(&inverted);
        assert!(hamming_similarity(a, b) < 0.5);
    }

    #[test]
    fn similarity_counts_bits() {
        assert_eq!(hamming_similarity(0, 0), 1.0);
        assert_eq!(hamming_similarity(0, u64::MAX), 0.0);
        // 6 differing bits -> exactly the 0.90 dedup cutoff (rounded down).
        let six_bits = 0b111111u64;
        assert!((hamming_similarity(0, six_bits) - (1.0 - 6.0 / 64.0)).abs() < 1e-9);
    }
}
