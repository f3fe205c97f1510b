// SPDX-License-Identifier: GPL-3.0-or-later
//! Image asset analysis: dimensions, format, content hash, 64-bit perceptual
//! hashes and Hamming similarity. Everything operates on in-memory bytes so
//! callers own the download and temp-file lifecycle.

pub mod analyze;
pub mod phash;

pub use analyze::{analyze_image, content_hash, ImageAnalysis, ImagingError};
pub use phash::{average_hash, difference_hash, hamming_similarity};
