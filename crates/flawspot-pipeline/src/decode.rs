//! Image decoding and grayscale conversion.
//!
//! Accepts raw image bytes (PNG, JPEG, BMP, WebP) and produces an owned
//! RGB buffer. The color buffer is kept for the glare check and for
//! highlighting; every analysis stage works on the grayscale copy.
//!
//! This is the first step in the pipeline: raw bytes in, `RgbImage` out.

use image::{GrayImage, RgbImage};

use crate::types::PipelineError;

/// Decode raw image bytes into an RGB buffer.
///
/// Alpha is discarded and 16-bit sources are reduced to 8 bits.
///
/// # Errors
///
/// Returns [`PipelineError::EmptyInput`] if `bytes` is empty.
/// Returns [`PipelineError::ImageDecode`] if the image format is
/// unrecognized or the data is corrupt.
#[must_use = "returns the decoded image"]
pub fn decode(bytes: &[u8]) -> Result<RgbImage, PipelineError> {
    if bytes.is_empty() {
        return Err(PipelineError::EmptyInput);
    }

    let img = image::load_from_memory(bytes)?;
    if img.width() == 0 || img.height() == 0 {
        return Err(PipelineError::EmptyInput);
    }
    Ok(img.to_rgb8())
}

/// Convert to grayscale with the standard luminance weights.
#[must_use = "returns the grayscale image"]
pub fn grayscale(image: &RgbImage) -> GrayImage {
    image::imageops::grayscale(image)
}
