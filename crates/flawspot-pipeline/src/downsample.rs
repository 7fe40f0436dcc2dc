//! Resizing to the working resolution.
//!
//! Single-image inspection shrinks photos so the longest side is at most
//! `max_side`, which keeps the pixel-count thresholds of later stages
//! stable across cameras. Base/current comparison instead brings both
//! photos to their common minimum size so they can be differenced
//! pixel by pixel.
//!
//! Both functions take the image by value and hand it back untouched
//! when no resize is needed.

use image::imageops::FilterType;
use image::RgbImage;

use crate::types::Dimensions;

/// Target size for an image whose longest side must not exceed
/// `max_side`, preserving aspect ratio (truncating).
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn scaled_dimensions(dims: Dimensions, max_side: u32) -> Dimensions {
    let longest = dims.max_side();
    if longest <= max_side || longest == 0 {
        return dims;
    }
    // Integer math keeps e.g. 1200x900 -> 1024x768 exact.
    let scale = |side: u32| -> u32 {
        let scaled = u64::from(side) * u64::from(max_side) / u64::from(longest);
        (scaled as u32).max(1)
    };
    Dimensions::new(scale(dims.width), scale(dims.height))
}

/// Shrink so the longest side is at most `max_side`.
///
/// Returns the (possibly unchanged) image and whether it was resized.
#[must_use]
pub fn limit_side(image: RgbImage, max_side: u32) -> (RgbImage, bool) {
    let target = scaled_dimensions(Dimensions::of(&image), max_side);
    resize_to(image, target)
}

/// Resize to exactly `target`.
///
/// Returns the (possibly unchanged) image and whether it was resized.
#[must_use]
pub fn resize_to(image: RgbImage, target: Dimensions) -> (RgbImage, bool) {
    if Dimensions::of(&image) == target {
        return (image, false);
    }
    let resized =
        image::imageops::resize(&image, target.width, target.height, FilterType::Triangle);
    (resized, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn large_image_is_scaled_to_max_side() {
        let dims = scaled_dimensions(Dimensions::new(1200, 900), 1024);
        assert_eq!(dims, Dimensions::new(1024, 768));
    }

    #[test]
    fn portrait_image_scales_height() {
        let dims = scaled_dimensions(Dimensions::new(900, 1800), 1024);
        assert_eq!(dims, Dimensions::new(512, 1024));
    }

    #[test]
    fn small_image_is_unchanged() {
        let img = RgbImage::new(640, 480);
        let (out, resized) = limit_side(img, 1024);
        assert!(!resized);
        assert_eq!(out.dimensions(), (640, 480));
    }

    #[test]
    fn resize_to_exact_target() {
        let img = RgbImage::new(700, 500);
        let (out, resized) = resize_to(img, Dimensions::new(640, 480));
        assert!(resized);
        assert_eq!(out.dimensions(), (640, 480));
    }

    #[test]
    fn extreme_aspect_never_collapses_to_zero() {
        let dims = scaled_dimensions(Dimensions::new(5000, 2), 1024);
        assert_eq!(dims, Dimensions::new(1024, 1));
    }
}
