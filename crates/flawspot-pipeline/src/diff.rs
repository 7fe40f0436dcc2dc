//! Differencer: where did the current photo change relative to the base?
//!
//! Absolute difference → blur → Otsu threshold (with a floor) → ROI →
//! open/close cleanup. The floor matters for near-identical photos: the
//! histogram of an almost-zero difference image is degenerate and Otsu
//! would otherwise pick a threshold in the sensor noise.

use image::{GrayImage, Luma};
use imageproc::contrast::otsu_level;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::blur::gaussian_blur;
use crate::mask::Mask;
use crate::profile::DetectionProfile;
use crate::types::{Dimensions, PipelineError};

/// Thresholded difference of two photos.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffOutput {
    pub mask: Mask,
    pub threshold: DiffThreshold,
}

/// Otsu's suggestion and the level actually applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffThreshold {
    pub otsu: u8,
    pub used: u8,
}

/// Changed pixels of `current` relative to `base`, restricted to `roi`.
///
/// # Errors
///
/// Returns [`PipelineError::DimensionMismatch`] if the two images or the
/// ROI differ in size.
pub fn diff(
    base: &GrayImage,
    current: &GrayImage,
    roi: &Mask,
    profile: &DetectionProfile,
) -> Result<DiffOutput, PipelineError> {
    if base.dimensions() != current.dimensions() {
        return Err(PipelineError::DimensionMismatch {
            expected: Dimensions::of(base),
            actual: Dimensions::of(current),
        });
    }

    let delta = GrayImage::from_fn(base.width(), base.height(), |x, y| {
        Luma([base.get_pixel(x, y).0[0].abs_diff(current.get_pixel(x, y).0[0])])
    });
    let smoothed = gaussian_blur(&delta, profile.blur_sigma);
    drop(delta);

    let otsu = otsu_level(&smoothed);
    let used = otsu.max(profile.diff_min_threshold);
    let changed = Mask::threshold_above(&smoothed, used);
    drop(smoothed);

    let mask = clean(&changed.and(roi)?, profile);
    debug!(otsu, used, changed = mask.count(), "difference thresholded");
    Ok(DiffOutput {
        mask,
        threshold: DiffThreshold { otsu, used },
    })
}

/// Open then close with the profile's diff kernels.
#[must_use]
pub fn clean(mask: &Mask, profile: &DetectionProfile) -> Mask {
    mask.open(profile.diff_open_kernel)
        .close(profile.diff_close_kernel)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::BoundingBox;

    fn part() -> GrayImage {
        GrayImage::from_fn(200, 200, |x, y| {
            if (20..180).contains(&x) && (20..180).contains(&y) {
                Luma([128])
            } else {
                Luma([255])
            }
        })
    }

    #[test]
    fn identical_images_have_no_difference() {
        let img = part();
        let out = diff(&img, &img, &Mask::full(200, 200), &DetectionProfile::default()).unwrap();
        assert!(out.mask.is_clear());
        assert_eq!(out.threshold.used, 22);
    }

    #[test]
    fn dark_patch_is_found_inside_roi() {
        let base = part();
        let mut current = part();
        for y in 60..90 {
            for x in 60..90 {
                current.put_pixel(x, y, Luma([0]));
            }
        }
        let mut roi = Mask::new(200, 200);
        roi.fill_rect(BoundingBox::new(30, 30, 140, 140));
        let out = diff(&base, &current, &roi, &DetectionProfile::default()).unwrap();
        assert!(out.threshold.used >= 22);
        let bbox = out.mask.bounding_box().unwrap();
        assert!(bbox.x.abs_diff(60) <= 3 && bbox.y.abs_diff(60) <= 3, "{bbox:?}");
        assert!(bbox.width.abs_diff(30) <= 6, "{bbox:?}");
    }

    #[test]
    fn changes_outside_roi_are_ignored() {
        let base = part();
        let mut current = part();
        for y in 0..15 {
            for x in 0..15 {
                current.put_pixel(x, y, Luma([0]));
            }
        }
        let mut roi = Mask::new(200, 200);
        roi.fill_rect(BoundingBox::new(30, 30, 140, 140));
        let out = diff(&base, &current, &roi, &DetectionProfile::default()).unwrap();
        assert!(out.mask.is_clear());
    }

    #[test]
    fn faint_noise_stays_below_floor() {
        let base = part();
        let current = GrayImage::from_fn(200, 200, |x, y| {
            let v = base.get_pixel(x, y).0[0];
            Luma([if (x + y) % 2 == 0 { v.saturating_sub(6) } else { v }])
        });
        let out = diff(&base, &current, &Mask::full(200, 200), &DetectionProfile::default()).unwrap();
        assert!(out.mask.is_clear());
    }

    #[test]
    fn size_mismatch_is_a_precondition_error() {
        let a = GrayImage::new(10, 10);
        let b = GrayImage::new(10, 12);
        let err = diff(&a, &b, &Mask::full(10, 10), &DetectionProfile::default()).unwrap_err();
        assert!(matches!(err, PipelineError::DimensionMismatch { .. }));
    }

    #[test]
    fn clean_removes_specks() {
        let mut m = Mask::new(50, 50);
        m.set(5, 5, true);
        m.fill_rect(BoundingBox::new(20, 20, 12, 12));
        let cleaned = clean(&m, &DetectionProfile::default());
        assert!(!cleaned.get(5, 5));
        assert!(cleaned.get(25, 25));
    }
}
