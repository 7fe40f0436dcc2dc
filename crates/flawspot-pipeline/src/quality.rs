//! Photo quality gate.
//!
//! Every metric is computed over the part interior only (the part mask
//! eroded by [`DetectionProfile::roi_margin_kernel`]), so a bright
//! backdrop, a dark table or the part's own silhouette does not count for
//! or against the photo. The gate reports the first failing metric
//! together with its value.
//!
//! Sharpness is the share of interior pixels that Canny marks as edges on
//! the unblurred photo. A smooth part therefore fails even when its
//! outline against the background is crisp.
//!
//! When the ROI covers almost the whole frame, segmentation most likely
//! failed to isolate a part and the photo is probably a plain surface.
//! The gate then skips the overexposure and glare checks and lowers the
//! sharpness floor (see [`DetectionProfile::relaxed_roi_ratio`]).
//! Underexposure is checked first and in both modes: a dark frame never
//! yields an outline, so it always lands in the relaxed mode.

use image::RgbImage;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::decode::grayscale;
use crate::edge::canny;
use crate::mask::Mask;
use crate::profile::DetectionProfile;
use crate::segment::interior;
use crate::types::{PipelineError, QualityFailure};

/// Metrics measured by a passing gate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualityReport {
    /// Interior pixels over frame pixels.
    pub roi_ratio: f64,
    /// Whether the relaxed photometric gate applied.
    pub relaxed: bool,
    /// Canny edge pixels over interior pixels.
    pub edge_ratio: f64,
    pub overexposed_ratio: f64,
    pub underexposed_ratio: f64,
    pub glare_ratio: f64,
}

/// Run the gate on `image` restricted to the interior of `part`.
///
/// `label` names the photo in the error ("base image", "current image").
///
/// # Errors
///
/// Returns [`PipelineError::QualityGate`] describing the first failing
/// metric, or [`PipelineError::DimensionMismatch`] if `part` does not
/// match the image size.
pub fn check(
    image: &RgbImage,
    part: &Mask,
    glare_limit: f64,
    label: &'static str,
    profile: &DetectionProfile,
) -> Result<QualityReport, PipelineError> {
    let fail = |failure: QualityFailure| PipelineError::QualityGate { label, failure };
    let (width, height) = image.dimensions();

    if width < profile.min_image_side || height < profile.min_image_side {
        return Err(fail(QualityFailure::TooSmall {
            width,
            height,
            min_side: profile.min_image_side,
        }));
    }
    if part.width() != width || part.height() != height {
        return Err(PipelineError::DimensionMismatch {
            expected: crate::types::Dimensions::new(width, height),
            actual: part.dimensions(),
        });
    }
    if part.is_clear() {
        return Err(fail(QualityFailure::EmptyRoi));
    }

    let roi = interior(part, profile.roi_margin_kernel);
    let report = measure(image, &roi, profile)?;
    debug!(label, ?report, glare_limit, "quality metrics");

    if report.underexposed_ratio > profile.max_underexposed_ratio {
        return Err(fail(QualityFailure::Underexposed {
            ratio: report.underexposed_ratio,
        }));
    }

    let sharpness_floor = if report.relaxed {
        profile.min_sharpness_edge_ratio * profile.relaxed_sharpness_factor
    } else {
        profile.min_sharpness_edge_ratio
    };
    if report.edge_ratio < sharpness_floor {
        return Err(fail(QualityFailure::Blurry {
            edge_ratio: report.edge_ratio,
        }));
    }

    if !report.relaxed {
        if report.overexposed_ratio > profile.max_overexposed_ratio {
            return Err(fail(QualityFailure::Overexposed {
                ratio: report.overexposed_ratio,
            }));
        }
        if report.glare_ratio > glare_limit {
            return Err(fail(QualityFailure::Glare {
                ratio: report.glare_ratio,
            }));
        }
    }

    Ok(report)
}

#[allow(clippy::cast_precision_loss)]
fn measure(
    image: &RgbImage,
    roi: &Mask,
    profile: &DetectionProfile,
) -> Result<QualityReport, PipelineError> {
    let gray = grayscale(image);
    let roi_pixels = roi.count();
    let edges = canny(
        &gray,
        profile.sharpness_canny_low,
        profile.sharpness_canny_high,
    );
    let edge_pixels = edges.count_within(roi)?;
    drop(edges);

    let (mut over, mut under, mut glare) = (0_u64, 0_u64, 0_u64);
    for ((x, y, rgb), luma) in image.enumerate_pixels().zip(gray.pixels()) {
        if !roi.get(x, y) {
            continue;
        }
        let level = luma.0[0];
        over += u64::from(level > profile.overexposed_level);
        under += u64::from(level <= profile.underexposed_level);
        let (saturation, value) = saturation_value(rgb.0);
        glare += u64::from(
            saturation <= profile.glare_max_saturation && value > profile.glare_min_value,
        );
    }

    let n = roi_pixels as f64;
    let roi_ratio = roi.coverage();
    Ok(QualityReport {
        roi_ratio,
        relaxed: roi_ratio > profile.relaxed_roi_ratio,
        edge_ratio: edge_pixels as f64 / n,
        overexposed_ratio: over as f64 / n,
        underexposed_ratio: under as f64 / n,
        glare_ratio: glare as f64 / n,
    })
}

/// 8-bit HSV saturation and value of one RGB pixel.
#[allow(clippy::cast_possible_truncation)]
fn saturation_value([r, g, b]: [u8; 3]) -> (u8, u8) {
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    if max == 0 {
        return (0, 0);
    }
    let s = (u32::from(max - min) * 255 + u32::from(max) / 2) / u32::from(max);
    (s.min(255) as u8, max)
}
