//! Detection profile: every tunable threshold of the pipeline.
//!
//! One [`DetectionProfile`] is built (or deserialized) once, validated,
//! and then passed by shared reference through every stage of an
//! inspection call. Nothing in the pipeline mutates it.
//!
//! Missing fields in a serialized profile fall back to their defaults, so
//! a JSON file only needs to list the values it overrides.

use serde::{Deserialize, Serialize};

use crate::types::PipelineError;

/// Standard maximum side length images are resized to.
pub const DEFAULT_MAX_SIDE: u32 = 1024;

/// Photos with either side below this are rejected outright.
pub const DEFAULT_MIN_IMAGE_SIDE: u32 = 400;

/// Largest morphology kernel the pipeline accepts.
///
/// Kernels are applied as discs of radius `kernel / 2`, and the radius
/// must fit in a `u8`.
pub const MAX_KERNEL: u32 = 511;

/// Tunable thresholds for one inspection call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionProfile {
    // ───────────────────────── image size ─────────────────────────
    /// Images larger than this on either side are downscaled before
    /// single-image analysis.
    pub max_side: u32,
    /// Minimum accepted side length in pixels.
    pub min_image_side: u32,

    // ──────────────────────── quality gate ────────────────────────
    /// Minimum ratio of Canny edge pixels inside the part interior.
    pub min_sharpness_edge_ratio: f64,
    /// Canny thresholds of the sharpness measurement. Applied to the
    /// unblurred photo.
    pub sharpness_canny_low: f32,
    pub sharpness_canny_high: f32,
    /// Gray level above which a pixel counts as overexposed.
    pub overexposed_level: u8,
    /// Gray level at or below which a pixel counts as underexposed.
    pub underexposed_level: u8,
    pub max_overexposed_ratio: f64,
    pub max_underexposed_ratio: f64,
    /// Glare limit for single-image inspection.
    pub max_glare_ratio: f64,
    /// Glare limit for base/current comparison (usually looser).
    pub diff_max_glare_ratio: f64,
    /// Saturation at or below which a bright pixel counts as glare.
    pub glare_max_saturation: u8,
    /// Value above which a low-saturation pixel counts as glare.
    pub glare_min_value: u8,
    /// ROI coverage above which segmentation is assumed to have failed
    /// and the photometric checks are relaxed.
    ///
    /// This is a heuristic precision/recall trade-off and is expected to
    /// be retuned.
    pub relaxed_roi_ratio: f64,
    /// Sharpness floor multiplier while relaxed.
    pub relaxed_sharpness_factor: f64,

    // ──────────────────────── segmentation ────────────────────────
    /// Gaussian sigma applied before edge detection and differencing.
    pub blur_sigma: f32,
    pub segment_canny_low: f32,
    pub segment_canny_high: f32,
    /// Kernel used to dilate edges so outlines close.
    pub segment_dilate_kernel: u32,
    /// Kernel used to close small holes in the part mask.
    pub segment_close_kernel: u32,
    /// Largest outline must cover at least this fraction of the frame,
    /// otherwise the mask is the whole frame.
    pub min_part_area_ratio: f64,
    /// Secondary outlines are kept when larger than this fraction of the
    /// frame...
    pub part_secondary_area_ratio: f64,
    /// ...and this fraction of the primary outline.
    pub part_secondary_rel_ratio: f64,
    /// Erosion kernel producing the interior mask.
    pub roi_margin_kernel: u32,

    // ─────────────────────── single image ────────────────────────
    pub inspect_canny_low: f32,
    pub inspect_canny_high: f32,

    // ──────────────────────── registration ───────────────────────
    pub enable_registration: bool,
    /// Aligned results scoring below this IoU are not trusted.
    pub min_alignment_score: f64,
    /// Maximum refinement iterations.
    pub ecc_iterations: u32,
    /// Refinement stops once the correlation changes less than this.
    pub ecc_epsilon: f64,
    /// Refinement runs on a copy downscaled to this maximum side.
    pub ecc_working_side: u32,

    // ──────────────────────── differencing ───────────────────────
    /// Floor for the automatic difference threshold.
    pub diff_min_threshold: u8,
    pub diff_open_kernel: u32,
    pub diff_close_kernel: u32,

    // ─────────────────────── candidate filter ─────────────────────
    /// Minimum bounding-box area as a fraction of the image.
    pub min_area_ratio: f64,
    /// Minimum true region area as a fraction of the image.
    pub min_contour_area_ratio: f64,
    pub min_aspect_ratio: f64,
    pub max_aspect_ratio: f64,
    /// Minimum region area / bounding-box area.
    pub min_fill_ratio: f64,
    pub nms_iou_threshold: f64,
    pub nms_containment_ratio: f64,

    // ──────────────────────── broken part ─────────────────────────
    /// Components smaller than this fraction of the frame are ignored.
    pub broken_min_component_ratio: f64,
    /// Relative mask-area loss that triggers the structural branch.
    pub broken_area_loss_ratio: f64,
    /// Margin around detached components kept in the structural mask.
    pub broken_focus_expand: u32,
    /// Minimum fraction of a candidate box covered by structural evidence.
    pub broken_min_overlap_ratio: f64,
    /// Candidates closer than this on both axes are merged.
    pub broken_merge_distance: u32,
    /// Erosion kernel used to force separation of thinly joined pieces.
    pub broken_split_kernel: u32,
    /// Component-size multiplier applied after the split erosion.
    pub broken_split_area_factor: f64,
    /// Second component must be at least this fraction of the first.
    pub broken_second_rel_min: f64,
    /// Candidates below this fraction of the largest one are dropped.
    pub broken_dominant_min_ratio: f64,

    // ────────────────────────── geometry ──────────────────────────
    pub enable_geometry_check: bool,
    /// Shape-match score above which toothed outlines corroborate a
    /// mismatch.
    pub geometry_match_max_score: f64,
    /// Concavity count from which an outline is toothed.
    pub geometry_min_concavity: u32,
    pub geometry_min_concavity_gap: u32,
    pub geometry_polygon_vertex_gap: u32,
    pub geometry_polygon_min_circularity: f64,
    pub geometry_polygon_min_extent: f64,
    pub geometry_round_min_circularity: f64,
    pub geometry_round_max_circularity_gap: f64,
    /// Width kernel of the outline band mismatch evidence is kept in.
    pub geometry_ring_kernel: u32,
}

impl Default for DetectionProfile {
    fn default() -> Self {
        Self {
            max_side: DEFAULT_MAX_SIDE,
            min_image_side: DEFAULT_MIN_IMAGE_SIDE,

            min_sharpness_edge_ratio: 0.008,
            sharpness_canny_low: 80.0,
            sharpness_canny_high: 160.0,
            overexposed_level: 250,
            underexposed_level: 20,
            max_overexposed_ratio: 0.35,
            max_underexposed_ratio: 0.45,
            max_glare_ratio: 0.20,
            diff_max_glare_ratio: 0.26,
            glare_max_saturation: 40,
            glare_min_value: 245,
            relaxed_roi_ratio: 0.90,
            relaxed_sharpness_factor: 0.35,

            blur_sigma: 1.1,
            segment_canny_low: 40.0,
            segment_canny_high: 120.0,
            segment_dilate_kernel: 5,
            segment_close_kernel: 9,
            min_part_area_ratio: 0.05,
            part_secondary_area_ratio: 0.004,
            part_secondary_rel_ratio: 0.04,
            roi_margin_kernel: 9,

            inspect_canny_low: 50.0,
            inspect_canny_high: 150.0,

            enable_registration: true,
            min_alignment_score: 0.25,
            ecc_iterations: 80,
            ecc_epsilon: 1e-4,
            ecc_working_side: 256,

            diff_min_threshold: 22,
            diff_open_kernel: 3,
            diff_close_kernel: 7,

            min_area_ratio: 0.001,
            min_contour_area_ratio: 0.000_12,
            min_aspect_ratio: 0.1,
            max_aspect_ratio: 10.0,
            min_fill_ratio: 0.08,
            nms_iou_threshold: 0.30,
            nms_containment_ratio: 0.80,

            broken_min_component_ratio: 0.006,
            broken_area_loss_ratio: 0.06,
            broken_focus_expand: 49,
            broken_min_overlap_ratio: 0.10,
            broken_merge_distance: 48,
            broken_split_kernel: 17,
            broken_split_area_factor: 0.45,
            broken_second_rel_min: 0.05,
            broken_dominant_min_ratio: 0.50,

            enable_geometry_check: true,
            geometry_match_max_score: 0.10,
            geometry_min_concavity: 8,
            geometry_min_concavity_gap: 2,
            geometry_polygon_vertex_gap: 2,
            geometry_polygon_min_circularity: 0.55,
            geometry_polygon_min_extent: 0.55,
            geometry_round_min_circularity: 0.82,
            geometry_round_max_circularity_gap: 0.10,
            geometry_ring_kernel: 41,
        }
    }
}

impl DetectionProfile {
    /// Check every field against its valid range.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] naming the first field that
    /// is out of range.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.max_side == 0 {
            return Err(invalid("max_side must be positive"));
        }
        if self.ecc_working_side < 16 {
            return Err(invalid("ecc_working_side must be at least 16"));
        }

        let ratios = [
            ("min_sharpness_edge_ratio", self.min_sharpness_edge_ratio),
            ("max_overexposed_ratio", self.max_overexposed_ratio),
            ("max_underexposed_ratio", self.max_underexposed_ratio),
            ("max_glare_ratio", self.max_glare_ratio),
            ("diff_max_glare_ratio", self.diff_max_glare_ratio),
            ("relaxed_roi_ratio", self.relaxed_roi_ratio),
            ("relaxed_sharpness_factor", self.relaxed_sharpness_factor),
            ("min_part_area_ratio", self.min_part_area_ratio),
            ("part_secondary_area_ratio", self.part_secondary_area_ratio),
            ("part_secondary_rel_ratio", self.part_secondary_rel_ratio),
            ("min_alignment_score", self.min_alignment_score),
            ("min_area_ratio", self.min_area_ratio),
            ("min_contour_area_ratio", self.min_contour_area_ratio),
            ("min_fill_ratio", self.min_fill_ratio),
            ("nms_iou_threshold", self.nms_iou_threshold),
            ("nms_containment_ratio", self.nms_containment_ratio),
            ("broken_min_component_ratio", self.broken_min_component_ratio),
            ("broken_area_loss_ratio", self.broken_area_loss_ratio),
            ("broken_min_overlap_ratio", self.broken_min_overlap_ratio),
            ("broken_split_area_factor", self.broken_split_area_factor),
            ("broken_second_rel_min", self.broken_second_rel_min),
            ("broken_dominant_min_ratio", self.broken_dominant_min_ratio),
            (
                "geometry_polygon_min_circularity",
                self.geometry_polygon_min_circularity,
            ),
            (
                "geometry_polygon_min_extent",
                self.geometry_polygon_min_extent,
            ),
            (
                "geometry_round_min_circularity",
                self.geometry_round_min_circularity,
            ),
            (
                "geometry_round_max_circularity_gap",
                self.geometry_round_max_circularity_gap,
            ),
        ];
        for (name, value) in ratios {
            if !(0.0..=1.0).contains(&value) {
                return Err(invalid(format!("{name} must be in [0, 1], got {value}")));
            }
        }

        if !self.ecc_epsilon.is_finite() || self.ecc_epsilon <= 0.0 {
            return Err(invalid("ecc_epsilon must be positive"));
        }
        if !self.geometry_match_max_score.is_finite() || self.geometry_match_max_score < 0.0 {
            return Err(invalid("geometry_match_max_score must be non-negative"));
        }
        if !self.blur_sigma.is_finite() || self.blur_sigma < 0.0 {
            return Err(invalid("blur_sigma must be non-negative"));
        }
        if !(self.min_aspect_ratio > 0.0 && self.min_aspect_ratio <= self.max_aspect_ratio) {
            return Err(invalid(format!(
                "aspect bounds must satisfy 0 < min <= max, got {}..{}",
                self.min_aspect_ratio, self.max_aspect_ratio
            )));
        }

        for (name, low, high) in [
            ("sharpness_canny", self.sharpness_canny_low, self.sharpness_canny_high),
            ("segment_canny", self.segment_canny_low, self.segment_canny_high),
            ("inspect_canny", self.inspect_canny_low, self.inspect_canny_high),
        ] {
            if !(low.is_finite() && high.is_finite() && low > 0.0 && low <= high) {
                return Err(invalid(format!(
                    "{name} thresholds must satisfy 0 < low <= high, got {low}..{high}"
                )));
            }
        }

        for (name, kernel) in [
            ("segment_dilate_kernel", self.segment_dilate_kernel),
            ("segment_close_kernel", self.segment_close_kernel),
            ("roi_margin_kernel", self.roi_margin_kernel),
            ("diff_open_kernel", self.diff_open_kernel),
            ("diff_close_kernel", self.diff_close_kernel),
            ("broken_split_kernel", self.broken_split_kernel),
            ("geometry_ring_kernel", self.geometry_ring_kernel),
        ] {
            if kernel > MAX_KERNEL {
                return Err(invalid(format!(
                    "{name} must be at most {MAX_KERNEL}, got {kernel}"
                )));
            }
        }

        Ok(())
    }
}

fn invalid(message: impl Into<String>) -> PipelineError {
    PipelineError::InvalidConfig(message.into())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn default_profile_is_valid() {
        DetectionProfile::default().validate().unwrap();
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let profile: DetectionProfile =
            serde_json::from_str(r#"{"max_side": 800, "enable_geometry_check": false}"#).unwrap();
        assert_eq!(profile.max_side, 800);
        assert!(!profile.enable_geometry_check);
        assert_eq!(profile.diff_min_threshold, 22);
        assert_eq!(profile.geometry_ring_kernel, 41);
    }

    #[test]
    fn serde_round_trip() {
        let profile = DetectionProfile::default();
        let json = serde_json::to_string(&profile).unwrap();
        let back: DetectionProfile = serde_json::from_str(&json).unwrap();
        assert_eq!(profile, back);
    }

    #[test]
    fn ratio_out_of_range_is_rejected() {
        let profile = DetectionProfile {
            nms_iou_threshold: 1.5,
            ..DetectionProfile::default()
        };
        let err = profile.validate().unwrap_err();
        assert!(err.to_string().contains("nms_iou_threshold"), "{err}");
    }

    #[test]
    fn inverted_canny_is_rejected() {
        let profile = DetectionProfile {
            segment_canny_low: 200.0,
            ..DetectionProfile::default()
        };
        assert!(matches!(
            profile.validate(),
            Err(PipelineError::InvalidConfig(_))
        ));
    }

    #[test]
    fn oversized_kernel_is_rejected() {
        let profile = DetectionProfile {
            geometry_ring_kernel: 1001,
            ..DetectionProfile::default()
        };
        assert!(profile.validate().is_err());
    }

    #[test]
    fn nan_ratio_is_rejected() {
        let profile = DetectionProfile {
            min_fill_ratio: f64::NAN,
            ..DetectionProfile::default()
        };
        assert!(profile.validate().is_err());
    }
}
