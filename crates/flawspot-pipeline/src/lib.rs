//! flawspot-pipeline: Pure defect-detection pipeline (sans-IO).
//!
//! Finds visible defects on photographed industrial parts, either in a
//! single photo (high-contrast regions inside the part) or by comparing
//! a photo against a reference photo of the same part:
//!
//! decode -> quality gate -> resize -> segment -> align -> diff ->
//! structural / geometry / plain-diff evidence -> candidates.
//!
//! This crate has **no I/O dependencies**. It operates on in-memory
//! byte slices and returns structured data; storage and messaging live
//! in `flawspot-service`.

pub mod align;
pub mod blur;
pub mod candidates;
pub mod contour;
pub mod decision;
pub mod decode;
pub mod diagnostics;
pub mod diff;
pub mod downsample;
pub mod edge;
pub mod geometry;
pub mod highlight;
pub mod mask;
pub mod polygon;
pub mod profile;
pub mod quality;
pub mod segment;
pub mod structural;
pub mod types;

#[cfg(test)]
mod test_support;

use image::{GrayImage, RgbImage};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::align::align;
use crate::decision::Route;
use crate::decode::{decode, grayscale};
use crate::diagnostics::{InspectionSummary, Recorder, StageMetrics};
use crate::geometry::GeometryMismatch;
use crate::mask::Mask;
use crate::segment::{interior, segment};
use crate::structural::StructuralOutcome;

pub use diagnostics::PipelineDiagnostics;
pub use highlight::highlight;
pub use profile::DetectionProfile;
pub use types::{
    BoundingBox, DefectCandidate, Dimensions, ErrorKind, InspectionResult, PipelineError,
    QualityFailure,
};

/// An inspection result together with the diagnostics of the run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Inspection {
    pub result: InspectionResult,
    pub diagnostics: PipelineDiagnostics,
}

/// Inspect a single photo for generic high-contrast defects.
///
/// # Pipeline steps
///
/// 1. Decode and run the quality gate on the full-size photo
/// 2. Shrink so the longest side is at most `max_side`
/// 3. Segment the part and erode it to its interior
/// 4. Canny edges restricted to the interior
/// 5. Candidate extraction (reason tag `edge_contour`)
///
/// # Errors
///
/// Returns [`PipelineError::InvalidConfig`] for an invalid profile, a
/// decode error for unreadable input and [`PipelineError::QualityGate`]
/// when the photo is unsuitable.
pub fn inspect(
    image_bytes: &[u8],
    profile: &DetectionProfile,
) -> Result<InspectionResult, PipelineError> {
    inspect_with_diagnostics(image_bytes, profile).map(|i| i.result)
}

/// [`inspect`], also returning per-stage diagnostics.
///
/// # Errors
///
/// Same as [`inspect`].
pub fn inspect_with_diagnostics(
    image_bytes: &[u8],
    profile: &DetectionProfile,
) -> Result<Inspection, PipelineError> {
    profile.validate()?;
    let mut rec = Recorder::new();

    let image = decode_and_gate(
        &mut rec,
        image_bytes,
        "image",
        profile.max_glare_ratio,
        profile,
    )?;
    let (image, _) = rec.run(
        "resize",
        || downsample::limit_side(image, profile.max_side),
        |(img, resized)| resize_metrics(img, *resized),
    );
    let dims = Dimensions::of(&image);
    let gray = grayscale(&image);
    drop(image);

    let part = rec.run("segment", || segment(&gray, profile), segment_metrics);
    let roi = interior(&part, profile.roi_margin_kernel);

    let edges = rec.try_run(
        "edges",
        || {
            let blurred = blur::gaussian_blur(&gray, profile.blur_sigma);
            edge::canny(
                &blurred,
                profile.inspect_canny_low,
                profile.inspect_canny_high,
            )
            .and(&roi)
        },
        |edges| StageMetrics::Edges {
            low_threshold: profile.inspect_canny_low,
            high_threshold: profile.inspect_canny_high,
            edge_pixels: edges.count(),
        },
    )?;

    let defects = rec.run(
        "candidates",
        || candidates::extract(&edges, "edge_contour", profile),
        |d| StageMetrics::Candidates {
            route: None,
            count: d.len(),
        },
    );

    let result = InspectionResult::new(dims, defects);
    log_defects("inspect", &result);
    let diagnostics = rec.finish(InspectionSummary {
        image_width: dims.width,
        image_height: dims.height,
        route: None,
        defect_count: result.defects.len(),
    });
    Ok(Inspection {
        result,
        diagnostics,
    })
}

/// Compare a current photo of a part against its base photo.
///
/// # Pipeline steps
///
/// 1. Decode and gate both photos (with the looser comparison glare
///    limit)
/// 2. Resize both to their common minimum dimensions
/// 3. Segment both parts
/// 4. Register current onto base when enabled; a failed or low-scoring
///    registration falls back to the unaligned photo
/// 5. Difference inside the interior of both parts
/// 6. Pick the evidence source: structural, then geometry, then the
///    plain difference
/// 7. Candidate extraction from the chosen evidence
///
/// # Errors
///
/// Returns [`PipelineError::InvalidConfig`] for an invalid profile, a
/// decode error for unreadable input and [`PipelineError::QualityGate`]
/// naming the photo that is unsuitable. Alignment failures never
/// surface.
pub fn inspect_diff(
    base_bytes: &[u8],
    current_bytes: &[u8],
    profile: &DetectionProfile,
) -> Result<InspectionResult, PipelineError> {
    inspect_diff_with_diagnostics(base_bytes, current_bytes, profile).map(|i| i.result)
}

/// [`inspect_diff`], also returning per-stage diagnostics.
///
/// # Errors
///
/// Same as [`inspect_diff`].
pub fn inspect_diff_with_diagnostics(
    base_bytes: &[u8],
    current_bytes: &[u8],
    profile: &DetectionProfile,
) -> Result<Inspection, PipelineError> {
    profile.validate()?;
    let mut rec = Recorder::new();

    let base = decode_and_gate(
        &mut rec,
        base_bytes,
        "base image",
        profile.diff_max_glare_ratio,
        profile,
    )?;
    let current = decode_and_gate(
        &mut rec,
        current_bytes,
        "current image",
        profile.diff_max_glare_ratio,
        profile,
    )?;

    let dims = Dimensions::of(&base).min(Dimensions::of(&current));
    let resized = Dimensions::of(&base) != dims || Dimensions::of(&current) != dims;
    let (base_gray, current_gray) = rec.run(
        "resize",
        || {
            let (base, _) = downsample::resize_to(base, dims);
            let (current, _) = downsample::resize_to(current, dims);
            (grayscale(&base), grayscale(&current))
        },
        |_| StageMetrics::Resize {
            width: dims.width,
            height: dims.height,
            resized,
        },
    );

    let base_mask = rec.run(
        "segment (base image)",
        || segment(&base_gray, profile),
        segment_metrics,
    );
    let current_mask = rec.run(
        "segment (current image)",
        || segment(&current_gray, profile),
        segment_metrics,
    );

    let registered = rec.try_run(
        "align",
        || register(&base_gray, current_gray, &base_mask, current_mask, profile),
        |r| StageMetrics::Alignment {
            coarse_score: r.coarse_score,
            refined_score: r.refined_score,
            used: r.used,
        },
    )?;
    let (current_gray, current_mask) = (registered.image, registered.mask);

    let roi = interior(&base_mask.and(&current_mask)?, profile.roi_margin_kernel);
    let changed = rec.try_run(
        "diff",
        || diff::diff(&base_gray, &current_gray, &roi, profile),
        |d| StageMetrics::Diff {
            otsu_threshold: d.threshold.otsu,
            used_threshold: d.threshold.used,
            changed_pixels: d.mask.count(),
        },
    )?;

    let structural = rec.try_run(
        "structural",
        || structural::detect(&base_mask, &current_mask, profile),
        |s| StageMetrics::Structural {
            triggered: s.triggered,
            signals: s.signals,
        },
    )?;

    let mut mismatch = None;
    let route = decision::route::<PipelineError>(|candidate| match candidate {
        Route::Structural => Ok(structural.triggered),
        Route::Geometry => {
            if !profile.enable_geometry_check {
                return Ok(false);
            }
            mismatch = rec.try_run(
                "geometry",
                || geometry::detect(&base_mask, &current_mask, profile),
                |g| StageMetrics::Geometry {
                    rule: g.as_ref().map(|m| m.rule),
                    shape_score: g.as_ref().map(|m| m.shape_score),
                },
            )?;
            Ok(mismatch.is_some())
        }
        Route::PlainDiff => Ok(true),
    })?;
    debug!(%route, "evidence source chosen");

    let defects = rec.try_run(
        "candidates",
        || match (route, mismatch) {
            (Route::Structural, _) => Ok(structural_defects(&changed.mask, &structural, profile)),
            (Route::Geometry, Some(hit)) => geometry_defects(hit, &roi, profile),
            _ => Ok(candidates::extract(&changed.mask, "diff_contour", profile)),
        },
        |d| StageMetrics::Candidates {
            route: Some(route),
            count: d.len(),
        },
    )?;

    let result = InspectionResult::new(dims, defects);
    log_defects(route.as_str(), &result);
    let diagnostics = rec.finish(InspectionSummary {
        image_width: dims.width,
        image_height: dims.height,
        route: Some(route),
        defect_count: result.defects.len(),
    });
    Ok(Inspection {
        result,
        diagnostics,
    })
}

/// Decode a photo and run the quality gate on it at full size.
fn decode_and_gate(
    rec: &mut Recorder,
    bytes: &[u8],
    label: &'static str,
    glare_limit: f64,
    profile: &DetectionProfile,
) -> Result<RgbImage, PipelineError> {
    let image = rec.try_run(
        format!("decode ({label})"),
        || decode(bytes),
        |img| StageMetrics::Decode {
            input_bytes: bytes.len(),
            width: img.width(),
            height: img.height(),
        },
    )?;
    rec.try_run(
        format!("quality ({label})"),
        || {
            let part = segment(&grayscale(&image), profile);
            quality::check(&image, &part, glare_limit, label, profile)
        },
        |report| StageMetrics::Quality(*report),
    )?;
    Ok(image)
}

/// Current photo in the frame it is compared in.
struct Registered {
    image: GrayImage,
    mask: Mask,
    coarse_score: Option<f64>,
    refined_score: Option<f64>,
    /// Whether `image` is the aligned photo.
    used: bool,
}

/// Align the current photo when enabled and good enough, otherwise hand
/// it back unaligned.
fn register(
    base_gray: &GrayImage,
    current_gray: GrayImage,
    base_mask: &Mask,
    current_mask: Mask,
    profile: &DetectionProfile,
) -> Result<Registered, PipelineError> {
    let unaligned = |image, mask, coarse_score, refined_score| Registered {
        image,
        mask,
        coarse_score,
        refined_score,
        used: false,
    };
    if !profile.enable_registration {
        return Ok(unaligned(current_gray, current_mask, None, None));
    }

    match align(base_gray, &current_gray, base_mask, &current_mask, profile) {
        Ok(a) if a.score >= profile.min_alignment_score => {
            debug!(
                score = a.score,
                coarse = a.coarse_score,
                refined = a.refined_score,
                ecc_won = a.refined,
                "aligned current image"
            );
            Ok(Registered {
                image: a.image,
                mask: a.mask,
                coarse_score: Some(a.coarse_score),
                refined_score: a.refined_score,
                used: true,
            })
        }
        Ok(a) => {
            warn!(
                score = a.score,
                min = profile.min_alignment_score,
                "alignment score below minimum, comparing unaligned"
            );
            Ok(unaligned(
                current_gray,
                current_mask,
                Some(a.coarse_score),
                a.refined_score,
            ))
        }
        Err(PipelineError::Alignment(failure)) => {
            warn!(%failure, "alignment failed, comparing unaligned");
            Ok(unaligned(current_gray, current_mask, None, None))
        }
        Err(err) => Err(err),
    }
}

/// Diff candidates confirmed by the structural evidence, falling back to
/// the evidence itself when none survive.
fn structural_defects(
    changed: &Mask,
    outcome: &StructuralOutcome,
    profile: &DetectionProfile,
) -> Vec<DefectCandidate> {
    let raw = candidates::extract(changed, "diff_contour", profile);
    let before = raw.len();
    let overlapping =
        structural::filter_by_overlap(raw, &outcome.mask, profile.broken_min_overlap_ratio);
    let after_overlap = overlapping.len();
    let merged = structural::merge_nearby(overlapping, profile.broken_merge_distance);
    let after_merge = merged.len();
    let dominant = structural::keep_dominant(merged, profile.broken_dominant_min_ratio);
    debug!(
        before,
        after_overlap,
        after_merge,
        after_dominant = dominant.len(),
        extent = ?structural::extent(&dominant),
        "broken-part filtering"
    );
    if !dominant.is_empty() {
        return dominant;
    }

    let fallback = candidates::extract(&outcome.mask, "broken_structural_mask", profile);
    debug!(count = fallback.len(), "broken-part fallback to structural mask");
    let merged = structural::merge_nearby(fallback, profile.broken_merge_distance);
    structural::keep_dominant(merged, profile.broken_dominant_min_ratio)
}

/// A single candidate spanning the geometry evidence, preferring the part
/// interior when it holds any of it.
#[allow(clippy::cast_precision_loss)]
fn geometry_defects(
    hit: GeometryMismatch,
    roi: &Mask,
    profile: &DetectionProfile,
) -> Result<Vec<DefectCandidate>, PipelineError> {
    let inner = hit.mask.and(roi)?;
    let evidence = if inner.is_clear() { &hit.mask } else { &inner };
    let min_area = hit.mask.dimensions().area() as f64 * profile.min_contour_area_ratio;
    let reason = candidates::append_reason(&hit.reason, "geometry_mask_union");
    Ok(candidates::union_rect_candidate(evidence, min_area, reason)
        .into_iter()
        .collect())
}

fn resize_metrics(image: &RgbImage, resized: bool) -> StageMetrics {
    StageMetrics::Resize {
        width: image.width(),
        height: image.height(),
        resized,
    }
}

fn segment_metrics(mask: &Mask) -> StageMetrics {
    StageMetrics::Segment {
        part_pixels: mask.count(),
        coverage: mask.coverage(),
    }
}

fn log_defects(stage: &str, result: &InspectionResult) {
    info!(stage, count = result.defects.len(), "inspection finished");
    for defect in &result.defects {
        debug!(
            stage,
            bbox = ?defect.bbox(),
            area = defect.area,
            reason = %defect.reason,
            "defect"
        );
    }
}
