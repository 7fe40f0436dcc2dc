//! Defect candidates from binary evidence masks.
//!
//! Each outer region of a mask becomes a candidate box unless one of the
//! heuristics rejects it (tiny box, tiny true area, extreme aspect,
//! sparse outline). Survivors go through greedy largest-first non-max
//! suppression. The `reason` of each candidate records the stage tag and
//! the metrics that let it pass; it is part of the output, not a log.

use tracing::debug;

use crate::contour::{external_regions, significant_regions};
use crate::mask::Mask;
use crate::profile::DetectionProfile;
use crate::types::{BoundingBox, DefectCandidate};

/// Filtered, deduplicated candidates for every region of `mask`.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn extract(mask: &Mask, tag: &str, profile: &DetectionProfile) -> Vec<DefectCandidate> {
    let image_area = mask.dimensions().area() as f64;
    let min_rect_area = image_area * profile.min_area_ratio;
    let min_contour_area = image_area * profile.min_contour_area_ratio;

    let regions = external_regions(mask);
    let mut dropped = Drops::default();
    let mut kept = Vec::new();
    for region in &regions {
        let rect_area = region.bbox.area() as f64;
        if rect_area <= 0.0 || rect_area < min_rect_area {
            dropped.rect_area += 1;
            continue;
        }
        if region.area < min_contour_area {
            dropped.contour_area += 1;
            continue;
        }
        let aspect = f64::from(region.bbox.width) / f64::from(region.bbox.height);
        if aspect < profile.min_aspect_ratio || aspect > profile.max_aspect_ratio {
            dropped.aspect += 1;
            continue;
        }
        let fill = region.area / rect_area;
        if fill < profile.min_fill_ratio {
            dropped.fill += 1;
            continue;
        }
        kept.push(DefectCandidate::new(
            region.bbox,
            format!(
                "{tag} contour_area={:.1} fill={fill:.3} aspect={aspect:.3}",
                region.area
            ),
        ));
    }

    debug!(
        tag,
        contours = regions.len(),
        kept = kept.len(),
        drop_rect_area = dropped.rect_area,
        drop_contour_area = dropped.contour_area,
        drop_aspect = dropped.aspect,
        drop_fill = dropped.fill,
        "candidate filter pass"
    );
    suppress_duplicates(kept, profile)
}

#[derive(Debug, Default)]
struct Drops {
    rect_area: usize,
    contour_area: usize,
    aspect: usize,
    fill: usize,
}

/// Greedy non-max suppression, largest box first.
///
/// A candidate is dropped when its IoU with an already kept candidate
/// reaches the IoU threshold, or when the smaller of the two is covered
/// by at least the containment ratio.
#[must_use]
pub fn suppress_duplicates(
    mut candidates: Vec<DefectCandidate>,
    profile: &DetectionProfile,
) -> Vec<DefectCandidate> {
    candidates.sort_by(|a, b| b.area.cmp(&a.area));
    let mut kept: Vec<DefectCandidate> = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        let bbox = candidate.bbox();
        let duplicate = kept.iter().any(|k| {
            bbox.iou(k.bbox()) >= profile.nms_iou_threshold
                || bbox.containment(k.bbox()) >= profile.nms_containment_ratio
        });
        if !duplicate {
            kept.push(candidate);
        }
    }
    kept
}

/// One candidate covering every region of `mask` with at least
/// `min_area` true area.
#[must_use]
pub fn union_rect_candidate(
    mask: &Mask,
    min_area: f64,
    reason: impl Into<String>,
) -> Option<DefectCandidate> {
    let (regions, _) = significant_regions(mask, min_area);
    let bbox = regions
        .iter()
        .map(|r| r.bbox)
        .reduce(BoundingBox::union)?;
    (!bbox.is_empty()).then(|| DefectCandidate::new(bbox, reason))
}

/// `reason; extra`, or just `extra` when `reason` is empty.
#[must_use]
pub fn append_reason(reason: &str, extra: &str) -> String {
    if reason.is_empty() {
        extra.to_owned()
    } else {
        format!("{reason}; {extra}")
    }
}

/// Reasons of two merged candidates, `a | b`. Identical reasons are kept
/// once.
#[must_use]
pub fn combine_reasons(a: &str, b: &str) -> String {
    match (a.is_empty(), b.is_empty()) {
        (true, _) => b.to_owned(),
        (_, true) => a.to_owned(),
        _ if a == b => a.to_owned(),
        _ => format!("{a} | {b}"),
    }
}
