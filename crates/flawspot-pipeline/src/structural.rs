//! Broken-part detection from part-mask topology.
//!
//! A part is considered broken when material detached (the base mask has
//! one significant component, the current mask two or more) or when
//! material went missing (the current mask lost a configured fraction of
//! the base area). Evidence is the cleaned symmetric difference of the
//! two masks. For a split, the evidence is focused on the neighbourhood of
//! the detached pieces so unrelated changes elsewhere do not leak in.
//!
//! The second half of this module holds the filters applied to diff
//! candidates once the structural branch has fired.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::candidates::{append_reason, combine_reasons};
use crate::contour::{Region, significant_regions};
use crate::diff::clean;
use crate::mask::Mask;
use crate::profile::DetectionProfile;
use crate::types::{BoundingBox, DefectCandidate, PipelineError};

/// Result of comparing two part masks.
#[derive(Debug, Clone, PartialEq)]
pub struct StructuralOutcome {
    pub triggered: bool,
    /// Structural evidence. Clear when not triggered.
    pub mask: Mask,
    pub signals: StructuralSignals,
}

/// Measurements behind the trigger decision.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StructuralSignals {
    pub base_components: usize,
    pub current_components: usize,
    /// Components were only separable after eroding the current mask.
    pub split_by_erosion: bool,
    pub component_split: bool,
    /// `(base_area - current_area) / base_area` over significant
    /// components.
    pub area_loss: f64,
    pub material_loss: bool,
}

/// Compare the base and current part masks.
///
/// # Errors
///
/// Returns [`PipelineError::DimensionMismatch`] if the masks differ in
/// size.
#[allow(clippy::cast_precision_loss)]
pub fn detect(
    base: &Mask,
    current: &Mask,
    profile: &DetectionProfile,
) -> Result<StructuralOutcome, PipelineError> {
    let dims = base.dimensions();
    let min_component = dims.area() as f64 * profile.broken_min_component_ratio;

    let (base_parts, base_total) = significant_regions(base, min_component);
    let (current_parts, current_total) = significant_regions(current, min_component);

    let mut pieces = current_parts;
    let mut split_by_erosion = false;
    if pieces.len() < 2 {
        let eroded = eroded_pieces(current, min_component, profile);
        if eroded.len() >= 2 {
            pieces = eroded;
            split_by_erosion = true;
        }
    }

    let component_split = base_parts.len() <= 1 && is_split(&pieces, profile);
    let area_loss = if base_total > 0.0 {
        (base_total - current_total) / base_total
    } else {
        0.0
    };
    let material_loss = area_loss >= profile.broken_area_loss_ratio;
    let signals = StructuralSignals {
        base_components: base_parts.len(),
        current_components: pieces.len(),
        split_by_erosion,
        component_split,
        area_loss,
        material_loss,
    };
    debug!(?signals, "structural signals");

    if !component_split && !material_loss {
        return Ok(StructuralOutcome {
            triggered: false,
            mask: Mask::new(dims.width, dims.height),
            signals,
        });
    }

    let evidence = clean(&base.xor(current)?, profile);
    if !component_split {
        return Ok(StructuralOutcome {
            triggered: true,
            mask: evidence,
            signals,
        });
    }

    let mut focused = evidence.and(&focus_region(&pieces[1..], dims, profile))?;
    if focused.is_clear() && !split_by_erosion {
        // Re-attempt with components forced apart by erosion.
        let eroded = eroded_pieces(current, min_component, profile);
        if is_split(&eroded, profile) {
            focused = evidence.and(&focus_region(&eroded[1..], dims, profile))?;
        }
    }
    if focused.is_clear() {
        debug!("split focus region holds no evidence");
    }

    Ok(StructuralOutcome {
        triggered: true,
        mask: focused,
        signals,
    })
}

/// Significant components of the current mask after the split erosion.
fn eroded_pieces(current: &Mask, min_component: f64, profile: &DetectionProfile) -> Vec<Region> {
    let eroded = current.erode(profile.broken_split_kernel);
    significant_regions(&eroded, min_component * profile.broken_split_area_factor).0
}

/// At least two pieces, the second large enough relative to the first.
/// `pieces` is sorted largest first.
fn is_split(pieces: &[Region], profile: &DetectionProfile) -> bool {
    match pieces {
        [first, second, ..] if first.area > 0.0 => {
            second.area / first.area >= profile.broken_second_rel_min
        }
        _ => false,
    }
}

fn focus_region(
    pieces: &[Region],
    dims: crate::types::Dimensions,
    profile: &DetectionProfile,
) -> Mask {
    let mut focus = Mask::new(dims.width, dims.height);
    for piece in pieces {
        focus.fill_rect(piece.bbox.expand(profile.broken_focus_expand, dims));
    }
    focus
}

/// Keep candidates whose box is covered by structural evidence to at
/// least `min_ratio`.
///
/// An empty evidence mask leaves the list unchanged.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn filter_by_overlap(
    candidates: Vec<DefectCandidate>,
    evidence: &Mask,
    min_ratio: f64,
) -> Vec<DefectCandidate> {
    if evidence.is_clear() {
        return candidates;
    }
    let dims = evidence.dimensions();
    candidates
        .into_iter()
        .filter_map(|mut c| {
            let rect = c.bbox().clip(dims);
            if rect.is_empty() {
                return None;
            }
            let ratio = evidence.count_in_rect(rect) as f64 / rect.area() as f64;
            if ratio < min_ratio {
                debug!(bbox = ?c.bbox(), ratio, "candidate outside structural evidence");
                return None;
            }
            c.reason = append_reason(&c.reason, &format!("broken_overlap={ratio:.3}"));
            Some(c)
        })
        .collect()
}

/// Merge candidates that overlap or lie within `distance` pixels of each
/// other on both axes, until no such pair remains.
#[must_use]
pub fn merge_nearby(mut candidates: Vec<DefectCandidate>, distance: u32) -> Vec<DefectCandidate> {
    loop {
        let before = candidates.len();
        let mut merged: Vec<DefectCandidate> = Vec::with_capacity(before);
        for candidate in candidates {
            let bbox = candidate.bbox();
            let near = merged.iter_mut().find(|m| {
                let (dx, dy) = m.bbox().gap(bbox);
                m.bbox().intersection_area(bbox) > 0 || (dx <= distance && dy <= distance)
            });
            match near {
                Some(m) => {
                    let reason = combine_reasons(&m.reason, &candidate.reason);
                    *m = DefectCandidate::new(m.bbox().union(bbox), reason);
                }
                None => merged.push(candidate),
            }
        }
        candidates = merged;
        if candidates.len() == before {
            return candidates;
        }
    }
}

/// Keep candidates whose area is at least `min_ratio` of the largest.
///
/// Lists with fewer than two entries, and a non-positive ratio, pass
/// through. The result is never empty for a non-empty input.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn keep_dominant(candidates: Vec<DefectCandidate>, min_ratio: f64) -> Vec<DefectCandidate> {
    if candidates.len() < 2 || min_ratio <= 0.0 {
        return candidates;
    }
    let min_ratio = min_ratio.min(1.0);
    let largest = candidates.iter().map(|c| c.area).max().unwrap_or(0);
    if largest == 0 {
        return candidates;
    }
    let dominant: Vec<DefectCandidate> = candidates
        .iter()
        .filter_map(|c| {
            let ratio = c.area as f64 / largest as f64;
            (ratio >= min_ratio).then(|| {
                let mut c = c.clone();
                c.reason = append_reason(&c.reason, &format!("broken_dominant={ratio:.3}"));
                c
            })
        })
        .collect();
    if dominant.is_empty() {
        candidates
    } else {
        dominant
    }
}

/// Union of all candidate boxes, for logging.
#[must_use]
pub fn extent(candidates: &[DefectCandidate]) -> Option<BoundingBox> {
    candidates
        .iter()
        .map(DefectCandidate::bbox)
        .reduce(BoundingBox::union)
}
