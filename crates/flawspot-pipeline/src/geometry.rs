//! Geometry mismatch: did the outline of the part change shape class?
//!
//! Each part mask is reduced to its largest outline and summarized by a
//! [`ShapeDescriptor`]. The descriptors of base and current are compared
//! by a fixed list of rules ([`MismatchRule`]). When one fires, the
//! evidence is the changed area between the two masks, kept to a band
//! along the part outline where profile damage shows up.
//!
//! [`classify`] and [`mismatch_rule`] are pure functions of the measured
//! numbers so they can be exercised without any image.

use std::f64::consts::PI;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::contour::{Region, largest_region};
use crate::diff::clean;
use crate::mask::Mask;
use crate::polygon;
use crate::profile::DetectionProfile;
use crate::types::PipelineError;

/// Polygon approximation tolerance for concavity analysis, as a
/// fraction of the perimeter.
const CONCAVITY_TOLERANCE: f64 = 0.006;

/// Polygon approximation tolerance for vertex counting.
const VERTEX_TOLERANCE: f64 = 0.015;

/// Concavities shallower than this (pixels) are outline noise.
const MIN_DEFECT_DEPTH: f64 = 1.0;

/// Polygons with more vertices than this are not treated as polygons.
const MAX_POLYGON_VERTICES: u32 = 12;

/// Coarse outline class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShapeFamily {
    Unknown,
    Round,
    Polygon,
    Toothed,
}

impl ShapeFamily {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Round => "round",
            Self::Polygon => "polygon",
            Self::Toothed => "toothed",
        }
    }
}

impl fmt::Display for ShapeFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Measurements of one part outline.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ShapeDescriptor {
    /// Convexity defects of the fine polygon approximation.
    pub concavity: u32,
    /// Vertices of the coarse polygon approximation.
    pub vertices: u32,
    /// `4π·area / perimeter²`; 1 for a circle.
    pub circularity: f64,
    /// Outline area over bounding-box area.
    pub extent: f64,
    pub family: ShapeFamily,
}

/// Shape family from the four measured descriptors.
#[must_use]
pub fn classify(
    concavity: u32,
    vertices: u32,
    circularity: f64,
    extent: f64,
    profile: &DetectionProfile,
) -> ShapeFamily {
    if concavity >= profile.geometry_min_concavity {
        ShapeFamily::Toothed
    } else if circularity >= profile.geometry_round_min_circularity {
        ShapeFamily::Round
    } else if (3..=MAX_POLYGON_VERTICES).contains(&vertices)
        && circularity >= profile.geometry_polygon_min_circularity
        && extent >= profile.geometry_polygon_min_extent
    {
        ShapeFamily::Polygon
    } else {
        ShapeFamily::Unknown
    }
}

/// Measure an outline. Outlines with fewer than five points carry no
/// usable shape.
#[must_use]
pub fn describe(region: &Region, profile: &DetectionProfile) -> Option<ShapeDescriptor> {
    let outline = &region.outline;
    if outline.len() < 5 {
        return None;
    }
    let perimeter = polygon::perimeter(outline);

    let concavity = if outline.len() >= 8 {
        let fine = polygon::simplify_closed(outline, CONCAVITY_TOLERANCE * perimeter);
        if fine.len() >= 8 {
            polygon::convexity_defects(&fine, MIN_DEFECT_DEPTH)
        } else {
            0
        }
    } else {
        0
    };

    let coarse = polygon::simplify_closed(outline, VERTEX_TOLERANCE * perimeter);
    let vertices = if coarse.len() < 3 {
        outline.len()
    } else {
        coarse.len()
    };

    let circularity = if perimeter > 0.0 {
        4.0 * PI * region.area / (perimeter * perimeter)
    } else {
        0.0
    };
    let extent = region.fill_ratio();

    let concavity = u32::try_from(concavity).unwrap_or(u32::MAX);
    let vertices = u32::try_from(vertices).unwrap_or(u32::MAX);
    Some(ShapeDescriptor {
        concavity,
        vertices,
        circularity,
        extent,
        family: classify(concavity, vertices, circularity, extent, profile),
    })
}

/// The rule that decided a mismatch, in evaluation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MismatchRule {
    /// Both toothed, tooth counts differ by the concavity gap.
    ToothCount,
    /// Both polygons, vertex counts differ by the vertex gap.
    PolygonVertices,
    /// Both round, circularity differs by the round gap.
    RoundProfile,
    /// Both toothed, small tooth-count change corroborated by the
    /// shape-match score.
    ToothedShape,
    /// Different known families.
    ShapeFamily,
}

impl MismatchRule {
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::ToothCount => "tooth_count",
            Self::PolygonVertices => "polygon_vertices",
            Self::RoundProfile => "round_profile",
            Self::ToothedShape => "toothed_shape",
            Self::ShapeFamily => "shape_family",
        }
    }
}

impl fmt::Display for MismatchRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// First rule that declares the two outlines different, if any.
///
/// `shape_score` is the Hu-moment distance between the outlines. It only
/// ever corroborates a tooth-count change; it never fires on its own.
#[must_use]
pub fn mismatch_rule(
    base: &ShapeDescriptor,
    current: &ShapeDescriptor,
    shape_score: f64,
    profile: &DetectionProfile,
) -> Option<MismatchRule> {
    use ShapeFamily::{Polygon, Round, Toothed, Unknown};

    let tooth_gap = base.concavity.abs_diff(current.concavity);
    let rules = [
        (
            MismatchRule::ToothCount,
            base.family == Toothed
                && current.family == Toothed
                && tooth_gap >= profile.geometry_min_concavity_gap,
        ),
        (
            MismatchRule::PolygonVertices,
            base.family == Polygon
                && current.family == Polygon
                && (1..=MAX_POLYGON_VERTICES).contains(&base.vertices)
                && (1..=MAX_POLYGON_VERTICES).contains(&current.vertices)
                && base.vertices.abs_diff(current.vertices) >= profile.geometry_polygon_vertex_gap,
        ),
        (
            MismatchRule::RoundProfile,
            base.family == Round
                && current.family == Round
                && (base.circularity - current.circularity).abs()
                    >= profile.geometry_round_max_circularity_gap,
        ),
        (
            MismatchRule::ToothedShape,
            base.family == Toothed
                && current.family == Toothed
                && tooth_gap >= 1
                && shape_score > profile.geometry_match_max_score,
        ),
        (
            MismatchRule::ShapeFamily,
            base.family != current.family && base.family != Unknown && current.family != Unknown,
        ),
    ];
    rules.into_iter().find_map(|(rule, fired)| fired.then_some(rule))
}

/// A fired geometry mismatch.
#[derive(Debug, Clone, PartialEq)]
pub struct GeometryMismatch {
    pub rule: MismatchRule,
    pub base: ShapeDescriptor,
    pub current: ShapeDescriptor,
    pub shape_score: f64,
    /// Changed area along the part outline.
    pub mask: Mask,
    /// Rule and every measured value, for the candidate reason.
    pub reason: String,
}

/// Compare the outlines of the two part masks.
///
/// Returns `Ok(None)` when either mask has no usable outline or no rule
/// fires.
///
/// # Errors
///
/// Returns [`PipelineError::DimensionMismatch`] if the masks differ in
/// size.
pub fn detect(
    base: &Mask,
    current: &Mask,
    profile: &DetectionProfile,
) -> Result<Option<GeometryMismatch>, PipelineError> {
    let (Some(base_region), Some(current_region)) = (largest_region(base), largest_region(current))
    else {
        debug!("geometry check skipped, missing outline");
        return Ok(None);
    };
    let (Some(base_shape), Some(current_shape)) = (
        describe(&base_region, profile),
        describe(&current_region, profile),
    ) else {
        debug!("geometry check skipped, degenerate outline");
        return Ok(None);
    };

    let shape_score = polygon::match_shapes(&base_region.outline, &current_region.outline);
    let rule = mismatch_rule(&base_shape, &current_shape, shape_score, profile);
    debug!(
        family_base = %base_shape.family,
        family_current = %current_shape.family,
        shape_score,
        concavity_base = base_shape.concavity,
        concavity_current = current_shape.concavity,
        vertices_base = base_shape.vertices,
        vertices_current = current_shape.vertices,
        circularity_base = base_shape.circularity,
        circularity_current = current_shape.circularity,
        extent_base = base_shape.extent,
        extent_current = current_shape.extent,
        rule = rule.map(MismatchRule::code),
        "geometry compared"
    );
    let Some(rule) = rule else {
        return Ok(None);
    };

    let mask = outline_evidence(base, current, profile)?;
    let reason = format!(
        "geometry_mismatch reason={rule} family_base={} family_current={} shape_score={shape_score:.4} \
         concavity_base={} concavity_current={} vertices_base={} vertices_current={} \
         circularity_base={:.4} circularity_current={:.4} extent_base={:.4} extent_current={:.4}",
        base_shape.family,
        current_shape.family,
        base_shape.concavity,
        current_shape.concavity,
        base_shape.vertices,
        current_shape.vertices,
        base_shape.circularity,
        current_shape.circularity,
        base_shape.extent,
        current_shape.extent,
    );
    info!(%rule, evidence = mask.count(), "geometry mismatch");

    Ok(Some(GeometryMismatch {
        rule,
        base: base_shape,
        current: current_shape,
        shape_score,
        mask,
        reason,
    }))
}

/// Cleaned symmetric difference, kept to the outline band when that
/// leaves anything.
fn outline_evidence(
    base: &Mask,
    current: &Mask,
    profile: &DetectionProfile,
) -> Result<Mask, PipelineError> {
    let changed = clean(&base.xor(current)?, profile);
    let band = ring_mask(&base.or(current)?, profile.geometry_ring_kernel)?;
    let on_outline = changed.and(&band)?;
    Ok(if on_outline.is_clear() {
        changed
    } else {
        on_outline
    })
}

/// Band of `mask` within `kernel / 2` pixels of its outline.
///
/// When erosion removes the whole mask, the band is the mask itself.
///
/// # Errors
///
/// Never fails for a well-formed mask; the error type is shared with
/// the mask algebra.
pub fn ring_mask(mask: &Mask, kernel: u32) -> Result<Mask, PipelineError> {
    let inner = mask.erode(kernel);
    if inner.is_clear() {
        return Ok(mask.clone());
    }
    mask.xor(&inner)
}
