//! Shared types for the flawspot defect-detection pipeline.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Re-export `GrayImage` so downstream crates can reference
/// intermediate raster data without depending on `image` directly.
pub use image::GrayImage;

/// Re-export `RgbImage` so downstream crates can reference the
/// decoded photograph without depending on `image` directly.
pub use image::RgbImage;

/// A 2D point in image coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    /// Horizontal position (pixels from left edge).
    pub x: f64,
    /// Vertical position (pixels from top edge).
    pub y: f64,
}

impl Point {
    /// Create a new point.
    #[must_use]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Squared Euclidean distance to another point.
    #[must_use]
    pub fn distance_squared(self, other: Self) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        dx.mul_add(dx, dy * dy)
    }

    /// Euclidean distance to another point.
    #[must_use]
    pub fn distance(self, other: Self) -> f64 {
        self.distance_squared(other).sqrt()
    }
}

/// Image dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Dimensions {
    /// Create new dimensions.
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Dimensions of any image buffer.
    #[must_use]
    pub fn of<I: image::GenericImageView>(image: &I) -> Self {
        let (width, height) = image.dimensions();
        Self { width, height }
    }

    /// Total pixel count.
    #[must_use]
    pub const fn area(self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// The longer of the two sides.
    #[must_use]
    pub const fn max_side(self) -> u32 {
        if self.width > self.height {
            self.width
        } else {
            self.height
        }
    }

    /// Component-wise minimum of two sizes.
    #[must_use]
    pub fn min(self, other: Self) -> Self {
        Self {
            width: self.width.min(other.width),
            height: self.height.min(other.height),
        }
    }
}

impl fmt::Display for Dimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Axis-aligned rectangle in pixel coordinates.
///
/// Covers columns `x..x + width` and rows `y..y + height`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    #[must_use]
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Rectangle spanning two corners, `right`/`bottom` exclusive.
    #[must_use]
    pub const fn from_corners(x: u32, y: u32, right: u32, bottom: u32) -> Self {
        Self {
            x,
            y,
            width: right.saturating_sub(x),
            height: bottom.saturating_sub(y),
        }
    }

    /// Exclusive right edge.
    #[must_use]
    pub const fn right(self) -> u32 {
        self.x + self.width
    }

    /// Exclusive bottom edge.
    #[must_use]
    pub const fn bottom(self) -> u32 {
        self.y + self.height
    }

    /// Rectangle area, `width * height`.
    #[must_use]
    pub const fn area(self) -> u64 {
        self.width as u64 * self.height as u64
    }

    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Center of the rectangle.
    #[must_use]
    pub fn center(self) -> Point {
        Point::new(
            f64::from(self.x) + f64::from(self.width) / 2.0,
            f64::from(self.y) + f64::from(self.height) / 2.0,
        )
    }

    /// Overlapping rectangle, if any.
    #[must_use]
    pub fn intersection(self, other: Self) -> Option<Self> {
        let x = self.x.max(other.x);
        let y = self.y.max(other.y);
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());
        (right > x && bottom > y).then(|| Self::from_corners(x, y, right, bottom))
    }

    /// Area shared with `other`.
    #[must_use]
    pub fn intersection_area(self, other: Self) -> u64 {
        self.intersection(other).map_or(0, Self::area)
    }

    /// Smallest rectangle containing both.
    #[must_use]
    pub fn union(self, other: Self) -> Self {
        Self::from_corners(
            self.x.min(other.x),
            self.y.min(other.y),
            self.right().max(other.right()),
            self.bottom().max(other.bottom()),
        )
    }

    /// Intersection-over-union of the two rectangles.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn iou(self, other: Self) -> f64 {
        let inter = self.intersection_area(other);
        if inter == 0 {
            return 0.0;
        }
        let union = self.area() + other.area() - inter;
        if union == 0 {
            return 0.0;
        }
        inter as f64 / union as f64
    }

    /// Fraction of the smaller rectangle covered by the other one.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn containment(self, other: Self) -> f64 {
        let inter = self.intersection_area(other);
        let smaller = self.area().min(other.area());
        if inter == 0 || smaller == 0 {
            return 0.0;
        }
        inter as f64 / smaller as f64
    }

    /// Horizontal and vertical gaps between the rectangles (zero when
    /// they overlap on that axis).
    #[must_use]
    pub fn gap(self, other: Self) -> (u32, u32) {
        let dx = self
            .x
            .max(other.x)
            .saturating_sub(self.right().min(other.right()));
        let dy = self
            .y
            .max(other.y)
            .saturating_sub(self.bottom().min(other.bottom()));
        (dx, dy)
    }

    /// Grow by `margin` on every side, clipped to `bounds`.
    #[must_use]
    pub fn expand(self, margin: u32, bounds: Dimensions) -> Self {
        Self::from_corners(
            self.x.saturating_sub(margin),
            self.y.saturating_sub(margin),
            self.right().saturating_add(margin).min(bounds.width),
            self.bottom().saturating_add(margin).min(bounds.height),
        )
    }

    /// Clip to `bounds`.
    #[must_use]
    pub fn clip(self, bounds: Dimensions) -> Self {
        Self::from_corners(
            self.x.min(bounds.width),
            self.y.min(bounds.height),
            self.right().min(bounds.width),
            self.bottom().min(bounds.height),
        )
    }
}

/// One suspected defect region.
///
/// `area` is always the rectangle area `width * height`, never the pixel
/// count of the region that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefectCandidate {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub area: u64,
    /// Originating stage tag plus the metrics that let the region pass.
    pub reason: String,
}

impl DefectCandidate {
    /// Build a candidate from its bounding box.
    #[must_use]
    pub fn new(bbox: BoundingBox, reason: impl Into<String>) -> Self {
        Self {
            x: bbox.x,
            y: bbox.y,
            width: bbox.width,
            height: bbox.height,
            area: bbox.area(),
            reason: reason.into(),
        }
    }

    #[must_use]
    pub const fn bbox(&self) -> BoundingBox {
        BoundingBox::new(self.x, self.y, self.width, self.height)
    }

    /// Center of the bounding box.
    #[must_use]
    pub fn center(&self) -> Point {
        self.bbox().center()
    }
}

/// Outcome of one inspection call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InspectionResult {
    /// Width of the analyzed (resize-adjusted) image.
    pub image_width: u32,
    /// Height of the analyzed (resize-adjusted) image.
    pub image_height: u32,
    pub defects: Vec<DefectCandidate>,
    pub has_defects: bool,
}

impl InspectionResult {
    /// `has_defects` is derived from the list so the two never disagree.
    #[must_use]
    pub fn new(dimensions: Dimensions, defects: Vec<DefectCandidate>) -> Self {
        Self {
            image_width: dimensions.width,
            image_height: dimensions.height,
            has_defects: !defects.is_empty(),
            defects,
        }
    }

    #[must_use]
    pub const fn dimensions(&self) -> Dimensions {
        Dimensions::new(self.image_width, self.image_height)
    }
}

/// Which quality metric rejected a photo.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum QualityFailure {
    #[error("image is too small ({width}x{height}, minimum side is {min_side})")]
    TooSmall {
        width: u32,
        height: u32,
        min_side: u32,
    },

    #[error("part ROI is empty")]
    EmptyRoi,

    #[error("image is blurry (edge_ratio={edge_ratio:.4})")]
    Blurry { edge_ratio: f64 },

    #[error("overexposed image (ratio={ratio:.4})")]
    Overexposed { ratio: f64 },

    #[error("underexposed image (ratio={ratio:.4})")]
    Underexposed { ratio: f64 },

    #[error("too much glare (ratio={ratio:.4})")]
    Glare { ratio: f64 },
}

/// Why registration could not produce a transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AlignmentFailure {
    #[error("base mask is not detected")]
    BaseMaskMissing,

    #[error("current mask is not detected")]
    CurrentMaskMissing,

    #[error("invalid scale")]
    InvalidScale,

    #[error("no overlap after transform")]
    NoOverlap,
}

/// Errors that can occur during pipeline processing.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// The input image bytes were empty.
    #[error("input image data is empty")]
    EmptyInput,

    /// Failed to decode the input image.
    #[error("failed to decode image: {0}")]
    ImageDecode(#[from] image::ImageError),

    /// Failed to re-encode the highlighted image.
    #[error("failed to encode image: {0}")]
    ImageEncode(#[source] image::ImageError),

    /// The photo is valid but unsuitable for analysis.
    #[error("quality gate failed for {label}: {failure}")]
    QualityGate {
        label: &'static str,
        failure: QualityFailure,
    },

    /// Registration could not establish a usable transform.
    #[error("alignment failed: {0}")]
    Alignment(#[from] AlignmentFailure),

    /// A required collaborator is missing.
    #[error("{0} is not configured")]
    NotConfigured(String),

    /// Detection profile is invalid.
    #[error("invalid detection profile: {0}")]
    InvalidConfig(String),

    /// Two buffers that must match in size do not.
    #[error("buffer dimensions differ: expected {expected}, got {actual}")]
    DimensionMismatch {
        expected: Dimensions,
        actual: Dimensions,
    },
}

impl PipelineError {
    /// Coarse classification for callers that must not look deeper.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::EmptyInput | Self::ImageDecode(_) | Self::ImageEncode(_) => ErrorKind::Decode,
            Self::QualityGate { .. } => ErrorKind::QualityGate,
            Self::Alignment(_) => ErrorKind::Alignment,
            Self::NotConfigured(_) | Self::InvalidConfig(_) => ErrorKind::Configuration,
            Self::DimensionMismatch { .. } => ErrorKind::Precondition,
        }
    }
}

/// Coarse error classes exposed across the collaborator boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed or empty input; needs a new photo.
    Decode,
    /// Valid image unsuitable for analysis; retake requested.
    QualityGate,
    /// Registration failed.
    Alignment,
    /// Missing collaborator or invalid profile.
    Configuration,
    /// Caller passed mismatched buffers.
    Precondition,
}

impl ErrorKind {
    /// Whether resubmitting a better photo can fix the failure.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::QualityGate | Self::Alignment)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Decode => "decode",
            Self::QualityGate => "quality_gate",
            Self::Alignment => "alignment",
            Self::Configuration => "configuration",
            Self::Precondition => "precondition",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iou_of_identical_boxes_is_one() {
        let b = BoundingBox::new(10, 10, 20, 30);
        approx::assert_relative_eq!(b.iou(b), 1.0);
    }

    #[test]
    fn disjoint_boxes_have_zero_overlap() {
        let a = BoundingBox::new(0, 0, 10, 10);
        let b = BoundingBox::new(20, 0, 10, 10);
        assert_eq!(a.intersection(b), None);
        approx::assert_relative_eq!(a.iou(b), 0.0);
        assert_eq!(a.gap(b), (10, 0));
    }

    #[test]
    fn containment_uses_smaller_box() {
        let outer = BoundingBox::new(0, 0, 100, 100);
        let inner = BoundingBox::new(10, 10, 10, 10);
        approx::assert_relative_eq!(outer.containment(inner), 1.0);
        approx::assert_relative_eq!(inner.containment(outer), 1.0);
        assert!(outer.iou(inner) < 0.02);
    }

    #[test]
    fn expand_clips_to_bounds() {
        let b = BoundingBox::new(5, 5, 10, 10).expand(20, Dimensions::new(30, 18));
        assert_eq!(b, BoundingBox::new(0, 0, 30, 18));
    }

    #[test]
    fn union_covers_both() {
        let a = BoundingBox::new(0, 0, 10, 10);
        let b = BoundingBox::new(30, 40, 5, 5);
        assert_eq!(a.union(b), BoundingBox::new(0, 0, 35, 45));
    }

    #[test]
    fn candidate_area_is_rectangle_area() {
        let c = DefectCandidate::new(BoundingBox::new(3, 4, 7, 9), "diff_contour");
        assert_eq!(c.area, 63);
        assert_eq!(c.center(), Point::new(6.5, 8.5));
    }

    #[test]
    fn result_flags_defects() {
        let empty = InspectionResult::new(Dimensions::new(4, 3), Vec::new());
        assert!(!empty.has_defects);
        let one = InspectionResult::new(
            Dimensions::new(4, 3),
            vec![DefectCandidate::new(BoundingBox::new(0, 0, 1, 1), "x")],
        );
        assert!(one.has_defects);
        assert_eq!(one.dimensions(), Dimensions::new(4, 3));
    }

    #[test]
    fn error_kinds_are_coarse() {
        assert_eq!(PipelineError::EmptyInput.kind(), ErrorKind::Decode);
        let gate = PipelineError::QualityGate {
            label: "image",
            failure: QualityFailure::Underexposed { ratio: 1.0 },
        };
        assert_eq!(gate.kind(), ErrorKind::QualityGate);
        assert_eq!(
            gate.to_string(),
            "quality gate failed for image: underexposed image (ratio=1.0000)"
        );
        assert_eq!(
            PipelineError::from(AlignmentFailure::NoOverlap).kind(),
            ErrorKind::Alignment
        );
        assert_eq!(
            PipelineError::NotConfigured("detector".into()).kind(),
            ErrorKind::Configuration
        );
    }
}
