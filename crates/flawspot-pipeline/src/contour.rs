//! Outer-contour extraction from binary masks.
//!
//! Every analysis stage reasons about "regions": the outer boundary of a
//! connected blob of set pixels, with its bounding box and the polygon
//! area enclosed by that boundary. Holes and blobs nested inside holes
//! are ignored, matching external-only retrieval.
//!
//! Tracing uses Suzuki-Abe border following via
//! `imageproc::contours::find_contours` on a copy of the mask framed by
//! one clear pixel. Without that frame, blobs touching the image edge come
//! back as holes.

use image::{GrayImage, imageops};
use imageproc::contours::{BorderType, Contour, find_contours};

use crate::mask::Mask;
use crate::polygon;
use crate::types::{BoundingBox, Point};

/// One outer boundary traced from a mask.
#[derive(Debug, Clone, PartialEq)]
pub struct Region {
    /// Boundary pixels in tracing order.
    pub outline: Vec<Point>,
    /// Tight box around the boundary (inclusive of boundary pixels).
    pub bbox: BoundingBox,
    /// Polygon area enclosed by the boundary, in square pixels.
    pub area: f64,
}

impl Region {
    /// Region of a contour traced in the framed mask.
    fn from_framed(contour: &Contour<u32>) -> Option<Self> {
        let points: Vec<(u32, u32)> = contour
            .points
            .iter()
            .map(|p| (p.x.saturating_sub(FRAME), p.y.saturating_sub(FRAME)))
            .collect();
        let &(fx, fy) = points.first()?;
        let (mut x0, mut y0, mut x1, mut y1) = (fx, fy, fx, fy);
        for &(x, y) in &points {
            x0 = x0.min(x);
            y0 = y0.min(y);
            x1 = x1.max(x);
            y1 = y1.max(y);
        }
        let outline: Vec<Point> = points
            .iter()
            .map(|&(x, y)| Point::new(f64::from(x), f64::from(y)))
            .collect();
        Some(Self {
            area: polygon::area(&outline),
            bbox: BoundingBox::from_corners(x0, y0, x1 + 1, y1 + 1),
            outline,
        })
    }

    /// Integer coordinates of one boundary pixel.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn seed(&self) -> Option<(u32, u32)> {
        self.outline.first().map(|p| (p.x as u32, p.y as u32))
    }

    /// Region area over bounding-box area.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn fill_ratio(&self) -> f64 {
        let rect = self.bbox.area();
        if rect == 0 {
            return 0.0;
        }
        self.area / rect as f64
    }
}

/// Width of the clear frame added around a mask before tracing.
const FRAME: u32 = 1;

/// All outer boundaries in `mask`, in tracing order.
#[must_use]
pub fn external_regions(mask: &Mask) -> Vec<Region> {
    let mut framed = GrayImage::new(mask.width() + 2 * FRAME, mask.height() + 2 * FRAME);
    imageops::replace(&mut framed, mask.as_image(), i64::from(FRAME), i64::from(FRAME));
    let contours: Vec<Contour<u32>> = find_contours(&framed);
    contours
        .iter()
        .filter(|c| c.border_type == BorderType::Outer && c.parent.is_none())
        .filter_map(Region::from_framed)
        .collect()
}

/// The region enclosing the largest area, if any has positive area.
#[must_use]
pub fn largest_region(mask: &Mask) -> Option<Region> {
    external_regions(mask)
        .into_iter()
        .filter(|r| r.area > 0.0)
        .max_by(|a, b| a.area.total_cmp(&b.area))
}

/// Regions of at least `min_area`, largest first, and their total area.
#[must_use]
pub fn significant_regions(mask: &Mask, min_area: f64) -> (Vec<Region>, f64) {
    let mut regions: Vec<Region> = external_regions(mask)
        .into_iter()
        .filter(|r| r.area >= min_area)
        .collect();
    regions.sort_by(|a, b| b.area.total_cmp(&a.area));
    let total = regions.iter().map(|r| r.area).sum();
    (regions, total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::rect_mask;

    #[test]
    fn empty_mask_has_no_regions() {
        assert!(external_regions(&Mask::new(10, 10)).is_empty());
        assert!(largest_region(&Mask::new(10, 10)).is_none());
    }

    #[test]
    fn filled_rectangle_is_one_region() {
        let mask = rect_mask(40, 40, BoundingBox::new(5, 8, 20, 10));
        let regions = external_regions(&mask);
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].bbox, BoundingBox::new(5, 8, 20, 10));
        // Boundary runs through pixel centers: (20 - 1) * (10 - 1).
        approx::assert_relative_eq!(regions[0].area, 171.0);
    }

    #[test]
    fn holes_and_nested_blobs_are_ignored() {
        let mut mask = Mask::from_fn(40, 40, |x, y| {
            let outer = (2..38).contains(&x) && (2..38).contains(&y);
            let hole = (10..30).contains(&x) && (10..30).contains(&y);
            outer && !hole
        });
        mask.fill_rect(BoundingBox::new(15, 15, 5, 5));
        let regions = external_regions(&mask);
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].bbox, BoundingBox::new(2, 2, 36, 36));
    }

    #[test]
    fn regions_touching_the_border_are_traced() {
        let mask = rect_mask(20, 20, BoundingBox::new(0, 0, 20, 20));
        let regions = external_regions(&mask);
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].bbox, BoundingBox::new(0, 0, 20, 20));
        approx::assert_relative_eq!(regions[0].area, 361.0);
    }

    #[test]
    fn blobs_on_every_edge_are_traced() {
        for rect in [
            BoundingBox::new(0, 30, 40, 40),
            BoundingBox::new(60, 30, 40, 40),
            BoundingBox::new(30, 0, 40, 40),
            BoundingBox::new(30, 60, 40, 40),
        ] {
            let regions = external_regions(&rect_mask(100, 100, rect));
            assert_eq!(regions.len(), 1, "{rect:?}");
            assert_eq!(regions[0].bbox, rect);
            approx::assert_relative_eq!(regions[0].area, 39.0 * 39.0);
        }
    }

    #[test]
    fn full_mask_has_a_largest_region() {
        let region = largest_region(&Mask::full(640, 640));
        assert!(region.is_some_and(|r| r.bbox == BoundingBox::new(0, 0, 640, 640)));
    }

    #[test]
    fn significant_regions_are_sorted_and_filtered() {
        let mut mask = rect_mask(60, 60, BoundingBox::new(2, 2, 10, 10));
        mask.fill_rect(BoundingBox::new(20, 20, 30, 30));
        mask.fill_rect(BoundingBox::new(55, 55, 2, 2));
        let (regions, total) = significant_regions(&mask, 10.0);
        assert_eq!(regions.len(), 2);
        assert!(regions[0].area > regions[1].area);
        approx::assert_relative_eq!(total, 29.0 * 29.0 + 9.0 * 9.0);
    }

    #[test]
    fn fill_ratio_of_rectangle_is_high() {
        let mask = rect_mask(40, 40, BoundingBox::new(5, 5, 21, 21));
        let region = largest_region(&mask);
        assert!(region.is_some_and(|r| r.fill_ratio() > 0.85));
    }
}
