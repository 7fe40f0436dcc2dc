//! Part segmentation: separate the photographed part from background.
//!
//! Grayscale → blur → Canny → dilate (close outline gaps) → outer
//! contours. The largest outline is the part; other outlines are kept
//! when they are large both in absolute terms and relative to the part,
//! so detached pieces survive into the broken-part analysis. Chosen
//! outlines are filled and the result is morphologically closed.
//!
//! When no outline covers the minimum part-area ratio, the mask is the
//! whole frame. Downstream, the quality gate notices the near-total ROI
//! coverage and relaxes its photometric checks.

use image::{GrayImage, Luma};
use imageproc::region_labelling::{Connectivity, connected_components};
use tracing::debug;

use crate::blur::gaussian_blur;
use crate::contour::external_regions;
use crate::edge::canny;
use crate::mask::Mask;
use crate::profile::DetectionProfile;

/// Binary silhouette of the part.
#[must_use = "returns the part mask"]
#[allow(clippy::cast_precision_loss)]
pub fn segment(gray: &GrayImage, profile: &DetectionProfile) -> Mask {
    let (w, h) = gray.dimensions();
    let blurred = gaussian_blur(gray, profile.blur_sigma);
    let edges = canny(
        &blurred,
        profile.segment_canny_low,
        profile.segment_canny_high,
    );
    let outlines = edges.dilate(profile.segment_dilate_kernel);
    drop(edges);

    let regions = external_regions(&outlines);
    let Some(primary) = regions.iter().max_by(|a, b| a.area.total_cmp(&b.area)) else {
        debug!(width = w, height = h, "no outlines found, using whole frame");
        return Mask::full(w, h);
    };

    let total = (u64::from(w) * u64::from(h)) as f64;
    let primary_ratio = primary.area / total;
    if total <= 0.0 || primary_ratio < profile.min_part_area_ratio {
        debug!(
            primary_ratio,
            min = profile.min_part_area_ratio,
            "largest outline too small, using whole frame"
        );
        return Mask::full(w, h);
    }

    let min_secondary = (total * profile.part_secondary_area_ratio)
        .max(primary.area * profile.part_secondary_rel_ratio);
    let chosen: Vec<_> = regions
        .iter()
        .filter(|r| std::ptr::eq(*r, primary) || r.area >= min_secondary)
        .collect();

    // Fill each chosen outline by its connected component plus holes.
    let labels = connected_components(outlines.as_image(), Connectivity::Eight, Luma([0]));
    let mut chosen_labels: Vec<u32> = chosen
        .iter()
        .filter_map(|r| r.seed())
        .map(|(x, y)| labels.get_pixel(x, y).0[0])
        .filter(|&l| l != 0)
        .collect();
    chosen_labels.sort_unstable();
    chosen_labels.dedup();

    let filled = Mask::from_fn(w, h, |x, y| {
        chosen_labels
            .binary_search(&labels.get_pixel(x, y).0[0])
            .is_ok()
    })
    .fill_holes();

    debug!(
        outlines = regions.len(),
        kept = chosen.len(),
        primary_ratio,
        "part segmented"
    );
    filled.close(profile.segment_close_kernel)
}

/// Part mask shrunk by `kernel` to exclude edge-of-part artifacts.
///
/// Kernels below 3 leave the mask unchanged. If erosion would remove
/// every pixel the input mask is returned, so callers never receive
/// an empty ROI for a non-empty part.
#[must_use = "returns the interior mask"]
pub fn interior(mask: &Mask, kernel: u32) -> Mask {
    if kernel < 3 {
        return mask.clone();
    }
    let inner = mask.erode(kernel);
    if inner.is_clear() {
        return mask.clone();
    }
    inner
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{gray, paint, part_on_white};
    use crate::types::BoundingBox;

    #[test]
    fn gray_square_on_white_is_segmented() {
        let img = gray(&part_on_white(640, 640, BoundingBox::new(70, 70, 500, 500)));
        let mask = segment(&img, &DetectionProfile::default());
        let bbox = mask.bounding_box().unwrap_or(BoundingBox::new(0, 0, 0, 0));
        // Outline dilation grows the silhouette by a couple of pixels.
        assert!(bbox.x >= 64 && bbox.x <= 70, "{bbox:?}");
        assert!(bbox.right() >= 570 && bbox.right() <= 576, "{bbox:?}");
        assert!(mask.get(320, 320), "interior must be filled");
        assert!(!mask.get(10, 10), "background must be clear");
        assert!(!mask.get(630, 630));
    }

    #[test]
    fn uniform_frame_falls_back_to_whole_frame() {
        let img = GrayImage::from_pixel(100, 80, Luma([128]));
        let mask = segment(&img, &DetectionProfile::default());
        assert_eq!(mask.count(), 8000);
    }

    #[test]
    fn tiny_object_falls_back_to_whole_frame() {
        let img = gray(&part_on_white(400, 400, BoundingBox::new(190, 190, 20, 20)));
        let mask = segment(&img, &DetectionProfile::default());
        assert_eq!(mask.count(), 160_000);
    }

    #[test]
    fn detached_piece_is_kept() {
        let mut rgb = part_on_white(640, 640, BoundingBox::new(70, 70, 400, 500));
        paint(&mut rgb, BoundingBox::new(500, 250, 70, 140), 128);
        let mask = segment(&gray(&rgb), &DetectionProfile::default());
        assert!(mask.get(200, 300));
        assert!(mask.get(535, 320), "secondary piece must be in the mask");
        assert!(!mask.get(485, 320), "gap must stay clear");
    }

    #[test]
    fn small_speck_is_not_part_of_the_mask() {
        let mut rgb = part_on_white(640, 640, BoundingBox::new(70, 70, 450, 450));
        paint(&mut rgb, BoundingBox::new(590, 590, 8, 8), 0);
        let mask = segment(&gray(&rgb), &DetectionProfile::default());
        assert!(!mask.get(594, 594));
    }

    #[test]
    fn interior_shrinks_but_never_empties() {
        let mut mask = Mask::new(50, 50);
        mask.fill_rect(BoundingBox::new(10, 10, 30, 30));
        let inner = interior(&mask, 9);
        assert!(inner.count() < mask.count());
        assert!(inner.get(25, 25));
        assert!(!inner.get(11, 11));

        let mut sliver = Mask::new(50, 50);
        sliver.fill_rect(BoundingBox::new(10, 10, 3, 3));
        assert_eq!(interior(&sliver, 9), sliver);
        assert_eq!(interior(&mask, 1), mask);
    }
}
