//! Binary masks and their algebra.
//!
//! A [`Mask`] wraps a single-channel buffer whose pixels are either 0 or
//! 255. Every constructor normalizes to that invariant, so masks can be
//! handed to `imageproc` morphology and contour routines directly.
//!
//! Binary operations between masks of different sizes are a caller bug
//! and return [`PipelineError::DimensionMismatch`] instead of truncating.
//!
//! Morphology uses disc-shaped structuring elements. A kernel size `k`
//! (as configured in the profile, odd by convention) becomes a disc of
//! radius `k / 2`.

use image::{GrayImage, Luma};
use imageproc::distance_transform::Norm;
use imageproc::region_labelling::{Connectivity, connected_components};

use crate::types::{BoundingBox, Dimensions, PipelineError};

const ON: u8 = 255;

/// A binary image: each pixel is set (255) or clear (0).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mask(GrayImage);

impl Mask {
    /// All-clear mask.
    #[must_use]
    pub fn new(width: u32, height: u32) -> Self {
        Self(GrayImage::new(width, height))
    }

    /// All-set mask.
    #[must_use]
    pub fn full(width: u32, height: u32) -> Self {
        Self(GrayImage::from_pixel(width, height, Luma([ON])))
    }

    #[must_use]
    pub fn from_fn(width: u32, height: u32, f: impl Fn(u32, u32) -> bool) -> Self {
        Self(GrayImage::from_fn(width, height, |x, y| {
            Luma([if f(x, y) { ON } else { 0 }])
        }))
    }

    /// Wrap a grayscale buffer, treating any non-zero pixel as set.
    #[must_use]
    pub fn from_image(mut image: GrayImage) -> Self {
        for p in image.pixels_mut() {
            if p.0[0] != 0 {
                p.0[0] = ON;
            }
        }
        Self(image)
    }

    /// Pixels of `image` strictly above `level`.
    #[must_use]
    pub fn threshold_above(image: &GrayImage, level: u8) -> Self {
        Self::from_fn(image.width(), image.height(), |x, y| {
            image.get_pixel(x, y).0[0] > level
        })
    }

    #[must_use]
    pub fn width(&self) -> u32 {
        self.0.width()
    }

    #[must_use]
    pub fn height(&self) -> u32 {
        self.0.height()
    }

    #[must_use]
    pub fn dimensions(&self) -> Dimensions {
        Dimensions::of(&self.0)
    }

    /// Whether the pixel is set. Out-of-range coordinates are clear.
    #[must_use]
    pub fn get(&self, x: u32, y: u32) -> bool {
        self.0.get_pixel_checked(x, y).is_some_and(|p| p.0[0] != 0)
    }

    /// Set or clear one pixel. Out-of-range coordinates are ignored.
    pub fn set(&mut self, x: u32, y: u32, on: bool) {
        if let Some(p) = self.0.get_pixel_mut_checked(x, y) {
            p.0[0] = if on { ON } else { 0 };
        }
    }

    /// Number of set pixels.
    #[must_use]
    pub fn count(&self) -> u64 {
        self.0.as_raw().iter().filter(|&&v| v != 0).count() as u64
    }

    /// `true` when no pixel is set.
    #[must_use]
    pub fn is_clear(&self) -> bool {
        self.0.as_raw().iter().all(|&v| v == 0)
    }

    /// Fraction of the frame that is set.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn coverage(&self) -> f64 {
        let total = self.dimensions().area();
        if total == 0 {
            return 0.0;
        }
        self.count() as f64 / total as f64
    }

    /// Borrow the underlying 0/255 buffer.
    #[must_use]
    pub const fn as_image(&self) -> &GrayImage {
        &self.0
    }

    #[must_use]
    pub fn into_image(self) -> GrayImage {
        self.0
    }

    fn check_same_size(&self, other: &Self) -> Result<(), PipelineError> {
        if self.dimensions() == other.dimensions() {
            Ok(())
        } else {
            Err(PipelineError::DimensionMismatch {
                expected: self.dimensions(),
                actual: other.dimensions(),
            })
        }
    }

    fn zip_with(&self, other: &Self, op: impl Fn(bool, bool) -> bool) -> Result<Self, PipelineError> {
        self.check_same_size(other)?;
        let raw = self
            .0
            .as_raw()
            .iter()
            .zip(other.0.as_raw())
            .map(|(&a, &b)| if op(a != 0, b != 0) { ON } else { 0 })
            .collect();
        GrayImage::from_raw(self.width(), self.height(), raw)
            .map(Self)
            .ok_or(PipelineError::DimensionMismatch {
                expected: self.dimensions(),
                actual: other.dimensions(),
            })
    }

    /// Intersection.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::DimensionMismatch`] if sizes differ.
    pub fn and(&self, other: &Self) -> Result<Self, PipelineError> {
        self.zip_with(other, |a, b| a && b)
    }

    /// Union.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::DimensionMismatch`] if sizes differ.
    pub fn or(&self, other: &Self) -> Result<Self, PipelineError> {
        self.zip_with(other, |a, b| a || b)
    }

    /// Symmetric difference.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::DimensionMismatch`] if sizes differ.
    pub fn xor(&self, other: &Self) -> Result<Self, PipelineError> {
        self.zip_with(other, |a, b| a != b)
    }

    /// Intersection-over-union of the set pixels. Two empty masks score 0.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::DimensionMismatch`] if sizes differ.
    #[allow(clippy::cast_precision_loss)]
    pub fn iou(&self, other: &Self) -> Result<f64, PipelineError> {
        self.check_same_size(other)?;
        let (inter, union) = self
            .0
            .as_raw()
            .iter()
            .zip(other.0.as_raw())
            .fold((0_u64, 0_u64), |(i, u), (&a, &b)| {
                (i + u64::from(a != 0 && b != 0), u + u64::from(a != 0 || b != 0))
            });
        if union == 0 {
            return Ok(0.0);
        }
        Ok(inter as f64 / union as f64)
    }

    /// Number of set pixels of `self` that are also set in `roi`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::DimensionMismatch`] if sizes differ.
    pub fn count_within(&self, roi: &Self) -> Result<u64, PipelineError> {
        self.check_same_size(roi)?;
        Ok(self
            .0
            .as_raw()
            .iter()
            .zip(roi.0.as_raw())
            .filter(|&(&a, &b)| a != 0 && b != 0)
            .count() as u64)
    }

    #[must_use]
    pub fn dilate(&self, kernel: u32) -> Self {
        match radius(kernel) {
            0 => self.clone(),
            r => Self(imageproc::morphology::dilate(&self.0, Norm::L2, r)),
        }
    }

    #[must_use]
    pub fn erode(&self, kernel: u32) -> Self {
        match radius(kernel) {
            0 => self.clone(),
            r => Self(imageproc::morphology::erode(&self.0, Norm::L2, r)),
        }
    }

    /// Erosion followed by dilation: removes specks narrower than the
    /// kernel.
    #[must_use]
    pub fn open(&self, kernel: u32) -> Self {
        match radius(kernel) {
            0 => self.clone(),
            r => Self(imageproc::morphology::open(&self.0, Norm::L2, r)),
        }
    }

    /// Dilation followed by erosion: fills gaps narrower than the kernel.
    #[must_use]
    pub fn close(&self, kernel: u32) -> Self {
        match radius(kernel) {
            0 => self.clone(),
            r => Self(imageproc::morphology::close(&self.0, Norm::L2, r)),
        }
    }

    /// Set every clear pixel that cannot reach the frame border through
    /// other clear pixels.
    #[must_use]
    pub fn fill_holes(&self) -> Self {
        let (w, h) = (self.width(), self.height());
        if w == 0 || h == 0 {
            return self.clone();
        }
        // Background is labelled with 4-connectivity, the dual of the
        // 8-connected foreground.
        let inverted = GrayImage::from_fn(w, h, |x, y| Luma([if self.get(x, y) { 0 } else { ON }]));
        let labels = connected_components(&inverted, Connectivity::Four, Luma([0]));

        let mut outside = std::collections::HashSet::new();
        let mut mark = |x: u32, y: u32| {
            let label = labels.get_pixel(x, y).0[0];
            if label != 0 {
                outside.insert(label);
            }
        };
        for x in 0..w {
            mark(x, 0);
            mark(x, h - 1);
        }
        for y in 0..h {
            mark(0, y);
            mark(w - 1, y);
        }

        Self::from_fn(w, h, |x, y| {
            let label = labels.get_pixel(x, y).0[0];
            label == 0 || !outside.contains(&label)
        })
    }

    /// Set every pixel inside `rect` (clipped to the frame).
    pub fn fill_rect(&mut self, rect: BoundingBox) {
        let rect = rect.clip(self.dimensions());
        for y in rect.y..rect.bottom() {
            for x in rect.x..rect.right() {
                self.0.put_pixel(x, y, Luma([ON]));
            }
        }
    }

    /// Number of set pixels inside `rect` (clipped to the frame).
    #[must_use]
    pub fn count_in_rect(&self, rect: BoundingBox) -> u64 {
        let rect = rect.clip(self.dimensions());
        let mut n = 0;
        for y in rect.y..rect.bottom() {
            for x in rect.x..rect.right() {
                n += u64::from(self.0.get_pixel(x, y).0[0] != 0);
            }
        }
        n
    }

    /// Tight box around all set pixels.
    #[must_use]
    pub fn bounding_box(&self) -> Option<BoundingBox> {
        let mut bounds: Option<(u32, u32, u32, u32)> = None;
        for (x, y, p) in self.0.enumerate_pixels() {
            if p.0[0] == 0 {
                continue;
            }
            bounds = Some(match bounds {
                None => (x, y, x, y),
                Some((x0, y0, x1, y1)) => (x0.min(x), y0.min(y), x1.max(x), y1.max(y)),
            });
        }
        bounds.map(|(x0, y0, x1, y1)| BoundingBox::from_corners(x0, y0, x1 + 1, y1 + 1))
    }
}

/// Disc radius for a morphology kernel size.
#[allow(clippy::cast_possible_truncation)]
const fn radius(kernel: u32) -> u8 {
    let r = kernel / 2;
    if r > u8::MAX as u32 { u8::MAX } else { r as u8 }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn square(size: u32, rect: BoundingBox) -> Mask {
        Mask::from_fn(size, size, |x, y| {
            x >= rect.x && x < rect.right() && y >= rect.y && y < rect.bottom()
        })
    }

    #[test]
    fn from_image_normalizes_values() {
        let img = GrayImage::from_fn(3, 1, |x, _| Luma([u8::try_from(x).unwrap()]));
        let mask = Mask::from_image(img);
        assert_eq!(mask.as_image().as_raw(), &vec![0, 255, 255]);
    }

    #[test]
    fn algebra_on_overlapping_squares() {
        let a = square(20, BoundingBox::new(0, 0, 10, 10));
        let b = square(20, BoundingBox::new(5, 0, 10, 10));
        assert_eq!(a.and(&b).unwrap().count(), 50);
        assert_eq!(a.or(&b).unwrap().count(), 150);
        assert_eq!(a.xor(&b).unwrap().count(), 100);
        approx::assert_relative_eq!(a.iou(&b).unwrap(), 50.0 / 150.0);
    }

    #[test]
    fn mismatched_sizes_are_a_precondition_error() {
        let a = Mask::new(10, 10);
        let b = Mask::new(10, 11);
        let err = a.xor(&b).unwrap_err();
        assert!(matches!(err, PipelineError::DimensionMismatch { .. }));
        assert_eq!(err.kind(), crate::types::ErrorKind::Precondition);
        assert!(a.iou(&b).is_err());
        assert!(a.count_within(&b).is_err());
    }

    #[test]
    fn erode_then_dilate_restores_large_square() {
        let m = square(40, BoundingBox::new(10, 10, 20, 20));
        // A radius-1 disc is a plus sign, so only the four corners go.
        let opened = m.open(3);
        assert_eq!(opened.count(), m.count() - 4);
        assert!(m.erode(9).count() < m.count());
        assert!(m.dilate(9).count() > m.count());
    }

    #[test]
    fn open_removes_speck() {
        let mut m = square(40, BoundingBox::new(10, 10, 20, 20));
        m.set(2, 2, true);
        let opened = m.open(3);
        assert!(!opened.get(2, 2));
        assert!(opened.get(20, 20));
    }

    #[test]
    fn close_fills_small_gap() {
        let mut m = square(40, BoundingBox::new(10, 10, 20, 20));
        m.set(20, 20, false);
        assert!(m.close(3).get(20, 20));
    }

    #[test]
    fn kernel_one_is_identity() {
        let m = square(10, BoundingBox::new(2, 2, 3, 3));
        assert_eq!(m.erode(1), m);
        assert_eq!(m.dilate(0), m);
    }

    #[test]
    fn fill_holes_fills_ring_interior() {
        let ring = Mask::from_fn(20, 20, |x, y| {
            (5..15).contains(&x) && (5..15).contains(&y) && !((7..13).contains(&x) && (7..13).contains(&y))
        });
        let filled = ring.fill_holes();
        assert_eq!(filled.count(), 100);
        assert!(!filled.get(0, 0));
    }

    #[test]
    fn fill_holes_keeps_open_notch_clear() {
        // A "C" shape: the notch touches the outside and must stay clear.
        let c = Mask::from_fn(20, 20, |x, y| {
            (5..15).contains(&x) && (5..15).contains(&y) && !((8..15).contains(&x) && (8..12).contains(&y))
        });
        assert_eq!(c.fill_holes(), c);
    }

    #[test]
    fn rect_helpers() {
        let mut m = Mask::new(10, 10);
        m.fill_rect(BoundingBox::new(8, 8, 5, 5));
        assert_eq!(m.count(), 4);
        assert_eq!(m.count_in_rect(BoundingBox::new(0, 0, 9, 9)), 1);
        assert_eq!(m.bounding_box(), Some(BoundingBox::new(8, 8, 2, 2)));
        assert_eq!(Mask::new(3, 3).bounding_box(), None);
    }

    #[test]
    fn coverage_of_full_mask_is_one() {
        approx::assert_relative_eq!(Mask::full(7, 3).coverage(), 1.0);
        assert!(Mask::new(7, 3).is_clear());
    }
}
