//! Gradient and Canny edge detection.
//!
//! [`canny`] is a border-safe Canny that does not blur internally: callers
//! blur first (segmentation and single-image inspection both use the
//! profile's `blur_sigma`), so the same smoothed image can feed several
//! consumers. Hysteresis checks all 8 neighbours and bounds-checks every
//! coordinate, so edges touching the frame never index out of range.
//!
//! The quality gate runs it on the unblurred photo as its sharpness
//! proxy.

use image::{GrayImage, Luma};
use imageproc::definitions::Image;
use imageproc::filter::filter_clamped;
use imageproc::kernel;

use crate::mask::Mask;

/// Minimum allowed Canny threshold.
///
/// A low threshold of zero causes every pixel with any gradient to be
/// treated as a potential edge.
pub const MIN_THRESHOLD: f32 = 1.0;
const _: () = assert!(MIN_THRESHOLD > 0.0);

/// Sobel derivatives and their Euclidean magnitude.
struct Gradients {
    gx: Image<Luma<i16>>,
    gy: Image<Luma<i16>>,
    magnitude: Vec<f32>,
    width: u32,
    height: u32,
}

impl Gradients {
    fn of(image: &GrayImage) -> Self {
        let gx: Image<Luma<i16>> = filter_clamped(image, kernel::SOBEL_HORIZONTAL_3X3);
        let gy: Image<Luma<i16>> = filter_clamped(image, kernel::SOBEL_VERTICAL_3X3);
        let magnitude = gx
            .pixels()
            .zip(gy.pixels())
            .map(|(h, v)| f32::from(h.0[0]).hypot(f32::from(v.0[0])))
            .collect();
        Self {
            gx,
            gy,
            magnitude,
            width: image.width(),
            height: image.height(),
        }
    }

    #[inline]
    fn at(&self, x: u32, y: u32) -> f32 {
        self.magnitude[(y as usize) * (self.width as usize) + x as usize]
    }
}

/// Detect edges using the Canny algorithm on an already-smoothed image.
///
/// Returns a mask where set pixels are edges. Pixels with gradient
/// magnitude at or above `high_threshold` are definite edges; those at or
/// above `low_threshold` are edges only if connected to a definite edge.
///
/// Both thresholds are clamped to a minimum of [`MIN_THRESHOLD`] and
/// `low_threshold` is clamped to be at most `high_threshold`.
#[must_use = "returns the binary edge map"]
pub fn canny(image: &GrayImage, low_threshold: f32, high_threshold: f32) -> Mask {
    let high = high_threshold.max(MIN_THRESHOLD);
    let low = low_threshold.max(MIN_THRESHOLD).min(high);

    let gradients = Gradients::of(image);
    let thinned = non_maximum_suppression(&gradients);
    hysteresis(&thinned, gradients.width, gradients.height, low, high)
}

/// Keep only pixels that are maxima along their gradient direction.
///
/// The one-pixel frame is left at zero.
fn non_maximum_suppression(g: &Gradients) -> Vec<f32> {
    let (w, h) = (g.width, g.height);
    let mut out = vec![0.0_f32; (w as usize) * (h as usize)];
    if w < 3 || h < 3 {
        return out;
    }
    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let m = g.at(x, y);
            if m == 0.0 {
                continue;
            }
            let dx = f32::from(g.gx.get_pixel(x, y).0[0]);
            let dy = f32::from(g.gy.get_pixel(x, y).0[0]);
            let mut angle = dy.atan2(dx).to_degrees();
            if angle < 0.0 {
                angle += 180.0;
            }
            let (a, b) = if (22.5..67.5).contains(&angle) {
                (g.at(x + 1, y + 1), g.at(x - 1, y - 1))
            } else if (67.5..112.5).contains(&angle) {
                (g.at(x, y - 1), g.at(x, y + 1))
            } else if (112.5..157.5).contains(&angle) {
                (g.at(x - 1, y + 1), g.at(x + 1, y - 1))
            } else {
                (g.at(x - 1, y), g.at(x + 1, y))
            };
            if m >= a && m >= b {
                out[(y as usize) * (w as usize) + x as usize] = m;
            }
        }
    }
    out
}

/// Grow definite edges into connected weak edges.
fn hysteresis(thinned: &[f32], width: u32, height: u32, low: f32, high: f32) -> Mask {
    let mut out = Mask::new(width, height);
    let index = |x: u32, y: u32| (y as usize) * (width as usize) + x as usize;
    let mut stack = Vec::new();

    for y in 0..height {
        for x in 0..width {
            if thinned[index(x, y)] < high || out.get(x, y) {
                continue;
            }
            out.set(x, y, true);
            stack.push((x, y));
            while let Some((cx, cy)) = stack.pop() {
                for (dx, dy) in NEIGHBOURS {
                    let (Some(nx), Some(ny)) =
                        (cx.checked_add_signed(dx), cy.checked_add_signed(dy))
                    else {
                        continue;
                    };
                    if nx >= width || ny >= height {
                        continue;
                    }
                    if thinned[index(nx, ny)] >= low && !out.get(nx, ny) {
                        out.set(nx, ny, true);
                        stack.push((nx, ny));
                    }
                }
            }
        }
    }
    out
}

const NEIGHBOURS: [(i32, i32); 8] = [
    (-1, -1),
    (0, -1),
    (1, -1),
    (-1, 0),
    (1, 0),
    (-1, 1),
    (0, 1),
    (1, 1),
];
