//! Registration of the current photo onto the base photo.
//!
//! Two phases:
//!
//! 1. **Coarse**: the bounding boxes of the largest outline in each part
//!    mask give a uniform scale and a translation that puts the box
//!    centers on top of each other. The scaled current image is pasted
//!    into a base-sized canvas; whatever falls outside is clipped.
//! 2. **Refinement**: an affine enhanced-correlation (ECC) maximization
//!    seeded with the coarse result, run on a downscaled, blurred copy and
//!    restricted to the interior of the base part.
//!
//! Both results are scored by the IoU of the transformed current mask
//! against the base mask; the refined one is kept only if it scores
//! strictly higher. A part with no texture inside its interior gives the
//! correlation nothing to work with, and refinement is skipped.

use image::imageops::{self, FilterType};
use image::{GrayImage, Luma};
use nalgebra::{Matrix6, Vector6};
use tracing::debug;

use crate::blur::gaussian_blur;
use crate::contour::largest_region;
use crate::mask::Mask;
use crate::profile::DetectionProfile;
use crate::segment::interior;
use crate::types::{AlignmentFailure, BoundingBox, Dimensions, PipelineError};

/// Minimum number of ROI samples for a refinement step.
const MIN_SAMPLES: usize = 64;

/// Current image and mask transformed into the base frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Alignment {
    pub image: GrayImage,
    pub mask: Mask,
    /// IoU of `mask` against the base mask.
    pub score: f64,
    pub coarse_score: f64,
    /// Score of the refined transform, when refinement converged.
    pub refined_score: Option<f64>,
    /// Whether the refined transform replaced the coarse one.
    pub refined: bool,
}

/// Align `current` onto `base`.
///
/// # Errors
///
/// Returns [`PipelineError::Alignment`] when either mask has no outline,
/// the derived scale is not positive, or the transformed current image
/// does not overlap the base frame. Returns
/// [`PipelineError::DimensionMismatch`] if a mask does not match its
/// image.
pub fn align(
    base_image: &GrayImage,
    current_image: &GrayImage,
    base_mask: &Mask,
    current_mask: &Mask,
    profile: &DetectionProfile,
) -> Result<Alignment, PipelineError> {
    let base_dims = Dimensions::of(base_image);
    for (image, mask) in [(base_image, base_mask), (current_image, current_mask)] {
        if Dimensions::of(image) != mask.dimensions() {
            return Err(PipelineError::DimensionMismatch {
                expected: Dimensions::of(image),
                actual: mask.dimensions(),
            });
        }
    }

    let base_rect = largest_region(base_mask)
        .ok_or(AlignmentFailure::BaseMaskMissing)?
        .bbox;
    let current_rect = largest_region(current_mask)
        .ok_or(AlignmentFailure::CurrentMaskMissing)?
        .bbox;

    let (coarse_image, coarse_mask) = coarse(
        current_image,
        current_mask,
        base_rect,
        current_rect,
        base_dims,
    )?;
    let coarse_score = base_mask.iou(&coarse_mask)?;
    debug!(coarse_score, "coarse alignment");

    let mut result = Alignment {
        image: coarse_image,
        mask: coarse_mask,
        score: coarse_score,
        coarse_score,
        refined_score: None,
        refined: false,
    };
    if profile.ecc_iterations == 0 {
        return Ok(result);
    }

    let Some(warp) = refine(base_image, &result.image, base_mask, profile) else {
        debug!("refinement skipped or did not converge");
        return Ok(result);
    };
    let refined_image = warp.apply_to_image(&result.image);
    let refined_mask = warp.apply_to_mask(&result.mask);
    let refined_score = base_mask.iou(&refined_mask)?;
    result.refined_score = Some(refined_score);
    debug!(coarse_score, refined_score, "refined alignment");

    if refined_score > coarse_score {
        result.image = refined_image;
        result.mask = refined_mask;
        result.score = refined_score;
        result.refined = true;
    }
    Ok(result)
}

/// Scale `current` uniformly and translate it so the outline boxes share
/// a center, clipped to the base frame.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn coarse(
    current_image: &GrayImage,
    current_mask: &Mask,
    base_rect: BoundingBox,
    current_rect: BoundingBox,
    base_dims: Dimensions,
) -> Result<(GrayImage, Mask), PipelineError> {
    let sx = f64::from(base_rect.width) / f64::from(current_rect.width);
    let sy = f64::from(base_rect.height) / f64::from(current_rect.height);
    let scale = (sx * sy).sqrt();
    if !scale.is_finite() || scale <= 0.0 {
        return Err(AlignmentFailure::InvalidScale.into());
    }

    let (w, h) = current_image.dimensions();
    let scaled_w = (f64::from(w) * scale).round().max(1.0) as u32;
    let scaled_h = (f64::from(h) * scale).round().max(1.0) as u32;
    let (image, mask) = if (scaled_w, scaled_h) == (w, h) {
        (current_image.clone(), current_mask.clone())
    } else {
        (
            imageops::resize(current_image, scaled_w, scaled_h, FilterType::Triangle),
            Mask::from_image(imageops::resize(
                current_mask.as_image(),
                scaled_w,
                scaled_h,
                FilterType::Nearest,
            )),
        )
    };

    let rx = f64::from(scaled_w) / f64::from(w);
    let ry = f64::from(scaled_h) / f64::from(h);
    let from = current_rect.center();
    let to = base_rect.center();
    let dx = (to.x - from.x * rx).round() as i64;
    let dy = (to.y - from.y * ry).round() as i64;

    let overlaps = dx < i64::from(base_dims.width)
        && dy < i64::from(base_dims.height)
        && dx + i64::from(scaled_w) > 0
        && dy + i64::from(scaled_h) > 0;
    if !overlaps {
        return Err(AlignmentFailure::NoOverlap.into());
    }

    let source = |x: u32, y: u32| -> Option<(u32, u32)> {
        let sx = u32::try_from(i64::from(x) - dx).ok()?;
        let sy = u32::try_from(i64::from(y) - dy).ok()?;
        (sx < scaled_w && sy < scaled_h).then_some((sx, sy))
    };
    let pasted = GrayImage::from_fn(base_dims.width, base_dims.height, |x, y| {
        source(x, y).map_or(Luma([0]), |(sx, sy)| *image.get_pixel(sx, sy))
    });
    let pasted_mask = Mask::from_fn(base_dims.width, base_dims.height, |x, y| {
        source(x, y).is_some_and(|(sx, sy)| mask.get(sx, sy))
    });
    Ok((pasted, pasted_mask))
}

/// Affine map from base-frame coordinates to current-frame coordinates:
/// `u = p0·x + p1·y + p2`, `v = p3·x + p4·y + p5`.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Affine([f64; 6]);

impl Affine {
    const IDENTITY: Self = Self([1.0, 0.0, 0.0, 0.0, 1.0, 0.0]);

    fn map(&self, x: f64, y: f64) -> (f64, f64) {
        let p = &self.0;
        (
            p[0].mul_add(x, p[1].mul_add(y, p[2])),
            p[3].mul_add(x, p[4].mul_add(y, p[5])),
        )
    }

    fn add(&mut self, delta: &Vector6<f64>) {
        for (p, d) in self.0.iter_mut().zip(delta.iter()) {
            *p += d;
        }
    }
}

/// An affine map estimated on a downscaled copy, applicable at full
/// resolution.
#[derive(Debug, Clone, Copy)]
struct ScaledWarp {
    warp: Affine,
    sx: f64,
    sy: f64,
}

impl ScaledWarp {
    /// Full-resolution source location of full-resolution pixel `(x, y)`.
    fn map(&self, x: f64, y: f64) -> (f64, f64) {
        let xs = self.sx.mul_add(x + 0.5, -0.5);
        let ys = self.sy.mul_add(y + 0.5, -0.5);
        let (u, v) = self.warp.map(xs, ys);
        ((u + 0.5) / self.sx - 0.5, (v + 0.5) / self.sy - 0.5)
    }

    fn apply_to_image(&self, image: &GrayImage) -> GrayImage {
        let plane = Plane::from_image(image);
        GrayImage::from_fn(image.width(), image.height(), |x, y| {
            let (u, v) = self.map(f64::from(x), f64::from(y));
            Luma([plane.bilinear(u, v).map_or(0, to_u8)])
        })
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn apply_to_mask(&self, mask: &Mask) -> Mask {
        Mask::from_fn(mask.width(), mask.height(), |x, y| {
            let (u, v) = self.map(f64::from(x), f64::from(y));
            let (u, v) = (u.round(), v.round());
            u >= 0.0 && v >= 0.0 && mask.get(u as u32, v as u32)
        })
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn to_u8(v: f32) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}

/// Single-channel float image with bilinear sampling.
struct Plane {
    width: u32,
    height: u32,
    data: Vec<f32>,
}

impl Plane {
    fn from_image(image: &GrayImage) -> Self {
        Self {
            width: image.width(),
            height: image.height(),
            data: image.as_raw().iter().map(|&v| f32::from(v)).collect(),
        }
    }

    fn at(&self, x: u32, y: u32) -> f32 {
        self.data[(y as usize) * (self.width as usize) + x as usize]
    }

    /// Central-difference derivatives, one-sided at the border.
    fn gradients(&self) -> (Self, Self) {
        let (w, h) = (self.width, self.height);
        let mut gx = Vec::with_capacity(self.data.len());
        let mut gy = Vec::with_capacity(self.data.len());
        for y in 0..h {
            for x in 0..w {
                let (x0, x1) = (x.saturating_sub(1), (x + 1).min(w - 1));
                let (y0, y1) = (y.saturating_sub(1), (y + 1).min(h - 1));
                gx.push(derivative(self.at(x1, y), self.at(x0, y), x1 - x0));
                gy.push(derivative(self.at(x, y1), self.at(x, y0), y1 - y0));
            }
        }
        (
            Self { width: w, height: h, data: gx },
            Self { width: w, height: h, data: gy },
        )
    }

    /// Bilinear sample; `None` outside the image.
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    fn bilinear(&self, x: f64, y: f64) -> Option<f32> {
        let max_x = f64::from(self.width) - 1.0;
        let max_y = f64::from(self.height) - 1.0;
        if !(0.0..=max_x).contains(&x) || !(0.0..=max_y).contains(&y) {
            return None;
        }
        let x0 = x.floor() as u32;
        let y0 = y.floor() as u32;
        let x1 = (x0 + 1).min(self.width - 1);
        let y1 = (y0 + 1).min(self.height - 1);
        let fx = (x - f64::from(x0)) as f32;
        let fy = (y - f64::from(y0)) as f32;
        let top = (self.at(x1, y0) - self.at(x0, y0)).mul_add(fx, self.at(x0, y0));
        let bottom = (self.at(x1, y1) - self.at(x0, y1)).mul_add(fx, self.at(x0, y1));
        Some((bottom - top).mul_add(fy, top))
    }
}

#[allow(clippy::cast_precision_loss)]
fn derivative(ahead: f32, behind: f32, span: u32) -> f32 {
    if span == 0 {
        0.0
    } else {
        (ahead - behind) / span as f32
    }
}

/// Estimate the affine correction on a downscaled copy.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn refine(
    base_image: &GrayImage,
    coarse_image: &GrayImage,
    base_mask: &Mask,
    profile: &DetectionProfile,
) -> Option<ScaledWarp> {
    let (w, h) = base_image.dimensions();
    let factor =
        (f64::from(profile.ecc_working_side) / f64::from(w.max(h).max(1))).min(1.0);
    let ww = (f64::from(w) * factor).round().max(1.0) as u32;
    let wh = (f64::from(h) * factor).round().max(1.0) as u32;

    let shrink = |img: &GrayImage| {
        let small = if (ww, wh) == (w, h) {
            img.clone()
        } else {
            imageops::resize(img, ww, wh, FilterType::Triangle)
        };
        Plane::from_image(&gaussian_blur(&small, profile.blur_sigma))
    };
    let template = shrink(base_image);
    let input = shrink(coarse_image);
    let roi_full = interior(base_mask, profile.roi_margin_kernel);
    let roi = Mask::from_image(imageops::resize(
        roi_full.as_image(),
        ww,
        wh,
        FilterType::Nearest,
    ));

    let warp = ecc(&template, &input, &roi, profile)?;
    Some(ScaledWarp {
        warp,
        sx: f64::from(ww) / f64::from(w),
        sy: f64::from(wh) / f64::from(h),
    })
}

/// One pixel's contribution to a refinement step.
struct Sample {
    x: f64,
    y: f64,
    template: f64,
    warped: f64,
    gx: f64,
    gy: f64,
}

/// Maximize the enhanced correlation coefficient between `template` and
/// `input` warped by an affine map, starting from identity.
///
/// Returns `None` when the ROI has no variance or the normal equations
/// degenerate.
fn ecc(template: &Plane, input: &Plane, roi: &Mask, profile: &DetectionProfile) -> Option<Affine> {
    let (gx, gy) = input.gradients();
    let mut warp = Affine::IDENTITY;
    let mut last_rho = f64::NEG_INFINITY;

    for iteration in 0..profile.ecc_iterations {
        let samples = collect_samples(template, input, &gx, &gy, roi, &warp);
        if samples.len() < MIN_SAMPLES {
            return None;
        }
        #[allow(clippy::cast_precision_loss)]
        let n = samples.len() as f64;
        let mean_t = samples.iter().map(|s| s.template).sum::<f64>() / n;
        let mean_w = samples.iter().map(|s| s.warped).sum::<f64>() / n;

        let mut hessian = Matrix6::<f64>::zeros();
        let mut image_proj = Vector6::<f64>::zeros();
        let mut template_proj = Vector6::<f64>::zeros();
        let (mut tt, mut ww, mut tw) = (0.0, 0.0, 0.0);
        for s in &samples {
            let t = s.template - mean_t;
            let i = s.warped - mean_w;
            let g = Vector6::new(s.gx * s.x, s.gx * s.y, s.gx, s.gy * s.x, s.gy * s.y, s.gy);
            hessian += g * g.transpose();
            image_proj += g * i;
            template_proj += g * t;
            tt += t * t;
            ww += i * i;
            tw += t * i;
        }
        if tt < 1e-6 || ww < 1e-6 {
            return None;
        }
        let rho = tw / (tt * ww).sqrt();

        let inverse = hessian.try_inverse()?;
        let projected = inverse * image_proj;
        let numerator = ww - image_proj.dot(&projected);
        let denominator = tw - template_proj.dot(&projected);
        if denominator <= 0.0 {
            return None;
        }
        let lambda = numerator / denominator;
        let delta = inverse * (template_proj * lambda - image_proj);
        warp.add(&delta);

        if !warp.0.iter().all(|p| p.is_finite()) {
            return None;
        }
        if (rho - last_rho).abs() < profile.ecc_epsilon {
            debug!(iteration, rho, "refinement converged");
            break;
        }
        last_rho = rho;
    }
    Some(warp)
}

fn collect_samples(
    template: &Plane,
    input: &Plane,
    gx: &Plane,
    gy: &Plane,
    roi: &Mask,
    warp: &Affine,
) -> Vec<Sample> {
    let mut samples = Vec::new();
    for y in 0..template.height {
        for x in 0..template.width {
            if !roi.get(x, y) {
                continue;
            }
            let (fx, fy) = (f64::from(x), f64::from(y));
            let (u, v) = warp.map(fx, fy);
            let (Some(warped), Some(dx), Some(dy)) =
                (input.bilinear(u, v), gx.bilinear(u, v), gy.bilinear(u, v))
            else {
                continue;
            };
            samples.push(Sample {
                x: fx,
                y: fy,
                template: f64::from(template.at(x, y)),
                warped: f64::from(warped),
                gx: f64::from(dx),
                gy: f64::from(dy),
            });
        }
    }
    samples
}
