//! Draw defect boxes onto a photo and re-encode it.
//!
//! Results are expressed in the (possibly downscaled) working resolution.
//! When the photo handed in has another size, the boxes are scaled into
//! its frame first.

use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, ImageEncoder, Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;

use crate::decode::decode;
use crate::types::{BoundingBox, Dimensions, InspectionResult, PipelineError};

/// Box outline color.
pub const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);

/// Box outline thickness in pixels.
pub const BOX_THICKNESS: u32 = 2;

/// JPEG quality of the highlighted image.
pub const JPEG_QUALITY: u8 = 90;

/// Decode `image_bytes`, outline every defect of `result`, and encode the
/// annotated photo as JPEG.
///
/// # Errors
///
/// Returns a decode error for invalid input and
/// [`PipelineError::ImageEncode`] if JPEG encoding fails.
pub fn highlight(image_bytes: &[u8], result: &InspectionResult) -> Result<Vec<u8>, PipelineError> {
    let mut image = decode(image_bytes)?;
    draw_defects(&mut image, result);

    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, JPEG_QUALITY)
        .write_image(
            image.as_raw(),
            image.width(),
            image.height(),
            ExtendedColorType::Rgb8,
        )
        .map_err(PipelineError::ImageEncode)?;
    Ok(buf)
}

/// Outline every defect of `result` on `image` in place.
pub fn draw_defects(image: &mut RgbImage, result: &InspectionResult) {
    let frame = Dimensions::of(&*image);
    for defect in &result.defects {
        let bbox = scale_box(defect.bbox(), result.dimensions(), frame).clip(frame);
        for inset in 0..BOX_THICKNESS {
            let Some(rect) = inset_rect(bbox, inset) else {
                break;
            };
            draw_hollow_rect_mut(image, rect, BOX_COLOR);
        }
    }
}

/// Map a box from the `from` frame into the `to` frame.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn scale_box(bbox: BoundingBox, from: Dimensions, to: Dimensions) -> BoundingBox {
    if from == to || from.width == 0 || from.height == 0 {
        return bbox;
    }
    let sx = f64::from(to.width) / f64::from(from.width);
    let sy = f64::from(to.height) / f64::from(from.height);
    let x0 = (f64::from(bbox.x) * sx).round() as u32;
    let y0 = (f64::from(bbox.y) * sy).round() as u32;
    let x1 = (f64::from(bbox.right()) * sx).round() as u32;
    let y1 = (f64::from(bbox.bottom()) * sy).round() as u32;
    BoundingBox::from_corners(x0, y0, x1, y1)
}

fn inset_rect(bbox: BoundingBox, inset: u32) -> Option<Rect> {
    let width = bbox.width.checked_sub(2 * inset)?;
    let height = bbox.height.checked_sub(2 * inset)?;
    if width == 0 || height == 0 {
        return None;
    }
    let x = i32::try_from(bbox.x + inset).ok()?;
    let y = i32::try_from(bbox.y + inset).ok()?;
    Some(Rect::at(x, y).of_size(width, height))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::test_support::encode_png;
    use crate::types::DefectCandidate;

    fn gray_photo() -> RgbImage {
        RgbImage::from_pixel(100, 80, Rgb([128, 128, 128]))
    }

    fn result_with(bbox: BoundingBox, dims: Dimensions) -> InspectionResult {
        InspectionResult::new(dims, vec![DefectCandidate::new(bbox, "test")])
    }

    #[test]
    fn boxes_are_drawn_two_pixels_thick() {
        let mut img = gray_photo();
        let result = result_with(BoundingBox::new(20, 20, 40, 30), Dimensions::new(100, 80));
        draw_defects(&mut img, &result);
        assert_eq!(*img.get_pixel(20, 30), BOX_COLOR);
        assert_eq!(*img.get_pixel(21, 30), BOX_COLOR);
        assert_eq!(*img.get_pixel(22, 30), Rgb([128, 128, 128]));
        assert_eq!(*img.get_pixel(59, 40), BOX_COLOR);
        assert_eq!(*img.get_pixel(40, 35), Rgb([128, 128, 128]));
    }

    #[test]
    fn highlight_reencodes_as_jpeg() {
        let bytes = encode_png(&gray_photo());
        let result = result_with(BoundingBox::new(20, 20, 40, 30), Dimensions::new(100, 80));
        let out = highlight(&bytes, &result).unwrap();
        assert_eq!(&out[..2], &[0xFF, 0xD8]);
        let decoded = decode(&out).unwrap();
        assert_eq!(decoded.dimensions(), (100, 80));
        let p = decoded.get_pixel(20, 34).0;
        assert!(p[1] > p[0] + 40, "{p:?}");
    }

    #[test]
    fn boxes_follow_a_resized_frame() {
        let scaled = scale_box(
            BoundingBox::new(10, 20, 30, 40),
            Dimensions::new(100, 100),
            Dimensions::new(200, 150),
        );
        assert_eq!(scaled, BoundingBox::new(20, 30, 60, 60));
    }

    #[test]
    fn degenerate_boxes_are_skipped() {
        let mut img = gray_photo();
        let result = result_with(BoundingBox::new(10, 10, 1, 1), Dimensions::new(100, 80));
        draw_defects(&mut img, &result);
        assert_eq!(*img.get_pixel(10, 10), BOX_COLOR);
        assert!(inset_rect(BoundingBox::new(0, 0, 2, 2), 1).is_none());
    }

    #[test]
    fn garbage_input_is_a_decode_error() {
        let result = InspectionResult::new(Dimensions::new(1, 1), Vec::new());
        let err = highlight(b"not an image", &result).unwrap_err();
        assert_eq!(err.kind(), crate::types::ErrorKind::Decode);
    }
}
