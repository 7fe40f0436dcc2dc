//! Synthetic photographs shared by the unit tests.

use image::{GrayImage, Luma, Rgb, RgbImage};

use crate::mask::Mask;
use crate::types::BoundingBox;

pub const BACKGROUND: u8 = 255;

/// Gray levels of the 2x2 checker grain on synthetic parts. Canny marks
/// every grain pixel on the raw photo, while the blur ahead of
/// segmentation and inspection flattens it to mid-gray.
pub const GRAIN: [u8; 2] = [98, 158];

/// Grain level at a pixel.
pub const fn grain(x: u32, y: u32) -> u8 {
    GRAIN[((x / 2 + y / 2) % 2) as usize]
}

/// Encode an RGB image as PNG bytes.
pub fn encode_png(img: &RgbImage) -> Vec<u8> {
    let mut buf = Vec::new();
    let encoder = image::codecs::png::PngEncoder::new(&mut buf);
    image::ImageEncoder::write_image(
        encoder,
        img.as_raw(),
        img.width(),
        img.height(),
        image::ExtendedColorType::Rgb8,
    )
    .ok();
    buf
}

/// White frame with a grained rectangular part.
pub fn part_on_white(width: u32, height: u32, part: BoundingBox) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
        if inside(part, x, y) {
            Rgb([grain(x, y); 3])
        } else {
            Rgb([BACKGROUND; 3])
        }
    })
}

/// Paint a flat rectangle in place.
pub fn paint(img: &mut RgbImage, rect: BoundingBox, value: u8) {
    for y in rect.y..rect.bottom().min(img.height()) {
        for x in rect.x..rect.right().min(img.width()) {
            img.put_pixel(x, y, Rgb([value; 3]));
        }
    }
}

/// Paint a grained rectangle in place.
pub fn paint_grain(img: &mut RgbImage, rect: BoundingBox) {
    for y in rect.y..rect.bottom().min(img.height()) {
        for x in rect.x..rect.right().min(img.width()) {
            img.put_pixel(x, y, Rgb([grain(x, y); 3]));
        }
    }
}

/// Grayscale copy of an RGB test image.
pub fn gray(img: &RgbImage) -> GrayImage {
    GrayImage::from_fn(img.width(), img.height(), |x, y| {
        Luma([img.get_pixel(x, y).0[0]])
    })
}

/// Mask with one filled rectangle.
pub fn rect_mask(width: u32, height: u32, rect: BoundingBox) -> Mask {
    Mask::from_fn(width, height, |x, y| inside(rect, x, y))
}

/// Mask with a filled disk.
pub fn disk_mask(width: u32, height: u32, cx: f64, cy: f64, radius: f64) -> Mask {
    Mask::from_fn(width, height, |x, y| {
        let dx = f64::from(x) - cx;
        let dy = f64::from(y) - cy;
        dx.hypot(dy) <= radius
    })
}

const fn inside(rect: BoundingBox, x: u32, y: u32) -> bool {
    x >= rect.x && x < rect.x + rect.width && y >= rect.y && y < rect.y + rect.height
}
