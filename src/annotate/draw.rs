//! Pixel primitives on `RgbImage`. Coordinates are inclusive and clamped to the
//! image; shapes entirely outside the image draw nothing.

use image::{Rgb, RgbImage};

use crate::detect::BoundingBox;

/// Clamp a box to the image, or `None` when it lies entirely outside.
pub fn clip(image: &RgbImage, bbox: BoundingBox) -> Option<BoundingBox> {
    let (width, height) = (image.width() as i32, image.height() as i32);
    let (left, right) = (bbox.x1.min(bbox.x2), bbox.x1.max(bbox.x2));
    let (top, bottom) = (bbox.y1.min(bbox.y2), bbox.y1.max(bbox.y2));
    if width == 0 || height == 0 || right < 0 || bottom < 0 || left >= width || top >= height {
        return None;
    }
    Some(BoundingBox::new(
        left.clamp(0, width - 1),
        top.clamp(0, height - 1),
        right.clamp(0, width - 1),
        bottom.clamp(0, height - 1),
    ))
}

pub fn fill_rect(image: &mut RgbImage, bbox: BoundingBox, color: Rgb<u8>) {
    let Some(b) = clip(image, bbox) else {
        return;
    };
    for y in b.y1..=b.y2 {
        for x in b.x1..=b.x2 {
            image.put_pixel(x as u32, y as u32, color);
        }
    }
}

/// Outline `thickness` pixels wide, growing inward from the box edge.
pub fn stroke_rect(image: &mut RgbImage, bbox: BoundingBox, color: Rgb<u8>, thickness: i32) {
    for inset in 0..thickness.max(1) {
        let (x1, y1) = (bbox.x1 + inset, bbox.y1 + inset);
        let (x2, y2) = (bbox.x2 - inset, bbox.y2 - inset);
        if x1 > x2 || y1 > y2 {
            break;
        }
        hline(image, x1, x2, y1, color);
        hline(image, x1, x2, y2, color);
        vline(image, x1, y1, y2, color);
        vline(image, x2, y1, y2, color);
    }
}

/// L-shaped accents of `length` pixels at each corner.
pub fn corner_accents(
    image: &mut RgbImage,
    bbox: BoundingBox,
    length: i32,
    color: Rgb<u8>,
    thickness: i32,
) {
    if length <= 0 {
        return;
    }
    let BoundingBox { x1, y1, x2, y2 } = bbox;
    for t in 0..thickness.max(1) {
        hline(image, x1, x1 + length, y1 + t, color);
        vline(image, x1 + t, y1, y1 + length, color);
        hline(image, x2 - length, x2, y1 + t, color);
        vline(image, x2 - t, y1, y1 + length, color);
        hline(image, x1, x1 + length, y2 - t, color);
        vline(image, x1 + t, y2 - length, y2, color);
        hline(image, x2 - length, x2, y2 - t, color);
        vline(image, x2 - t, y2 - length, y2, color);
    }
}

fn hline(image: &mut RgbImage, x1: i32, x2: i32, y: i32, color: Rgb<u8>) {
    fill_rect(image, BoundingBox::new(x1, y, x2, y), color);
}

fn vline(image: &mut RgbImage, x: i32, y1: i32, y2: i32, color: Rgb<u8>) {
    fill_rect(image, BoundingBox::new(x, y1, x, y2), color);
}

/// `overlay * alpha + base * (1 - alpha)`, per channel. Both images must share dimensions.
pub fn blend(overlay: &RgbImage, base: &RgbImage, alpha: f32) -> RgbImage {
    let alpha = alpha.clamp(0.0, 1.0);
    let mut out = base.clone();
    for (dst, (o, b)) in out
        .pixels_mut()
        .zip(overlay.pixels().zip(base.pixels()))
    {
        for c in 0..3 {
            let mixed = f32::from(o[c]) * alpha + f32::from(b[c]) * (1.0 - alpha);
            dst[c] = mixed.round().clamp(0.0, 255.0) as u8;
        }
    }
    out
}
