//! Evidence frame annotation.

use crate::types::FaceRegion;
use image::{Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;

/// Outline colour for a recognised face.
pub const EVIDENCE_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
pub const EVIDENCE_THICKNESS: u32 = 2;

/// Draw a rectangle outline around `region`, `thickness` pixels wide and
/// growing inward. Parts outside the image are clipped.
pub fn outline_region(image: &mut RgbImage, region: &FaceRegion, color: Rgb<u8>, thickness: u32) {
    // Same integer truncation as the detector coordinates get everywhere else.
    let x = region.x as i32;
    let y = region.y as i32;
    let w = region.width as u32;
    let h = region.height as u32;

    for k in 0..thickness {
        let (kw, kh) = match (w.checked_sub(2 * k), h.checked_sub(2 * k)) {
            (Some(kw), Some(kh)) if kw > 0 && kh > 0 => (kw, kh),
            _ => break,
        };
        let rect = Rect::at(x + k as i32, y + k as i32).of_size(kw, kh);
        draw_hollow_rect_mut(image, rect, color);
    }
}

/// Copy of `frame` with the evidence outline drawn around `region`.
pub fn evidence_image(frame: &RgbImage, region: &FaceRegion) -> RgbImage {
    let mut annotated = frame.clone();
    outline_region(&mut annotated, region, EVIDENCE_COLOR, EVIDENCE_THICKNESS);
    annotated
}
