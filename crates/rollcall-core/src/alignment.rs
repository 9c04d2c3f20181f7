//! Face alignment via a 4-DOF similarity transform.
//!
//! Warps a detected face onto the canonical 112×112 crop expected by the
//! recognition models, using the five reference landmarks shared by the
//! ArcFace and SFace training pipelines.

use image::{Rgb, RgbImage};

/// Reference landmarks for a 112×112 aligned crop.
pub const REFERENCE_LANDMARKS_112: [(f32, f32); 5] = [
    (38.2946, 51.6963), // left eye
    (73.5318, 51.5014), // right eye
    (56.0252, 71.7366), // nose
    (41.5493, 92.3655), // left mouth
    (70.7299, 92.2041), // right mouth
];

pub const ALIGNED_SIZE: u32 = 112;

/// Least-squares similarity transform (scale, rotation, translation) mapping
/// `src` points onto `dst` points.
///
/// Returns `[a, -b, tx, b, a, ty]`, i.e. the matrix
/// ```text
/// | a  -b  tx |
/// | b   a  ty |
/// ```
pub fn similarity_transform(src: &[(f32, f32); 5], dst: &[(f32, f32); 5]) -> [f32; 6] {
    let mean = |pts: &[(f32, f32); 5]| {
        let (sx, sy) = pts.iter().fold((0.0, 0.0), |(ax, ay), &(x, y)| (ax + x, ay + y));
        (sx / 5.0, sy / 5.0)
    };
    let (src_mx, src_my) = mean(src);
    let (dst_mx, dst_my) = mean(dst);

    // Closed form on centred coordinates:
    //   a = Σ(p·u + q·v) / Σ(u² + v²),  b = Σ(q·u − p·v) / Σ(u² + v²)
    let mut num_a = 0.0f32;
    let mut num_b = 0.0f32;
    let mut denom = 0.0f32;
    for (&(sx, sy), &(dx, dy)) in src.iter().zip(dst.iter()) {
        let (u, v) = (sx - src_mx, sy - src_my);
        let (p, q) = (dx - dst_mx, dy - dst_my);
        num_a += p * u + q * v;
        num_b += q * u - p * v;
        denom += u * u + v * v;
    }

    if denom < 1e-12 {
        // Degenerate landmarks (all coincident): translate only.
        return [1.0, 0.0, dst_mx - src_mx, 0.0, 1.0, dst_my - src_my];
    }

    let a = num_a / denom;
    let b = num_b / denom;
    let tx = dst_mx - (a * src_mx - b * src_my);
    let ty = dst_my - (b * src_mx + a * src_my);

    [a, -b, tx, b, a, ty]
}

/// Bilinear RGB sample; pixels outside the image read as black.
fn sample(image: &RgbImage, x: f32, y: f32) -> [f32; 3] {
    let (w, h) = (image.width() as i64, image.height() as i64);
    let x0 = x.floor() as i64;
    let y0 = y.floor() as i64;
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let px = |xi: i64, yi: i64| -> [f32; 3] {
        if xi >= 0 && xi < w && yi >= 0 && yi < h {
            let Rgb([r, g, b]) = *image.get_pixel(xi as u32, yi as u32);
            [r as f32, g as f32, b as f32]
        } else {
            [0.0; 3]
        }
    };

    let (tl, tr, bl, br) = (px(x0, y0), px(x0 + 1, y0), px(x0, y0 + 1), px(x0 + 1, y0 + 1));
    std::array::from_fn(|c| {
        tl[c] * (1.0 - fx) * (1.0 - fy)
            + tr[c] * fx * (1.0 - fy)
            + bl[c] * (1.0 - fx) * fy
            + br[c] * fx * fy
    })
}

/// Warp `image` through the similarity transform `m` into a square output.
fn warp_similarity(image: &RgbImage, m: &[f32; 6], out_size: u32) -> RgbImage {
    let (a, b, tx, ty) = (m[0], m[3], m[2], m[5]);
    let det = a * a + b * b;
    if det < 1e-12 {
        return RgbImage::new(out_size, out_size);
    }

    RgbImage::from_fn(out_size, out_size, |ox, oy| {
        // Inverse mapping: src = M⁻¹ · (dst − t)
        let dx = ox as f32 - tx;
        let dy = oy as f32 - ty;
        let sx = (a * dx + b * dy) / det;
        let sy = (-b * dx + a * dy) / det;
        let [r, g, bl] = sample(image, sx, sy);
        Rgb([
            r.round().clamp(0.0, 255.0) as u8,
            g.round().clamp(0.0, 255.0) as u8,
            bl.round().clamp(0.0, 255.0) as u8,
        ])
    })
}

/// Align a detected face to the canonical 112×112 crop.
pub fn align_face(image: &RgbImage, landmarks: &[(f32, f32); 5]) -> RgbImage {
    let m = similarity_transform(landmarks, &REFERENCE_LANDMARKS_112);
    warp_similarity(image, &m, ALIGNED_SIZE)
}
