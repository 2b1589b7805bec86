//! Face alignment via 4-DOF similarity transform.
//!
//! Maps the five detected landmarks onto the InsightFace 112×112 template
//! (least squares, closed form) and warps the RGB crop with `imageproc`.

use image::{Rgb, RgbImage};
use imageproc::geometric_transformations::{warp_into, Interpolation, Projection};

/// ArcFace reference landmarks for a 112×112 output.
const REFERENCE_LANDMARKS_112: [(f32, f32); 5] = [
    (38.2946, 51.6963), // left eye
    (73.5318, 51.5014), // right eye
    (56.0252, 71.7366), // nose
    (41.5493, 92.3655), // left mouth
    (70.7299, 92.2041), // right mouth
];

pub const ALIGNED_SIZE: u32 = 112;

/// Least-squares similarity transform (scale, rotation, translation) taking
/// `src` points onto `dst` points.
///
/// Returns the row-major 3×3 matrix
/// ```text
/// | a  -b  tx |
/// | b   a  ty |
/// | 0   0   1 |
/// ```
fn estimate_similarity(src: &[(f32, f32); 5], dst: &[(f32, f32); 5]) -> [f32; 9] {
    let mean = |pts: &[(f32, f32); 5]| {
        let (sx, sy) = pts.iter().fold((0.0, 0.0), |(ax, ay), &(x, y)| (ax + x, ay + y));
        (sx / 5.0, sy / 5.0)
    };
    let (msx, msy) = mean(src);
    let (mdx, mdy) = mean(dst);

    let mut num_a = 0.0f32;
    let mut num_b = 0.0f32;
    let mut denom = 0.0f32;
    for (&(sx, sy), &(dx, dy)) in src.iter().zip(dst.iter()) {
        let (ux, uy) = (sx - msx, sy - msy);
        let (vx, vy) = (dx - mdx, dy - mdy);
        num_a += ux * vx + uy * vy;
        num_b += ux * vy - uy * vx;
        denom += ux * ux + uy * uy;
    }

    // Degenerate landmarks (all on one point): fall back to a pure translation.
    let (a, b) = if denom > 1e-12 { (num_a / denom, num_b / denom) } else { (1.0, 0.0) };
    let tx = mdx - (a * msx - b * msy);
    let ty = mdy - (b * msx + a * msy);

    [a, -b, tx, b, a, ty, 0.0, 0.0, 1.0]
}

/// Warp the face described by `landmarks` into a canonical 112×112 RGB crop.
/// Pixels that fall outside the frame are black.
pub fn align_face(frame: &RgbImage, landmarks: &[(f32, f32); 5]) -> RgbImage {
    let mut aligned = RgbImage::new(ALIGNED_SIZE, ALIGNED_SIZE);
    let matrix = estimate_similarity(landmarks, &REFERENCE_LANDMARKS_112);
    if let Some(projection) = Projection::from_matrix(matrix) {
        warp_into(frame, &projection, Interpolation::Bilinear, Rgb([0, 0, 0]), &mut aligned);
    }
    aligned
}
