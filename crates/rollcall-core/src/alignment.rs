//! Face alignment to the 112×112 ArcFace canonical pose.
//!
//! With landmarks, a least-squares similarity transform (scale, rotation,
//! translation) maps the five detected points onto the InsightFace reference
//! points. Without landmarks the box is cropped and resized.

use crate::types::BoundingBox;
use image::imageops::{self, FilterType};
use image::{GrayImage, Luma};

pub const ALIGNED_SIZE: u32 = 112;

/// InsightFace reference landmarks for a 112×112 crop.
const REFERENCE_LANDMARKS: [(f32, f32); 5] = [
    (38.2946, 51.6963),
    (73.5318, 51.5014),
    (56.0252, 71.7366),
    (41.5493, 92.3655),
    (70.7299, 92.2041),
];

/// Similarity transform `dst = [a -b; b a] · src + (tx, ty)`.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Similarity {
    a: f32,
    b: f32,
    tx: f32,
    ty: f32,
}

impl Similarity {
    /// Closed-form least-squares fit over centred point sets.
    fn estimate(src: &[(f32, f32); 5], dst: &[(f32, f32); 5]) -> Option<Self> {
        let n = src.len() as f32;
        let mean = |pts: &[(f32, f32); 5]| {
            let (sx, sy) = pts.iter().fold((0.0, 0.0), |acc, p| (acc.0 + p.0, acc.1 + p.1));
            (sx / n, sy / n)
        };
        let (msx, msy) = mean(src);
        let (mdx, mdy) = mean(dst);

        let mut norm = 0.0f32;
        let mut dot = 0.0f32;
        let mut cross = 0.0f32;
        for (s, d) in src.iter().zip(dst.iter()) {
            let (sx, sy) = (s.0 - msx, s.1 - msy);
            let (dx, dy) = (d.0 - mdx, d.1 - mdy);
            norm += sx * sx + sy * sy;
            dot += sx * dx + sy * dy;
            cross += sx * dy - sy * dx;
        }
        if norm < 1e-9 {
            return None;
        }

        let a = dot / norm;
        let b = cross / norm;
        Some(Self {
            a,
            b,
            tx: mdx - (a * msx - b * msy),
            ty: mdy - (b * msx + a * msy),
        })
    }

    /// Map an output-space point back to the source frame.
    fn invert_point(&self, x: f32, y: f32) -> (f32, f32) {
        let det = self.a * self.a + self.b * self.b;
        let (px, py) = (x - self.tx, y - self.ty);
        ((self.a * px + self.b * py) / det, (-self.b * px + self.a * py) / det)
    }
}

/// Produce the 112×112 grayscale crop handed to the recognizer.
pub fn align_face(frame: &GrayImage, face: &BoundingBox) -> GrayImage {
    match face
        .landmarks
        .as_ref()
        .and_then(|lms| Similarity::estimate(lms, &REFERENCE_LANDMARKS))
    {
        Some(transform) => warp(frame, &transform),
        None => crop_resize(frame, face),
    }
}

fn warp(frame: &GrayImage, transform: &Similarity) -> GrayImage {
    GrayImage::from_fn(ALIGNED_SIZE, ALIGNED_SIZE, |x, y| {
        let (sx, sy) = transform.invert_point(x as f32, y as f32);
        imageops::interpolate_bilinear(frame, sx, sy).unwrap_or(Luma([0]))
    })
}

fn crop_resize(frame: &GrayImage, face: &BoundingBox) -> GrayImage {
    let x = face.x.max(0.0) as u32;
    let y = face.y.max(0.0) as u32;
    let w = (face.width.max(1.0) as u32).min(frame.width().saturating_sub(x)).max(1);
    let h = (face.height.max(1.0) as u32).min(frame.height().saturating_sub(y)).max(1);
    let crop = imageops::crop_imm(frame, x, y, w, h).to_image();
    imageops::resize(&crop, ALIGNED_SIZE, ALIGNED_SIZE, FilterType::Triangle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_identity() {
        let t = Similarity::estimate(&REFERENCE_LANDMARKS, &REFERENCE_LANDMARKS).unwrap();
        assert!((t.a - 1.0).abs() < 1e-4);
        assert!(t.b.abs() < 1e-4);
        assert!(t.tx.abs() < 1e-3);
        assert!(t.ty.abs() < 1e-3);
    }

    #[test]
    fn test_estimate_recovers_scale_and_shift() {
        // src = (ref - 10) / 2  →  ref = 2·src + 10
        let src = REFERENCE_LANDMARKS.map(|(x, y)| ((x - 10.0) / 2.0, (y - 10.0) / 2.0));
        let t = Similarity::estimate(&src, &REFERENCE_LANDMARKS).unwrap();
        assert!((t.a - 2.0).abs() < 1e-3);
        assert!(t.b.abs() < 1e-3);
        assert!((t.tx - 10.0).abs() < 1e-2);
        assert!((t.ty - 10.0).abs() < 1e-2);

        let (x, y) = t.invert_point(REFERENCE_LANDMARKS[0].0, REFERENCE_LANDMARKS[0].1);
        assert!((x - src[0].0).abs() < 1e-2);
        assert!((y - src[0].1).abs() < 1e-2);
    }

    #[test]
    fn test_degenerate_landmarks_fall_back_to_crop() {
        let frame = GrayImage::from_pixel(200, 200, Luma([90]));
        let face = BoundingBox {
            x: 50.0, y: 50.0, width: 80.0, height: 80.0,
            confidence: 0.9, landmarks: Some([(60.0, 60.0); 5]),
        };
        let aligned = align_face(&frame, &face);
        assert_eq!(aligned.dimensions(), (ALIGNED_SIZE, ALIGNED_SIZE));
        assert!(aligned.pixels().all(|p| p.0[0] == 90));
    }

    #[test]
    fn test_crop_clamps_to_frame() {
        let frame = GrayImage::from_pixel(100, 100, Luma([40]));
        let face = BoundingBox {
            x: 80.0, y: 80.0, width: 60.0, height: 60.0,
            confidence: 0.9, landmarks: None,
        };
        let aligned = align_face(&frame, &face);
        assert_eq!(aligned.dimensions(), (ALIGNED_SIZE, ALIGNED_SIZE));
    }
}
