//! Image-quality factors of a face crop.

use crate::types::{BoundingBox, QualityBreakdown};
use image::{imageops, GrayImage};
use serde::{Deserialize, Serialize};
use std::f32::consts::FRAC_PI_2;

/// Area at which the size factor saturates.
const FULL_SIZE_AREA: f32 = 100.0 * 100.0;
/// Laplacian variance at which the sharpness factor saturates.
const FULL_SHARPNESS_VARIANCE: f64 = 1000.0;
/// Orientation score used when no eye landmarks are available.
const UNKNOWN_ORIENTATION: f32 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityWeights {
    pub brightness: f32,
    pub contrast: f32,
    pub sharpness: f32,
    pub size: f32,
    pub orientation: f32,
}

impl Default for QualityWeights {
    fn default() -> Self {
        Self {
            brightness: 0.2,
            contrast: 0.2,
            sharpness: 0.3,
            size: 0.1,
            orientation: 0.2,
        }
    }
}

/// Score the region of `frame` under `bbox`. The box is clamped to the
/// frame; an empty crop scores zero on every factor.
pub fn assess(frame: &GrayImage, bbox: &BoundingBox, weights: &QualityWeights) -> QualityBreakdown {
    let Some(crop) = crop(frame, bbox) else {
        return QualityBreakdown::default();
    };

    let (mean, std) = mean_std(&crop);
    let brightness = (1.0 - ((mean / 255.0) as f32 - 0.5).abs() * 2.0).clamp(0.0, 1.0);
    let contrast = ((std / 255.0 * 4.0) as f32).min(1.0);
    let sharpness = ((laplacian_variance(&crop) / FULL_SHARPNESS_VARIANCE) as f32).min(1.0);
    let size = (bbox.area() / FULL_SIZE_AREA).min(1.0);
    let orientation = orientation(bbox);

    let score = weights.brightness * brightness
        + weights.contrast * contrast
        + weights.sharpness * sharpness
        + weights.size * size
        + weights.orientation * orientation;

    QualityBreakdown {
        brightness,
        contrast,
        sharpness,
        size,
        orientation,
        score,
    }
}

fn crop(frame: &GrayImage, bbox: &BoundingBox) -> Option<GrayImage> {
    let (fw, fh) = frame.dimensions();
    let x0 = bbox.x.max(0.0).floor() as u32;
    let y0 = bbox.y.max(0.0).floor() as u32;
    let x1 = ((bbox.x + bbox.width).max(0.0).ceil() as u32).min(fw);
    let y1 = ((bbox.y + bbox.height).max(0.0).ceil() as u32).min(fh);
    if x0 >= x1 || y0 >= y1 {
        return None;
    }
    Some(imageops::crop_imm(frame, x0, y0, x1 - x0, y1 - y0).to_image())
}

fn mean_std(crop: &GrayImage) -> (f64, f64) {
    let n = (crop.width() * crop.height()) as f64;
    let mean = crop.pixels().map(|p| p.0[0] as f64).sum::<f64>() / n;
    let var = crop
        .pixels()
        .map(|p| (p.0[0] as f64 - mean).powi(2))
        .sum::<f64>()
        / n;
    (mean, var.sqrt())
}

/// Population variance of the 4-neighbour Laplacian over interior pixels.
fn laplacian_variance(crop: &GrayImage) -> f64 {
    let (w, h) = crop.dimensions();
    if w < 3 || h < 3 {
        return 0.0;
    }
    let px = |x: u32, y: u32| crop.get_pixel(x, y).0[0] as f64;
    let mut responses = Vec::with_capacity(((w - 2) * (h - 2)) as usize);
    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let neighbours = px(x - 1, y) + px(x + 1, y) + px(x, y - 1) + px(x, y + 1);
            responses.push(neighbours - 4.0 * px(x, y));
        }
    }
    let n = responses.len() as f64;
    let mean = responses.iter().sum::<f64>() / n;
    responses.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n
}

/// Eye-line tilt: 1.0 for level eyes, 0.0 at 90°.
fn orientation(bbox: &BoundingBox) -> f32 {
    match bbox.eyes() {
        Some(((lx, ly), (rx, ry))) => {
            let angle = (ry - ly).abs().atan2((rx - lx).abs());
            (1.0 - angle / FRAC_PI_2).max(0.0)
        }
        None => UNKNOWN_ORIENTATION,
    }
}

/// Global histogram equalization. A single-valued image is returned as is.
pub fn equalize_histogram(gray: &GrayImage) -> GrayImage {
    let mut hist = [0u32; 256];
    for p in gray.as_raw() {
        hist[*p as usize] += 1;
    }
    let total = gray.as_raw().len() as u32;
    let cdf_min = hist.iter().copied().find(|&c| c > 0).unwrap_or(0);
    let range = total.saturating_sub(cdf_min);
    if range == 0 {
        return gray.clone();
    }

    let mut lut = [0u8; 256];
    let mut running = 0u32;
    for (slot, &count) in lut.iter_mut().zip(hist.iter()) {
        running += count;
        let scaled = running.saturating_sub(cdf_min) as f32 / range as f32 * 255.0;
        *slot = scaled.round() as u8;
    }

    let mut out = gray.clone();
    for p in out.iter_mut() {
        *p = lut[*p as usize];
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn bbox(x: f32, y: f32, w: f32, h: f32) -> BoundingBox {
        BoundingBox {
            x,
            y,
            width: w,
            height: h,
            confidence: 0.9,
            landmarks: None,
        }
    }

    fn with_eyes(mut b: BoundingBox, left: (f32, f32), right: (f32, f32)) -> BoundingBox {
        b.landmarks = Some([left, right, (0.0, 0.0), (0.0, 0.0), (0.0, 0.0)]);
        b
    }

    #[test]
    fn test_uniform_mid_gray() {
        let frame = GrayImage::from_pixel(200, 200, Luma([127]));
        let q = assess(&frame, &bbox(0.0, 0.0, 100.0, 100.0), &QualityWeights::default());
        assert!(q.brightness > 0.99);
        assert_eq!(q.contrast, 0.0);
        assert_eq!(q.sharpness, 0.0);
        assert!((q.size - 1.0).abs() < 1e-6);
        assert!((q.orientation - 0.5).abs() < 1e-6);
        // 0.2·~1 + 0 + 0 + 0.1·1 + 0.2·0.5
        assert!((q.score - 0.4).abs() < 0.01, "score = {}", q.score);
    }

    #[test]
    fn test_black_crop_has_zero_brightness() {
        let frame = GrayImage::new(50, 50);
        let q = assess(&frame, &bbox(0.0, 0.0, 50.0, 50.0), &QualityWeights::default());
        assert!(q.brightness.abs() < 1e-6);
        assert!((q.size - 0.25).abs() < 1e-6);
    }

    #[test]
    fn test_checkerboard_is_sharp_and_contrasty() {
        let frame = GrayImage::from_fn(64, 64, |x, y| {
            if (x + y) % 2 == 0 { Luma([0]) } else { Luma([255]) }
        });
        let q = assess(&frame, &bbox(0.0, 0.0, 64.0, 64.0), &QualityWeights::default());
        assert!((q.contrast - 1.0).abs() < 1e-6);
        assert!((q.sharpness - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_box_outside_frame_scores_zero() {
        let frame = GrayImage::from_pixel(40, 40, Luma([200]));
        let q = assess(&frame, &bbox(100.0, 100.0, 20.0, 20.0), &QualityWeights::default());
        assert_eq!(q, QualityBreakdown::default());
    }

    #[test]
    fn test_box_is_clamped_to_frame() {
        let frame = GrayImage::from_pixel(40, 40, Luma([127]));
        let q = assess(&frame, &bbox(-10.0, -10.0, 30.0, 30.0), &QualityWeights::default());
        assert!(q.brightness > 0.99);
    }

    #[test]
    fn test_orientation_from_eyes() {
        let level = with_eyes(bbox(0.0, 0.0, 10.0, 10.0), (10.0, 20.0), (30.0, 20.0));
        assert!((orientation(&level) - 1.0).abs() < 1e-6);

        let tilted = with_eyes(bbox(0.0, 0.0, 10.0, 10.0), (10.0, 20.0), (30.0, 40.0));
        assert!((orientation(&tilted) - 0.5).abs() < 1e-5);

        let vertical = with_eyes(bbox(0.0, 0.0, 10.0, 10.0), (10.0, 20.0), (10.0, 40.0));
        assert!(orientation(&vertical).abs() < 1e-6);
    }

    #[test]
    fn test_equalize_stretches_narrow_range() {
        let mut gray = GrayImage::from_pixel(4, 2, Luma([100]));
        for x in 0..4 {
            gray.put_pixel(x, 1, Luma([110]));
        }
        let eq = equalize_histogram(&gray);
        assert_eq!(eq.get_pixel(0, 0).0[0], 0);
        assert_eq!(eq.get_pixel(0, 1).0[0], 255);
        assert_eq!(eq.dimensions(), gray.dimensions());
    }

    #[test]
    fn test_equalize_flat_image_unchanged() {
        let gray = GrayImage::from_pixel(5, 5, Luma([42]));
        assert_eq!(equalize_histogram(&gray), gray);
    }
}
