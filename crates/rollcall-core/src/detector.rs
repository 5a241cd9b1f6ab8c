//! SCRFD face localization via ONNX Runtime.
//!
//! Letterboxes the grayscale frame to the 640×640 model input, decodes the
//! three anchor-free stride heads and suppresses overlaps with NMS.

use crate::provider::ProviderError;
use crate::types::BoundingBox;
use image::imageops::{self, FilterType};
use image::GrayImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;

const INPUT_SIZE: u32 = 640;
const PIXEL_MEAN: f32 = 127.5;
const PIXEL_STD: f32 = 128.0;
const SCORE_THRESHOLD: f32 = 0.5;
const NMS_IOU: f32 = 0.4;
const STRIDES: [usize; 3] = [8, 16, 32];
const ANCHORS_PER_CELL: usize = 2;

/// Maps model-input coordinates back onto the source frame.
#[derive(Debug, Clone, Copy)]
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

impl Letterbox {
    fn fit(width: u32, height: u32) -> Self {
        let scale = (INPUT_SIZE as f32 / width as f32).min(INPUT_SIZE as f32 / height as f32);
        let (new_w, new_h) = scaled_dims(width, height, scale);
        Self {
            scale,
            pad_x: (INPUT_SIZE - new_w) as f32 / 2.0,
            pad_y: (INPUT_SIZE - new_h) as f32 / 2.0,
        }
    }

    fn to_frame(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

fn scaled_dims(width: u32, height: u32, scale: f32) -> (u32, u32) {
    let w = ((width as f32 * scale).round() as u32).clamp(1, INPUT_SIZE);
    let h = ((height as f32 * scale).round() as u32).clamp(1, INPUT_SIZE);
    (w, h)
}

/// Output tensor positions (score, bbox, kps) for one stride.
type HeadIndices = (usize, usize, usize);

pub struct FaceDetector {
    session: Session,
    heads: [HeadIndices; 3],
}

impl FaceDetector {
    pub fn load(model_path: &Path) -> Result<Self, ProviderError> {
        if !model_path.exists() {
            return Err(ProviderError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let names: Vec<String> = session.outputs().iter().map(|o| o.name().to_string()).collect();
        if names.len() < 9 {
            return Err(ProviderError::InferenceFailed(format!(
                "SCRFD needs 9 outputs (score/bbox/kps per stride), model has {}",
                names.len()
            )));
        }
        let heads = head_indices(&names);

        tracing::info!(
            path = %model_path.display(),
            outputs = ?names,
            ?heads,
            "loaded SCRFD model"
        );

        Ok(Self { session, heads })
    }

    /// Locate faces, highest confidence first.
    pub fn detect(&mut self, frame: &GrayImage) -> Result<Vec<BoundingBox>, ProviderError> {
        if frame.width() == 0 || frame.height() == 0 {
            return Ok(Vec::new());
        }
        let (input, letterbox) = letterbox_tensor(frame);
        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut candidates = Vec::new();
        for (pos, &stride) in STRIDES.iter().enumerate() {
            let (score_idx, bbox_idx, kps_idx) = self.heads[pos];
            let extract = |idx: usize, what: &str| {
                outputs[idx]
                    .try_extract_tensor::<f32>()
                    .map(|(_, data)| data.to_vec())
                    .map_err(|e| {
                        ProviderError::InferenceFailed(format!("{what} stride {stride}: {e}"))
                    })
            };
            let head = StrideHead {
                stride,
                scores: extract(score_idx, "scores")?,
                boxes: extract(bbox_idx, "boxes")?,
                keypoints: extract(kps_idx, "keypoints")?,
            };
            candidates.extend(head.decode(&letterbox, SCORE_THRESHOLD));
        }

        Ok(nms(candidates, NMS_IOU))
    }
}

/// Resize into the letterboxed NCHW tensor. Padding is filled with the
/// normalization mean so it maps to 0.0.
fn letterbox_tensor(frame: &GrayImage) -> (Array4<f32>, Letterbox) {
    let letterbox = Letterbox::fit(frame.width(), frame.height());
    let (new_w, new_h) = scaled_dims(frame.width(), frame.height(), letterbox.scale);
    let resized = imageops::resize(frame, new_w, new_h, FilterType::Triangle);

    let size = INPUT_SIZE as usize;
    let off_x = letterbox.pad_x.floor() as u32;
    let off_y = letterbox.pad_y.floor() as u32;
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));

    for (x, y, pixel) in resized.enumerate_pixels() {
        let tx = (x + off_x) as usize;
        let ty = (y + off_y) as usize;
        if tx >= size || ty >= size {
            continue;
        }
        let value = (pixel.0[0] as f32 - PIXEL_MEAN) / PIXEL_STD;
        for c in 0..3 {
            tensor[[0, c, ty, tx]] = value;
        }
    }

    (tensor, letterbox)
}

/// Resolve output positions from tensor names ("score_8", "bbox_16", ...),
/// falling back to the export's positional layout
/// `[scores 8/16/32, boxes 8/16/32, kps 8/16/32]`.
fn head_indices(names: &[String]) -> [HeadIndices; 3] {
    let position = |kind: &str, stride: usize| {
        let wanted = format!("{kind}_{stride}");
        names.iter().position(|n| *n == wanted)
    };

    let mut named = [(0, 0, 0); 3];
    for (slot, &stride) in STRIDES.iter().enumerate() {
        match (position("score", stride), position("bbox", stride), position("kps", stride)) {
            (Some(s), Some(b), Some(k)) => named[slot] = (s, b, k),
            _ => return [(0, 3, 6), (1, 4, 7), (2, 5, 8)],
        }
    }
    named
}

struct StrideHead {
    stride: usize,
    scores: Vec<f32>,
    boxes: Vec<f32>,
    keypoints: Vec<f32>,
}

impl StrideHead {
    fn decode(&self, letterbox: &Letterbox, threshold: f32) -> Vec<BoundingBox> {
        let grid_w = INPUT_SIZE as usize / self.stride;
        let step = self.stride as f32;

        self.scores
            .iter()
            .enumerate()
            .filter(|(_, score)| **score > threshold)
            .filter_map(|(idx, &score)| {
                let cell = idx / ANCHORS_PER_CELL;
                let anchor_x = (cell % grid_w) as f32 * step;
                let anchor_y = (cell / grid_w) as f32 * step;

                let offsets = self.boxes.get(idx * 4..idx * 4 + 4)?;
                let (x1, y1) = letterbox
                    .to_frame(anchor_x - offsets[0] * step, anchor_y - offsets[1] * step);
                let (x2, y2) = letterbox
                    .to_frame(anchor_x + offsets[2] * step, anchor_y + offsets[3] * step);

                let landmarks = self.keypoints.get(idx * 10..idx * 10 + 10).map(|kps| {
                    std::array::from_fn(|i| {
                        letterbox.to_frame(
                            anchor_x + kps[i * 2] * step,
                            anchor_y + kps[i * 2 + 1] * step,
                        )
                    })
                });

                Some(BoundingBox {
                    x: x1,
                    y: y1,
                    width: x2 - x1,
                    height: y2 - y1,
                    confidence: score,
                    landmarks,
                })
            })
            .collect()
    }
}

/// Greedy non-maximum suppression; output sorted by confidence, descending.
fn nms(mut candidates: Vec<BoundingBox>, iou_threshold: f32) -> Vec<BoundingBox> {
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut kept: Vec<BoundingBox> = Vec::new();
    for candidate in candidates {
        if kept.iter().all(|k| iou(k, &candidate) <= iou_threshold) {
            kept.push(candidate);
        }
    }
    kept
}

fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let inter_w = ((a.x + a.width).min(b.x + b.width) - a.x.max(b.x)).max(0.0);
    let inter_h = ((a.y + a.height).min(b.y + b.height) - a.y.max(b.y)).max(0.0);
    let inter = inter_w * inter_h;
    let union = a.area() + b.area() - inter;
    if union > 0.0 { inter / union } else { 0.0 }
}
