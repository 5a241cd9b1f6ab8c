//! Embedding provider seam: face localization plus descriptor generation.

use crate::detector::FaceDetector;
use crate::recognizer::FaceRecognizer;
use crate::types::{BoundingBox, Descriptor};
use image::GrayImage;
use std::path::Path;
use thiserror::Error;

pub const DETECTOR_MODEL_FILE: &str = "det_10g.onnx";
pub const RECOGNIZER_MODEL_FILE: &str = "w600k_r50.onnx";

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("model file not found: {0}; download it from insightface into the model directory")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Locates faces and turns them into descriptors.
///
/// Both calls may legitimately return empty lists. `embed` keeps box order
/// and drops boxes it could not describe.
pub trait EmbeddingProvider: Send {
    fn locate(&mut self, image: &GrayImage) -> Result<Vec<BoundingBox>, ProviderError>;

    fn embed(
        &mut self,
        image: &GrayImage,
        boxes: Vec<BoundingBox>,
    ) -> Result<Vec<(BoundingBox, Descriptor)>, ProviderError>;

    /// Locate then embed, pairing each descriptor with its box.
    fn describe(
        &mut self,
        image: &GrayImage,
    ) -> Result<Vec<(BoundingBox, Descriptor)>, ProviderError> {
        let boxes = self.locate(image)?;
        if boxes.is_empty() {
            return Ok(Vec::new());
        }
        self.embed(image, boxes)
    }
}

/// Describe each box with `extract`, logging and skipping the ones that fail
/// so one bad crop does not cost the rest of the frame.
pub fn embed_each<F>(boxes: Vec<BoundingBox>, mut extract: F) -> Vec<(BoundingBox, Descriptor)>
where
    F: FnMut(&BoundingBox) -> Result<Descriptor, ProviderError>,
{
    let total = boxes.len();
    let described: Vec<_> = boxes
        .into_iter()
        .filter_map(|face| match extract(&face) {
            Ok(descriptor) => Some((face, descriptor)),
            Err(e) => {
                tracing::warn!(
                    x = face.x,
                    y = face.y,
                    error = %e,
                    "descriptor extraction failed; skipping face"
                );
                None
            }
        })
        .collect();
    if described.len() < total {
        tracing::debug!(boxes = total, described = described.len(), "some faces skipped");
    }
    described
}

/// SCRFD localization + ArcFace descriptors.
pub struct OnnxEmbeddingProvider {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
}

impl OnnxEmbeddingProvider {
    /// Load both models from `model_dir`.
    pub fn load(model_dir: &Path) -> Result<Self, ProviderError> {
        let detector = FaceDetector::load(&model_dir.join(DETECTOR_MODEL_FILE))?;
        let recognizer = FaceRecognizer::load(&model_dir.join(RECOGNIZER_MODEL_FILE))?;
        Ok(Self { detector, recognizer })
    }
}

impl EmbeddingProvider for OnnxEmbeddingProvider {
    fn locate(&mut self, image: &GrayImage) -> Result<Vec<BoundingBox>, ProviderError> {
        self.detector.detect(image)
    }

    fn embed(
        &mut self,
        image: &GrayImage,
        boxes: Vec<BoundingBox>,
    ) -> Result<Vec<(BoundingBox, Descriptor)>, ProviderError> {
        let recognizer = &mut self.recognizer;
        Ok(embed_each(boxes, |face| recognizer.extract(image, face)))
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::VecDeque;

    /// Scripted provider: each `describe` pops the next frame's faces.
    pub struct FakeProvider {
        frames: VecDeque<Vec<(BoundingBox, Descriptor)>>,
        pending: Vec<(BoundingBox, Descriptor)>,
        pub locate_calls: usize,
        pub embed_calls: usize,
    }

    impl FakeProvider {
        pub fn new(frames: Vec<Vec<(BoundingBox, Descriptor)>>) -> Self {
            Self {
                frames: frames.into(),
                pending: Vec::new(),
                locate_calls: 0,
                embed_calls: 0,
            }
        }
    }

    impl EmbeddingProvider for FakeProvider {
        fn locate(&mut self, _image: &GrayImage) -> Result<Vec<BoundingBox>, ProviderError> {
            self.locate_calls += 1;
            self.pending = self.frames.pop_front().unwrap_or_default();
            Ok(self.pending.iter().map(|(b, _)| b.clone()).collect())
        }

        /// Replays the descriptors scripted for the last located frame, so
        /// embedding the same boxes twice yields the same pairs.
        fn embed(
            &mut self,
            _image: &GrayImage,
            _boxes: Vec<BoundingBox>,
        ) -> Result<Vec<(BoundingBox, Descriptor)>, ProviderError> {
            self.embed_calls += 1;
            Ok(self.pending.clone())
        }
    }

    pub fn face_box(x: f32, y: f32, size: f32) -> BoundingBox {
        BoundingBox {
            x,
            y,
            width: size,
            height: size,
            confidence: 0.99,
            landmarks: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    #[test]
    fn test_describe_pairs_boxes_and_descriptors() {
        let mut provider = FakeProvider::new(vec![vec![
            (face_box(0.0, 0.0, 10.0), Descriptor::new(vec![1.0, 0.0])),
            (face_box(20.0, 0.0, 10.0), Descriptor::new(vec![0.0, 1.0])),
        ]]);
        let image = GrayImage::new(4, 4);
        let pairs = provider.describe(&image).unwrap();
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[1].0.x, 20.0);
        assert_eq!(pairs[1].1.values, vec![0.0, 1.0]);
    }

    #[test]
    fn test_describe_no_faces_is_empty() {
        let mut provider = FakeProvider::new(vec![]);
        let image = GrayImage::new(4, 4);
        assert!(provider.describe(&image).unwrap().is_empty());
    }

    #[test]
    fn test_failed_box_is_skipped_not_fatal() {
        let boxes = vec![
            face_box(0.0, 0.0, 10.0),
            face_box(20.0, 0.0, 10.0),
            face_box(40.0, 0.0, 10.0),
        ];
        let described = embed_each(boxes, |face| {
            if face.x == 20.0 {
                Err(ProviderError::InferenceFailed("crop outside frame".into()))
            } else {
                Ok(Descriptor::new(vec![face.x, 1.0]))
            }
        });
        assert_eq!(described.len(), 2);
        assert_eq!(described[0].0.x, 0.0);
        assert_eq!(described[1].0.x, 40.0);
        // Descriptors stay with their own box.
        assert_eq!(described[1].1.values, vec![40.0, 1.0]);
    }

    #[test]
    fn test_every_box_failing_yields_empty_frame() {
        let described = embed_each(vec![face_box(0.0, 0.0, 10.0)], |_| {
            Err(ProviderError::InferenceFailed("bad output".into()))
        });
        assert!(described.is_empty());
    }

    #[test]
    fn test_onnx_provider_missing_models() {
        let dir = tempfile::tempdir().unwrap();
        let result = OnnxEmbeddingProvider::load(dir.path());
        assert!(matches!(result, Err(ProviderError::ModelNotFound(_))));
    }
}
