//! Fusion of match distance, image quality and temporal consistency into a
//! single per-detection confidence.

use crate::quality::{self, QualityWeights};
use crate::types::{BoundingBox, ConfidenceReport, Detection, QualityBreakdown};
use image::GrayImage;
use serde::{Deserialize, Serialize};

const POOR_QUALITY: f32 = 0.5;
const INCONSISTENT_TEMPORAL: f32 = 0.3;
const MIN_FACE_AREA: f32 = 50.0 * 50.0;
const MAX_FACE_AREA: f32 = 300.0 * 300.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionWeights {
    pub distance: f32,
    pub quality: f32,
    pub temporal: f32,
}

impl Default for FusionWeights {
    fn default() -> Self {
        Self {
            distance: 0.5,
            quality: 0.3,
            temporal: 0.2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfidenceScorer {
    pub quality_weights: QualityWeights,
    pub fusion_weights: FusionWeights,
    pub min_confidence: f32,
}

impl Default for ConfidenceScorer {
    fn default() -> Self {
        Self {
            quality_weights: QualityWeights::default(),
            fusion_weights: FusionWeights::default(),
            min_confidence: 0.6,
        }
    }
}

/// Problems found in one detection, with suggested fixes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectionReview {
    pub is_valid: bool,
    pub issues: Vec<String>,
    pub recommendations: Vec<String>,
}

impl ConfidenceScorer {
    pub fn score(
        &self,
        bbox: &BoundingBox,
        frame: &GrayImage,
        distance_confidence: f32,
        temporal_score: f32,
    ) -> (QualityBreakdown, ConfidenceReport) {
        let quality = quality::assess(frame, bbox, &self.quality_weights);
        (quality, self.fuse(distance_confidence, quality.score, temporal_score))
    }

    pub fn fuse(
        &self,
        distance_confidence: f32,
        quality_score: f32,
        temporal_score: f32,
    ) -> ConfidenceReport {
        let w = &self.fusion_weights;
        let fused_confidence = w.distance * distance_confidence
            + w.quality * quality_score
            + w.temporal * temporal_score;
        ConfidenceReport {
            distance_confidence,
            quality_score,
            temporal_score,
            fused_confidence,
            is_valid: fused_confidence >= self.min_confidence,
        }
    }

    pub fn review(&self, detection: &Detection) -> DetectionReview {
        let report = &detection.confidence;
        let mut issues = Vec::new();
        let mut recommendations = Vec::new();
        let mut is_valid = true;

        if report.fused_confidence < self.min_confidence {
            is_valid = false;
            issues.push(format!("low confidence: {:.2}", report.fused_confidence));
            recommendations.push("improve lighting or move closer to the camera".to_string());
        }
        if report.quality_score < POOR_QUALITY {
            issues.push(format!("poor image quality: {:.2}", report.quality_score));
            recommendations.push("check focus and lighting".to_string());
        }
        if report.temporal_score < INCONSISTENT_TEMPORAL {
            issues.push(format!("inconsistent detection: {:.2}", report.temporal_score));
            recommendations.push("hold still for a few frames".to_string());
        }

        let bbox = &detection.bbox;
        let area = bbox.area();
        if area < MIN_FACE_AREA {
            issues.push(format!("face too small: {:.0}x{:.0}", bbox.width, bbox.height));
            recommendations.push("move closer to the camera".to_string());
        } else if area > MAX_FACE_AREA {
            issues.push(format!("face too large: {:.0}x{:.0}", bbox.width, bbox.height));
            recommendations.push("move further from the camera".to_string());
        }

        DetectionReview {
            is_valid,
            issues,
            recommendations,
        }
    }
}
