use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Bounding box for a detected face, with optional facial landmarks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

impl BoundingBox {
    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    /// Eye centres, when the detector produced landmarks.
    pub fn eyes(&self) -> Option<((f32, f32), (f32, f32))> {
        self.landmarks.map(|lms| (lms[0], lms[1]))
    }

    /// Map a box found on a frame shrunk by `downscale_factor` back to
    /// original-frame coordinates.
    pub fn rescaled(&self, downscale_factor: f32) -> BoundingBox {
        if downscale_factor <= 0.0 || downscale_factor >= 1.0 {
            return self.clone();
        }
        let inv = 1.0 / downscale_factor;
        BoundingBox {
            x: self.x * inv,
            y: self.y * inv,
            width: self.width * inv,
            height: self.height * inv,
            confidence: self.confidence,
            landmarks: self
                .landmarks
                .map(|lms| lms.map(|(lx, ly)| (lx * inv, ly * inv))),
        }
    }
}

/// Face descriptor (embedding) vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Descriptor {
    pub values: Vec<f32>,
    /// Model version that produced this descriptor (e.g., "w600k_r50").
    pub model_version: Option<String>,
}

impl Descriptor {
    pub fn new(values: Vec<f32>) -> Self {
        Self {
            values,
            model_version: None,
        }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// Cosine similarity in [-1, 1]. Zero-length vectors compare as 0.0.
    pub fn similarity(&self, other: &Descriptor) -> f32 {
        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 { dot / denom } else { 0.0 }
    }

    pub fn euclidean_distance(&self, other: &Descriptor) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }

    /// `1 - cosine similarity`, in [0, 2].
    pub fn cosine_distance(&self, other: &Descriptor) -> f32 {
        1.0 - self.similarity(other)
    }
}

/// Reference to a person in the external identity store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdentityRecord {
    pub id: String,
    pub display_name: String,
    /// Section or group the person belongs to.
    pub group: Option<String>,
    /// External registration number, if the store tracks one.
    pub number: Option<String>,
}

impl IdentityRecord {
    /// Minimal record synthesized from a corpus folder name when the
    /// identity store has no match.
    pub fn from_folder(folder: &str) -> Self {
        Self {
            id: folder.to_string(),
            display_name: folder.to_string(),
            group: Some("Unknown".to_string()),
            number: Some(folder.to_string()),
        }
    }
}

/// Outcome of resolving a descriptor against the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Resolution {
    Known(IdentityRecord),
    Unknown,
}

impl Resolution {
    pub fn is_known(&self) -> bool {
        matches!(self, Resolution::Known(_))
    }

    pub fn identity(&self) -> Option<&IdentityRecord> {
        match self {
            Resolution::Known(identity) => Some(identity),
            Resolution::Unknown => None,
        }
    }

    pub fn label(&self) -> &str {
        match self {
            Resolution::Known(identity) => &identity.display_name,
            Resolution::Unknown => "UNKNOWN",
        }
    }
}

/// Per-factor image quality scores, each in [0, 1].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct QualityBreakdown {
    pub brightness: f32,
    pub contrast: f32,
    pub sharpness: f32,
    pub size: f32,
    pub orientation: f32,
    /// Weighted combination of the factors above.
    pub score: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceReport {
    pub distance_confidence: f32,
    pub quality_score: f32,
    pub temporal_score: f32,
    pub fused_confidence: f32,
    pub is_valid: bool,
}

/// One face found in one processed frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// Box in original-frame coordinates.
    pub bbox: BoundingBox,
    pub descriptor: Descriptor,
    /// Distance to the nearest registry descriptor.
    pub distance: f32,
    pub resolution: Resolution,
    pub quality: QualityBreakdown,
    pub confidence: ConfidenceReport,
}

impl Detection {
    pub fn identity(&self) -> Option<&IdentityRecord> {
        self.resolution.identity()
    }
}

/// A verified "present" event for one identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceEvent {
    pub event_id: Uuid,
    pub identity: IdentityRecord,
    pub timestamp: DateTime<Local>,
    pub confidence: f32,
}

impl AttendanceEvent {
    pub fn new(identity: IdentityRecord, timestamp: DateTime<Local>, confidence: f32) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            identity,
            timestamp,
            confidence,
        }
    }
}
