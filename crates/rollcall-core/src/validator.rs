//! Multi-frame validation: an identity is accepted only after it has been
//! seen consistently over several processed frames.

use crate::types::{Detection, Resolution};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidatorSettings {
    pub required_frames: usize,
    /// Minimum mean confidence across the window.
    pub confidence_threshold: f32,
    /// Maximum sample standard deviation of confidences.
    pub max_std_dev: f32,
    /// Observations kept per identity; older ones are dropped.
    pub window: usize,
}

impl Default for ValidatorSettings {
    fn default() -> Self {
        Self {
            required_frames: 3,
            confidence_threshold: 0.7,
            max_std_dev: 0.3,
            window: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub frame_id: u64,
    pub confidence: f32,
    pub detection: Detection,
}

#[derive(Debug, Default)]
pub struct MultiFrameValidator {
    settings: ValidatorSettings,
    pending: HashMap<String, Vec<Observation>>,
}

impl MultiFrameValidator {
    pub fn new(settings: ValidatorSettings) -> Self {
        Self {
            settings,
            pending: HashMap::new(),
        }
    }

    pub fn settings(&self) -> &ValidatorSettings {
        &self.settings
    }

    /// Record a detection. Unknown faces are ignored.
    pub fn observe(&mut self, frame_id: u64, detection: Detection) {
        let Resolution::Known(identity) = &detection.resolution else {
            return;
        };
        let window = self.settings.window.max(self.settings.required_frames).max(1);
        let list = self.pending.entry(identity.id.clone()).or_default();
        list.push(Observation {
            frame_id,
            confidence: detection.confidence.fused_confidence,
            detection,
        });
        if list.len() > window {
            let excess = list.len() - window;
            list.drain(..excess);
        }
    }

    pub fn is_validated(&self, identity_id: &str) -> bool {
        self.pending
            .get(identity_id)
            .map(|list| self.passes(list))
            .unwrap_or(false)
    }

    /// Latest observation of every validated identity, ordered by id.
    pub fn validated(&self) -> Vec<Observation> {
        let mut out: Vec<(&String, &Observation)> = self
            .pending
            .iter()
            .filter(|(_, list)| self.passes(list))
            .filter_map(|(id, list)| list.iter().max_by_key(|o| o.frame_id).map(|o| (id, o)))
            .collect();
        out.sort_by(|a, b| a.0.cmp(b.0));
        out.into_iter().map(|(_, o)| o.clone()).collect()
    }

    pub fn clear(&mut self, identity_id: &str) {
        self.pending.remove(identity_id);
    }

    pub fn reset(&mut self) {
        self.pending.clear();
    }

    pub fn pending_identities(&self) -> usize {
        self.pending.len()
    }

    fn passes(&self, list: &[Observation]) -> bool {
        if list.len() < self.settings.required_frames || list.is_empty() {
            return false;
        }
        let n = list.len() as f32;
        let mean = list.iter().map(|o| o.confidence).sum::<f32>() / n;
        // Bessel-corrected; a single observation has no spread.
        let variance = if list.len() > 1 {
            list.iter().map(|o| (o.confidence - mean).powi(2)).sum::<f32>() / (n - 1.0)
        } else {
            0.0
        };
        mean >= self.settings.confidence_threshold && variance.sqrt() <= self.settings.max_std_dev
    }
}
