use crate::types::Descriptor;
use serde::Serialize;
use std::collections::VecDeque;

pub const DEFAULT_HISTORY: usize = 5;
/// Consistency reported before anything has been observed.
const NEUTRAL_CONSISTENCY: f32 = 0.5;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ConfidenceStatistics {
    pub average: f32,
    pub min: f32,
    pub max: f32,
    pub std: f32,
    pub samples: usize,
}

/// Bounded history of recent descriptors and confidences.
#[derive(Debug, Clone)]
pub struct TemporalTracker {
    capacity: usize,
    descriptors: VecDeque<Descriptor>,
    confidences: VecDeque<f32>,
}

impl Default for TemporalTracker {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY)
    }
}

impl TemporalTracker {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            descriptors: VecDeque::with_capacity(capacity),
            confidences: VecDeque::with_capacity(capacity),
        }
    }

    /// Mean cosine similarity of `descriptor` to the history.
    pub fn consistency(&self, descriptor: &Descriptor) -> f32 {
        if self.descriptors.is_empty() {
            return NEUTRAL_CONSISTENCY;
        }
        let total: f32 = self.descriptors.iter().map(|d| descriptor.similarity(d)).sum();
        total / self.descriptors.len() as f32
    }

    pub fn update(&mut self, descriptor: Descriptor, confidence: f32) {
        if self.descriptors.len() == self.capacity {
            self.descriptors.pop_front();
        }
        if self.confidences.len() == self.capacity {
            self.confidences.pop_front();
        }
        self.descriptors.push_back(descriptor);
        self.confidences.push_back(confidence);
    }

    pub fn reset(&mut self) {
        self.descriptors.clear();
        self.confidences.clear();
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    pub fn statistics(&self) -> ConfidenceStatistics {
        let n = self.confidences.len();
        if n == 0 {
            return ConfidenceStatistics::default();
        }
        let average = self.confidences.iter().sum::<f32>() / n as f32;
        let variance = self
            .confidences
            .iter()
            .map(|c| (c - average).powi(2))
            .sum::<f32>()
            / n as f32;
        ConfidenceStatistics {
            average,
            min: self.confidences.iter().copied().fold(f32::INFINITY, f32::min),
            max: self.confidences.iter().copied().fold(f32::NEG_INFINITY, f32::max),
            std: variance.sqrt(),
            samples: n,
        }
    }
}
