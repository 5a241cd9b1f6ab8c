use crate::registry::KnownFaceRegistry;
use crate::types::{Descriptor, Resolution};
use serde::{Deserialize, Serialize};

/// Distance reported when there is nothing to compare against.
pub const NO_MATCH_DISTANCE: f32 = 1.0;

/// Result of matching a live descriptor against the registry.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchOutcome {
    pub resolution: Resolution,
    /// Distance to the nearest registry descriptor.
    pub distance: f32,
    /// Registry index of the nearest descriptor.
    pub index: Option<usize>,
}

impl MatchOutcome {
    pub fn distance_confidence(&self) -> f32 {
        distance_confidence(self.distance)
    }
}

pub fn distance_confidence(distance: f32) -> f32 {
    (1.0 - distance).max(0.0)
}

/// Strategy for comparing a live descriptor against the known faces.
pub trait Matcher: Send + Sync {
    fn distance(&self, a: &Descriptor, b: &Descriptor) -> f32;

    /// Nearest neighbour over the whole registry. The candidate is projected
    /// with the registry's projection first. Known iff the minimum
    /// distance is `<= threshold`; ties go to the earliest entry.
    fn best_match(
        &self,
        candidate: &Descriptor,
        registry: &KnownFaceRegistry,
        threshold: f32,
    ) -> MatchOutcome {
        let query = registry.prepare_query(candidate);
        let mut best_distance = f32::INFINITY;
        let mut best_idx: Option<usize> = None;

        for (i, known) in registry.descriptors().iter().enumerate() {
            if known.dim() != query.dim() {
                continue;
            }
            let d = self.distance(&query, known);
            if d < best_distance {
                best_distance = d;
                best_idx = Some(i);
            }
        }

        match best_idx {
            Some(idx) if best_distance <= threshold => MatchOutcome {
                resolution: Resolution::Known(registry.identities()[idx].clone()),
                distance: best_distance,
                index: Some(idx),
            },
            Some(idx) => MatchOutcome {
                resolution: Resolution::Unknown,
                distance: best_distance,
                index: Some(idx),
            },
            None => MatchOutcome {
                resolution: Resolution::Unknown,
                distance: NO_MATCH_DISTANCE,
                index: None,
            },
        }
    }
}

/// L2 distance between descriptors.
pub struct EuclideanMatcher;

impl Matcher for EuclideanMatcher {
    fn distance(&self, a: &Descriptor, b: &Descriptor) -> f32 {
        a.euclidean_distance(b)
    }
}

/// `1 - cosine similarity`.
pub struct CosineMatcher;

impl Matcher for CosineMatcher {
    fn distance(&self, a: &Descriptor, b: &Descriptor) -> f32 {
        a.cosine_distance(b)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMetric {
    #[default]
    Euclidean,
    Cosine,
}

impl DistanceMetric {
    pub fn matcher(self) -> Box<dyn Matcher> {
        match self {
            DistanceMetric::Euclidean => Box::new(EuclideanMatcher),
            DistanceMetric::Cosine => Box::new(CosineMatcher),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::IdentityRecord;

    fn registry(entries: &[(&str, Vec<f32>)]) -> KnownFaceRegistry {
        let mut registry = KnownFaceRegistry::new();
        for (name, values) in entries {
            registry.push(Descriptor::new(values.clone()), IdentityRecord::from_folder(name));
        }
        registry
    }

    fn label(outcome: &MatchOutcome) -> &str {
        outcome.resolution.label()
    }

    #[test]
    fn test_euclidean_threshold_boundary() {
        let known = registry(&[("A", vec![0.0, 0.0])]);
        let candidate = Descriptor::new(vec![0.5, 0.0]);

        let at = EuclideanMatcher.best_match(&candidate, &known, 0.5);
        assert_eq!(label(&at), "A");
        assert!((at.distance - 0.5).abs() < 1e-6);
        assert!((at.distance_confidence() - 0.5).abs() < 1e-6);

        let below = EuclideanMatcher.best_match(&candidate, &known, 0.5 - 1e-4);
        assert_eq!(below.resolution, Resolution::Unknown);
        assert!((below.distance - 0.5).abs() < 1e-6);

        let above = EuclideanMatcher.best_match(&candidate, &known, 0.5 + 1e-4);
        assert_eq!(label(&above), "A");
    }

    #[test]
    fn test_scans_whole_registry() {
        let known = registry(&[
            ("decoy1", vec![0.0, 1.0, 0.0]),
            ("decoy2", vec![0.0, 0.0, 1.0]),
            ("match", vec![1.0, 0.0, 0.0]),
        ]);
        let candidate = Descriptor::new(vec![1.0, 0.0, 0.0]);
        let outcome = EuclideanMatcher.best_match(&candidate, &known, 0.5);
        assert_eq!(label(&outcome), "match");
        assert_eq!(outcome.index, Some(2));
        assert!(outcome.distance.abs() < 1e-6);
        assert!((outcome.distance_confidence() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_tie_goes_to_first_entry() {
        let known = registry(&[("first", vec![1.0, 0.0]), ("second", vec![-1.0, 0.0])]);
        let outcome = EuclideanMatcher.best_match(&Descriptor::new(vec![0.0, 0.0]), &known, 2.0);
        assert_eq!(label(&outcome), "first");
    }

    #[test]
    fn test_empty_registry_is_unknown() {
        let empty = KnownFaceRegistry::new();
        let outcome = EuclideanMatcher.best_match(&Descriptor::new(vec![1.0]), &empty, 0.5);
        assert_eq!(outcome.resolution, Resolution::Unknown);
        assert_eq!(outcome.distance, NO_MATCH_DISTANCE);
        assert_eq!(outcome.index, None);
        assert_eq!(outcome.distance_confidence(), 0.0);
    }

    #[test]
    fn test_distance_confidence_clamped() {
        assert_eq!(distance_confidence(1.7), 0.0);
        assert!((distance_confidence(0.2) - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_matcher() {
        let known = registry(&[("x", vec![1.0, 0.0]), ("y", vec![0.0, 1.0])]);
        let outcome = CosineMatcher.best_match(&Descriptor::new(vec![0.0, 3.0]), &known, 0.3);
        assert_eq!(label(&outcome), "y");
        assert!(outcome.distance.abs() < 1e-6);
    }

    #[test]
    fn test_metric_selects_matcher() {
        let a = Descriptor::new(vec![2.0, 0.0]);
        let b = Descriptor::new(vec![1.0, 0.0]);
        assert!((DistanceMetric::Euclidean.matcher().distance(&a, &b) - 1.0).abs() < 1e-6);
        assert!(DistanceMetric::Cosine.matcher().distance(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn test_match_feeds_fused_confidence() {
        let known = registry(&[("Garcia", vec![0.0, 0.0]), ("Garcia", vec![1.0, 1.0])]);
        let outcome = EuclideanMatcher.best_match(&Descriptor::new(vec![0.2, 0.0]), &known, 0.5);
        assert_eq!(label(&outcome), "Garcia");
        assert!((outcome.distance_confidence() - 0.8).abs() < 1e-6);

        let scorer = crate::confidence::ConfidenceScorer::default();
        let report = scorer.fuse(outcome.distance_confidence(), 0.7, 0.5);
        assert!((report.fused_confidence - 0.71).abs() < 1e-5);
        assert!(report.is_valid);
    }
}
