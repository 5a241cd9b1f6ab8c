//! Per-frame recognition: throttle, locate, embed, match, score, validate
//! across frames, and emit deduplicated attendance events.

use crate::confidence::ConfidenceScorer;
use crate::dedup::{AttendanceDeduper, AttendanceStore, EmitOutcome};
use crate::matcher::{DistanceMetric, Matcher};
use crate::profile::ProfileSettings;
use crate::provider::EmbeddingProvider;
use crate::registry::{KnownFaceRegistry, SharedRegistry};
use crate::temporal::{TemporalTracker, DEFAULT_HISTORY};
use crate::throttle::{FrameThrottler, ThrottleDecision};
use crate::types::{AttendanceEvent, Detection};
use crate::validator::{MultiFrameValidator, ValidatorSettings};
use chrono::{DateTime, Local};
use image::imageops::{self, FilterType};
use image::GrayImage;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Every tunable of the recognition loop.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub profile: ProfileSettings,
    pub metric: DistanceMetric,
    pub scorer: ConfidenceScorer,
    pub validator: ValidatorSettings,
    pub temporal_history: usize,
    pub cooldown: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            profile: ProfileSettings::default(),
            metric: DistanceMetric::default(),
            scorer: ConfidenceScorer::default(),
            validator: ValidatorSettings::default(),
            temporal_history: DEFAULT_HISTORY,
            cooldown: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Skipped,
    Cached,
    Processed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FrameOutcome {
    pub frame_id: u64,
    pub disposition: Disposition,
    pub detections: Vec<Detection>,
    pub events: Vec<AttendanceEvent>,
}

impl FrameOutcome {
    fn skipped(frame_id: u64) -> Self {
        Self {
            frame_id,
            disposition: Disposition::Skipped,
            detections: Vec::new(),
            events: Vec::new(),
        }
    }
}

pub struct RecognitionPipeline {
    provider: Box<dyn EmbeddingProvider>,
    registry: Arc<SharedRegistry>,
    store: Box<dyn AttendanceStore>,
    matcher: Box<dyn Matcher>,
    scorer: ConfidenceScorer,
    match_threshold: f32,
    downscale_factor: f32,
    tracker: TemporalTracker,
    validator: MultiFrameValidator,
    throttler: FrameThrottler,
    deduper: AttendanceDeduper,
    generation: u64,
}

impl RecognitionPipeline {
    pub fn new(
        provider: Box<dyn EmbeddingProvider>,
        registry: Arc<SharedRegistry>,
        store: Box<dyn AttendanceStore>,
        config: &PipelineConfig,
    ) -> Self {
        let generation = registry.generation();
        Self {
            provider,
            registry,
            store,
            matcher: config.metric.matcher(),
            scorer: config.scorer,
            match_threshold: config.profile.match_threshold,
            downscale_factor: config.profile.downscale_factor,
            tracker: TemporalTracker::new(config.temporal_history),
            validator: MultiFrameValidator::new(config.validator),
            throttler: FrameThrottler::new(config.profile.throttle),
            deduper: AttendanceDeduper::new(config.cooldown),
            generation,
        }
    }

    /// Drop per-session state: temporal history, pending identities and
    /// the cached result. Cooldowns and day records are kept.
    pub fn reset(&mut self) {
        self.tracker.reset();
        self.validator.reset();
        self.throttler.invalidate();
    }

    pub fn tracker(&self) -> &TemporalTracker {
        &self.tracker
    }

    pub fn process_frame(
        &mut self,
        frame_id: u64,
        frame: &GrayImage,
        now: Instant,
        at: DateTime<Local>,
    ) -> FrameOutcome {
        if frame.width() == 0 || frame.height() == 0 {
            return FrameOutcome::skipped(frame_id);
        }

        let registry = self.registry.snapshot();
        if registry.generation() != self.generation {
            tracing::info!(
                from = self.generation,
                to = registry.generation(),
                "registry changed; resetting session state"
            );
            self.generation = registry.generation();
            self.reset();
        }

        match self.throttler.decide(now) {
            ThrottleDecision::Skip => FrameOutcome::skipped(frame_id),
            ThrottleDecision::Cached(detections) => FrameOutcome {
                frame_id,
                disposition: Disposition::Cached,
                detections,
                events: Vec::new(),
            },
            ThrottleDecision::Process => {
                let detections = self.detect(frame, &registry);
                self.throttler.record(now, &detections);
                let events = self.validate_and_emit(frame_id, &detections, at);
                FrameOutcome {
                    frame_id,
                    disposition: Disposition::Processed,
                    detections,
                    events,
                }
            }
        }
    }

    fn detect(&mut self, frame: &GrayImage, registry: &KnownFaceRegistry) -> Vec<Detection> {
        let factor = self.downscale_factor;
        let scaled;
        let search = if factor > 0.0 && factor < 1.0 {
            let w = ((frame.width() as f32 * factor).round() as u32).max(1);
            let h = ((frame.height() as f32 * factor).round() as u32).max(1);
            scaled = imageops::resize(frame, w, h, FilterType::Triangle);
            &scaled
        } else {
            frame
        };

        let faces = match self.provider.describe(search) {
            Ok(faces) => faces,
            Err(e) => {
                tracing::warn!(error = %e, "provider failed; treating frame as empty");
                return Vec::new();
            }
        };

        faces
            .into_iter()
            .map(|(bbox, descriptor)| {
                let bbox = bbox.rescaled(factor);
                let outcome = self.matcher.best_match(&descriptor, registry, self.match_threshold);
                let temporal = self.tracker.consistency(&descriptor);
                let (quality, confidence) =
                    self.scorer.score(&bbox, frame, outcome.distance_confidence(), temporal);
                if outcome.resolution.is_known() {
                    self.tracker.update(descriptor.clone(), confidence.fused_confidence);
                }
                tracing::trace!(
                    label = outcome.resolution.label(),
                    distance = outcome.distance,
                    fused = confidence.fused_confidence,
                    "face scored"
                );
                Detection {
                    bbox,
                    descriptor,
                    distance: outcome.distance,
                    resolution: outcome.resolution,
                    quality,
                    confidence,
                }
            })
            .collect()
    }

    fn validate_and_emit(
        &mut self,
        frame_id: u64,
        detections: &[Detection],
        at: DateTime<Local>,
    ) -> Vec<AttendanceEvent> {
        // Low-confidence frames still count: they are what the spread check sees.
        for detection in detections {
            if detection.resolution.is_known() {
                self.validator.observe(frame_id, detection.clone());
            }
        }

        let mut events = Vec::new();
        for observation in self.validator.validated() {
            let Some(identity) = observation.detection.identity().cloned() else {
                continue;
            };
            match self.deduper.decide_emit(self.store.as_mut(), &identity.id, at) {
                EmitOutcome::Emitted => {
                    tracing::info!(
                        identity = %identity.id,
                        name = %identity.display_name,
                        confidence = observation.confidence,
                        "attendance recorded"
                    );
                    self.validator.clear(&identity.id);
                    events.push(AttendanceEvent::new(identity, at, observation.confidence));
                }
                EmitOutcome::Cooldown | EmitOutcome::AlreadyRecorded => {
                    self.validator.clear(&identity.id);
                }
                EmitOutcome::StoreFailed => {}
            }
        }
        events
    }
}
