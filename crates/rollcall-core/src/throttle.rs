use crate::types::Detection;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThrottleSettings {
    /// Only every Nth frame reaching the modulus gate is processed.
    pub process_every_n: u32,
    pub min_interval: Duration,
    pub cache_duration: Duration,
}

impl Default for ThrottleSettings {
    fn default() -> Self {
        Self {
            process_every_n: 2,
            min_interval: Duration::from_millis(100),
            cache_duration: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ThrottleDecision {
    Skip,
    /// Recent detections, still fresh enough to reuse.
    Cached(Vec<Detection>),
    Process,
}

/// Decides per incoming frame whether to skip it, reuse the last result,
/// or run the full pipeline.
#[derive(Debug)]
pub struct FrameThrottler {
    settings: ThrottleSettings,
    counter: u64,
    last_processed: Option<Instant>,
    cache: Option<(Instant, Vec<Detection>)>,
}

impl FrameThrottler {
    pub fn new(mut settings: ThrottleSettings) -> Self {
        settings.process_every_n = settings.process_every_n.max(1);
        Self {
            settings,
            counter: 0,
            last_processed: None,
            cache: None,
        }
    }

    pub fn settings(&self) -> &ThrottleSettings {
        &self.settings
    }

    /// Interval gate, then cache gate, then modulus gate.
    pub fn decide(&mut self, now: Instant) -> ThrottleDecision {
        if let Some(last) = self.last_processed {
            if now.saturating_duration_since(last) < self.settings.min_interval {
                return ThrottleDecision::Skip;
            }
        }

        if let Some((stored_at, detections)) = &self.cache {
            if now.saturating_duration_since(*stored_at) < self.settings.cache_duration {
                return ThrottleDecision::Cached(detections.clone());
            }
        }

        self.counter += 1;
        if self.counter % u64::from(self.settings.process_every_n) != 0 {
            return ThrottleDecision::Skip;
        }
        ThrottleDecision::Process
    }

    /// Store the result of a processed frame.
    pub fn record(&mut self, now: Instant, detections: &[Detection]) {
        self.last_processed = Some(now);
        self.cache = Some((now, detections.to_vec()));
    }

    pub fn invalidate(&mut self) {
        self.cache = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn throttler(n: u32, interval_ms: u64, cache_ms: u64) -> FrameThrottler {
        FrameThrottler::new(ThrottleSettings {
            process_every_n: n,
            min_interval: Duration::from_millis(interval_ms),
            cache_duration: Duration::from_millis(cache_ms),
        })
    }

    #[test]
    fn test_every_nth_frame_processed() {
        let mut t = throttler(3, 0, 0);
        let now = Instant::now();
        assert_eq!(t.decide(now), ThrottleDecision::Skip);
        assert_eq!(t.decide(now), ThrottleDecision::Skip);
        assert_eq!(t.decide(now), ThrottleDecision::Process);
        assert_eq!(t.decide(now), ThrottleDecision::Skip);
    }

    #[test]
    fn test_zero_modulus_clamped() {
        let mut t = throttler(0, 0, 0);
        assert_eq!(t.settings().process_every_n, 1);
        assert_eq!(t.decide(Instant::now()), ThrottleDecision::Process);
    }

    #[test]
    fn test_interval_gate() {
        let mut t = throttler(1, 100, 0);
        let start = Instant::now();
        assert_eq!(t.decide(start), ThrottleDecision::Process);
        t.record(start, &[]);
        assert_eq!(t.decide(start + Duration::from_millis(50)), ThrottleDecision::Skip);
        assert_eq!(t.decide(start + Duration::from_millis(100)), ThrottleDecision::Process);
    }

    #[test]
    fn test_cache_gate_returns_stored_result() {
        let mut t = throttler(1, 0, 500);
        let start = Instant::now();
        t.record(start, &[]);
        assert_eq!(
            t.decide(start + Duration::from_millis(200)),
            ThrottleDecision::Cached(Vec::new())
        );
        assert_eq!(t.decide(start + Duration::from_millis(600)), ThrottleDecision::Process);
    }

    #[test]
    fn test_skipped_frames_do_not_advance_modulus() {
        let mut t = throttler(2, 100, 0);
        let start = Instant::now();
        t.record(start, &[]);
        // Interval-gated frames never reach the counter.
        for ms in [10, 20, 30] {
            assert_eq!(t.decide(start + Duration::from_millis(ms)), ThrottleDecision::Skip);
        }
        assert_eq!(t.decide(start + Duration::from_millis(150)), ThrottleDecision::Skip);
        assert_eq!(t.decide(start + Duration::from_millis(160)), ThrottleDecision::Process);
    }

    #[test]
    fn test_invalidate_drops_cache() {
        let mut t = throttler(1, 0, 500);
        let start = Instant::now();
        t.record(start, &[]);
        t.invalidate();
        assert_eq!(t.decide(start + Duration::from_millis(10)), ThrottleDecision::Process);
    }
}
