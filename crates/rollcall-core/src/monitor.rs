//! Frame-timing monitor over a bounded window of recent frames.

use serde::Serialize;
use std::collections::VecDeque;
use std::time::Duration;

pub const DEFAULT_WINDOW: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PerformanceStatus {
    NoData,
    Poor,
    Good,
    Excellent,
}

impl PerformanceStatus {
    fn from_fps(fps: f32) -> Self {
        if fps > 30.0 {
            PerformanceStatus::Excellent
        } else if fps > 15.0 {
            PerformanceStatus::Good
        } else {
            PerformanceStatus::Poor
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PerformanceStats {
    /// Mean of the per-frame rates `1 / frame_time`.
    pub fps: f32,
    pub frame_time_ms: f32,
    pub status: PerformanceStatus,
    pub samples: usize,
}

impl Default for PerformanceStats {
    fn default() -> Self {
        Self {
            fps: 0.0,
            frame_time_ms: 0.0,
            status: PerformanceStatus::NoData,
            samples: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PerformanceMonitor {
    window: usize,
    frame_times: VecDeque<Duration>,
}

impl Default for PerformanceMonitor {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}

impl PerformanceMonitor {
    pub fn new(window: usize) -> Self {
        let window = window.max(1);
        Self {
            window,
            frame_times: VecDeque::with_capacity(window),
        }
    }

    pub fn record(&mut self, frame_time: Duration) {
        if self.frame_times.len() == self.window {
            self.frame_times.pop_front();
        }
        self.frame_times.push_back(frame_time);
    }

    pub fn reset(&mut self) {
        self.frame_times.clear();
    }

    pub fn stats(&self) -> PerformanceStats {
        let n = self.frame_times.len();
        if n == 0 {
            return PerformanceStats::default();
        }
        // A zero-length frame contributes 0 fps rather than infinity.
        let fps = self
            .frame_times
            .iter()
            .map(|t| {
                let secs = t.as_secs_f32();
                if secs > 0.0 { 1.0 / secs } else { 0.0 }
            })
            .sum::<f32>()
            / n as f32;
        let total: Duration = self.frame_times.iter().sum();
        PerformanceStats {
            fps,
            frame_time_ms: total.as_secs_f32() * 1000.0 / n as f32,
            status: PerformanceStatus::from_fps(fps),
            samples: n,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_monitor_reports_no_data() {
        let stats = PerformanceMonitor::default().stats();
        assert_eq!(stats.status, PerformanceStatus::NoData);
        assert_eq!(stats.samples, 0);
    }

    #[test]
    fn test_averages_and_status() {
        let mut monitor = PerformanceMonitor::default();
        monitor.record(Duration::from_millis(20));
        monitor.record(Duration::from_millis(40));
        let stats = monitor.stats();
        assert!((stats.fps - 37.5).abs() < 1e-3);
        assert!((stats.frame_time_ms - 30.0).abs() < 1e-3);
        assert_eq!(stats.status, PerformanceStatus::Excellent);
        assert_eq!(stats.samples, 2);
    }

    #[test]
    fn test_status_bands() {
        let status = |ms| {
            let mut monitor = PerformanceMonitor::default();
            monitor.record(Duration::from_millis(ms));
            monitor.stats().status
        };
        assert_eq!(status(50), PerformanceStatus::Good);
        assert_eq!(status(100), PerformanceStatus::Poor);
        assert_eq!(status(10), PerformanceStatus::Excellent);
    }

    #[test]
    fn test_window_drops_oldest() {
        let mut monitor = PerformanceMonitor::new(3);
        monitor.record(Duration::from_secs(1));
        for _ in 0..3 {
            monitor.record(Duration::from_millis(10));
        }
        let stats = monitor.stats();
        assert_eq!(stats.samples, 3);
        assert!((stats.fps - 100.0).abs() < 1e-2);
    }

    #[test]
    fn test_zero_duration_frame() {
        let mut monitor = PerformanceMonitor::default();
        monitor.record(Duration::ZERO);
        assert_eq!(monitor.stats().fps, 0.0);
        monitor.reset();
        assert_eq!(monitor.stats().samples, 0);
    }
}
