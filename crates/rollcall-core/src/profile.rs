//! Named speed/accuracy profiles for the recognition loop.

use crate::throttle::ThrottleSettings;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.50;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PerformanceProfile {
    Fast,
    #[default]
    Balanced,
    Accurate,
}

impl PerformanceProfile {
    pub const ALL: [PerformanceProfile; 3] = [
        PerformanceProfile::Fast,
        PerformanceProfile::Balanced,
        PerformanceProfile::Accurate,
    ];

    pub fn name(self) -> &'static str {
        match self {
            PerformanceProfile::Fast => "fast",
            PerformanceProfile::Balanced => "balanced",
            PerformanceProfile::Accurate => "accurate",
        }
    }

    pub fn settings(self) -> ProfileSettings {
        let (process_every_n, downscale_factor, min_interval_ms, cache_ms) = match self {
            PerformanceProfile::Fast => (1, 0.3, 50, 200),
            PerformanceProfile::Balanced => (2, 0.5, 100, 500),
            PerformanceProfile::Accurate => (3, 0.7, 200, 1000),
        };
        ProfileSettings {
            match_threshold: DEFAULT_MATCH_THRESHOLD,
            downscale_factor,
            throttle: ThrottleSettings {
                process_every_n,
                min_interval: Duration::from_millis(min_interval_ms),
                cache_duration: Duration::from_millis(cache_ms),
            },
        }
    }
}

impl fmt::Display for PerformanceProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownProfile(pub String);

impl fmt::Display for UnknownProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown profile '{}' (expected fast, balanced or accurate)", self.0)
    }
}

impl std::error::Error for UnknownProfile {}

impl FromStr for PerformanceProfile {
    type Err = UnknownProfile;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PerformanceProfile::ALL
            .into_iter()
            .find(|p| p.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownProfile(s.to_string()))
    }
}

/// The group of tunables a profile sets together.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProfileSettings {
    pub match_threshold: f32,
    /// Frames are shrunk by this factor before face localization.
    pub downscale_factor: f32,
    pub throttle: ThrottleSettings,
}

impl Default for ProfileSettings {
    fn default() -> Self {
        PerformanceProfile::default().settings()
    }
}

/// Individual values that take precedence over the chosen profile.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProfileOverrides {
    pub match_threshold: Option<f32>,
    pub process_every_n: Option<u32>,
    pub downscale_factor: Option<f32>,
    pub min_interval_ms: Option<u64>,
    pub cache_duration_ms: Option<u64>,
}

impl ProfileOverrides {
    pub fn apply(&self, mut settings: ProfileSettings) -> ProfileSettings {
        if let Some(v) = self.match_threshold {
            settings.match_threshold = v;
        }
        if let Some(v) = self.process_every_n {
            settings.throttle.process_every_n = v.max(1);
        }
        if let Some(v) = self.downscale_factor {
            settings.downscale_factor = v;
        }
        if let Some(v) = self.min_interval_ms {
            settings.throttle.min_interval = Duration::from_millis(v);
        }
        if let Some(v) = self.cache_duration_ms {
            settings.throttle.cache_duration = Duration::from_millis(v);
        }
        settings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_values() {
        let fast = PerformanceProfile::Fast.settings();
        assert_eq!(fast.throttle.process_every_n, 1);
        assert!((fast.downscale_factor - 0.3).abs() < 1e-6);
        assert_eq!(fast.throttle.min_interval, Duration::from_millis(50));
        assert_eq!(fast.throttle.cache_duration, Duration::from_millis(200));

        let accurate = PerformanceProfile::Accurate.settings();
        assert_eq!(accurate.throttle.process_every_n, 3);
        assert!((accurate.downscale_factor - 0.7).abs() < 1e-6);
        assert_eq!(accurate.throttle.cache_duration, Duration::from_secs(1));

        for profile in PerformanceProfile::ALL {
            assert!((profile.settings().match_threshold - 0.5).abs() < 1e-6);
        }
    }

    #[test]
    fn test_default_is_balanced() {
        let settings = ProfileSettings::default();
        assert_eq!(settings, PerformanceProfile::Balanced.settings());
        assert_eq!(settings.throttle.process_every_n, 2);
    }

    #[test]
    fn test_parse_profile() {
        assert_eq!("Fast".parse::<PerformanceProfile>(), Ok(PerformanceProfile::Fast));
        assert_eq!(" accurate ".parse::<PerformanceProfile>(), Ok(PerformanceProfile::Accurate));
        assert!("turbo".parse::<PerformanceProfile>().is_err());
    }

    #[test]
    fn test_overrides_take_precedence() {
        let overrides = ProfileOverrides {
            match_threshold: Some(0.4),
            process_every_n: Some(0),
            cache_duration_ms: Some(50),
            ..Default::default()
        };
        let settings = overrides.apply(PerformanceProfile::Fast.settings());
        assert!((settings.match_threshold - 0.4).abs() < 1e-6);
        assert_eq!(settings.throttle.process_every_n, 1);
        assert_eq!(settings.throttle.cache_duration, Duration::from_millis(50));
        assert!((settings.downscale_factor - 0.3).abs() < 1e-6);
        assert_eq!(settings.throttle.min_interval, Duration::from_millis(50));
    }

    #[test]
    fn test_overrides_deserialize_partial() {
        let overrides: ProfileOverrides =
            serde_json::from_str(r#"{"downscale_factor": 1.0}"#).unwrap();
        assert_eq!(overrides.downscale_factor, Some(1.0));
        assert_eq!(overrides.match_threshold, None);
        assert!(serde_json::from_str::<ProfileOverrides>(r#"{"speed": 2}"#).is_err());
    }
}
