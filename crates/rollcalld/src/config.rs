use rollcall_core::matcher::DistanceMetric;
use rollcall_core::profile::UnknownProfile;
use rollcall_core::{
    ConfidenceScorer, PerformanceProfile, PipelineConfig, ProfileOverrides, RegistrySettings,
    ValidatorSettings,
};
use rollcall_hw::CaptureSettings;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error(transparent)]
    UnknownProfile(#[from] UnknownProfile),
    #[error("unknown calibration '{0}' (expected reference or arcface)")]
    UnknownCalibration(String),
}

/// Cosine distance below which two ArcFace descriptors are the same person
/// (cosine similarity of at least 0.4).
pub const ARCFACE_COSINE_THRESHOLD: f32 = 0.6;

/// Matching calibration for the descriptor model in use.
///
/// `reference` keeps the library defaults (Euclidean metric, per-profile
/// thresholds). `arcface` suits the bundled ArcFace model, whose unit
/// descriptors separate well under cosine distance. An explicit metric or
/// threshold still overrides either preset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Calibration {
    #[default]
    Reference,
    Arcface,
}

impl Calibration {
    fn metric(self) -> Option<DistanceMetric> {
        match self {
            Calibration::Reference => None,
            Calibration::Arcface => Some(DistanceMetric::Cosine),
        }
    }

    fn match_threshold(self) -> Option<f32> {
        match self {
            Calibration::Reference => None,
            Calibration::Arcface => Some(ARCFACE_COSINE_THRESHOLD),
        }
    }
}

impl std::str::FromStr for Calibration {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "reference" => Ok(Calibration::Reference),
            "arcface" => Ok(Calibration::Arcface),
            _ => Err(ConfigError::UnknownCalibration(s.to_string())),
        }
    }
}

/// Optional TOML file named by `ROLLCALL_CONFIG`.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub profile: Option<String>,
    pub calibration: Option<Calibration>,
    pub metric: Option<DistanceMetric>,
    pub cooldown_secs: Option<u64>,
    pub overrides: ProfileOverrides,
    pub scoring: ConfidenceScorer,
    pub validator: ValidatorSettings,
    pub registry: RegistrySettings,
}

impl FileConfig {
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    pub fn read(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&raw)
    }
}

/// Daemon configuration: defaults, then the TOML file, then `ROLLCALL_*`
/// environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    pub capture: CaptureSettings,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// One sub-folder of sample images per person.
    pub corpus_dir: PathBuf,
    /// JSON roster used to resolve folder names to people.
    pub roster_path: Option<PathBuf>,
    /// SQLite attendance database.
    pub attendance_db: PathBuf,
    /// Frames discarded when a session opens the camera.
    pub warmup_frames: usize,
    /// Upper bound on waiting for the session thread to stop.
    pub join_timeout: Duration,
    /// Consecutive failed sessions before the daemon gives up.
    pub max_restarts: u32,
    pub profile: PerformanceProfile,
    pub calibration: Calibration,
    pub registry: RegistrySettings,
    pub pipeline: PipelineConfig,
}

impl Config {
    /// Load from the process environment and, if `ROLLCALL_CONFIG` is set,
    /// the named TOML file.
    pub fn load() -> Result<Self, ConfigError> {
        let lookup = |key: &str| std::env::var(key).ok();
        let file = match lookup("ROLLCALL_CONFIG") {
            Some(path) => FileConfig::read(Path::new(&path))?,
            None => FileConfig::default(),
        };
        Self::resolve(&lookup, file)
    }

    pub fn resolve(
        env: &dyn Fn(&str) -> Option<String>,
        file: FileConfig,
    ) -> Result<Self, ConfigError> {
        let env = Env(env);
        let data_dir = rollcall_core::data_dir();

        let profile_name = env.string("ROLLCALL_PROFILE").or(file.profile);
        let profile = match profile_name {
            Some(name) => name.parse::<PerformanceProfile>()?,
            None => PerformanceProfile::default(),
        };

        let calibration = match env.string("ROLLCALL_CALIBRATION") {
            Some(name) => name.parse::<Calibration>()?,
            None => file.calibration.unwrap_or_default(),
        };

        let mut settings = profile.settings();
        if let Some(threshold) = calibration.match_threshold() {
            settings.match_threshold = threshold;
        }
        let mut settings = file.overrides.apply(settings);
        if let Some(threshold) = env.parse::<f32>("ROLLCALL_MATCH_THRESHOLD") {
            settings.match_threshold = threshold;
        }
        if let Some(factor) = env.parse::<f32>("ROLLCALL_DOWNSCALE_FACTOR") {
            settings.downscale_factor = factor;
        }

        let cooldown_secs = env
            .parse::<u64>("ROLLCALL_COOLDOWN_SECS")
            .or(file.cooldown_secs)
            .unwrap_or(60);

        let pipeline = PipelineConfig {
            profile: settings,
            metric: file.metric.or(calibration.metric()).unwrap_or_default(),
            scorer: file.scoring,
            validator: file.validator,
            cooldown: Duration::from_secs(cooldown_secs),
            ..PipelineConfig::default()
        };

        Ok(Self {
            camera_device: env
                .string("ROLLCALL_CAMERA_DEVICE")
                .unwrap_or_else(|| "/dev/video0".to_string()),
            capture: CaptureSettings {
                width: env.parse("ROLLCALL_CAPTURE_WIDTH").unwrap_or(640),
                height: env.parse("ROLLCALL_CAPTURE_HEIGHT").unwrap_or(480),
                enhance_contrast: env.flag("ROLLCALL_ENHANCE_CONTRAST", false),
            },
            model_dir: env
                .path("ROLLCALL_MODEL_DIR")
                .unwrap_or_else(rollcall_core::default_model_dir),
            corpus_dir: env
                .path("ROLLCALL_CORPUS_DIR")
                .unwrap_or_else(|| data_dir.join("students")),
            roster_path: env.path("ROLLCALL_ROSTER"),
            attendance_db: env
                .path("ROLLCALL_ATTENDANCE_DB")
                .unwrap_or_else(|| data_dir.join("attendance.db")),
            warmup_frames: env.parse("ROLLCALL_WARMUP_FRAMES").unwrap_or(4),
            join_timeout: Duration::from_millis(
                env.parse("ROLLCALL_JOIN_TIMEOUT_MS").unwrap_or(2000),
            ),
            max_restarts: env.parse("ROLLCALL_MAX_RESTARTS").unwrap_or(3),
            profile,
            calibration,
            registry: file.registry,
            pipeline,
        })
    }
}

struct Env<'a>(&'a dyn Fn(&str) -> Option<String>);

impl Env<'_> {
    fn string(&self, key: &str) -> Option<String> {
        (self.0)(key).filter(|v| !v.trim().is_empty())
    }

    fn path(&self, key: &str) -> Option<PathBuf> {
        self.string(key).map(PathBuf::from)
    }

    fn parse<T: std::str::FromStr>(&self, key: &str) -> Option<T> {
        let raw = self.string(key)?;
        match raw.trim().parse() {
            Ok(v) => Some(v),
            Err(_) => {
                tracing::warn!(key, value = %raw, "ignoring unparsable environment value");
                None
            }
        }
    }

    fn flag(&self, key: &str, default: bool) -> bool {
        self.string(key).map(|v| v != "0" && !v.eq_ignore_ascii_case("false")).unwrap_or(default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn resolve(vars: &[(&str, &str)], file: FileConfig) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> =
            vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Config::resolve(&move |key: &str| vars.get(key).cloned(), file)
    }

    #[test]
    fn test_defaults() {
        let config = resolve(&[], FileConfig::default()).unwrap();
        assert_eq!(config.camera_device, "/dev/video0");
        assert_eq!(config.profile, PerformanceProfile::Balanced);
        assert_eq!(config.pipeline.profile.throttle.process_every_n, 2);
        assert_eq!(config.pipeline.cooldown, Duration::from_secs(60));
        assert_eq!(config.join_timeout, Duration::from_secs(2));
        assert!(config.roster_path.is_none());
        assert!(!config.capture.enhance_contrast);
    }

    #[test]
    fn test_env_overrides_profile_and_values() {
        let config = resolve(
            &[
                ("ROLLCALL_PROFILE", "accurate"),
                ("ROLLCALL_MATCH_THRESHOLD", "0.42"),
                ("ROLLCALL_CAMERA_DEVICE", "/dev/video4"),
                ("ROLLCALL_ENHANCE_CONTRAST", "1"),
                ("ROLLCALL_WARMUP_FRAMES", "not-a-number"),
            ],
            FileConfig::default(),
        )
        .unwrap();
        assert_eq!(config.profile, PerformanceProfile::Accurate);
        assert_eq!(config.pipeline.profile.throttle.process_every_n, 3);
        assert!((config.pipeline.profile.match_threshold - 0.42).abs() < 1e-6);
        assert_eq!(config.camera_device, "/dev/video4");
        assert!(config.capture.enhance_contrast);
        assert_eq!(config.warmup_frames, 4);
    }

    #[test]
    fn test_file_config() {
        let file = FileConfig::parse(
            r#"
            profile = "fast"
            metric = "cosine"
            cooldown_secs = 30

            [overrides]
            downscale_factor = 0.4

            [scoring]
            min_confidence = 0.65

            [validator]
            required_frames = 4
            "#,
        )
        .unwrap();
        let config = resolve(&[], file).unwrap();
        assert_eq!(config.profile, PerformanceProfile::Fast);
        assert_eq!(config.pipeline.metric, DistanceMetric::Cosine);
        assert!((config.pipeline.profile.downscale_factor - 0.4).abs() < 1e-6);
        assert_eq!(config.pipeline.profile.throttle.process_every_n, 1);
        assert!((config.pipeline.scorer.min_confidence - 0.65).abs() < 1e-6);
        assert!((config.pipeline.scorer.fusion_weights.distance - 0.5).abs() < 1e-6);
        assert_eq!(config.pipeline.validator.required_frames, 4);
        assert_eq!(config.pipeline.validator.window, 10);
        assert_eq!(config.pipeline.cooldown, Duration::from_secs(30));
    }

    #[test]
    fn test_arcface_calibration_switches_metric_and_threshold() {
        let file = FileConfig::parse(r#"calibration = "arcface""#).unwrap();
        let config = resolve(&[], file).unwrap();
        assert_eq!(config.calibration, Calibration::Arcface);
        assert_eq!(config.pipeline.metric, DistanceMetric::Cosine);
        assert!((config.pipeline.profile.match_threshold - ARCFACE_COSINE_THRESHOLD).abs() < 1e-6);

        let reference = resolve(&[], FileConfig::default()).unwrap();
        assert_eq!(reference.calibration, Calibration::Reference);
        assert_eq!(reference.pipeline.metric, DistanceMetric::Euclidean);
        assert!((reference.pipeline.profile.match_threshold - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_explicit_values_beat_calibration() {
        let file = FileConfig::parse(
            r#"
            calibration = "arcface"
            metric = "euclidean"

            [overrides]
            match_threshold = 0.45
            "#,
        )
        .unwrap();
        let config = resolve(&[], file).unwrap();
        assert_eq!(config.pipeline.metric, DistanceMetric::Euclidean);
        assert!((config.pipeline.profile.match_threshold - 0.45).abs() < 1e-6);

        let config = resolve(
            &[("ROLLCALL_CALIBRATION", "ArcFace"), ("ROLLCALL_MATCH_THRESHOLD", "0.7")],
            FileConfig::default(),
        )
        .unwrap();
        assert_eq!(config.pipeline.metric, DistanceMetric::Cosine);
        assert!((config.pipeline.profile.match_threshold - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_unknown_calibration() {
        let result = resolve(&[("ROLLCALL_CALIBRATION", "dlib")], FileConfig::default());
        assert!(matches!(result, Err(ConfigError::UnknownCalibration(_))));
    }

    #[test]
    fn test_env_profile_beats_file() {
        let file = FileConfig::parse(r#"profile = "fast""#).unwrap();
        let config = resolve(&[("ROLLCALL_PROFILE", "accurate")], file).unwrap();
        assert_eq!(config.profile, PerformanceProfile::Accurate);
    }

    #[test]
    fn test_unknown_profile() {
        let result = resolve(&[("ROLLCALL_PROFILE", "turbo")], FileConfig::default());
        assert!(matches!(result, Err(ConfigError::UnknownProfile(_))));
    }

    #[test]
    fn test_unknown_file_key_rejected() {
        assert!(matches!(FileConfig::parse("speed = 3"), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_read_missing_file() {
        let result = FileConfig::read(Path::new("/nonexistent/rollcall.toml"));
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }
}
