//! rollcall-core — live-video attendance recognition.
//!
//! SCRFD face localization and ArcFace descriptors via ONNX Runtime, a
//! known-face registry, and the decision pipeline that turns per-frame
//! matches into verified, deduplicated attendance events.

pub mod alignment;
pub mod confidence;
pub mod dedup;
pub mod detector;
pub mod matcher;
pub mod monitor;
pub mod pipeline;
pub mod profile;
pub mod projection;
pub mod provider;
pub mod quality;
pub mod recognizer;
pub mod registry;
pub mod roster;
pub mod temporal;
pub mod throttle;
pub mod types;
pub mod validator;

pub use confidence::{ConfidenceScorer, DetectionReview, FusionWeights};
pub use dedup::{
    AttendanceDeduper, AttendanceStore, EmitOutcome, MemoryAttendanceStore, StoreError,
};
pub use matcher::{CosineMatcher, DistanceMetric, EuclideanMatcher, MatchOutcome, Matcher};
pub use monitor::{PerformanceMonitor, PerformanceStats, PerformanceStatus};
pub use pipeline::{Disposition, FrameOutcome, PipelineConfig, RecognitionPipeline};
pub use profile::{PerformanceProfile, ProfileOverrides, ProfileSettings};
pub use provider::{EmbeddingProvider, OnnxEmbeddingProvider, ProviderError};
pub use quality::QualityWeights;
pub use registry::{
    build_registry, KnownFaceRegistry, RegistryError, RegistrySettings, SharedRegistry,
};
pub use roster::{IdentityStore, Roster, RosterError};
pub use types::{
    AttendanceEvent, BoundingBox, ConfidenceReport, Descriptor, Detection, IdentityRecord,
    QualityBreakdown, Resolution,
};
pub use validator::{MultiFrameValidator, ValidatorSettings};

/// Default model directory: `$XDG_DATA_HOME/rollcall/models`.
pub fn default_model_dir() -> std::path::PathBuf {
    data_dir().join("models")
}

/// Per-user data directory: `$XDG_DATA_HOME/rollcall`, falling back to
/// `~/.local/share/rollcall`.
pub fn data_dir() -> std::path::PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            std::path::PathBuf::from(home).join(".local/share")
        })
        .join("rollcall")
}
