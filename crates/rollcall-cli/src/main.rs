use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rollcall_core::{
    build_registry, ConfidenceScorer, Detection, DistanceMetric, EmbeddingProvider,
    KnownFaceRegistry, OnnxEmbeddingProvider, PerformanceProfile, RegistrySettings, Roster,
};
use rollcall_hw::{Camera, CaptureSettings};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "rollcall", about = "Rollcall attendance recognition tools")]
struct Cli {
    /// Directory containing the ONNX models
    #[arg(long, global = true)]
    models: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build or inspect a known-face registry
    Registry {
        #[command(subcommand)]
        action: RegistryAction,
    },
    /// Show the settings behind each performance profile
    Profiles,
    /// Match and score every face in an image against a registry
    Score {
        image: PathBuf,
        /// Registry file written by `rollcall registry build`
        #[arg(short, long)]
        registry: PathBuf,
        #[arg(short, long, default_value = "balanced")]
        profile: PerformanceProfile,
        /// euclidean or cosine
        #[arg(long, default_value = "euclidean")]
        metric: String,
    },
    /// Camera diagnostics
    Camera {
        #[command(subcommand)]
        action: CameraAction,
    },
}

#[derive(Subcommand)]
enum RegistryAction {
    /// Index a corpus of `<person>/<image>` folders
    Build {
        corpus: PathBuf,
        #[arg(short, long)]
        out: PathBuf,
        /// JSON roster used to resolve folder names
        #[arg(long)]
        roster: Option<PathBuf>,
        /// Descriptors needed before a PCA projection is fitted
        #[arg(long, default_value_t = RegistrySettings::default().pca_min_samples)]
        pca_min_samples: usize,
        #[arg(long, default_value_t = RegistrySettings::default().pca_components)]
        pca_components: usize,
        /// Skip the histogram-equalized copy of each sample
        #[arg(long)]
        no_augment: bool,
    },
    /// Print statistics for a saved registry
    Inspect { path: PathBuf },
}

#[derive(Subcommand)]
enum CameraAction {
    /// List V4L2 capture devices
    Devices,
    /// Capture a few frames and report brightness
    Test {
        #[arg(short, long, default_value = "/dev/video0")]
        device: String,
        #[arg(short = 'n', long, default_value_t = 5)]
        frames: usize,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let model_dir = cli.models.unwrap_or_else(rollcall_core::default_model_dir);

    match cli.command {
        Commands::Registry { action } => match action {
            RegistryAction::Build {
                corpus,
                out,
                roster,
                pca_min_samples,
                pca_components,
                no_augment,
            } => {
                let roster = match roster {
                    Some(path) => Roster::load(&path)?,
                    None => Roster::default(),
                };
                let mut provider = load_provider(&model_dir)?;
                let settings = RegistrySettings {
                    pca_min_samples,
                    pca_components,
                    augment_equalized: !no_augment,
                };
                let registry = build_registry(&corpus, &mut provider, &roster, &settings)?;
                registry.save(&out)?;
                println!("{}", serde_json::to_string_pretty(&registry.stats())?);
                println!("Registry written to {}", out.display());
            }
            RegistryAction::Inspect { path } => {
                let registry = KnownFaceRegistry::load(&path)?;
                println!("{}", serde_json::to_string_pretty(&registry.stats())?);
                let mut counts: Vec<(String, usize)> = Vec::new();
                for identity in registry.identities() {
                    match counts.iter_mut().find(|(name, _)| *name == identity.display_name) {
                        Some((_, n)) => *n += 1,
                        None => counts.push((identity.display_name.clone(), 1)),
                    }
                }
                for (name, n) in counts {
                    println!("  {name:<32} {n} samples");
                }
            }
        },
        Commands::Profiles => {
            for profile in PerformanceProfile::ALL {
                let s = profile.settings();
                println!(
                    "{profile:<9} threshold={:.2} every_n={} downscale={:.1} \
                     interval={}ms cache={}ms",
                    s.match_threshold,
                    s.throttle.process_every_n,
                    s.downscale_factor,
                    s.throttle.min_interval.as_millis(),
                    s.throttle.cache_duration.as_millis(),
                );
            }
        }
        Commands::Score {
            image: image_path,
            registry,
            profile,
            metric,
        } => {
            let metric: DistanceMetric = serde_json::from_value(serde_json::Value::String(metric))
                .context("metric must be euclidean or cosine")?;
            let registry = KnownFaceRegistry::load(&registry)?;
            let frame = image::open(&image_path)
                .with_context(|| format!("failed to open {}", image_path.display()))?
                .to_luma8();
            let mut provider = load_provider(&model_dir)?;
            let faces = provider.describe(&frame)?;
            if faces.is_empty() {
                println!("No faces found");
                return Ok(());
            }

            let matcher = metric.matcher();
            let scorer = ConfidenceScorer::default();
            let threshold = profile.settings().match_threshold;
            for (bbox, descriptor) in faces {
                let outcome = matcher.best_match(&descriptor, &registry, threshold);
                // Single image: no history, so temporal consistency is neutral.
                let (quality, confidence) =
                    scorer.score(&bbox, &frame, outcome.distance_confidence(), 0.5);
                let detection = Detection {
                    bbox,
                    descriptor,
                    distance: outcome.distance,
                    resolution: outcome.resolution,
                    quality,
                    confidence,
                };
                let review = scorer.review(&detection);
                println!(
                    "{:<24} distance={:.3} fused={:.3} quality={:.3} valid={}",
                    detection.resolution.label(),
                    detection.distance,
                    detection.confidence.fused_confidence,
                    detection.quality.score,
                    review.is_valid,
                );
                for (issue, advice) in review.issues.iter().zip(&review.recommendations) {
                    println!("    {issue} ({advice})");
                }
            }
        }
        Commands::Camera { action } => match action {
            CameraAction::Devices => {
                let devices = Camera::list_devices();
                if devices.is_empty() {
                    println!("No capture devices found");
                }
                for dev in devices {
                    println!("{}  {} [{}] {}", dev.path, dev.name, dev.driver, dev.bus);
                }
            }
            CameraAction::Test { device, frames } => {
                let mut camera = Camera::open(&device, &CaptureSettings::default())?;
                println!(
                    "Opened {} at {}x{} ({:?})",
                    camera.device_path, camera.width, camera.height, camera.fourcc
                );
                camera.warm_up(4)?;
                let (good, dark) = camera.capture_frames(frames)?;
                for frame in &good {
                    println!(
                        "  seq {:>5}  brightness {:.1}",
                        frame.sequence,
                        frame.avg_brightness()
                    );
                }
                println!("{} usable frames, {dark} dark frames dropped", good.len());
            }
        },
    }

    Ok(())
}

fn load_provider(model_dir: &std::path::Path) -> Result<OnnxEmbeddingProvider> {
    tracing::debug!(model_dir = %model_dir.display(), "loading models");
    OnnxEmbeddingProvider::load(model_dir)
        .with_context(|| format!("failed to load models from {}", model_dir.display()))
}
