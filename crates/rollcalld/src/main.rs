use anyhow::{Context, Result};
use rollcall_core::{
    OnnxEmbeddingProvider, RecognitionPipeline, Roster, SharedRegistry,
};
use rollcall_hw::{Camera, FrameSource};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{signal, SignalKind};
use tracing_subscriber::EnvFilter;

mod config;
mod session;
mod store;

use config::Config;
use session::{RecognitionSession, SessionChannels, SessionStatus, SourceFactory};
use store::SqliteAttendanceStore;

const RESTART_BACKOFF: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("rollcalld starting");

    let config = Arc::new(Config::load().context("failed to load configuration")?);
    tracing::info!(
        profile = %config.profile,
        calibration = ?config.calibration,
        metric = ?config.pipeline.metric,
        device = %config.camera_device,
        corpus = %config.corpus_dir.display(),
        attendance = %config.attendance_db.display(),
        "configuration loaded"
    );

    let roster = Arc::new(load_roster(&config)?);
    let registry = Arc::new(SharedRegistry::default());
    rebuild_registry(config.clone(), roster.clone(), registry.clone())
        .await
        .context("initial registry build failed")?;

    let mut pipeline = Some(build_pipeline(&config, &registry)?);
    let mut restarts = 0u32;
    let mut hangup = signal(SignalKind::hangup()).context("failed to install SIGHUP handler")?;

    'sessions: loop {
        let pipeline_for_session = match pipeline.take() {
            Some(p) => p,
            None => build_pipeline(&config, &registry)?,
        };
        let (session, mut channels) = RecognitionSession::start(
            camera_factory(&config),
            pipeline_for_session,
            config.join_timeout,
        )?;
        tracing::info!("recognition session started");

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!(running = session.is_running(), "rollcalld shutting down");
                    session.stop();
                    break 'sessions;
                }
                _ = hangup.recv() => {
                    tracing::info!("SIGHUP received; rebuilding registry");
                    let (config, roster, registry) =
                        (config.clone(), roster.clone(), registry.clone());
                    tokio::spawn(async move {
                        if let Err(e) = rebuild_registry(config, roster, registry).await {
                            tracing::error!(
                                error = %e,
                                "registry rebuild failed; keeping previous registry"
                            );
                        }
                    });
                }
                Some(event) = channels.events.recv() => {
                    tracing::info!(
                        event_id = %event.event_id,
                        identity = %event.identity.id,
                        name = %event.identity.display_name,
                        confidence = event.confidence,
                        "attendance event"
                    );
                }
                Ok(()) = channels.summaries.changed() => {
                    if let Some(summary) = channels.summaries.borrow_and_update().as_ref() {
                        tracing::debug!(
                            frame_id = summary.frame_id,
                            disposition = ?summary.disposition,
                            faces = summary.detections.len(),
                            fps = summary.performance.fps,
                            status = ?summary.performance.status,
                            "frame"
                        );
                    }
                }
                changed = channels.status.changed() => {
                    let status = current_status(&mut channels, changed.is_ok());
                    if status == SessionStatus::Running {
                        restarts = 0;
                    }
                    if !status.is_terminal() {
                        continue;
                    }
                    pipeline = session.stop();
                    if let SessionStatus::Failed(reason) = status {
                        restarts += 1;
                        if restarts > config.max_restarts {
                            anyhow::bail!(
                                "session failed {restarts} times in a row; last error: {reason}"
                            );
                        }
                        tracing::warn!(
                            reason = %reason,
                            attempt = restarts,
                            "session failed; restarting"
                        );
                        tokio::time::sleep(RESTART_BACKOFF).await;
                        continue 'sessions;
                    }
                    break 'sessions;
                }
            }
        }
    }

    Ok(())
}

/// Status after a `changed()` wake-up. A closed channel means the thread is
/// gone; treat that as stopped if it never reported a terminal state.
fn current_status(channels: &mut SessionChannels, open: bool) -> SessionStatus {
    let status = channels.status.borrow_and_update().clone();
    if open || status.is_terminal() {
        status
    } else {
        SessionStatus::Failed("session thread exited".into())
    }
}

fn load_roster(config: &Config) -> Result<Roster> {
    match &config.roster_path {
        Some(path) => {
            Roster::load(path).with_context(|| format!("failed to load roster {}", path.display()))
        }
        None => {
            tracing::info!("no roster configured; identities come from folder names");
            Ok(Roster::default())
        }
    }
}

async fn rebuild_registry(
    config: Arc<Config>,
    roster: Arc<Roster>,
    registry: Arc<SharedRegistry>,
) -> Result<u64> {
    tokio::task::spawn_blocking(move || -> Result<u64> {
        let mut provider = OnnxEmbeddingProvider::load(&config.model_dir)?;
        let generation = registry.reload(
            &config.corpus_dir,
            &mut provider,
            roster.as_ref(),
            &config.registry,
        )?;
        Ok(generation)
    })
    .await
    .context("registry task panicked")?
}

fn build_pipeline(config: &Config, registry: &Arc<SharedRegistry>) -> Result<RecognitionPipeline> {
    let provider = OnnxEmbeddingProvider::load(&config.model_dir)
        .with_context(|| format!("failed to load models from {}", config.model_dir.display()))?;
    let store = SqliteAttendanceStore::open(&config.attendance_db)
        .with_context(|| format!("failed to open {}", config.attendance_db.display()))?;
    let today = store.present_on(chrono::Local::now().date_naive())?;
    tracing::info!(present_today = today.len(), "attendance store ready");
    Ok(RecognitionPipeline::new(
        Box::new(provider),
        registry.clone(),
        Box::new(store),
        &config.pipeline,
    ))
}

fn camera_factory(config: &Config) -> SourceFactory {
    let device = config.camera_device.clone();
    let capture = config.capture;
    let warmup = config.warmup_frames;
    Box::new(move || {
        let mut camera = Camera::open(&device, &capture)?;
        camera.warm_up(warmup)?;
        Ok(Box::new(camera) as Box<dyn FrameSource>)
    })
}
