//! Recognition session: one OS thread that owns the frame source and the
//! pipeline, publishing results through watch channels.

use chrono::Local;
use rollcall_core::{
    AttendanceEvent, Detection, Disposition, PerformanceMonitor, PerformanceStats,
    RecognitionPipeline,
};
use rollcall_hw::{CameraError, FrameSource};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc as std_mpsc, Arc};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{mpsc, watch};

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("failed to spawn session thread: {0}")]
    Spawn(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStatus {
    Starting,
    Running,
    Stopped,
    Failed(String),
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Stopped | SessionStatus::Failed(_))
    }
}

/// Latest processed frame, for whoever is displaying the session.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameSummary {
    pub frame_id: u64,
    pub sequence: u32,
    pub disposition: Disposition,
    pub detections: Vec<Detection>,
    /// Pipeline timing over recent frames.
    pub performance: PerformanceStats,
}

/// Opens the frame source on the session thread.
pub type SourceFactory = Box<dyn FnOnce() -> Result<Box<dyn FrameSource>, CameraError> + Send>;

/// Receiving ends handed to the host.
pub struct SessionChannels {
    pub summaries: watch::Receiver<Option<FrameSummary>>,
    pub status: watch::Receiver<SessionStatus>,
    pub events: mpsc::UnboundedReceiver<AttendanceEvent>,
}

struct WorkerChannels {
    summaries: watch::Sender<Option<FrameSummary>>,
    status: watch::Sender<SessionStatus>,
    events: mpsc::UnboundedSender<AttendanceEvent>,
    done: std_mpsc::Sender<()>,
}

pub struct RecognitionSession {
    running: Arc<AtomicBool>,
    done: std_mpsc::Receiver<()>,
    thread: Option<JoinHandle<RecognitionPipeline>>,
    join_timeout: Duration,
}

impl RecognitionSession {
    /// Spawn the session thread. The source is opened on that thread; a
    /// failure to open it is reported as `SessionStatus::Failed`.
    pub fn start(
        open_source: SourceFactory,
        pipeline: RecognitionPipeline,
        join_timeout: Duration,
    ) -> Result<(Self, SessionChannels), SessionError> {
        let (summary_tx, summary_rx) = watch::channel(None);
        let (status_tx, status_rx) = watch::channel(SessionStatus::Starting);
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (done_tx, done_rx) = std_mpsc::channel();
        let running = Arc::new(AtomicBool::new(true));

        let worker = WorkerChannels {
            summaries: summary_tx,
            status: status_tx,
            events: event_tx,
            done: done_tx,
        };
        let flag = running.clone();
        let thread = std::thread::Builder::new()
            .name("rollcall-session".into())
            .spawn(move || run(open_source, pipeline, flag, worker))?;

        Ok((
            Self {
                running,
                done: done_rx,
                thread: Some(thread),
                join_timeout,
            },
            SessionChannels {
                summaries: summary_rx,
                status: status_rx,
                events: event_rx,
            },
        ))
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
            && self.thread.as_ref().map(|t| !t.is_finished()).unwrap_or(false)
    }

    /// Signal the thread and wait up to the join timeout. Returns the
    /// pipeline for reuse, or `None` if the thread had to be detached or
    /// died.
    pub fn stop(mut self) -> Option<RecognitionPipeline> {
        self.running.store(false, Ordering::Release);
        let thread = self.thread.take()?;

        match self.done.recv_timeout(self.join_timeout) {
            Ok(()) | Err(std_mpsc::RecvTimeoutError::Disconnected) => match thread.join() {
                Ok(pipeline) => Some(pipeline),
                Err(_) => {
                    tracing::error!("session thread panicked");
                    None
                }
            },
            Err(std_mpsc::RecvTimeoutError::Timeout) => {
                tracing::warn!(
                    timeout_ms = self.join_timeout.as_millis() as u64,
                    "session thread did not stop in time; detaching"
                );
                None
            }
        }
    }
}

impl Drop for RecognitionSession {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
    }
}

fn run(
    open_source: SourceFactory,
    mut pipeline: RecognitionPipeline,
    running: Arc<AtomicBool>,
    channels: WorkerChannels,
) -> RecognitionPipeline {
    tracing::info!("session thread started");
    let final_status = match open_source() {
        Ok(mut source) => {
            let _ = channels.status.send(SessionStatus::Running);
            let status = capture_loop(source.as_mut(), &mut pipeline, &running, &channels);
            drop(source);
            tracing::debug!("frame source released");
            status
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to open frame source");
            SessionStatus::Failed(e.to_string())
        }
    };

    tracing::info!(status = ?final_status, "session thread exiting");
    let _ = channels.status.send(final_status);
    let _ = channels.done.send(());
    pipeline
}

fn capture_loop(
    source: &mut dyn FrameSource,
    pipeline: &mut RecognitionPipeline,
    running: &AtomicBool,
    channels: &WorkerChannels,
) -> SessionStatus {
    let mut frame_id = 0u64;
    let mut monitor = PerformanceMonitor::default();

    while running.load(Ordering::Acquire) {
        let frame = match source.next_frame() {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!(error = %e, "frame capture failed");
                return SessionStatus::Failed(e.to_string());
            }
        };
        frame_id += 1;
        if frame.is_dark {
            tracing::trace!(seq = frame.sequence, "dark frame");
            continue;
        }

        let started = Instant::now();
        let processed = panic::catch_unwind(AssertUnwindSafe(|| {
            pipeline.process_frame(frame_id, &frame.image, frame.timestamp, Local::now())
        }));
        monitor.record(started.elapsed());
        let outcome = match processed {
            Ok(outcome) => outcome,
            Err(_) => {
                tracing::error!(frame_id, "pipeline panicked; dropping frame and session state");
                pipeline.reset();
                continue;
            }
        };

        for event in outcome.events {
            let _ = channels.events.send(event);
        }
        if outcome.disposition != Disposition::Skipped {
            channels.summaries.send_replace(Some(FrameSummary {
                frame_id,
                sequence: frame.sequence,
                disposition: outcome.disposition,
                detections: outcome.detections,
                performance: monitor.stats(),
            }));
        }
    }

    SessionStatus::Stopped
}
