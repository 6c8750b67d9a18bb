//! Export session: at most one running export per source window.
//!
//! [`ExportSession::start`] moves the job onto tokio's blocking pool and
//! returns an [`ExportHandle`] that streams the job's events. A second start
//! while a job is active is rejected synchronously with `JobAlreadyRunning`.
//! The session becomes free again before the terminal event is delivered, so
//! a caller reacting to `Finished` can start the next export right away.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use sightline_common::error::{ErrorKind, SightlineError, SightlineResult};
use sightline_job_model::{ExportEvent, ExportOutcome};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::export::{ExportJob, JobMonitor};

/// Events buffered between the job thread and the owner.
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Owner-side gate for export jobs.
#[derive(Debug, Clone, Default)]
pub struct ExportSession {
    active: Arc<AtomicBool>,
}

impl ExportSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a job is running.
    pub fn is_busy(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Start `job` on a blocking worker. Must be called inside a tokio runtime.
    pub fn start(&self, job: ExportJob) -> SightlineResult<ExportHandle> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| SightlineError::unsupported("export sessions need a tokio runtime"))?;

        if self
            .active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::warn!(
                target = %job.request().output_target.display(),
                "Rejected export: another export is running"
            );
            return Err(SightlineError::JobAlreadyRunning);
        }

        let monitor = job.monitor();
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let slot = ActiveSlot(Arc::clone(&self.active));
        let task = runtime.spawn_blocking(move || run_job(job, tx, slot));

        Ok(ExportHandle {
            events: rx,
            monitor,
            task,
        })
    }
}

/// Clears the session's active flag, at the latest when dropped.
struct ActiveSlot(Arc<AtomicBool>);

impl ActiveSlot {
    fn release(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl Drop for ActiveSlot {
    fn drop(&mut self) {
        self.release();
    }
}

fn run_job(job: ExportJob, tx: mpsc::Sender<ExportEvent>, slot: ActiveSlot) {
    let events = tx.clone();
    let ran = catch_unwind(AssertUnwindSafe(|| {
        job.run(|event| {
            if event.is_terminal() {
                slot.release();
            }
            // The owner may have dropped its handle; the job still finishes.
            let _ = events.blocking_send(event);
        })
    }));

    if let Err(payload) = ran {
        let reason = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        tracing::error!(reason = %reason, "Export worker panicked");
        slot.release();
        let _ = tx.blocking_send(ExportEvent::Finished {
            outcome: ExportOutcome::Failed {
                kind: ErrorKind::Internal,
                reason: format!("export worker panicked: {reason}"),
            },
        });
    }
}

/// Owner's view of a started job.
pub struct ExportHandle {
    events: mpsc::Receiver<ExportEvent>,
    monitor: JobMonitor,
    task: JoinHandle<()>,
}

impl ExportHandle {
    /// Request cancellation. `false` if already requested or the job is past
    /// the point of no return.
    pub fn cancel(&self) -> bool {
        self.monitor.cancel()
    }

    pub fn monitor(&self) -> &JobMonitor {
        &self.monitor
    }

    /// Next event in emission order; `None` once the job is done and drained.
    pub async fn next_event(&mut self) -> Option<ExportEvent> {
        self.events.recv().await
    }

    /// Drain events until the job finishes.
    pub async fn wait(self) -> ExportOutcome {
        self.wait_with(|_| {}).await
    }

    /// Like [`wait`](Self::wait), showing every event to `on_event` first.
    pub async fn wait_with<F>(mut self, mut on_event: F) -> ExportOutcome
    where
        F: FnMut(&ExportEvent),
    {
        let mut outcome = None;
        while let Some(event) = self.events.recv().await {
            on_event(&event);
            if let ExportEvent::Finished { outcome: done } = event {
                outcome = Some(done);
            }
        }
        if let Err(e) = self.task.await {
            tracing::warn!(error = %e, "Export worker did not join cleanly");
        }
        outcome.unwrap_or_else(|| ExportOutcome::Failed {
            kind: ErrorKind::Internal,
            reason: "export worker exited without a result".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotate::{InferenceEngine, PassthroughEngine};
    use sightline_job_model::{ExportRequest, Frame, FrameGeometry, SinkKind, SourceSpec};
    use sightline_media_io::testing::ScriptedBackend;
    use std::sync::Mutex;

    /// Blocks on the first frame until the test opens the gate.
    struct Gated {
        gate: Mutex<Option<std::sync::mpsc::Receiver<()>>>,
    }

    impl Gated {
        fn new() -> (Self, std::sync::mpsc::Sender<()>) {
            let (tx, rx) = std::sync::mpsc::channel();
            (
                Self {
                    gate: Mutex::new(Some(rx)),
                },
                tx,
            )
        }
    }

    impl InferenceEngine for Gated {
        fn name(&self) -> &str {
            "gated"
        }

        fn annotate_raw(&self, frame: &Frame) -> anyhow::Result<Frame> {
            let gate = self.gate.lock().unwrap().take();
            if let Some(rx) = gate {
                let _ = rx.recv();
            }
            Ok(frame.clone())
        }
    }

    fn video_job(
        dir: &std::path::Path,
        frames: u64,
        engine: Arc<dyn InferenceEngine>,
    ) -> ExportJob {
        let geometry = FrameGeometry::new(32, 24, 30.0, frames);
        let video = dir.join("input.mp4");
        std::fs::write(&video, b"not decoded by the scripted backend").unwrap();
        let backend = Arc::new(ScriptedBackend::new(geometry, frames));
        let request = ExportRequest::new(
            SourceSpec::Video(video),
            SinkKind::FrameSequence,
            dir.join("frames_out"),
        );
        ExportJob::new(request, backend, engine)
    }

    #[tokio::test]
    async fn test_second_start_is_rejected_while_running() {
        let tmp = tempfile::tempdir().unwrap();
        let (engine, gate) = Gated::new();
        let session = ExportSession::new();

        let handle = session
            .start(video_job(tmp.path(), 5, Arc::new(engine)))
            .unwrap();
        assert!(session.is_busy());

        let err = session
            .start(video_job(tmp.path(), 5, Arc::new(PassthroughEngine)))
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::JobAlreadyRunning);

        gate.send(()).unwrap();
        assert!(handle.wait().await.is_completed());
        assert!(!session.is_busy());
    }

    #[tokio::test]
    async fn test_session_is_free_when_terminal_event_arrives() {
        let tmp = tempfile::tempdir().unwrap();
        let session = ExportSession::new();
        let mut handle = session
            .start(video_job(tmp.path(), 3, Arc::new(PassthroughEngine)))
            .unwrap();

        let mut percents = Vec::new();
        while let Some(event) = handle.next_event().await {
            match event {
                ExportEvent::Progress { percent } => percents.push(percent),
                ExportEvent::Finished { outcome } => {
                    assert!(outcome.is_completed());
                    assert!(!session.is_busy());
                    break;
                }
            }
        }
        assert_eq!(percents.first(), Some(&0));
        assert_eq!(percents.last(), Some(&100));
        assert!(percents.windows(2).all(|w| w[0] < w[1]));

        let next = session
            .start(video_job(tmp.path(), 3, Arc::new(PassthroughEngine)))
            .unwrap();
        assert!(next.wait().await.is_completed());
    }

    #[tokio::test]
    async fn test_cancel_stops_long_job_and_cleans_up() {
        let tmp = tempfile::tempdir().unwrap();
        let (engine, gate) = Gated::new();
        let session = ExportSession::new();
        let handle = session
            .start(video_job(tmp.path(), 300, Arc::new(engine)))
            .unwrap();

        assert!(handle.cancel());
        assert!(!handle.cancel());
        gate.send(()).unwrap();

        let monitor = handle.monitor().clone();
        let outcome = handle.wait().await;
        assert!(outcome.is_canceled());
        assert_eq!(monitor.status(), sightline_job_model::JobStatus::Canceled);
        assert!(!tmp.path().join("frames_out").exists());
        assert!(!monitor.cancel());
    }

    #[test]
    fn test_start_outside_runtime_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let session = ExportSession::new();
        let err = session
            .start(video_job(tmp.path(), 1, Arc::new(PassthroughEngine)))
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::Unsupported);
        assert!(!session.is_busy());
    }
}
