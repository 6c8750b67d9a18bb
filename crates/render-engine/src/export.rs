//! Export job orchestration.
//!
//! An [`ExportJob`] wires source → annotation → sink for one request and owns
//! every transient resource of the run (source handle, writer, temp files).
//! [`ExportJob::run`] blocks the calling thread until the job reaches a
//! terminal state, reporting through a callback:
//!
//! - `Progress` events are monotonic and start at 0; 100 is sent only on success.
//! - `Finished` is always the last event, delivered after every handle has
//!   been released and partial output has been cleaned up.
//!
//! Cancellation is cooperative. [`JobMonitor::cancel`] sets a flag that the
//! job polls between frames: every frame for image and short jobs, every
//! `video_cancel_check_interval` frames otherwise, and once more right before
//! committing.

use std::path::Path;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use sightline_common::clock::{Clock, SystemClock};
use sightline_common::config::ExportDefaults;
use sightline_common::error::{SightlineError, SightlineResult};
use sightline_job_model::{
    running_percent, ExportEvent, ExportOutcome, ExportRequest, FrameGeometry, JobStatus,
    ProgressTracker, SinkKind, SourceKind,
};
use sightline_media_io::{open_source, FrameSource, MediaBackend, VideoCodec};

use crate::annotate::{Annotator, InferenceEngine};
use crate::compositor::BannerStyle;
use crate::sink::{build_sink, FinalizeMode, FrameSink, SinkSettings};

/// Tunables for one export run, derived from [`ExportDefaults`].
#[derive(Debug, Clone, PartialEq)]
pub struct ExportSettings {
    /// Codecs probed for video export, in discovery order.
    pub codec_candidates: Vec<VideoCodec>,
    /// Codecs that win over discovery order when supported.
    pub preferred_codecs: Vec<VideoCodec>,
    /// Encoded videos below this size are rejected.
    pub min_video_bytes: u64,
    pub video_cancel_check_interval: u64,
    pub short_job_frames: u64,
    pub frame_image_extension: String,
    pub banner: BannerStyle,
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self::from_defaults(&ExportDefaults::default())
    }
}

impl ExportSettings {
    /// Unknown codec names in the config are logged and skipped.
    pub fn from_defaults(defaults: &ExportDefaults) -> Self {
        Self {
            codec_candidates: VideoCodec::parse_list(&defaults.codec_candidates),
            preferred_codecs: VideoCodec::parse_list(&defaults.preferred_codecs),
            min_video_bytes: defaults.min_video_bytes,
            video_cancel_check_interval: defaults.video_cancel_check_interval.max(1),
            short_job_frames: defaults.short_job_frames,
            frame_image_extension: defaults
                .frame_image_extension
                .trim_start_matches('.')
                .to_string(),
            banner: BannerStyle::from(&defaults.banner),
        }
    }

    /// Frames between cancellation checks.
    pub fn cancel_interval(&self, source: SourceKind, geometry: &FrameGeometry) -> u64 {
        let short = geometry.has_known_length() && geometry.total_frames <= self.short_job_frames;
        if source == SourceKind::Image || short {
            1
        } else {
            self.video_cancel_check_interval.max(1)
        }
    }
}

const CANCEL_OPEN: u8 = 0;
const CANCEL_REQUESTED: u8 = 1;
const CANCEL_SEALED: u8 = 2;

/// One-shot cancellation flag shared between a job and its owner.
///
/// The job seals the token once it commits or fails; requests after that
/// are rejected.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    state: Arc<AtomicU8>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the job to stop. Returns `true` only for the request that was
    /// accepted; repeats and requests after the job sealed the token return
    /// `false`.
    pub fn request(&self) -> bool {
        self.state
            .compare_exchange(
                CANCEL_OPEN,
                CANCEL_REQUESTED,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }

    pub fn is_requested(&self) -> bool {
        self.state.load(Ordering::SeqCst) == CANCEL_REQUESTED
    }

    /// Close the token to further requests. Returns `false` if a request got
    /// in first.
    fn seal(&self) -> bool {
        match self.state.compare_exchange(
            CANCEL_OPEN,
            CANCEL_SEALED,
            Ordering::SeqCst,
            Ordering::SeqCst,
        ) {
            Ok(_) => true,
            Err(current) => current == CANCEL_SEALED,
        }
    }
}

/// Read-only view of a job plus its cancel switch, usable from any thread.
#[derive(Debug, Clone)]
pub struct JobMonitor {
    cancel: CancelToken,
    progress: Arc<AtomicU8>,
    status: Arc<Mutex<JobStatus>>,
}

impl JobMonitor {
    pub fn status(&self) -> JobStatus {
        *self.status.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Last published progress percentage.
    pub fn progress(&self) -> u8 {
        self.progress.load(Ordering::SeqCst)
    }

    /// See [`CancelToken::request`].
    pub fn cancel(&self) -> bool {
        let accepted = self.cancel.request();
        if accepted {
            tracing::info!("Export cancellation requested");
        }
        accepted
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.cancel.is_requested()
    }
}

enum Pump {
    Drained,
    Canceled,
}

/// A single export run. Consumed by [`ExportJob::run`]; never restarted.
pub struct ExportJob {
    request: ExportRequest,
    backend: Arc<dyn MediaBackend>,
    engine: Arc<dyn InferenceEngine>,
    settings: ExportSettings,
    clock: Arc<dyn Clock>,
    source: Option<Box<dyn FrameSource>>,
    monitor: JobMonitor,
}

impl ExportJob {
    pub fn new(
        request: ExportRequest,
        backend: Arc<dyn MediaBackend>,
        engine: Arc<dyn InferenceEngine>,
    ) -> Self {
        Self {
            request,
            backend,
            engine,
            settings: ExportSettings::default(),
            clock: Arc::new(SystemClock),
            source: None,
            monitor: JobMonitor {
                cancel: CancelToken::new(),
                progress: Arc::new(AtomicU8::new(0)),
                status: Arc::new(Mutex::new(JobStatus::Idle)),
            },
        }
    }

    pub fn with_settings(mut self, settings: ExportSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Export from an already-open source (e.g. the handle a preview pass
    /// played to the end) instead of opening the request's source. A video
    /// source that has been read from is rewound first.
    pub fn with_source(mut self, source: Box<dyn FrameSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn request(&self) -> &ExportRequest {
        &self.request
    }

    pub fn monitor(&self) -> JobMonitor {
        self.monitor.clone()
    }

    /// Run to completion on the calling thread.
    pub fn run<F>(mut self, mut on_event: F) -> ExportOutcome
    where
        F: FnMut(ExportEvent),
    {
        let started = Instant::now();
        self.set_status(JobStatus::Running);
        tracing::info!(
            source = ?self.request.source_kind(),
            sink = self.request.sink.as_str(),
            target = %self.request.output_target.display(),
            engine = self.engine.name(),
            "Export started"
        );

        let mut tracker = ProgressTracker::new();
        self.publish(&mut tracker, 0, &mut on_event);

        let mut sink = None;
        let pumped = self.pump(&mut sink, &mut tracker, &mut on_event);
        let outcome = self.conclude(pumped, sink, &mut tracker, &mut on_event);

        match &outcome {
            ExportOutcome::Completed {
                output,
                frames_written,
                ..
            } => tracing::info!(
                output = %output.display(),
                frames = frames_written,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Export completed"
            ),
            ExportOutcome::Failed { kind, reason } => tracing::warn!(
                kind = %kind,
                reason = %reason,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Export failed"
            ),
            ExportOutcome::Canceled => tracing::info!(
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Export canceled"
            ),
        }

        on_event(ExportEvent::Finished {
            outcome: outcome.clone(),
        });
        outcome
    }

    fn pump<F>(
        &mut self,
        slot: &mut Option<Box<dyn FrameSink>>,
        tracker: &mut ProgressTracker,
        on_event: &mut F,
    ) -> SightlineResult<Pump>
    where
        F: FnMut(ExportEvent),
    {
        if !self.request.is_compatible() {
            return Err(SightlineError::source_open(format!(
                "{} export cannot read from a {:?} source",
                self.request.sink.as_str(),
                self.request.source_kind()
            )));
        }

        let mut source = match self.source.take() {
            Some(source) => source,
            None => open_source(&self.request.source, self.backend.as_ref())?,
        };
        if source.kind() != self.request.source_kind() {
            return Err(SightlineError::source_open(format!(
                "expected a {:?} source, got {:?}",
                self.request.source_kind(),
                source.kind()
            )));
        }
        if source.kind() == SourceKind::Video && source.position() > 0 {
            tracing::debug!(position = source.position(), "Rewinding video source");
            source.rewind()?;
        }

        let geometry = source.geometry();
        let annotator = Annotator::new(Arc::clone(&self.engine))
            .with_clock(Arc::clone(&self.clock))
            .with_banner(self.settings.banner);

        let sink = slot.insert(build_sink(
            self.request.sink,
            &self.request.output_target,
            Arc::clone(&self.backend),
            &self.sink_settings(),
        ));
        sink.open(&geometry)?;

        let interval = self.settings.cancel_interval(source.kind(), &geometry);
        tracing::debug!(
            width = geometry.width,
            height = geometry.height,
            fps = geometry.fps,
            total_frames = geometry.total_frames,
            cancel_interval = interval,
            "Frame loop starting"
        );

        let mut done = 0u64;
        loop {
            if done % interval == 0 && self.monitor.cancel.is_requested() {
                tracing::info!(frames = done, "Cancellation observed");
                return Ok(Pump::Canceled);
            }
            let Some(frame) = source.next_frame()? else {
                break;
            };
            let annotated = annotator.annotate(&frame)?;
            sink.write(&annotated)?;
            done += 1;

            let percent =
                running_percent(done, geometry.total_frames, self.settings.short_job_frames);
            self.publish(tracker, percent, on_event);
        }

        Ok(Pump::Drained)
    }

    fn conclude<F>(
        &mut self,
        pumped: SightlineResult<Pump>,
        sink: Option<Box<dyn FrameSink>>,
        tracker: &mut ProgressTracker,
        on_event: &mut F,
    ) -> ExportOutcome
    where
        F: FnMut(ExportEvent),
    {
        let sink = match (pumped, sink) {
            (Err(e), sink) => return self.fail(e, sink),
            (Ok(Pump::Canceled), sink) => return self.cancel_out(sink),
            (Ok(Pump::Drained), None) => {
                return self.fail(SightlineError::invalid_output("no sink was opened"), None)
            }
            (Ok(Pump::Drained), Some(sink)) => sink,
        };

        if !self.monitor.cancel.seal() {
            tracing::info!("Cancellation observed before commit");
            return self.cancel_out(Some(sink));
        }

        let mut sink = sink;
        match sink.finalize(FinalizeMode::Commit) {
            Ok(Some(output)) => {
                let frames_written = sink.frames_written();
                drop(sink);
                self.set_status(JobStatus::Completed);
                self.publish(tracker, 100, on_event);
                ExportOutcome::Completed {
                    message: self.summary(&output, frames_written),
                    output,
                    frames_written,
                }
            }
            Ok(None) => self.fail(
                SightlineError::invalid_output("sink committed no output"),
                Some(sink),
            ),
            Err(e) => self.fail(e, Some(sink)),
        }
    }

    fn fail(&mut self, error: SightlineError, sink: Option<Box<dyn FrameSink>>) -> ExportOutcome {
        self.monitor.cancel.seal();
        if let Some(mut sink) = sink {
            if let Err(cleanup) = sink.finalize(FinalizeMode::Cleanup) {
                tracing::warn!(error = %cleanup, "Cleanup after failure was incomplete");
            }
        }
        self.set_status(JobStatus::Failed);
        ExportOutcome::failed(&error)
    }

    fn cancel_out(&mut self, sink: Option<Box<dyn FrameSink>>) -> ExportOutcome {
        self.set_status(JobStatus::Canceling);
        if let Some(mut sink) = sink {
            if let Err(e) = sink.finalize(FinalizeMode::Cleanup) {
                self.set_status(JobStatus::Failed);
                return ExportOutcome::failed(&e);
            }
        }
        self.set_status(JobStatus::Canceled);
        ExportOutcome::Canceled
    }

    fn publish<F>(&self, tracker: &mut ProgressTracker, percent: u8, on_event: &mut F)
    where
        F: FnMut(ExportEvent),
    {
        if let Some(percent) = tracker.advance(percent) {
            self.monitor.progress.store(percent, Ordering::SeqCst);
            on_event(ExportEvent::Progress { percent });
        }
    }

    fn set_status(&self, next: JobStatus) {
        let mut status = self
            .monitor
            .status
            .lock()
            .unwrap_or_else(|p| p.into_inner());
        match status.transition(next) {
            Ok(next) => *status = next,
            Err(e) => tracing::error!(error = %e, "Ignoring invalid job transition"),
        }
    }

    fn sink_settings(&self) -> SinkSettings {
        SinkSettings {
            codec_candidates: self.settings.codec_candidates.clone(),
            preferred_codecs: self.settings.preferred_codecs.clone(),
            min_video_bytes: self.settings.min_video_bytes,
            frame_image_extension: self.settings.frame_image_extension.clone(),
            clock: Arc::clone(&self.clock),
        }
    }

    fn summary(&self, output: &Path, frames: u64) -> String {
        match self.request.sink {
            SinkKind::SingleImage => format!("Saved annotated image to {}", output.display()),
            SinkKind::SingleVideo => format!(
                "Saved annotated video to {} ({frames} frames)",
                output.display()
            ),
            SinkKind::FrameSequence => format!(
                "Exported {frames} frames to {}. Run create_video.sh or create_video.bat there to assemble a video with ffmpeg.",
                output.display()
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotate::PassthroughEngine;
    use sightline_common::error::ErrorKind;
    use sightline_job_model::{Frame, SourceSpec};
    use sightline_media_io::testing::ScriptedBackend;

    #[test]
    fn test_settings_from_defaults() {
        let settings = ExportSettings::default();
        assert_eq!(
            settings.codec_candidates,
            vec![VideoCodec::Mpeg4, VideoCodec::Xvid, VideoCodec::Mjpeg]
        );
        assert_eq!(
            settings.preferred_codecs,
            vec![VideoCodec::Xvid, VideoCodec::Mjpeg]
        );
        assert_eq!(settings.min_video_bytes, 1024);
        assert_eq!(settings.frame_image_extension, "jpg");
    }

    #[test]
    fn test_cancel_interval() {
        let settings = ExportSettings::default();
        let long = FrameGeometry::new(64, 48, 30.0, 300);
        let short = FrameGeometry::new(64, 48, 30.0, 20);
        let unknown = FrameGeometry::new(64, 48, 30.0, 0);

        assert_eq!(settings.cancel_interval(SourceKind::Video, &long), 30);
        assert_eq!(settings.cancel_interval(SourceKind::Video, &short), 1);
        assert_eq!(settings.cancel_interval(SourceKind::Video, &unknown), 30);
        assert_eq!(settings.cancel_interval(SourceKind::Image, &long), 1);
    }

    #[test]
    fn test_cancel_token_accepts_one_request() {
        let token = CancelToken::new();
        assert!(!token.is_requested());
        assert!(token.request());
        assert!(!token.request());
        assert!(token.is_requested());
        assert!(!token.seal());
    }

    #[test]
    fn test_sealed_token_rejects_requests() {
        let token = CancelToken::new();
        assert!(token.seal());
        assert!(!token.request());
        assert!(!token.is_requested());
        assert!(token.seal());
    }

    #[test]
    fn test_mismatched_sink_fails_before_opening_anything() {
        let tmp = tempfile::tempdir().unwrap();
        let backend = Arc::new(ScriptedBackend::new(FrameGeometry::new(8, 8, 10.0, 3), 3));
        let request = ExportRequest::new(
            SourceSpec::LiveFrame(Frame::new(8, 8)),
            SinkKind::SingleVideo,
            tmp.path().join("out.mp4"),
        );
        let job = ExportJob::new(request, backend.clone(), Arc::new(PassthroughEngine));
        let monitor = job.monitor();

        let outcome = job.run(|_| {});
        assert_eq!(outcome.error_kind(), Some(ErrorKind::SourceOpenFailure));
        assert_eq!(monitor.status(), JobStatus::Failed);
        assert!(backend.opened_writers().is_empty());
    }

    #[test]
    fn test_status_reaches_completed() {
        let tmp = tempfile::tempdir().unwrap();
        let backend = Arc::new(ScriptedBackend::new(FrameGeometry::new(8, 8, 10.0, 3), 3));
        let request = ExportRequest::new(
            SourceSpec::LiveFrame(Frame::new(8, 8)),
            SinkKind::SingleImage,
            tmp.path().join("shot.png"),
        );
        let job = ExportJob::new(request, backend, Arc::new(PassthroughEngine));
        let monitor = job.monitor();
        assert_eq!(monitor.status(), JobStatus::Idle);

        let outcome = job.run(|_| {});
        assert!(outcome.is_completed());
        assert_eq!(monitor.status(), JobStatus::Completed);
        assert_eq!(monitor.progress(), 100);
        assert!(!monitor.cancel());
    }
}
