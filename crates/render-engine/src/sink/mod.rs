//! Output sinks.
//!
//! A sink receives annotated frames in order and persists them. The lifecycle
//! is `open` once, `write` zero or more times, then `finalize` exactly once:
//! [`FinalizeMode::Commit`] publishes the output at its target path,
//! [`FinalizeMode::Cleanup`] removes everything the sink created.

mod sequence;
mod still;
mod video;

pub use self::sequence::{FrameSequenceSink, COMPLETE_MARKER, FRAMES_DIR, PARAMS_FILE};
pub use self::still::ImageSink;
pub use self::video::VideoSink;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use sightline_common::clock::Clock;
use sightline_common::error::{SightlineError, SightlineResult};
use sightline_job_model::{Frame, FrameGeometry, SinkKind};
use sightline_media_io::{MediaBackend, VideoCodec};

/// How a sink ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizeMode {
    Commit,
    Cleanup,
}

/// Destination for annotated frames.
///
/// The export job seals its cancel token right before calling
/// `finalize(Commit)`. A cancel issued after that point is refused
/// (`JobMonitor::cancel` returns `false`) and the commit goes through.
///
/// Cleanup only removes what the sink itself created. A [`VideoSink`] encodes
/// into a temp sibling, so a file that already existed at its target survives
/// cleanup unchanged.
pub trait FrameSink: Send {
    fn kind(&self) -> SinkKind;

    /// Prepare the output for frames of `geometry`.
    fn open(&mut self, geometry: &FrameGeometry) -> SightlineResult<()>;

    fn write(&mut self, frame: &Frame) -> SightlineResult<()>;

    /// Commit returns the published path. Cleanup returns `None`.
    fn finalize(&mut self, mode: FinalizeMode) -> SightlineResult<Option<PathBuf>>;

    fn frames_written(&self) -> u64;
}

/// Knobs shared by the sink strategies.
#[derive(Clone)]
pub struct SinkSettings {
    pub codec_candidates: Vec<VideoCodec>,
    pub preferred_codecs: Vec<VideoCodec>,
    pub min_video_bytes: u64,
    pub frame_image_extension: String,
    pub clock: Arc<dyn Clock>,
}

/// Build the sink for `kind` writing to `target`.
pub fn build_sink(
    kind: SinkKind,
    target: &Path,
    backend: Arc<dyn MediaBackend>,
    settings: &SinkSettings,
) -> Box<dyn FrameSink> {
    match kind {
        SinkKind::SingleImage => Box::new(ImageSink::new(target)),
        SinkKind::SingleVideo => Box::new(VideoSink::new(target, backend, settings.clone())),
        SinkKind::FrameSequence => Box::new(FrameSequenceSink::new(target, settings.clone())),
    }
}

/// `create_dir_all` with the failure mapped to `IoFailure`.
pub(crate) fn ensure_dir(dir: &Path) -> SightlineResult<()> {
    if dir.as_os_str().is_empty() {
        return Ok(());
    }
    std::fs::create_dir_all(dir)
        .map_err(|e| SightlineError::io_failure(format!("Cannot create {}: {e}", dir.display())))
}

/// Remove a file, treating "already gone" as success.
pub(crate) fn remove_file_quiet(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "Failed to remove file"),
    }
}
