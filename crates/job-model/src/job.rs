//! Export requests and the job status state machine.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sightline_common::clock::Clock;

use crate::geometry::Frame;

/// Where raw frames come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Image,
    Video,
}

/// How annotated frames are persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkKind {
    /// One image file.
    SingleImage,
    /// One codec-backed video file.
    SingleVideo,
    /// A directory of numbered images plus conversion scripts.
    FrameSequence,
}

impl SinkKind {
    /// Whether this sink can consume frames from `source`.
    pub fn accepts(self, source: SourceKind) -> bool {
        matches!(
            (self, source),
            (SinkKind::SingleImage, SourceKind::Image)
                | (SinkKind::SingleVideo, SourceKind::Video)
                | (SinkKind::FrameSequence, SourceKind::Video)
        )
    }

    /// Whether the output target is a directory rather than a file.
    pub fn targets_directory(self) -> bool {
        matches!(self, SinkKind::FrameSequence)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SinkKind::SingleImage => "single_image",
            SinkKind::SingleVideo => "single_video",
            SinkKind::FrameSequence => "frame_sequence",
        }
    }
}

impl std::str::FromStr for SinkKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "image" | "single_image" | "single-image" => Ok(SinkKind::SingleImage),
            "video" | "single_video" | "single-video" => Ok(SinkKind::SingleVideo),
            "frames" | "frame_sequence" | "frame-sequence" => Ok(SinkKind::FrameSequence),
            other => Err(format!("Unknown sink: {other}. Use: image, video, frames")),
        }
    }
}

/// The input of an export.
#[derive(Debug, Clone)]
pub enum SourceSpec {
    /// A still image on disk.
    Image(PathBuf),
    /// A decodable video on disk.
    Video(PathBuf),
    /// A frame already held in memory (e.g. the currently displayed frame).
    LiveFrame(Frame),
}

impl SourceSpec {
    pub fn kind(&self) -> SourceKind {
        match self {
            SourceSpec::Image(_) | SourceSpec::LiveFrame(_) => SourceKind::Image,
            SourceSpec::Video(_) => SourceKind::Video,
        }
    }

    /// Input location; `None` for in-memory frames.
    pub fn path(&self) -> Option<&Path> {
        match self {
            SourceSpec::Image(path) | SourceSpec::Video(path) => Some(path),
            SourceSpec::LiveFrame(_) => None,
        }
    }
}

/// A request to export one source through one sink.
#[derive(Debug, Clone)]
pub struct ExportRequest {
    /// Frame origin.
    pub source: SourceSpec,

    /// Output strategy.
    pub sink: SinkKind,

    /// File path (single image/video) or directory path (frame sequence).
    pub output_target: PathBuf,
}

impl ExportRequest {
    pub fn new(source: SourceSpec, sink: SinkKind, output_target: impl Into<PathBuf>) -> Self {
        Self {
            source,
            sink,
            output_target: output_target.into(),
        }
    }

    pub fn source_kind(&self) -> SourceKind {
        self.source.kind()
    }

    /// Whether the sink kind can consume the source kind.
    pub fn is_compatible(&self) -> bool {
        self.sink.accepts(self.source.kind())
    }
}

/// Default output location for a sink inside `base_dir`, stamped with the
/// current time: `detection_result_<stamp>.jpg`, `.mp4`, or a directory.
pub fn default_output_target(sink: SinkKind, base_dir: &Path, clock: &dyn Clock) -> PathBuf {
    let stem = format!("detection_result_{}", clock.file_stamp());
    match sink {
        SinkKind::SingleImage => base_dir.join(format!("{stem}.jpg")),
        SinkKind::SingleVideo => base_dir.join(format!("{stem}.mp4")),
        SinkKind::FrameSequence => base_dir.join(stem),
    }
}

/// Lifecycle of an export job.
///
/// ```text
/// Idle ──> Running ──> Completed
///             │ └────> Failed
///             └─> Canceling ──> Canceled
///                    └────────> Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Idle,
    Running,
    Canceling,
    Completed,
    Failed,
    Canceled,
}

/// A status change the state machine does not allow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid job transition {from:?} -> {to:?}")]
pub struct InvalidTransition {
    pub from: JobStatus,
    pub to: JobStatus,
}

impl JobStatus {
    /// Terminal states end the job; it is never restarted.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Canceled
        )
    }

    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Idle, Running)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Canceling)
                | (Canceling, Canceled)
                | (Canceling, Failed)
        )
    }

    /// Validated transition.
    pub fn transition(self, next: JobStatus) -> Result<JobStatus, InvalidTransition> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(InvalidTransition {
                from: self,
                to: next,
            })
        }
    }
}
