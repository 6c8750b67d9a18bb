//! Events emitted by a running export job.
//!
//! A job emits zero or more [`ExportEvent::Progress`] updates followed by
//! exactly one [`ExportEvent::Finished`]. Progress percentages never decrease
//! within a run.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use sightline_common::error::{ErrorKind, SightlineError};

use crate::job::{ExportRequest, SinkKind};

/// A single event from an export job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExportEvent {
    /// Percentage complete in `[0, 100]`.
    Progress { percent: u8 },

    /// Terminal event; always the last event of a job.
    Finished { outcome: ExportOutcome },
}

impl ExportEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExportEvent::Finished { .. })
    }
}

/// How an export job ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExportOutcome {
    Completed {
        /// Committed output file or directory.
        output: PathBuf,
        /// Annotated frames written to the sink.
        frames_written: u64,
        /// Summary suitable for showing to a user.
        message: String,
    },
    Failed {
        kind: ErrorKind,
        reason: String,
    },
    Canceled,
}

impl ExportOutcome {
    pub fn failed(error: &SightlineError) -> Self {
        ExportOutcome::Failed {
            kind: error.kind(),
            reason: error.to_string(),
        }
    }

    pub fn output(&self) -> Option<&PathBuf> {
        match self {
            ExportOutcome::Completed { output, .. } => Some(output),
            _ => None,
        }
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            ExportOutcome::Failed { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, ExportOutcome::Completed { .. })
    }

    pub fn is_canceled(&self) -> bool {
        matches!(self, ExportOutcome::Canceled)
    }
}

/// Monotonic progress counter for one run.
///
/// `advance` returns the value to publish, or `None` when it would not move
/// the counter forward.
#[derive(Debug, Clone, Default)]
pub struct ProgressTracker {
    last: Option<u8>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last published value (0 before anything was published).
    pub fn current(&self) -> u8 {
        self.last.unwrap_or(0)
    }

    /// Offer a new percentage; clamps to 100 and drops regressions and repeats.
    pub fn advance(&mut self, percent: u8) -> Option<u8> {
        let percent = percent.min(100);
        match self.last {
            Some(last) if percent <= last => None,
            _ => {
                self.last = Some(percent);
                Some(percent)
            }
        }
    }
}

/// Percentage for `done` of `total` frames while a job is still running.
///
/// Known totals use `floor(done / total * 100)` capped at 99 so that 100 is
/// only published on completion. Unknown totals (`total == 0`) advance one
/// point every `synthetic_step` frames, also capped at 99.
pub fn running_percent(done: u64, total: u64, synthetic_step: u64) -> u8 {
    let raw = if total > 0 {
        done.saturating_mul(100) / total
    } else {
        done / synthetic_step.max(1)
    };
    raw.min(99) as u8
}

/// Export kind as recorded by the persistence layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportKind {
    Image,
    Video,
    Frames,
}

impl From<SinkKind> for ExportKind {
    fn from(sink: SinkKind) -> Self {
        match sink {
            SinkKind::SingleImage => ExportKind::Image,
            SinkKind::SingleVideo => ExportKind::Video,
            SinkKind::FrameSequence => ExportKind::Frames,
        }
    }
}

/// Row a persistence layer can store for a completed export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportRecord {
    pub owner_id: i64,
    pub export_kind: ExportKind,
    pub output_path: PathBuf,
    pub status: String,
}

impl ExportRecord {
    /// Build a record for a `Completed` outcome; other outcomes are not stored.
    pub fn from_outcome(
        owner_id: i64,
        request: &ExportRequest,
        outcome: &ExportOutcome,
    ) -> Option<Self> {
        let output = outcome.output()?;
        Some(Self {
            owner_id,
            export_kind: request.sink.into(),
            output_path: output.clone(),
            status: "completed".to_string(),
        })
    }
}
