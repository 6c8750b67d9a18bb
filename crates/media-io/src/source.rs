//! Sequential frame sources.
//!
//! A source yields frames in order until it reports end-of-stream with
//! `Ok(None)`. Reading past the end keeps returning `Ok(None)`; it is never
//! an error.

use std::path::Path;

use sightline_common::error::{SightlineError, SightlineResult};
use sightline_job_model::{Frame, FrameGeometry, SourceKind, SourceSpec};

use crate::backend::MediaBackend;

/// A sequential, optionally rewindable reader of frames.
pub trait FrameSource: Send {
    /// Still image or video.
    fn kind(&self) -> SourceKind;

    /// Geometry read when the source was opened.
    fn geometry(&self) -> FrameGeometry;

    /// Next frame, or `None` at end-of-stream.
    fn next_frame(&mut self) -> SightlineResult<Option<Frame>>;

    /// Frames handed out since open or the last rewind.
    fn position(&self) -> u64;

    /// Seek back to the first frame. Single-shot sources return `Unsupported`.
    fn rewind(&mut self) -> SightlineResult<()>;
}

/// Open the source described by `spec`. Videos are decoded through `backend`.
pub fn open_source(
    spec: &SourceSpec,
    backend: &dyn MediaBackend,
) -> SightlineResult<Box<dyn FrameSource>> {
    match spec {
        SourceSpec::Image(path) => Ok(Box::new(StillImageSource::open(path)?)),
        SourceSpec::LiveFrame(frame) => Ok(Box::new(StillImageSource::from_frame(frame.clone()))),
        SourceSpec::Video(path) => {
            if !path.exists() {
                return Err(SightlineError::source_open(format!(
                    "Video not found: {}",
                    path.display()
                )));
            }
            backend.open_video(path)
        }
    }
}

/// A single still frame, yielded exactly once.
pub struct StillImageSource {
    frame: Option<Frame>,
    geometry: FrameGeometry,
    position: u64,
}

impl StillImageSource {
    /// Decode an image file.
    pub fn open(path: &Path) -> SightlineResult<Self> {
        let decoded = image::open(path).map_err(|e| {
            SightlineError::source_open(format!("Failed to read image {}: {e}", path.display()))
        })?;
        let frame = decoded.to_rgb8();
        if frame.width() == 0 || frame.height() == 0 {
            return Err(SightlineError::source_open(format!(
                "Image {} has no pixels",
                path.display()
            )));
        }
        tracing::debug!(
            path = %path.display(),
            width = frame.width(),
            height = frame.height(),
            "Opened image source"
        );
        Ok(Self::from_frame(frame))
    }

    /// Wrap a frame already held in memory.
    pub fn from_frame(frame: Frame) -> Self {
        Self {
            geometry: FrameGeometry::of_frame(&frame),
            frame: Some(frame),
            position: 0,
        }
    }
}

impl FrameSource for StillImageSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Image
    }

    fn geometry(&self) -> FrameGeometry {
        self.geometry
    }

    fn next_frame(&mut self) -> SightlineResult<Option<Frame>> {
        let frame = self.frame.take();
        if frame.is_some() {
            self.position += 1;
        }
        Ok(frame)
    }

    fn position(&self) -> u64 {
        self.position
    }

    fn rewind(&mut self) -> SightlineResult<()> {
        Err(SightlineError::unsupported("Image sources are single-shot"))
    }
}
