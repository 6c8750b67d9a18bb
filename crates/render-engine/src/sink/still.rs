//! Single-image sink.

use std::path::{Path, PathBuf};

use image::ImageFormat;
use sightline_common::error::{SightlineError, SightlineResult};
use sightline_job_model::{Frame, FrameGeometry, SinkKind};

use super::{ensure_dir, remove_file_quiet, FinalizeMode, FrameSink};

/// Writes exactly one annotated frame to an image file. The format follows
/// the target's extension.
pub struct ImageSink {
    target: PathBuf,
    frames: u64,
}

impl ImageSink {
    pub fn new(target: &Path) -> Self {
        Self {
            target: target.to_path_buf(),
            frames: 0,
        }
    }
}

impl FrameSink for ImageSink {
    fn kind(&self) -> SinkKind {
        SinkKind::SingleImage
    }

    fn open(&mut self, _geometry: &FrameGeometry) -> SightlineResult<()> {
        ImageFormat::from_path(&self.target).map_err(|_| {
            SightlineError::io_failure(format!("No image format for {}", self.target.display()))
        })?;
        if let Some(parent) = self.target.parent() {
            ensure_dir(parent)?;
        }
        Ok(())
    }

    fn write(&mut self, frame: &Frame) -> SightlineResult<()> {
        if self.frames > 0 {
            return Err(SightlineError::unsupported(
                "single-image export takes exactly one frame",
            ));
        }
        frame.save(&self.target).map_err(|e| {
            SightlineError::io_failure(format!("Cannot write {}: {e}", self.target.display()))
        })?;
        self.frames = 1;
        Ok(())
    }

    fn finalize(&mut self, mode: FinalizeMode) -> SightlineResult<Option<PathBuf>> {
        match mode {
            FinalizeMode::Commit => {
                if self.frames == 0 {
                    return Err(SightlineError::invalid_output("no frame was written"));
                }
                Ok(Some(self.target.clone()))
            }
            FinalizeMode::Cleanup => {
                if self.frames > 0 {
                    remove_file_quiet(&self.target);
                }
                Ok(None)
            }
        }
    }

    fn frames_written(&self) -> u64 {
        self.frames
    }
}
