//! Single-video sink.
//!
//! Frames are encoded into a hidden sibling of the target
//! (`.<stem>-XXXXXX.<ext>`). Commit validates the encoded size, removes any
//! existing file at the target, and renames the sibling into place. The
//! target path never holds a half-written video.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use sightline_common::error::{SightlineError, SightlineResult};
use sightline_job_model::{Frame, FrameGeometry, SinkKind};
use sightline_media_io::{CodecProber, MediaBackend, VideoCodec, VideoWriter};
use tempfile::TempPath;

use super::{ensure_dir, FinalizeMode, FrameSink, SinkSettings};

const DEFAULT_CONTAINER: &str = "mp4";

/// Codec-backed video output with a temp-then-rename commit.
pub struct VideoSink {
    target: PathBuf,
    backend: Arc<dyn MediaBackend>,
    settings: SinkSettings,
    codec: Option<VideoCodec>,
    writer: Option<Box<dyn VideoWriter>>,
    temp: Option<TempPath>,
    frames: u64,
}

impl VideoSink {
    pub fn new(target: &Path, backend: Arc<dyn MediaBackend>, settings: SinkSettings) -> Self {
        Self {
            target: target.to_path_buf(),
            backend,
            settings,
            codec: None,
            writer: None,
            temp: None,
            frames: 0,
        }
    }

    /// Codec chosen at open.
    pub fn codec(&self) -> Option<VideoCodec> {
        self.codec
    }

    fn parent_dir(&self) -> PathBuf {
        match self.target.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }

    fn container_ext(&self) -> String {
        self.target
            .extension()
            .and_then(|e| e.to_str())
            .filter(|e| !e.is_empty())
            .unwrap_or(DEFAULT_CONTAINER)
            .to_string()
    }

    fn commit(&mut self) -> SightlineResult<PathBuf> {
        let writer = self
            .writer
            .take()
            .ok_or_else(|| SightlineError::invalid_output("video sink was never opened"))?;
        let temp = self
            .temp
            .take()
            .ok_or_else(|| SightlineError::invalid_output("video sink has no temp file"))?;

        // Dropping `temp` on any early return deletes the partial file.
        writer.finish()?;

        let size = std::fs::metadata(&temp)
            .map_err(|e| {
                SightlineError::io_failure(format!("Cannot stat {}: {e}", temp.display()))
            })?
            .len();
        if size < self.settings.min_video_bytes {
            return Err(SightlineError::invalid_output(format!(
                "encoded video is {size} bytes, below the {} byte minimum",
                self.settings.min_video_bytes
            )));
        }

        if self.target.exists() {
            std::fs::remove_file(&self.target).map_err(|e| {
                SightlineError::io_failure(format!("Cannot replace {}: {e}", self.target.display()))
            })?;
        }
        temp.persist(&self.target).map_err(|e| {
            SightlineError::io_failure(format!(
                "Cannot move encoded video to {}: {}",
                self.target.display(),
                e.error
            ))
        })?;

        tracing::info!(
            path = %self.target.display(),
            bytes = size,
            frames = self.frames,
            "Video committed"
        );
        Ok(self.target.clone())
    }

    fn discard(&mut self) {
        if let Some(writer) = self.writer.take() {
            writer.abort();
        }
        if let Some(temp) = self.temp.take() {
            if let Err(e) = temp.close() {
                tracing::warn!(error = %e, "Failed to remove partial video");
            }
        }
    }
}

impl FrameSink for VideoSink {
    fn kind(&self) -> SinkKind {
        SinkKind::SingleVideo
    }

    fn open(&mut self, geometry: &FrameGeometry) -> SightlineResult<()> {
        let dir = self.parent_dir();
        ensure_dir(&dir)?;
        let ext = self.container_ext();

        let capability = CodecProber::new(self.backend.as_ref()).probe(
            &self.settings.codec_candidates,
            geometry,
            &dir,
            &ext,
        )?;
        let codec = capability
            .select(&self.settings.preferred_codecs)
            .ok_or_else(|| {
                let tried = self
                    .settings
                    .codec_candidates
                    .iter()
                    .map(|c| c.fourcc().to_string())
                    .collect::<Vec<_>>();
                SightlineError::no_supported_codec(&tried)
            })?;

        let stem = self
            .target
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("export");
        let temp = tempfile::Builder::new()
            .prefix(&format!(".{stem}-"))
            .suffix(&format!(".{ext}"))
            .tempfile_in(&dir)
            .map_err(|e| {
                SightlineError::io_failure(format!(
                    "Cannot create temp file in {}: {e}",
                    dir.display()
                ))
            })?
            .into_temp_path();

        let writer = self
            .backend
            .open_writer(&temp, codec, geometry)
            .map_err(|e| match e {
                SightlineError::WriterInit { .. } => e,
                other => SightlineError::writer_init(format!("{codec}: {other}")),
            })?;
        if !writer.is_opened() {
            writer.abort();
            return Err(SightlineError::writer_init(format!(
                "{codec} writer did not open {}",
                temp.display()
            )));
        }

        tracing::info!(
            codec = %codec,
            temp = %temp.display(),
            target = %self.target.display(),
            "Video writer opened"
        );
        self.codec = Some(codec);
        self.writer = Some(writer);
        self.temp = Some(temp);
        Ok(())
    }

    fn write(&mut self, frame: &Frame) -> SightlineResult<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| SightlineError::writer_init("video sink was never opened"))?;
        writer.write_frame(frame)?;
        self.frames += 1;
        Ok(())
    }

    fn finalize(&mut self, mode: FinalizeMode) -> SightlineResult<Option<PathBuf>> {
        match mode {
            FinalizeMode::Commit => self.commit().map(Some),
            FinalizeMode::Cleanup => {
                self.discard();
                Ok(None)
            }
        }
    }

    fn frames_written(&self) -> u64 {
        self.frames
    }
}

impl Drop for VideoSink {
    fn drop(&mut self) {
        self.discard();
    }
}
