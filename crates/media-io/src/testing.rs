//! Deterministic in-process media backend.
//!
//! `ScriptedBackend` decodes synthetic gradient videos and "encodes" by
//! dumping raw RGB bytes into the target file, so export pipelines can be
//! exercised without ffmpeg installed.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use sightline_common::error::{SightlineError, SightlineResult};
use sightline_job_model::{Frame, FrameGeometry, SourceKind};

use crate::backend::{MediaBackend, VideoCodec, VideoWriter};
use crate::probe::PROBE_FILE_PREFIX;
use crate::source::FrameSource;

/// A finite video of generated frames.
pub struct SyntheticVideoSource {
    geometry: FrameGeometry,
    frames: u64,
    position: u64,
}

impl SyntheticVideoSource {
    /// `frames` frames at `geometry`; `geometry.total_frames` may differ
    /// (e.g. 0 to simulate an unknown length).
    pub fn new(geometry: FrameGeometry, frames: u64) -> Self {
        Self {
            geometry,
            frames,
            position: 0,
        }
    }
}

/// Gradient frame whose red channel encodes `index`.
pub fn synthetic_frame(geometry: &FrameGeometry, index: u64) -> Frame {
    Frame::from_fn(geometry.width, geometry.height, |x, y| {
        image::Rgb([(index % 256) as u8, (x % 256) as u8, (y % 256) as u8])
    })
}

impl FrameSource for SyntheticVideoSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Video
    }

    fn geometry(&self) -> FrameGeometry {
        self.geometry
    }

    fn next_frame(&mut self) -> SightlineResult<Option<Frame>> {
        if self.position >= self.frames {
            return Ok(None);
        }
        let frame = synthetic_frame(&self.geometry, self.position);
        self.position += 1;
        Ok(Some(frame))
    }

    fn position(&self) -> u64 {
        self.position
    }

    fn rewind(&mut self) -> SightlineResult<()> {
        self.position = 0;
        Ok(())
    }
}

/// Backend whose codec support and failure modes are set up front.
pub struct ScriptedBackend {
    geometry: FrameGeometry,
    frames: u64,
    supported: Vec<VideoCodec>,
    fail_output_writers: bool,
    empty_output: bool,
    fail_decode: bool,
    opened: Mutex<Vec<(VideoCodec, FrameGeometry, PathBuf)>>,
    frames_encoded: Arc<AtomicU64>,
}

impl ScriptedBackend {
    /// Videos decode to `frames` frames at `geometry`; no codec is supported.
    pub fn new(geometry: FrameGeometry, frames: u64) -> Self {
        Self {
            geometry,
            frames,
            supported: Vec::new(),
            fail_output_writers: false,
            empty_output: false,
            fail_decode: false,
            opened: Mutex::new(Vec::new()),
            frames_encoded: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn supporting(mut self, codecs: &[VideoCodec]) -> Self {
        self.supported = codecs.to_vec();
        self
    }

    /// Probes succeed but the writer for the real output fails to open.
    pub fn failing_output_writers(mut self) -> Self {
        self.fail_output_writers = true;
        self
    }

    /// Writers report success but leave an empty file behind.
    pub fn producing_empty_output(mut self) -> Self {
        self.empty_output = true;
        self
    }

    /// Every video fails to open.
    pub fn failing_decode(mut self) -> Self {
        self.fail_decode = true;
        self
    }

    /// Every writer opened so far (probe and output), in order.
    pub fn opened_writers(&self) -> Vec<(VideoCodec, FrameGeometry, PathBuf)> {
        self.opened.lock().map(|v| v.clone()).unwrap_or_default()
    }

    /// Frames written to non-probe outputs.
    pub fn frames_encoded(&self) -> u64 {
        self.frames_encoded.load(Ordering::SeqCst)
    }
}

fn is_probe_path(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with(PROBE_FILE_PREFIX))
        .unwrap_or(false)
}

impl MediaBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    fn is_available(&self) -> bool {
        true
    }

    fn open_video(&self, path: &Path) -> SightlineResult<Box<dyn FrameSource>> {
        if self.fail_decode {
            return Err(SightlineError::source_open(format!(
                "cannot decode {}",
                path.display()
            )));
        }
        Ok(Box::new(SyntheticVideoSource::new(
            self.geometry,
            self.frames,
        )))
    }

    fn open_writer(
        &self,
        path: &Path,
        codec: VideoCodec,
        geometry: &FrameGeometry,
    ) -> SightlineResult<Box<dyn VideoWriter>> {
        if let Ok(mut opened) = self.opened.lock() {
            opened.push((codec, *geometry, path.to_path_buf()));
        }
        let probe = is_probe_path(path);
        if !self.supported.contains(&codec) {
            return Err(SightlineError::writer_init(format!("{codec} unavailable")));
        }
        if self.fail_output_writers && !probe {
            return Err(SightlineError::writer_init(format!(
                "{codec} refused {}",
                path.display()
            )));
        }
        let file = File::create(path)?;
        Ok(Box::new(RawFileWriter {
            out: BufWriter::new(file),
            geometry: *geometry,
            empty: self.empty_output,
            counter: if probe {
                None
            } else {
                Some(Arc::clone(&self.frames_encoded))
            },
        }))
    }
}

struct RawFileWriter {
    out: BufWriter<File>,
    geometry: FrameGeometry,
    empty: bool,
    counter: Option<Arc<AtomicU64>>,
}

impl VideoWriter for RawFileWriter {
    fn is_opened(&self) -> bool {
        true
    }

    fn write_frame(&mut self, frame: &Frame) -> SightlineResult<()> {
        if !self.geometry.matches(frame) {
            return Err(SightlineError::io_failure("frame geometry mismatch"));
        }
        if !self.empty {
            self.out.write_all(frame.as_raw())?;
        }
        if let Some(counter) = &self.counter {
            counter.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn finish(mut self: Box<Self>) -> SightlineResult<()> {
        self.out.flush()?;
        Ok(())
    }

    fn abort(self: Box<Self>) {}
}
