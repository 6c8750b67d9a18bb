//! ffmpeg-backed decoding and encoding.
//!
//! Frames cross the process boundary as packed `rgb24`: decoders write them
//! to stdout, encoders read them from stdin.

use std::io::{BufReader, ErrorKind as IoErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::thread::JoinHandle;

use serde::Deserialize;
use sightline_common::error::{SightlineError, SightlineResult};
use sightline_job_model::{Frame, FrameGeometry, SourceKind};

use crate::backend::{MediaBackend, VideoCodec, VideoWriter};
use crate::source::FrameSource;

/// Backend that shells out to `ffmpeg` and `ffprobe`.
#[derive(Debug, Clone)]
pub struct FfmpegBackend {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
}

impl Default for FfmpegBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl FfmpegBackend {
    /// Use `ffmpeg`/`ffprobe` from `PATH`.
    pub fn new() -> Self {
        Self {
            ffmpeg: PathBuf::from("ffmpeg"),
            ffprobe: PathBuf::from("ffprobe"),
        }
    }

    /// Use explicit binaries.
    pub fn with_binaries(ffmpeg: impl Into<PathBuf>, ffprobe: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
        }
    }

    /// Read geometry of the first video stream via ffprobe.
    pub fn probe_geometry(&self, path: &Path) -> SightlineResult<FrameGeometry> {
        let output = Command::new(&self.ffprobe)
            .args([
                "-v",
                "error",
                "-select_streams",
                "v:0",
                "-show_entries",
                "stream=width,height,r_frame_rate,avg_frame_rate,nb_frames",
                "-of",
                "json",
            ])
            .arg(path)
            .output()
            .map_err(|e| SightlineError::source_open(format!("Failed to run ffprobe: {e}")))?;

        if !output.status.success() {
            return Err(SightlineError::source_open(format!(
                "ffprobe could not read {}: {}",
                path.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let raw = String::from_utf8_lossy(&output.stdout);
        parse_ffprobe_geometry(&raw).ok_or_else(|| {
            SightlineError::source_open(format!("No decodable video stream in {}", path.display()))
        })
    }
}

impl MediaBackend for FfmpegBackend {
    fn name(&self) -> &str {
        "ffmpeg"
    }

    fn is_available(&self) -> bool {
        command_exists(&self.ffmpeg) && command_exists(&self.ffprobe)
    }

    fn open_video(&self, path: &Path) -> SightlineResult<Box<dyn FrameSource>> {
        let geometry = self.probe_geometry(path)?;
        let decoder = FfmpegDecoder::spawn(self.ffmpeg.clone(), path.to_path_buf(), geometry)?;
        tracing::info!(
            path = %path.display(),
            width = geometry.width,
            height = geometry.height,
            fps = geometry.fps,
            total_frames = geometry.total_frames,
            "Opened video source"
        );
        Ok(Box::new(decoder))
    }

    fn open_writer(
        &self,
        path: &Path,
        codec: VideoCodec,
        geometry: &FrameGeometry,
    ) -> SightlineResult<Box<dyn VideoWriter>> {
        Ok(Box::new(FfmpegWriter::spawn(
            &self.ffmpeg,
            path,
            codec,
            geometry,
        )?))
    }
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    avg_frame_rate: Option<String>,
    nb_frames: Option<String>,
}

/// Parse `ffprobe -of json` stream output into a geometry.
fn parse_ffprobe_geometry(raw: &str) -> Option<FrameGeometry> {
    let parsed: ProbeOutput = serde_json::from_str(raw).ok()?;
    let stream = parsed.streams.into_iter().next()?;
    let width = stream.width.filter(|w| *w > 0)?;
    let height = stream.height.filter(|h| *h > 0)?;
    let fps = stream
        .avg_frame_rate
        .as_deref()
        .and_then(parse_rational)
        .or_else(|| stream.r_frame_rate.as_deref().and_then(parse_rational))
        .unwrap_or(0.0);
    let total_frames = stream
        .nb_frames
        .as_deref()
        .and_then(|n| n.trim().parse::<u64>().ok())
        .unwrap_or(0);
    Some(FrameGeometry::new(width, height, fps, total_frames))
}

/// Parse `30000/1001` or `25` into frames per second.
fn parse_rational(value: &str) -> Option<f64> {
    let value = value.trim();
    let rate = match value.split_once('/') {
        Some((num, den)) => {
            let num = num.trim().parse::<f64>().ok()?;
            let den = den.trim().parse::<f64>().ok()?;
            if den == 0.0 {
                return None;
            }
            num / den
        }
        None => value.parse::<f64>().ok()?,
    };
    (rate.is_finite() && rate > 0.0).then_some(rate)
}

fn command_exists(binary: &Path) -> bool {
    Command::new(binary)
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

/// Drain a child's stderr on a helper thread so it never blocks on a full pipe.
fn drain_stderr(child: &mut Child) -> Option<JoinHandle<String>> {
    let stderr = child.stderr.take()?;
    Some(std::thread::spawn(move || {
        let mut reader = BufReader::new(stderr);
        let mut output = String::new();
        match reader.read_to_string(&mut output) {
            Ok(_) => output,
            Err(err) => format!("<failed to read ffmpeg stderr: {err}>"),
        }
    }))
}

fn join_stderr(task: Option<JoinHandle<String>>) -> String {
    task.map(|t| {
        t.join()
            .unwrap_or_else(|_| "<failed to join stderr reader>".to_string())
    })
    .unwrap_or_default()
}

fn is_avi(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("avi"))
        .unwrap_or(false)
}

fn reap(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

/// Sequential video decoder reading raw frames from an ffmpeg child.
pub struct FfmpegDecoder {
    ffmpeg: PathBuf,
    path: PathBuf,
    geometry: FrameGeometry,
    child: Option<Child>,
    stdout: Option<BufReader<ChildStdout>>,
    position: u64,
    finished: bool,
}

impl FfmpegDecoder {
    fn spawn(ffmpeg: PathBuf, path: PathBuf, geometry: FrameGeometry) -> SightlineResult<Self> {
        let mut decoder = Self {
            ffmpeg,
            path,
            geometry,
            child: None,
            stdout: None,
            position: 0,
            finished: false,
        };
        decoder.start()?;
        Ok(decoder)
    }

    fn start(&mut self) -> SightlineResult<()> {
        let mut child = Command::new(&self.ffmpeg)
            .args(["-hide_banner", "-loglevel", "error", "-nostdin", "-i"])
            .arg(&self.path)
            .args(["-map", "0:v:0", "-f", "rawvideo", "-pix_fmt", "rgb24", "-"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| SightlineError::source_open(format!("Failed to start ffmpeg: {e}")))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SightlineError::source_open("Failed to capture ffmpeg stdout"))?;

        self.stdout = Some(BufReader::new(stdout));
        self.child = Some(child);
        self.position = 0;
        self.finished = false;
        Ok(())
    }

    fn stop(&mut self) {
        self.stdout = None;
        if let Some(mut child) = self.child.take() {
            reap(&mut child);
        }
    }
}

impl FrameSource for FfmpegDecoder {
    fn kind(&self) -> SourceKind {
        SourceKind::Video
    }

    fn geometry(&self) -> FrameGeometry {
        self.geometry
    }

    fn next_frame(&mut self) -> SightlineResult<Option<Frame>> {
        if self.finished {
            return Ok(None);
        }
        let Some(reader) = self.stdout.as_mut() else {
            return Ok(None);
        };

        let mut buf = vec![0u8; self.geometry.rgb_frame_len()];
        match reader.read_exact(&mut buf) {
            Ok(()) => {}
            Err(err) if err.kind() == IoErrorKind::UnexpectedEof => {
                tracing::debug!(frames = self.position, "Video source reached end of stream");
                self.finished = true;
                self.stop();
                return Ok(None);
            }
            Err(err) => {
                return Err(SightlineError::io_failure(format!(
                    "Failed reading decoded frame {}: {err}",
                    self.position
                )));
            }
        }

        let frame = Frame::from_raw(self.geometry.width, self.geometry.height, buf)
            .ok_or_else(|| SightlineError::io_failure("Decoded frame has wrong size"))?;
        self.position += 1;
        Ok(Some(frame))
    }

    fn position(&self) -> u64 {
        self.position
    }

    fn rewind(&mut self) -> SightlineResult<()> {
        self.stop();
        self.start()
    }
}

impl Drop for FfmpegDecoder {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Encoder fed raw frames over an ffmpeg child's stdin.
pub struct FfmpegWriter {
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    stderr_task: Option<JoinHandle<String>>,
    geometry: FrameGeometry,
    codec: VideoCodec,
}

impl FfmpegWriter {
    fn spawn(
        ffmpeg: &Path,
        path: &Path,
        codec: VideoCodec,
        geometry: &FrameGeometry,
    ) -> SightlineResult<Self> {
        let mut cmd = Command::new(ffmpeg);
        cmd.args(["-y", "-hide_banner", "-loglevel", "error", "-f", "rawvideo"])
            .args(["-pix_fmt", "rgb24"])
            .arg("-s")
            .arg(format!("{}x{}", geometry.width, geometry.height))
            .arg("-r")
            .arg(geometry.fps_label())
            .args(["-i", "-", "-an", "-c:v", codec.ffmpeg_encoder()]);
        if codec != VideoCodec::Mjpeg {
            cmd.args(["-pix_fmt", "yuv420p"]);
        }
        if is_avi(path) {
            cmd.args(["-tag:v", codec.fourcc()]);
        }
        cmd.arg(path)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        let mut child = cmd
            .spawn()
            .map_err(|e| SightlineError::writer_init(format!("Failed to start ffmpeg: {e}")))?;
        let stdin = child.stdin.take();
        let stderr_task = drain_stderr(&mut child);

        tracing::debug!(
            pid = child.id(),
            codec = %codec,
            path = %path.display(),
            "ffmpeg encoder started"
        );

        Ok(Self {
            child: Some(child),
            stdin,
            stderr_task,
            geometry: *geometry,
            codec,
        })
    }
}

impl VideoWriter for FfmpegWriter {
    fn is_opened(&self) -> bool {
        self.child.is_some() && self.stdin.is_some()
    }

    fn write_frame(&mut self, frame: &Frame) -> SightlineResult<()> {
        if !self.geometry.matches(frame) {
            return Err(SightlineError::io_failure(format!(
                "Frame is {}x{}, encoder expects {}x{}",
                frame.width(),
                frame.height(),
                self.geometry.width,
                self.geometry.height
            )));
        }
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| SightlineError::io_failure("Encoder input already closed"))?;
        stdin.write_all(frame.as_raw()).map_err(|e| {
            SightlineError::io_failure(format!(
                "{} encoder stopped accepting frames: {e}",
                self.codec
            ))
        })
    }

    fn finish(mut self: Box<Self>) -> SightlineResult<()> {
        drop(self.stdin.take());
        let Some(mut child) = self.child.take() else {
            return Err(SightlineError::io_failure("Encoder already released"));
        };
        let status = child
            .wait()
            .map_err(|e| SightlineError::io_failure(format!("Failed to wait on ffmpeg: {e}")))?;
        let stderr_output = join_stderr(self.stderr_task.take());

        if !status.success() {
            return Err(SightlineError::io_failure(format!(
                "ffmpeg {} encode failed (status {}): {}",
                self.codec,
                status,
                stderr_output.trim()
            )));
        }
        Ok(())
    }

    fn abort(mut self: Box<Self>) {
        drop(self.stdin.take());
        if let Some(mut child) = self.child.take() {
            reap(&mut child);
        }
        let _ = join_stderr(self.stderr_task.take());
    }
}

impl Drop for FfmpegWriter {
    fn drop(&mut self) {
        drop(self.stdin.take());
        if let Some(mut child) = self.child.take() {
            reap(&mut child);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rational() {
        assert_eq!(parse_rational("25"), Some(25.0));
        assert_eq!(parse_rational("30/1"), Some(30.0));
        assert!((parse_rational("30000/1001").unwrap() - 29.97).abs() < 0.01);
        assert_eq!(parse_rational("0/0"), None);
        assert_eq!(parse_rational("abc"), None);
    }

    #[test]
    fn test_parse_ffprobe_geometry() {
        let raw = r#"{"streams":[{"width":640,"height":480,"r_frame_rate":"30/1","avg_frame_rate":"30/1","nb_frames":"120"}]}"#;
        let geometry = parse_ffprobe_geometry(raw).unwrap();
        assert_eq!(geometry.width, 640);
        assert_eq!(geometry.height, 480);
        assert_eq!(geometry.fps, 30.0);
        assert_eq!(geometry.total_frames, 120);
    }

    #[test]
    fn test_parse_ffprobe_geometry_unknown_count_and_rate() {
        let raw = r#"{"streams":[{"width":64,"height":48,"avg_frame_rate":"0/0"}]}"#;
        let geometry = parse_ffprobe_geometry(raw).unwrap();
        assert_eq!(geometry.total_frames, 0);
        assert_eq!(geometry.fps, sightline_job_model::DEFAULT_FPS);
    }

    #[test]
    fn test_parse_ffprobe_geometry_rejects_empty() {
        assert!(parse_ffprobe_geometry(r#"{"streams":[]}"#).is_none());
        assert!(parse_ffprobe_geometry(r#"{"streams":[{"width":0,"height":48}]}"#).is_none());
        assert!(parse_ffprobe_geometry("not json").is_none());
    }

    #[test]
    fn test_missing_binaries_are_unavailable() {
        let backend = FfmpegBackend::with_binaries(
            "/nonexistent/sightline-ffmpeg",
            "/nonexistent/sightline-ffprobe",
        );
        assert!(!backend.is_available());
        assert!(backend.probe_geometry(Path::new("x.mp4")).is_err());
    }
}
