//! Frame-sequence sink.
//!
//! Layout under the target directory:
//!
//! ```text
//! <target>/frames/frame_000000.<ext>
//! <target>/video_params.txt        fps, width, height, total_frames, export_time
//! <target>/export_complete.txt     commit only
//! <target>/create_video.sh         commit only
//! <target>/create_video.bat        commit only
//! ```
//!
//! The scripts resolve paths relative to their own location, so the
//! directory can be moved before they are run.

use std::path::{Path, PathBuf};

use image::ImageFormat;
use sightline_common::error::{SightlineError, SightlineResult};
use sightline_job_model::{Frame, FrameGeometry, SinkKind};

use super::{ensure_dir, remove_file_quiet, FinalizeMode, FrameSink, SinkSettings};

pub const FRAMES_DIR: &str = "frames";
pub const PARAMS_FILE: &str = "video_params.txt";
pub const COMPLETE_MARKER: &str = "export_complete.txt";
const SHELL_SCRIPT: &str = "create_video.sh";
const BATCH_SCRIPT: &str = "create_video.bat";
const ASSEMBLED_VIDEO: &str = "output_video.mp4";

/// Numbered image files plus conversion helpers.
pub struct FrameSequenceSink {
    target: PathBuf,
    settings: SinkSettings,
    geometry: Option<FrameGeometry>,
    created_target: bool,
    prepared: bool,
    finalized: bool,
    frames: u64,
}

impl FrameSequenceSink {
    pub fn new(target: &Path, settings: SinkSettings) -> Self {
        Self {
            target: target.to_path_buf(),
            settings,
            geometry: None,
            created_target: false,
            prepared: false,
            finalized: false,
            frames: 0,
        }
    }

    fn ext(&self) -> &str {
        &self.settings.frame_image_extension
    }

    fn frames_dir(&self) -> PathBuf {
        self.target.join(FRAMES_DIR)
    }

    /// Path of frame `index` (0-based).
    pub fn frame_path(&self, index: u64) -> PathBuf {
        self.frames_dir()
            .join(format!("frame_{index:06}.{}", self.ext()))
    }

    fn write_text(&self, name: &str, contents: &str) -> SightlineResult<PathBuf> {
        let path = self.target.join(name);
        std::fs::write(&path, contents).map_err(|e| {
            SightlineError::io_failure(format!("Cannot write {}: {e}", path.display()))
        })?;
        Ok(path)
    }

    fn params_record(&self, geometry: &FrameGeometry) -> String {
        format!(
            "fps={}\nwidth={}\nheight={}\ntotal_frames={}\nexport_time={}\n",
            geometry.fps_label(),
            geometry.width,
            geometry.height,
            geometry.total_frames,
            self.settings.clock.display_stamp()
        )
    }

    fn shell_script(&self, fps: &str) -> String {
        format!(
            "#!/bin/bash\n\
             cd \"$(dirname \"$0\")\" || exit 1\n\
             echo \"Converting image sequence to video...\"\n\
             ffmpeg -y -framerate {fps} -i \"{FRAMES_DIR}/frame_%06d.{ext}\" -c:v libx264 -pix_fmt yuv420p -crf 23 \"{ASSEMBLED_VIDEO}\"\n\
             if [ $? -eq 0 ]; then\n\
             \x20 echo \"Video created: {ASSEMBLED_VIDEO}\"\n\
             else\n\
             \x20 echo \"Conversion failed. Make sure ffmpeg is installed and on PATH.\"\n\
             \x20 echo \"Download: https://ffmpeg.org/download.html\"\n\
             \x20 exit 1\n\
             fi\n",
            ext = self.ext()
        )
    }

    fn batch_script(&self, fps: &str) -> String {
        [
            "@echo off".to_string(),
            "cd /d \"%~dp0\"".to_string(),
            "echo Converting image sequence to video...".to_string(),
            format!(
                "ffmpeg -y -framerate {fps} -i \"{FRAMES_DIR}\\frame_%%06d.{}\" -c:v libx264 -pix_fmt yuv420p -crf 23 \"{ASSEMBLED_VIDEO}\"",
                self.ext()
            ),
            "if %ERRORLEVEL% EQU 0 (".to_string(),
            format!("  echo Video created: {ASSEMBLED_VIDEO}"),
            ") else (".to_string(),
            "  echo Conversion failed. Make sure ffmpeg is installed and on PATH.".to_string(),
            "  echo Download: https://ffmpeg.org/download.html".to_string(),
            ")".to_string(),
            "pause".to_string(),
            String::new(),
        ]
        .join("\r\n")
    }

    fn write_scripts(&self, geometry: &FrameGeometry) -> SightlineResult<()> {
        let fps = geometry.fps_label();
        let sh = self.write_text(SHELL_SCRIPT, &self.shell_script(&fps))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&sh, std::fs::Permissions::from_mode(0o755)).map_err(|e| {
                SightlineError::io_failure(format!("Cannot chmod {}: {e}", sh.display()))
            })?;
        }
        #[cfg(not(unix))]
        let _ = sh;
        self.write_text(BATCH_SCRIPT, &self.batch_script(&fps))?;
        Ok(())
    }

    fn remove_artifacts(&self) {
        let frames_dir = self.frames_dir();
        match std::fs::remove_dir_all(&frames_dir) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(
                path = %frames_dir.display(),
                error = %e,
                "Failed to remove frames directory"
            ),
        }
        for name in [PARAMS_FILE, COMPLETE_MARKER, SHELL_SCRIPT, BATCH_SCRIPT] {
            remove_file_quiet(&self.target.join(name));
        }

        let removed = if self.created_target {
            std::fs::remove_dir_all(&self.target)
        } else {
            // Only succeeds when nothing else lives there.
            std::fs::remove_dir(&self.target)
        };
        if let Err(e) = removed {
            tracing::debug!(path = %self.target.display(), error = %e, "Output directory kept");
        }
    }
}

impl FrameSink for FrameSequenceSink {
    fn kind(&self) -> SinkKind {
        SinkKind::FrameSequence
    }

    fn open(&mut self, geometry: &FrameGeometry) -> SightlineResult<()> {
        if ImageFormat::from_extension(self.ext()).is_none() {
            return Err(SightlineError::config(format!(
                "Unknown frame image extension {:?}",
                self.ext()
            )));
        }
        if self.target.exists() && !self.target.is_dir() {
            return Err(SightlineError::io_failure(format!(
                "{} exists and is not a directory",
                self.target.display()
            )));
        }

        self.created_target = !self.target.exists();
        ensure_dir(&self.target)?;
        self.prepared = true;

        let frames_dir = self.frames_dir();
        if frames_dir.exists() {
            std::fs::remove_dir_all(&frames_dir).map_err(|e| {
                SightlineError::io_failure(format!("Cannot clear {}: {e}", frames_dir.display()))
            })?;
        }
        ensure_dir(&frames_dir)?;
        self.write_text(PARAMS_FILE, &self.params_record(geometry))?;

        self.geometry = Some(*geometry);
        tracing::info!(
            dir = %self.target.display(),
            ext = self.ext(),
            "Frame sequence opened"
        );
        Ok(())
    }

    fn write(&mut self, frame: &Frame) -> SightlineResult<()> {
        let path = self.frame_path(self.frames);
        frame.save(&path).map_err(|e| {
            SightlineError::io_failure(format!("Cannot write {}: {e}", path.display()))
        })?;
        self.frames += 1;
        Ok(())
    }

    fn finalize(&mut self, mode: FinalizeMode) -> SightlineResult<Option<PathBuf>> {
        match mode {
            FinalizeMode::Commit => {
                let geometry = self.geometry.ok_or_else(|| {
                    SightlineError::invalid_output("frame sequence was never opened")
                })?;
                if self.frames == 0 {
                    return Err(SightlineError::invalid_output("no frames were exported"));
                }
                self.write_text(
                    COMPLETE_MARKER,
                    &format!(
                        "Total frames: {}\nExported on: {}\n",
                        self.frames,
                        self.settings.clock.display_stamp()
                    ),
                )?;
                self.write_scripts(&geometry)?;
                self.finalized = true;
                Ok(Some(self.target.clone()))
            }
            FinalizeMode::Cleanup => {
                if self.prepared {
                    self.remove_artifacts();
                }
                self.finalized = true;
                Ok(None)
            }
        }
    }

    fn frames_written(&self) -> u64 {
        self.frames
    }
}

impl Drop for FrameSequenceSink {
    fn drop(&mut self) {
        if self.prepared && !self.finalized {
            tracing::debug!(dir = %self.target.display(), "Unfinished frame sequence dropped");
            self.remove_artifacts();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sightline_common::clock::FixedClock;
    use sightline_common::error::ErrorKind;
    use std::sync::Arc;

    fn settings(ext: &str) -> SinkSettings {
        SinkSettings {
            codec_candidates: Vec::new(),
            preferred_codecs: Vec::new(),
            min_video_bytes: 1024,
            frame_image_extension: ext.to_string(),
            clock: Arc::new(FixedClock::from_ymd_hms(2024, 5, 1, 13, 45, 9).unwrap()),
        }
    }

    fn geometry() -> FrameGeometry {
        FrameGeometry::new(16, 12, 25.0, 3)
    }

    #[test]
    fn test_commit_writes_frames_and_helpers() {
        let tmp = tempfile::tempdir().unwrap();
        let target = tmp.path().join("seq");
        let mut sink = FrameSequenceSink::new(&target, settings("png"));

        sink.open(&geometry()).unwrap();
        for _ in 0..3 {
            sink.write(&Frame::new(16, 12)).unwrap();
        }
        let out = sink.finalize(FinalizeMode::Commit).unwrap();
        assert_eq!(out.as_deref(), Some(target.as_path()));

        for i in 0..3 {
            assert!(target.join(format!("frames/frame_{i:06}.png")).is_file());
        }
        let params = std::fs::read_to_string(target.join(PARAMS_FILE)).unwrap();
        assert!(params.contains("fps=25\n"));
        assert!(params.contains("width=16\n"));
        assert!(params.contains("total_frames=3\n"));
        assert!(params.contains("export_time=2024-05-01 13:45:09"));

        let marker = std::fs::read_to_string(target.join(COMPLETE_MARKER)).unwrap();
        assert_eq!(
            marker,
            "Total frames: 3\nExported on: 2024-05-01 13:45:09\n"
        );

        let sh = std::fs::read_to_string(target.join("create_video.sh")).unwrap();
        assert!(sh.starts_with("#!/bin/bash\n"));
        assert!(sh.contains("-framerate 25 -i \"frames/frame_%06d.png\""));
        let bat = std::fs::read_to_string(target.join("create_video.bat")).unwrap();
        assert!(bat.contains("frames\\frame_%%06d.png"));
        assert!(bat.contains("\r\n"));

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(target.join("create_video.sh"))
                .unwrap()
                .permissions()
                .mode();
            assert_eq!(mode & 0o111, 0o111);
        }
    }

    #[test]
    fn test_cleanup_removes_created_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let target = tmp.path().join("seq");
        let mut sink = FrameSequenceSink::new(&target, settings("jpg"));

        sink.open(&geometry()).unwrap();
        sink.write(&Frame::new(16, 12)).unwrap();
        sink.finalize(FinalizeMode::Cleanup).unwrap();
        assert!(!target.exists());
    }

    #[test]
    fn test_cleanup_keeps_foreign_files_in_existing_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let target = tmp.path().join("seq");
        std::fs::create_dir(&target).unwrap();
        std::fs::write(target.join("notes.txt"), "keep me").unwrap();

        let mut sink = FrameSequenceSink::new(&target, settings("jpg"));
        sink.open(&geometry()).unwrap();
        sink.write(&Frame::new(16, 12)).unwrap();
        sink.finalize(FinalizeMode::Cleanup).unwrap();

        assert!(target.join("notes.txt").is_file());
        assert!(!target.join(FRAMES_DIR).exists());
        assert!(!target.join(PARAMS_FILE).exists());
    }

    #[test]
    fn test_dropping_unfinished_sink_cleans_up() {
        let tmp = tempfile::tempdir().unwrap();
        let target = tmp.path().join("seq");
        let mut sink = FrameSequenceSink::new(&target, settings("jpg"));
        sink.open(&geometry()).unwrap();
        sink.write(&Frame::new(16, 12)).unwrap();
        assert!(target.join(FRAMES_DIR).is_dir());

        drop(sink);
        assert!(!target.exists());
    }

    #[test]
    fn test_dropping_committed_sink_keeps_output() {
        let tmp = tempfile::tempdir().unwrap();
        let target = tmp.path().join("seq");
        let mut sink = FrameSequenceSink::new(&target, settings("jpg"));
        sink.open(&geometry()).unwrap();
        sink.write(&Frame::new(16, 12)).unwrap();
        sink.finalize(FinalizeMode::Commit).unwrap();

        drop(sink);
        assert!(target.join(COMPLETE_MARKER).is_file());
        assert!(target.join("frames/frame_000000.jpg").is_file());
    }

    #[test]
    fn test_stale_frames_are_cleared_on_open() {
        let tmp = tempfile::tempdir().unwrap();
        let target = tmp.path().join("seq");
        std::fs::create_dir_all(target.join(FRAMES_DIR)).unwrap();
        std::fs::write(target.join("frames/frame_000099.jpg"), b"old").unwrap();

        let mut sink = FrameSequenceSink::new(&target, settings("jpg"));
        sink.open(&geometry()).unwrap();
        assert_eq!(
            std::fs::read_dir(target.join(FRAMES_DIR)).unwrap().count(),
            0
        );
        sink.finalize(FinalizeMode::Cleanup).unwrap();
    }

    #[test]
    fn test_file_target_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let target = tmp.path().join("seq");
        std::fs::write(&target, b"file").unwrap();

        let mut sink = FrameSequenceSink::new(&target, settings("jpg"));
        let err = sink.open(&geometry()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IoFailure);
        sink.finalize(FinalizeMode::Cleanup).unwrap();
        assert!(target.is_file());
    }

    #[test]
    fn test_unknown_extension_is_config_error() {
        let tmp = tempfile::tempdir().unwrap();
        let mut sink = FrameSequenceSink::new(&tmp.path().join("seq"), settings("xyz"));
        let err = sink.open(&geometry()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
    }
}
