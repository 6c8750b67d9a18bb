//! Codec capability probing.
//!
//! Each candidate gets a disposable trial encode: a writer is opened on a
//! uniquely named scratch file at the real output geometry, fed one blank
//! frame, and closed. Whatever happens, the writer is released and the
//! scratch file removed before the next candidate is tried.

use std::path::Path;

use serde::{Deserialize, Serialize};
use sightline_common::error::{SightlineError, SightlineResult};
use sightline_job_model::{Frame, FrameGeometry};

use crate::backend::{MediaBackend, VideoCodec};

/// File name prefix of probe scratch files.
pub const PROBE_FILE_PREFIX: &str = ".sightline-probe-";

/// Codecs confirmed encodable on this host, in candidate order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodecCapability {
    pub supported: Vec<VideoCodec>,
}

impl CodecCapability {
    pub fn is_empty(&self) -> bool {
        self.supported.is_empty()
    }

    pub fn supports(&self, codec: VideoCodec) -> bool {
        self.supported.contains(&codec)
    }

    /// Pick the codec to encode with: the first entry of `preferred` that is
    /// supported, else the first supported codec in discovery order.
    pub fn select(&self, preferred: &[VideoCodec]) -> Option<VideoCodec> {
        preferred
            .iter()
            .copied()
            .find(|codec| self.supports(*codec))
            .or_else(|| self.supported.first().copied())
    }
}

/// Runs trial encodes against a backend.
pub struct CodecProber<'a> {
    backend: &'a dyn MediaBackend,
}

impl<'a> CodecProber<'a> {
    pub fn new(backend: &'a dyn MediaBackend) -> Self {
        Self { backend }
    }

    /// Probe `candidates` at `geometry`, writing scratch files into
    /// `scratch_dir` with the output's container extension.
    ///
    /// Fails with `IoFailure` when no scratch file could be created for any
    /// candidate, since nothing was actually tested then.
    pub fn probe(
        &self,
        candidates: &[VideoCodec],
        geometry: &FrameGeometry,
        scratch_dir: &Path,
        container_ext: &str,
    ) -> SightlineResult<CodecCapability> {
        let mut supported = Vec::with_capacity(candidates.len());
        let mut tried = 0usize;
        let mut scratch_failures = 0usize;
        let mut last_scratch_error = None;
        for &codec in candidates {
            if supported.contains(&codec) {
                continue;
            }
            tried += 1;
            match self.try_codec(codec, geometry, scratch_dir, container_ext) {
                Ok(true) => {
                    tracing::debug!(codec = %codec, "Codec supported");
                    supported.push(codec);
                }
                Ok(false) => tracing::debug!(codec = %codec, "Codec not supported"),
                Err(err) => {
                    scratch_failures += 1;
                    last_scratch_error = Some(err);
                }
            }
        }

        if tried > 0 && scratch_failures == tried {
            let reason = last_scratch_error
                .map(|e| e.to_string())
                .unwrap_or_default();
            return Err(SightlineError::io_failure(format!(
                "Cannot create scratch files in {}: {reason}",
                scratch_dir.display()
            )));
        }

        tracing::info!(
            backend = self.backend.name(),
            width = geometry.width,
            height = geometry.height,
            fps = geometry.fps,
            supported = ?supported.iter().map(|c| c.fourcc()).collect::<Vec<_>>(),
            "Codec probe finished"
        );

        Ok(CodecCapability { supported })
    }

    fn try_codec(
        &self,
        codec: VideoCodec,
        geometry: &FrameGeometry,
        scratch_dir: &Path,
        container_ext: &str,
    ) -> std::io::Result<bool> {
        let scratch = match tempfile::Builder::new()
            .prefix(&format!("{PROBE_FILE_PREFIX}{}-", codec.fourcc()))
            .suffix(&format!(".{container_ext}"))
            .tempfile_in(scratch_dir)
        {
            Ok(file) => file.into_temp_path(),
            Err(err) => {
                tracing::warn!(
                    codec = %codec,
                    dir = %scratch_dir.display(),
                    error = %err,
                    "Failed to create probe scratch file"
                );
                return Err(err);
            }
        };

        let ok = match self.backend.open_writer(&scratch, codec, geometry) {
            Ok(mut writer) => {
                if !writer.is_opened() {
                    writer.abort();
                    false
                } else {
                    let blank = Frame::new(geometry.width, geometry.height);
                    match writer.write_frame(&blank) {
                        Ok(()) => match writer.finish() {
                            Ok(()) => true,
                            Err(err) => {
                                tracing::debug!(
                                    codec = %codec,
                                    error = %err,
                                    "Probe encode failed to finish"
                                );
                                false
                            }
                        },
                        Err(err) => {
                            tracing::debug!(
                                codec = %codec,
                                error = %err,
                                "Probe frame write failed"
                            );
                            writer.abort();
                            false
                        }
                    }
                }
            }
            Err(err) => {
                tracing::debug!(codec = %codec, error = %err, "Probe writer failed to open");
                false
            }
        };

        if let Err(err) = scratch.close() {
            tracing::warn!(
                codec = %codec,
                error = %err,
                "Failed to remove probe scratch file"
            );
        }

        Ok(ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedBackend;
    use proptest::prelude::*;
    use sightline_common::error::ErrorKind;

    fn geometry() -> FrameGeometry {
        FrameGeometry::new(64, 48, 10.0, 10)
    }

    fn dir_entries(dir: &Path) -> usize {
        std::fs::read_dir(dir).unwrap().count()
    }

    #[test]
    fn test_select_prefers_fixed_order_over_discovery() {
        let capability = CodecCapability {
            supported: vec![VideoCodec::Mpeg4, VideoCodec::Mjpeg, VideoCodec::Xvid],
        };
        assert_eq!(
            capability.select(&[VideoCodec::Xvid, VideoCodec::Mjpeg]),
            Some(VideoCodec::Xvid)
        );

        let capability = CodecCapability {
            supported: vec![VideoCodec::Mpeg4, VideoCodec::Mjpeg],
        };
        assert_eq!(
            capability.select(&[VideoCodec::Xvid, VideoCodec::Mjpeg]),
            Some(VideoCodec::Mjpeg)
        );
        assert_eq!(
            capability.select(&[VideoCodec::Xvid]),
            Some(VideoCodec::Mpeg4)
        );
        assert_eq!(CodecCapability::default().select(&[VideoCodec::Xvid]), None);
    }

    #[test]
    fn test_probe_uses_real_geometry() {
        let dir = tempfile::tempdir().unwrap();
        let backend = ScriptedBackend::new(geometry(), 10).supporting(&[VideoCodec::Mjpeg]);
        let big = FrameGeometry::new(1280, 720, 25.0, 0);

        CodecProber::new(&backend)
            .probe(&[VideoCodec::Mjpeg], &big, dir.path(), "avi")
            .unwrap();

        let opened = backend.opened_writers();
        assert_eq!(opened.len(), 1);
        assert_eq!(opened[0].1.width, 1280);
        assert_eq!(opened[0].1.height, 720);
        assert_eq!(opened[0].1.fps, 25.0);
    }

    #[test]
    fn test_probe_continues_after_failures_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let backend = ScriptedBackend::new(geometry(), 10).supporting(&[VideoCodec::Mjpeg]);
        let candidates = [VideoCodec::Mpeg4, VideoCodec::Xvid, VideoCodec::Mjpeg];

        let capability = CodecProber::new(&backend)
            .probe(&candidates, &geometry(), dir.path(), "avi")
            .unwrap();

        assert_eq!(capability.supported, vec![VideoCodec::Mjpeg]);
        assert_eq!(dir_entries(dir.path()), 0);
    }

    #[test]
    fn test_missing_scratch_dir_is_io_failure() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        let backend = ScriptedBackend::new(geometry(), 10).supporting(&VideoCodec::ALL);

        let err = CodecProber::new(&backend)
            .probe(&VideoCodec::ALL, &geometry(), &missing, "avi")
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IoFailure);
        assert!(err.to_string().contains("nope"));
        assert!(backend.opened_writers().is_empty());
    }

    #[test]
    fn test_empty_candidate_list_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        let backend = ScriptedBackend::new(geometry(), 10);

        let capability = CodecProber::new(&backend)
            .probe(&[], &geometry(), &missing, "avi")
            .unwrap();
        assert!(capability.is_empty());
    }

    fn codec_strategy() -> impl Strategy<Value = VideoCodec> {
        prop::sample::select(VideoCodec::ALL.to_vec())
    }

    proptest! {
        #[test]
        fn prop_probe_is_ordered_subset_and_leaves_no_files(
            candidates in prop::collection::vec(codec_strategy(), 0..8),
            supported in prop::collection::vec(codec_strategy(), 0..4),
        ) {
            let dir = tempfile::tempdir().unwrap();
            let backend = ScriptedBackend::new(geometry(), 10).supporting(&supported);

            let capability = CodecProber::new(&backend)
                .probe(&candidates, &geometry(), dir.path(), "avi")
                .unwrap();

            for codec in &capability.supported {
                prop_assert!(candidates.contains(codec));
                prop_assert!(supported.contains(codec));
            }
            let positions: Vec<usize> = capability
                .supported
                .iter()
                .map(|c| candidates.iter().position(|x| x == c).unwrap())
                .collect();
            prop_assert!(positions.windows(2).all(|w| w[0] < w[1]));
            prop_assert_eq!(dir_entries(dir.path()), 0);
        }
    }
}
