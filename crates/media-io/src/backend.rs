use std::path::Path;

use serde::{Deserialize, Serialize};
use sightline_common::error::SightlineResult;
use sightline_job_model::{Frame, FrameGeometry};

use crate::source::FrameSource;

/// A video codec, identified by its FourCC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VideoCodec {
    /// MPEG-4 Part 2 (`mp4v`).
    Mpeg4,
    /// Xvid MPEG-4 (`XVID`).
    Xvid,
    /// Motion JPEG (`MJPG`).
    Mjpeg,
    /// H.264 / AVC (`avc1`).
    H264,
}

impl VideoCodec {
    pub const ALL: [VideoCodec; 4] = [
        VideoCodec::Mpeg4,
        VideoCodec::Xvid,
        VideoCodec::Mjpeg,
        VideoCodec::H264,
    ];

    pub fn fourcc(self) -> &'static str {
        match self {
            VideoCodec::Mpeg4 => "mp4v",
            VideoCodec::Xvid => "XVID",
            VideoCodec::Mjpeg => "MJPG",
            VideoCodec::H264 => "avc1",
        }
    }

    /// Encoder name passed to `ffmpeg -c:v`.
    pub fn ffmpeg_encoder(self) -> &'static str {
        match self {
            VideoCodec::Mpeg4 => "mpeg4",
            VideoCodec::Xvid => "libxvid",
            VideoCodec::Mjpeg => "mjpeg",
            VideoCodec::H264 => "libx264",
        }
    }

    /// Parse a list of FourCCs, skipping (and logging) unknown entries.
    pub fn parse_list<S: AsRef<str>>(items: &[S]) -> Vec<VideoCodec> {
        items
            .iter()
            .filter_map(|item| match item.as_ref().parse::<VideoCodec>() {
                Ok(codec) => Some(codec),
                Err(err) => {
                    tracing::warn!(error = %err, "Ignoring codec candidate");
                    None
                }
            })
            .collect()
    }
}

impl std::fmt::Display for VideoCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.fourcc())
    }
}

impl std::str::FromStr for VideoCodec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        VideoCodec::ALL
            .into_iter()
            .find(|codec| codec.fourcc().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| format!("Unknown codec FourCC: {wanted}. Use: mp4v, XVID, MJPG, avc1"))
    }
}

/// An open video encoder writing to one file.
pub trait VideoWriter: Send {
    /// Whether the encoder initialized and can accept frames.
    fn is_opened(&self) -> bool;

    /// Append one frame. Frames must match the geometry the writer was opened with.
    fn write_frame(&mut self, frame: &Frame) -> SightlineResult<()>;

    /// Flush, close the container, and report whether encoding succeeded.
    fn finish(self: Box<Self>) -> SightlineResult<()>;

    /// Stop immediately, discarding whatever the encoder had buffered.
    fn abort(self: Box<Self>);
}

/// Decode/encode backend (ffmpeg in production).
pub trait MediaBackend: Send + Sync {
    /// Backend name.
    fn name(&self) -> &str;

    /// Check if this backend is usable on the system.
    fn is_available(&self) -> bool;

    /// Open a video for sequential decoding.
    fn open_video(&self, path: &Path) -> SightlineResult<Box<dyn FrameSource>>;

    /// Open an encoder writing `codec` at `geometry` to `path`, replacing any
    /// file already there.
    fn open_writer(
        &self,
        path: &Path,
        codec: VideoCodec,
        geometry: &FrameGeometry,
    ) -> SightlineResult<Box<dyn VideoWriter>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codec_parse_is_case_insensitive() {
        assert_eq!("xvid".parse::<VideoCodec>().unwrap(), VideoCodec::Xvid);
        assert_eq!("MJPG".parse::<VideoCodec>().unwrap(), VideoCodec::Mjpeg);
        assert_eq!(" mp4v ".parse::<VideoCodec>().unwrap(), VideoCodec::Mpeg4);
        assert!("h265".parse::<VideoCodec>().is_err());
    }

    #[test]
    fn test_parse_list_skips_unknown_and_keeps_order() {
        let parsed = VideoCodec::parse_list(&["MJPG", "bogus", "mp4v"]);
        assert_eq!(parsed, vec![VideoCodec::Mjpeg, VideoCodec::Mpeg4]);
    }
}
