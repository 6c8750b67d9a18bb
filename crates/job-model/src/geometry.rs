//! Frame buffers and geometry.

use serde::{Deserialize, Serialize};

/// A decoded 8-bit RGB frame.
pub type Frame = image::RgbImage;

/// Fallback rate for sources that do not declare one.
pub const DEFAULT_FPS: f64 = 30.0;

/// Geometry of a frame source, read once at open and immutable for a job.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FrameGeometry {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Frames per second.
    pub fps: f64,
    /// Total frame count; `0` when unknown (live or non-seekable sources).
    pub total_frames: u64,
}

impl FrameGeometry {
    pub fn new(width: u32, height: u32, fps: f64, total_frames: u64) -> Self {
        Self {
            width,
            height,
            fps: sanitize_fps(fps),
            total_frames,
        }
    }

    /// Geometry of a single still frame.
    pub fn still(width: u32, height: u32) -> Self {
        Self::new(width, height, DEFAULT_FPS, 1)
    }

    /// Geometry of an in-memory frame.
    pub fn of_frame(frame: &Frame) -> Self {
        Self::still(frame.width(), frame.height())
    }

    /// Whether the total frame count is known.
    pub fn has_known_length(&self) -> bool {
        self.total_frames > 0
    }

    /// Whether `frame` matches this geometry's dimensions.
    pub fn matches(&self, frame: &Frame) -> bool {
        frame.width() == self.width && frame.height() == self.height
    }

    /// Size in bytes of one packed RGB24 frame.
    pub fn rgb_frame_len(&self) -> usize {
        self.width as usize * self.height as usize * 3
    }

    /// Frame rate rendered for scripts and parameter files (`30`, `29.97`).
    pub fn fps_label(&self) -> String {
        if (self.fps - self.fps.round()).abs() < 1e-6 {
            format!("{}", self.fps.round() as u64)
        } else {
            let text = format!("{:.3}", self.fps);
            text.trim_end_matches('0').trim_end_matches('.').to_string()
        }
    }
}

fn sanitize_fps(fps: f64) -> f64 {
    if fps.is_finite() && fps > 0.0 {
        fps
    } else {
        DEFAULT_FPS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_fps_falls_back() {
        assert_eq!(FrameGeometry::new(64, 48, 0.0, 10).fps, DEFAULT_FPS);
        assert_eq!(FrameGeometry::new(64, 48, f64::NAN, 10).fps, DEFAULT_FPS);
        assert_eq!(FrameGeometry::new(64, 48, 25.0, 10).fps, 25.0);
    }

    #[test]
    fn test_fps_label() {
        assert_eq!(FrameGeometry::new(1, 1, 30.0, 0).fps_label(), "30");
        assert_eq!(FrameGeometry::new(1, 1, 29.97, 0).fps_label(), "29.97");
        assert_eq!(FrameGeometry::new(1, 1, 23.976, 0).fps_label(), "23.976");
    }

    #[test]
    fn test_of_frame_and_matches() {
        let frame = Frame::new(64, 48);
        let geometry = FrameGeometry::of_frame(&frame);
        assert_eq!(geometry.total_frames, 1);
        assert!(geometry.matches(&frame));
        assert!(!geometry.matches(&Frame::new(48, 64)));
        assert_eq!(geometry.rgb_frame_len(), 64 * 48 * 3);
    }
}
