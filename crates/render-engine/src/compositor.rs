//! Frame compositor: the timestamp banner burned into every exported frame.
//!
//! The banner is a dark band across the bottom edge, blended over the frame
//! at a fixed opacity, with the timestamp drawn in white on the left. Text
//! uses a built-in 3x5 pixel font covering the characters a timestamp needs.

use image::Rgb;
use imageproc::drawing::draw_filled_rect_mut;
use imageproc::rect::Rect;
use sightline_common::config::BannerConfig;
use sightline_job_model::Frame;

const GLYPH_W: u32 = 3;
const GLYPH_H: u32 = 5;
const TEXT_MARGIN_X: u32 = 10;
const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);

/// Banner layout.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BannerStyle {
    /// Band height in pixels (clamped to the frame height).
    pub height_px: u32,
    /// Opacity of the black band, `[0.0, 1.0]`.
    pub opacity: f32,
}

impl Default for BannerStyle {
    fn default() -> Self {
        Self::from(&BannerConfig::default())
    }
}

impl From<&BannerConfig> for BannerStyle {
    fn from(config: &BannerConfig) -> Self {
        Self {
            height_px: config.height_px.max(1),
            opacity: config.opacity.clamp(0.0, 1.0),
        }
    }
}

/// Blend the banner into `frame` and draw `text` on it.
pub fn draw_timestamp_banner(frame: &mut Frame, text: &str, style: &BannerStyle) {
    let (width, height) = frame.dimensions();
    if width == 0 || height == 0 {
        return;
    }

    let band_h = style.height_px.min(height);
    let top = height - band_h;
    darken_band(frame, top, style.opacity);

    let scale = ((band_h.saturating_sub(4)) / GLYPH_H).clamp(1, 3);
    let text_h = GLYPH_H * scale;
    let y = top + band_h.saturating_sub(text_h) / 2;
    let x = TEXT_MARGIN_X.min(width / 8);
    draw_text(frame, text, x, y, scale);
}

/// Blend black over rows `top..` at `opacity`.
fn darken_band(frame: &mut Frame, top: u32, opacity: f32) {
    let keep = 1.0 - opacity.clamp(0.0, 1.0);
    let width = frame.width();
    for y in top..frame.height() {
        for x in 0..width {
            let px = frame.get_pixel_mut(x, y);
            for channel in px.0.iter_mut() {
                *channel = (*channel as f32 * keep).round() as u8;
            }
        }
    }
}

fn draw_text(frame: &mut Frame, text: &str, x: u32, y: u32, scale: u32) {
    let advance = (GLYPH_W + 1) * scale;
    let mut cursor_x = x;
    for ch in text.chars() {
        if cursor_x >= frame.width() {
            break;
        }
        if let Some(rows) = glyph(ch) {
            for (row, bits) in rows.iter().enumerate() {
                for col in 0..GLYPH_W {
                    if bits & (1 << (GLYPH_W - 1 - col)) == 0 {
                        continue;
                    }
                    let px = cursor_x + col * scale;
                    let py = y + row as u32 * scale;
                    draw_filled_rect_mut(
                        frame,
                        Rect::at(px as i32, py as i32).of_size(scale, scale),
                        TEXT_COLOR,
                    );
                }
            }
        }
        cursor_x += advance;
    }
}

/// Row bitmaps (3 bits wide, MSB left). Unknown characters render as a gap.
fn glyph(ch: char) -> Option<[u8; 5]> {
    let rows = match ch {
        '0' => [0b111, 0b101, 0b101, 0b101, 0b111],
        '1' => [0b010, 0b110, 0b010, 0b010, 0b111],
        '2' => [0b111, 0b001, 0b111, 0b100, 0b111],
        '3' => [0b111, 0b001, 0b111, 0b001, 0b111],
        '4' => [0b101, 0b101, 0b111, 0b001, 0b001],
        '5' => [0b111, 0b100, 0b111, 0b001, 0b111],
        '6' => [0b111, 0b100, 0b111, 0b101, 0b111],
        '7' => [0b111, 0b001, 0b001, 0b001, 0b001],
        '8' => [0b111, 0b101, 0b111, 0b101, 0b111],
        '9' => [0b111, 0b101, 0b111, 0b001, 0b111],
        '-' => [0b000, 0b000, 0b111, 0b000, 0b000],
        ':' => [0b000, 0b010, 0b000, 0b010, 0b000],
        '.' => [0b000, 0b000, 0b000, 0b000, 0b010],
        '/' => [0b001, 0b001, 0b010, 0b100, 0b100],
        _ => return None,
    };
    Some(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gray(width: u32, height: u32) -> Frame {
        Frame::from_pixel(width, height, Rgb([200, 200, 200]))
    }

    #[test]
    fn test_banner_darkens_only_bottom_band() {
        let mut frame = gray(64, 48);
        let style = BannerStyle {
            height_px: 12,
            opacity: 0.5,
        };
        draw_timestamp_banner(&mut frame, "", &style);

        assert_eq!(frame.get_pixel(5, 0).0, [200, 200, 200]);
        assert_eq!(frame.get_pixel(5, 35).0, [200, 200, 200]);
        assert_eq!(frame.get_pixel(5, 36).0, [100, 100, 100]);
        assert_eq!(frame.get_pixel(63, 47).0, [100, 100, 100]);
    }

    #[test]
    fn test_banner_text_is_white_inside_band() {
        let mut frame = gray(200, 40);
        let style = BannerStyle {
            height_px: 20,
            opacity: 0.7,
        };
        draw_timestamp_banner(&mut frame, "2024-05-01 13:45:09", &style);

        let white = frame
            .enumerate_pixels()
            .filter(|(_, _, p)| p.0 == [255, 255, 255])
            .collect::<Vec<_>>();
        assert!(!white.is_empty());
        assert!(white.iter().all(|(_, y, _)| *y >= 20));
    }

    #[test]
    fn test_banner_taller_than_frame_is_clamped() {
        let mut frame = gray(8, 4);
        let style = BannerStyle {
            height_px: 100,
            opacity: 1.0,
        };
        draw_timestamp_banner(&mut frame, "12", &style);
        assert_eq!(frame.dimensions(), (8, 4));
        // Left of the text margin the band is fully opaque.
        assert_eq!(frame.get_pixel(0, 3).0, [0, 0, 0]);
    }

    #[test]
    fn test_every_timestamp_character_has_a_glyph() {
        for ch in "0123456789-: ".chars().filter(|c| *c != ' ') {
            assert!(glyph(ch).is_some(), "missing glyph for {ch:?}");
        }
        assert!(glyph('x').is_none());
    }
}
