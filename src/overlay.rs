//! Status text burned into live-stream frames.
//!
//! A 3x5 bitmap font covers the few glyphs the overlay needs (digits, `-`,
//! `:` and the letters of `REC`, `MOTION DETECTED` and `MONITORING`), scaled
//! up with the frame height. Unknown characters render as blanks.

use crate::types::DISPLAY_TIME_FORMAT;
use chrono::{DateTime, Local};
use image::{Rgb, RgbImage};

const GLYPH_W: u32 = 3;
const GLYPH_H: u32 = 5;

const WHITE: Rgb<u8> = Rgb([255, 255, 255]);
const SHADOW: Rgb<u8> = Rgb([0, 0, 0]);
const RED: Rgb<u8> = Rgb([255, 0, 0]);
const GREEN: Rgb<u8> = Rgb([0, 255, 0]);
const YELLOW: Rgb<u8> = Rgb([255, 255, 0]);

/// What the overlay shows for one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct OverlayInfo {
    pub timestamp: DateTime<Local>,
    pub recording: bool,
    pub motion_active: bool,
    pub motion_detected: bool,
}

fn glyph(c: char) -> [u8; 5] {
    match c {
        '0' | 'O' => [0b111, 0b101, 0b101, 0b101, 0b111],
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
        'C' => [0b111, 0b100, 0b100, 0b100, 0b111],
        'D' => [0b110, 0b101, 0b101, 0b101, 0b110],
        'E' => [0b111, 0b100, 0b110, 0b100, 0b111],
        'G' => [0b111, 0b100, 0b101, 0b101, 0b111],
        'I' => [0b111, 0b010, 0b010, 0b010, 0b111],
        'M' => [0b101, 0b111, 0b111, 0b101, 0b101],
        'N' => [0b110, 0b101, 0b101, 0b101, 0b101],
        'R' => [0b110, 0b101, 0b110, 0b101, 0b101],
        'T' => [0b111, 0b010, 0b010, 0b010, 0b010],
        _ => [0; 5],
    }
}

/// Font scale for a frame: one font pixel per 120 rows, at least 1.
pub fn scale_for(height: u32) -> u32 {
    (height / 120).max(1)
}

/// Width in pixels of `text` at `scale`, including one column of spacing
/// between glyphs.
pub fn text_width(text: &str, scale: u32) -> u32 {
    let n = text.chars().count() as u32;
    if n == 0 {
        return 0;
    }
    (n * (GLYPH_W + 1) - 1) * scale
}

fn fill_rect(image: &mut RgbImage, x: i64, y: i64, w: u32, h: u32, color: Rgb<u8>) {
    let (iw, ih) = (image.width() as i64, image.height() as i64);
    for py in y.max(0)..(y + h as i64).min(ih) {
        for px in x.max(0)..(x + w as i64).min(iw) {
            image.put_pixel(px as u32, py as u32, color);
        }
    }
}

fn draw_glyphs(image: &mut RgbImage, text: &str, x: i64, y: i64, scale: u32, color: Rgb<u8>) {
    let step = ((GLYPH_W + 1) * scale) as i64;
    for (i, c) in text.chars().enumerate() {
        let rows = glyph(c);
        let gx = x + i as i64 * step;
        for (row, bits) in rows.iter().enumerate() {
            for col in 0..GLYPH_W {
                if bits & (1 << (GLYPH_W - 1 - col)) != 0 {
                    fill_rect(
                        image,
                        gx + (col * scale) as i64,
                        y + (row as u32 * scale) as i64,
                        scale,
                        scale,
                        color,
                    );
                }
            }
        }
    }
}

/// Draw `text` with a one-font-pixel drop shadow. Clipped at the edges.
pub fn draw_text(image: &mut RgbImage, text: &str, x: i64, y: i64, scale: u32, color: Rgb<u8>) {
    let offset = scale as i64;
    draw_glyphs(image, text, x + offset, y + offset, scale, SHADOW);
    draw_glyphs(image, text, x, y, scale, color);
}

fn fill_circle(image: &mut RgbImage, cx: i64, cy: i64, radius: i64, color: Rgb<u8>) {
    for dy in -radius..=radius {
        for dx in -radius..=radius {
            if dx * dx + dy * dy <= radius * radius {
                fill_rect(image, cx + dx, cy + dy, 1, 1, color);
            }
        }
    }
}

/// Burn the status overlay into `image`.
pub fn render(image: &mut RgbImage, info: &OverlayInfo) {
    let scale = scale_for(image.height());
    let margin = (2 * scale + 2) as i64;
    let text_h = (GLYPH_H * scale) as i64;
    let width = image.width() as i64;
    let height = image.height() as i64;

    let stamp = info.timestamp.format(DISPLAY_TIME_FORMAT).to_string();
    draw_text(image, &stamp, margin, margin, scale, WHITE);

    if info.recording {
        let label_w = text_width("REC", scale) as i64;
        let radius = text_h / 2;
        let label_x = width - margin - label_w;
        let dot_x = label_x - 2 * scale as i64 - radius;
        fill_circle(image, dot_x, margin + radius, radius, RED);
        draw_text(image, "REC", label_x, margin, scale, RED);
    }

    if info.motion_active {
        let (label, color) = if info.motion_detected {
            ("MOTION DETECTED", GREEN)
        } else {
            ("MONITORING", YELLOW)
        };
        draw_text(image, label, margin, height - margin - text_h, scale, color);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn blank(width: u32, height: u32) -> RgbImage {
        RgbImage::from_pixel(width, height, Rgb([40, 40, 40]))
    }

    fn info(recording: bool, motion_active: bool, motion_detected: bool) -> OverlayInfo {
        OverlayInfo {
            timestamp: Local.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap(),
            recording,
            motion_active,
            motion_detected,
        }
    }

    fn count(image: &RgbImage, color: Rgb<u8>) -> usize {
        image.pixels().filter(|p| **p == color).count()
    }

    #[test]
    fn test_every_overlay_label_has_glyphs() {
        for label in ["REC", "MOTION DETECTED", "MONITORING", "2024-01-02 03:04:05"] {
            for c in label.chars().filter(|c| *c != ' ') {
                assert_ne!(glyph(c), [0; 5], "missing glyph {:?}", c);
            }
        }
    }

    #[test]
    fn test_timestamp_always_drawn() {
        let mut image = blank(320, 240);
        render(&mut image, &info(false, false, false));
        assert!(count(&image, WHITE) > 0);
        assert_eq!(count(&image, RED), 0);
        assert_eq!(count(&image, YELLOW), 0);
    }

    #[test]
    fn test_recording_indicator_is_red_top_right() {
        let mut image = blank(320, 240);
        render(&mut image, &info(true, false, false));
        let red_on_right = image
            .enumerate_pixels()
            .filter(|(x, y, p)| **p == RED && *x > 160 && *y < 40)
            .count();
        assert!(red_on_right > 0);
    }

    #[test]
    fn test_motion_label_color_follows_detection() {
        let mut monitoring = blank(320, 240);
        render(&mut monitoring, &info(false, true, false));
        assert!(count(&monitoring, YELLOW) > 0);
        assert_eq!(count(&monitoring, GREEN), 0);

        let mut detected = blank(320, 240);
        render(&mut detected, &info(false, true, true));
        assert!(count(&detected, GREEN) > 0);
    }

    #[test]
    fn test_tiny_frames_clip_without_panicking() {
        let mut image = blank(8, 6);
        render(&mut image, &info(true, true, true));
    }

    #[test]
    fn test_text_width() {
        assert_eq!(text_width("", 2), 0);
        assert_eq!(text_width("REC", 1), 11);
        assert_eq!(text_width("REC", 4), 44);
    }
}
