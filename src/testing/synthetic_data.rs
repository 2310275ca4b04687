//! Deterministic frame generators.
//!
//! Scene pixel values stay within 40..=140 so that tests can add a known
//! intensity delta without clipping.

use crate::types::{Frame, PixelFormat};

/// A fixed gradient scene. Identical inputs always give identical frames.
pub fn static_scene(width: u32, height: u32, format: PixelFormat) -> Frame {
    let w = width as usize;
    let h = height as usize;
    let mut data = Vec::with_capacity(format.buffer_len(width, height));

    match format {
        PixelFormat::Rgb8 | PixelFormat::Bgr8 => {
            for y in 0..h {
                for x in 0..w {
                    let r = 40 + (x * 100 / w.max(1)) as u8;
                    let g = 40 + (y * 100 / h.max(1)) as u8;
                    let b = 90u8;
                    if format == PixelFormat::Rgb8 {
                        data.extend_from_slice(&[r, g, b]);
                    } else {
                        data.extend_from_slice(&[b, g, r]);
                    }
                }
            }
        }
        PixelFormat::Gray8 | PixelFormat::Yuv420 => {
            for y in 0..h {
                for x in 0..w {
                    data.push(40 + ((x + y) * 100 / (w + h).max(1)) as u8);
                }
            }
            if format == PixelFormat::Yuv420 {
                data.resize(format.buffer_len(width, height), 128);
            }
        }
    }

    Frame::new(data, width, height, format)
}

/// Copy of `base` with its first `count` pixels (row-major) brightened by
/// `delta` on every channel. For RGB/BGR input the BT.601 intensity of each
/// touched pixel rises by exactly `delta`.
pub fn with_changed_pixels(base: &Frame, count: u32, delta: u8) -> Frame {
    let mut frame = base.clone();
    let channels = match frame.format {
        PixelFormat::Rgb8 | PixelFormat::Bgr8 => 3,
        PixelFormat::Gray8 | PixelFormat::Yuv420 => 1,
    };
    let pixels = (frame.width as usize * frame.height as usize).min(count as usize);
    for byte in frame.data.iter_mut().take(pixels * channels) {
        *byte = byte.saturating_add(delta);
    }
    frame
}

/// Static scene with a bright square at (`x`, `y`): a moving object when
/// called with shifting coordinates.
pub fn scene_with_block(width: u32, height: u32, x: u32, y: u32, size: u32) -> Frame {
    let mut frame = static_scene(width, height, PixelFormat::Rgb8);
    for row in y..(y + size).min(height) {
        for col in x..(x + size).min(width) {
            let idx = ((row * width + col) * 3) as usize;
            frame.data[idx..idx + 3].copy_from_slice(&[230, 230, 230]);
        }
    }
    frame
}

/// A frame whose content changes with `frame_number`, for stream tests.
pub fn sequence_frame(frame_number: u64, width: u32, height: u32) -> Frame {
    let mut data = vec![0u8; (width * height * 3) as usize];
    let base = (frame_number % 256) as u8;
    for y in 0..height {
        for x in 0..width {
            let idx = ((y * width + x) * 3) as usize;
            data[idx] = base.wrapping_add((x % 256) as u8);
            data[idx + 1] = base.wrapping_add((y % 256) as u8);
            data[idx + 2] = base.wrapping_add(((x + y) % 256) as u8);
        }
    }
    Frame::new(data, width, height, PixelFormat::Rgb8).with_sequence(frame_number)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_scene_is_deterministic() {
        let a = static_scene(64, 48, PixelFormat::Rgb8);
        let b = static_scene(64, 48, PixelFormat::Rgb8);
        assert_eq!(a.data, b.data);
        assert!(a.is_valid());
    }

    #[test]
    fn test_all_formats_are_valid() {
        for format in [
            PixelFormat::Rgb8,
            PixelFormat::Bgr8,
            PixelFormat::Gray8,
            PixelFormat::Yuv420,
        ] {
            assert!(static_scene(32, 16, format).is_valid(), "{:?}", format);
        }
    }

    #[test]
    fn test_changed_pixels_touch_exactly_count() {
        let base = static_scene(32, 32, PixelFormat::Rgb8);
        let changed = with_changed_pixels(&base, 10, 50);
        let differing = base
            .data
            .chunks(3)
            .zip(changed.data.chunks(3))
            .filter(|(a, b)| a != b)
            .count();
        assert_eq!(differing, 10);
    }

    #[test]
    fn test_sequence_frames_differ() {
        let frame0 = sequence_frame(0, 32, 24);
        let frame1 = sequence_frame(1, 32, 24);
        assert_ne!(frame0.data[0], frame1.data[0]);
        assert_eq!(frame1.sequence, 1);
    }
}
