//! Pixel conversions shared by the detector, the overlay and the stills path.

use crate::errors::CameraError;
use crate::types::{Frame, PixelFormat};
use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, RgbImage};

/// BT.601 luma of one RGB pixel, integer form: (77R + 150G + 29B) / 256.
#[inline]
pub fn luma(r: u8, g: u8, b: u8) -> u8 {
    ((77 * r as u32 + 150 * g as u32 + 29 * b as u32 + 128) >> 8) as u8
}

/// Single-channel intensity plane of a frame (width * height bytes).
pub fn luma_plane(frame: &Frame) -> Vec<u8> {
    let pixels = frame.width as usize * frame.height as usize;
    match frame.format {
        PixelFormat::Rgb8 => frame
            .data
            .chunks_exact(3)
            .take(pixels)
            .map(|p| luma(p[0], p[1], p[2]))
            .collect(),
        PixelFormat::Bgr8 => frame
            .data
            .chunks_exact(3)
            .take(pixels)
            .map(|p| luma(p[2], p[1], p[0]))
            .collect(),
        PixelFormat::Gray8 | PixelFormat::Yuv420 => {
            frame.data.iter().take(pixels).copied().collect()
        }
    }
}

/// Convert any supported frame into an owned RGB image.
///
/// YUV input is rendered from its Y plane only.
pub fn to_rgb_image(frame: &Frame) -> Result<RgbImage, CameraError> {
    if !frame.is_valid() {
        return Err(CameraError::frame_pull(format!(
            "Malformed {:?} frame: {} bytes for {}x{}",
            frame.format,
            frame.data.len(),
            frame.width,
            frame.height
        )));
    }

    let rgb = match frame.format {
        PixelFormat::Rgb8 => frame.data.clone(),
        PixelFormat::Bgr8 => frame
            .data
            .chunks_exact(3)
            .flat_map(|p| [p[2], p[1], p[0]])
            .collect(),
        PixelFormat::Gray8 | PixelFormat::Yuv420 => luma_plane(frame)
            .into_iter()
            .flat_map(|v| [v, v, v])
            .collect(),
    };

    RgbImage::from_raw(frame.width, frame.height, rgb)
        .ok_or_else(|| CameraError::frame_pull("RGB buffer does not match frame size"))
}

/// Encode an RGB image as baseline JPEG.
pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>, CameraError> {
    let mut out = Vec::with_capacity(image.as_raw().len() / 8);
    JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100))
        .encode(
            image.as_raw(),
            image.width(),
            image.height(),
            ExtendedColorType::Rgb8,
        )
        .map_err(|e| CameraError::file_io(format!("JPEG encoding failed: {}", e)))?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::static_scene;

    #[test]
    fn test_luma_weights() {
        assert_eq!(luma(0, 0, 0), 0);
        assert_eq!(luma(255, 255, 255), 255);
        assert!(luma(0, 255, 0) > luma(255, 0, 0));
        assert!(luma(255, 0, 0) > luma(0, 0, 255));
    }

    #[test]
    fn test_rgb_and_bgr_give_same_luma() {
        let rgb = static_scene(16, 8, PixelFormat::Rgb8);
        let bgr = static_scene(16, 8, PixelFormat::Bgr8);
        assert_eq!(luma_plane(&rgb), luma_plane(&bgr));
    }

    #[test]
    fn test_yuv_uses_y_plane_only() {
        let frame = static_scene(8, 4, PixelFormat::Yuv420);
        assert_eq!(luma_plane(&frame).len(), 32);
    }

    #[test]
    fn test_jpeg_round_trip_has_markers() {
        let image = to_rgb_image(&static_scene(32, 24, PixelFormat::Gray8)).unwrap();
        let jpeg = encode_jpeg(&image, 80).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        assert_eq!(&jpeg[jpeg.len() - 2..], &[0xFF, 0xD9]);
    }

    #[test]
    fn test_malformed_frame_rejected() {
        let frame = Frame::new(vec![1, 2, 3], 4, 4, PixelFormat::Rgb8);
        assert!(to_rgb_image(&frame).is_err());
    }
}
