//! H.264 encoding through openh264.

use crate::errors::{CameraError, FailureKind};
use openh264::encoder::{BitRate, Encoder, EncoderConfig, FrameRate, FrameType, RateControlMode};
use openh264::formats::YUVBuffer;
use openh264::OpenH264API;

pub struct H264Encoder {
    encoder: Encoder,
    width: u32,
    height: u32,
    frames: u64,
}

/// One encoded access unit in Annex B form.
#[derive(Debug, Clone)]
pub struct EncodedFrame {
    pub data: Vec<u8>,
    pub is_keyframe: bool,
}

impl H264Encoder {
    /// Dimensions are fixed for the lifetime of the encoder. Odd sizes are
    /// rejected since the chroma planes are subsampled 2x2. Rate control
    /// targets `bitrate` bits per second at `framerate`.
    pub fn new(width: u32, height: u32, framerate: u32, bitrate: u32) -> Result<Self, CameraError> {
        if width == 0 || height == 0 || width % 2 != 0 || height % 2 != 0 {
            return Err(CameraError::new(
                FailureKind::RecordingStartFailed,
                format!("H.264 needs even, non-zero dimensions, got {}x{}", width, height),
            ));
        }
        if framerate == 0 || bitrate == 0 {
            return Err(CameraError::new(
                FailureKind::RecordingStartFailed,
                format!("Invalid rate: {} fps at {} bps", framerate, bitrate),
            ));
        }

        let config = EncoderConfig::new()
            .bitrate(BitRate::from_bps(bitrate))
            .max_frame_rate(FrameRate::from_hz(framerate as f32))
            .rate_control_mode(RateControlMode::Bitrate);
        let encoder = Encoder::with_api_config(OpenH264API::from_source(), config).map_err(|e| {
            CameraError::new(
                FailureKind::RecordingStartFailed,
                format!("Failed to create H.264 encoder: {}", e),
            )
        })?;
        log::debug!(
            "H.264 encoder {}x{} @ {} fps, {} kbps",
            width,
            height,
            framerate,
            bitrate / 1000
        );
        Ok(Self {
            encoder,
            width,
            height,
            frames: 0,
        })
    }

    pub fn encode_rgb(&mut self, rgb: &[u8]) -> Result<EncodedFrame, CameraError> {
        let expected = (self.width * self.height * 3) as usize;
        if rgb.len() != expected {
            return Err(CameraError::file_io(format!(
                "Encoder expected {} RGB bytes, got {}",
                expected,
                rgb.len()
            )));
        }
        let yuv = YUVBuffer::from_vec(
            rgb_to_i420(rgb, self.width, self.height),
            self.width as usize,
            self.height as usize,
        );

        let bitstream = self
            .encoder
            .encode(&yuv)
            .map_err(|e| CameraError::file_io(format!("H.264 encoding failed: {}", e)))?;
        self.frames += 1;

        Ok(EncodedFrame {
            is_keyframe: matches!(bitstream.frame_type(), FrameType::IDR | FrameType::I),
            data: bitstream.to_vec(),
        })
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }
}

/// Packed RGB24 to planar I420, BT.601 studio range.
fn rgb_to_i420(rgb: &[u8], width: u32, height: u32) -> Vec<u8> {
    let w = width as usize;
    let h = height as usize;
    let luma_len = w * h;
    let chroma_len = (w / 2) * (h / 2);
    let mut out = vec![0u8; luma_len + 2 * chroma_len];
    let (y_plane, chroma) = out.split_at_mut(luma_len);
    let (u_plane, v_plane) = chroma.split_at_mut(chroma_len);

    for (i, px) in rgb.chunks_exact(3).enumerate() {
        let (r, g, b) = (px[0] as i32, px[1] as i32, px[2] as i32);
        y_plane[i] = (((66 * r + 129 * g + 25 * b + 128) >> 8) + 16).clamp(0, 255) as u8;

        let (x, y) = (i % w, i / w);
        if x % 2 == 0 && y % 2 == 0 {
            let c = (y / 2) * (w / 2) + x / 2;
            u_plane[c] = (((-38 * r - 74 * g + 112 * b + 128) >> 8) + 128).clamp(0, 255) as u8;
            v_plane[c] = (((112 * r - 94 * g - 18 * b + 128) >> 8) + 128).clamp(0, 255) as u8;
        }
    }
    out
}
