//! MP4 file sink: frames in, H.264-in-MP4 out.

use super::encoder::H264Encoder;
use crate::errors::{CameraError, FailureKind};
use crate::imaging;
use crate::types::{Frame, SinkStats};
use muxide::api::{Metadata, Muxer, MuxerBuilder, VideoCodec};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

pub struct Mp4Sink {
    encoder: H264Encoder,
    muxer: Muxer<BufWriter<File>>,
    path: PathBuf,
    width: u32,
    height: u32,
    frame_secs: f64,
    written: u64,
    skipped: u64,
}

impl Mp4Sink {
    pub fn create(
        path: &Path,
        width: u32,
        height: u32,
        framerate: u32,
        bitrate: u32,
    ) -> Result<Self, CameraError> {
        let start_failed =
            |message: String| CameraError::new(FailureKind::RecordingStartFailed, message);

        let file = File::create(path)
            .map_err(|e| start_failed(format!("Cannot create {}: {}", path.display(), e)))?;
        let encoder = H264Encoder::new(width, height, framerate.max(1), bitrate)?;
        let fps = framerate.max(1) as f64;
        let muxer = MuxerBuilder::new(BufWriter::new(file))
            .video(VideoCodec::H264, width, height, fps)
            .with_fast_start(true)
            .with_metadata(Metadata::new().with_title("sentrycam").with_current_time())
            .build()
            .map_err(|e| start_failed(format!("Cannot start MP4 muxer: {}", e)))?;

        Ok(Self {
            encoder,
            muxer,
            path: path.to_path_buf(),
            width,
            height,
            frame_secs: 1.0 / fps,
            written: 0,
            skipped: 0,
        })
    }

    /// Encode one frame. Frames of the wrong size are counted and skipped.
    pub fn write(&mut self, frame: &Frame) -> Result<(), CameraError> {
        if frame.width != self.width || frame.height != self.height {
            self.skipped += 1;
            log::debug!(
                "Skipping {}x{} frame for {}x{} recording",
                frame.width,
                frame.height,
                self.width,
                self.height
            );
            return Ok(());
        }

        let rgb = imaging::to_rgb_image(frame)?;
        let encoded = self.encoder.encode_rgb(rgb.as_raw())?;
        if encoded.data.is_empty() {
            self.skipped += 1;
            return Ok(());
        }

        let pts = self.written as f64 * self.frame_secs;
        self.muxer
            .write_video(pts, &encoded.data, encoded.is_keyframe)
            .map_err(|e| CameraError::file_io(format!("MP4 write failed: {}", e)))?;
        self.written += 1;
        Ok(())
    }

    pub fn finish(self) -> Result<SinkStats, CameraError> {
        let stats = self.muxer.finish_with_stats().map_err(|e| {
            CameraError::new(
                FailureKind::RecordingStopFailed,
                format!("Failed to finalize {}: {}", self.path.display(), e),
            )
        })?;
        if self.skipped > 0 {
            log::warn!("{} frames skipped in {}", self.skipped, self.path.display());
        }
        Ok(SinkStats {
            path: self.path,
            frames_written: stats.video_frames,
            bytes_written: stats.bytes_written,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::sequence_frame;
    use crate::types::PixelFormat;

    /// Uncompressible content, so the encoder runs up against its rate limit.
    fn noise_frame(seed: u64, width: u32, height: u32) -> Frame {
        let mut state = seed.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1);
        let data = (0..width * height * 3)
            .map(|_| {
                state = state.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1_442_695_040_888_963_407);
                (state >> 56) as u8
            })
            .collect();
        Frame::new(data, width, height, PixelFormat::Rgb8)
    }

    #[test]
    fn test_sink_writes_playable_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.mp4");
        let mut sink = Mp4Sink::create(&path, 64, 48, 15, 500_000).unwrap();
        for n in 0..15 {
            sink.write(&sequence_frame(n, 64, 48)).unwrap();
        }
        sink.write(&sequence_frame(99, 32, 24)).unwrap();

        let stats = sink.finish().unwrap();
        assert_eq!(stats.frames_written, 15);
        assert!(stats.bytes_written > 0);
        assert!(std::fs::metadata(&path).unwrap().len() > 0);
    }

    #[test]
    fn test_bitrate_bounds_file_size() {
        let dir = tempfile::tempdir().unwrap();
        let mut sizes = Vec::new();
        for bitrate in [100_000, 8_000_000] {
            let path = dir.path().join(format!("clip_{}.mp4", bitrate));
            let mut sink = Mp4Sink::create(&path, 160, 120, 30, bitrate).unwrap();
            for n in 0..30 {
                sink.write(&noise_frame(n, 160, 120)).unwrap();
            }
            sizes.push(sink.finish().unwrap().bytes_written);
        }
        assert!(sizes[0] < sizes[1], "sizes {:?}", sizes);
    }
}
