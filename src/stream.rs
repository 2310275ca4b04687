//! MJPEG live stream.
//!
//! Each part is one JPEG with the status overlay burned in. While the device
//! is recording (pulls closed) or changing mode, the last good frame is
//! repeated with a fresh overlay. Any other pull failure ends the stream.

use crate::errors::{CameraError, FailureKind};
use crate::imaging;
use crate::motion::MotionMonitor;
use crate::overlay::{self, OverlayInfo};
use crate::recording::RecordingController;
use crate::source::FrameSource;
use bytes::{BufMut, Bytes, BytesMut};
use chrono::Local;
use futures::Stream;
use image::{Rgb, RgbImage};
use std::time::Duration;

pub const BOUNDARY: &str = "frame";
pub const CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";

/// Wrap one JPEG as a multipart part.
pub fn multipart_part(jpeg: &[u8]) -> Bytes {
    let mut part = BytesMut::with_capacity(jpeg.len() + 64);
    part.put_slice(b"--");
    part.put_slice(BOUNDARY.as_bytes());
    part.put_slice(b"\r\nContent-Type: image/jpeg\r\n\r\n");
    part.put_slice(jpeg);
    part.put_slice(b"\r\n");
    part.freeze()
}

pub struct LiveStream {
    source: FrameSource,
    controller: RecordingController,
    monitor: MotionMonitor,
    interval: Duration,
    quality: u8,
    last: Option<RgbImage>,
    parts: u64,
}

impl LiveStream {
    pub fn new(
        source: FrameSource,
        controller: RecordingController,
        monitor: MotionMonitor,
        interval: Duration,
        quality: u8,
    ) -> Self {
        Self {
            source,
            controller,
            monitor,
            interval,
            quality,
            last: None,
            parts: 0,
        }
    }

    pub fn parts_sent(&self) -> u64 {
        self.parts
    }

    fn overlay_info(&self) -> OverlayInfo {
        let motion_active = self.monitor.is_active();
        OverlayInfo {
            timestamp: Local::now(),
            recording: self.controller.is_recording(),
            motion_active,
            motion_detected: motion_active && self.monitor.state().detected,
        }
    }

    /// A neutral frame at preview size, used until the first real frame.
    fn placeholder(&self) -> RgbImage {
        let (width, height) = self.source.preview_params().resolution();
        RgbImage::from_pixel(width.max(1), height.max(1), Rgb([32, 32, 32]))
    }

    async fn next_image(&mut self) -> Result<RgbImage, CameraError> {
        match self.source.capture_frame().await {
            Ok(frame) => {
                let image = imaging::to_rgb_image(&frame)?;
                self.last = Some(image.clone());
                Ok(image)
            }
            Err(e) if e.is(FailureKind::DeviceBusy) => {
                log::debug!("Live stream repeating last frame: {}", e);
                Ok(self.last.clone().unwrap_or_else(|| self.placeholder()))
            }
            Err(e) => Err(e),
        }
    }

    /// Produce the next multipart part.
    pub async fn next_part(&mut self) -> Result<Bytes, CameraError> {
        let mut image = self.next_image().await?;
        overlay::render(&mut image, &self.overlay_info());
        let jpeg = imaging::encode_jpeg(&image, self.quality)?;
        self.parts += 1;
        Ok(multipart_part(&jpeg))
    }

    /// Paced stream of parts. Ends on the first unrecoverable failure.
    pub fn into_stream(self) -> impl Stream<Item = Result<Bytes, CameraError>> + Send + 'static {
        futures::stream::unfold(Some((self, true)), |state| async move {
            let (mut live, first) = state?;
            if !first {
                tokio::time::sleep(live.interval).await;
            }
            match live.next_part().await {
                Ok(part) => Some((Ok(part), Some((live, false)))),
                Err(e) => {
                    log::warn!("Live stream ended after {} frames: {}", live.parts, e);
                    None
                }
            }
        })
    }
}
