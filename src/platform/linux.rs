//! V4L2 capture through nokhwa.
//!
//! Each configuration opens a fresh `CallbackCamera` at the closest format
//! the driver offers, so a mode change is a full close and reopen of the
//! device. In Recording mode frames are pushed from nokhwa's capture thread
//! straight into an [`Mp4Sink`](crate::recording::Mp4Sink); pulls are refused.

use super::CaptureDevice;
use crate::errors::{CameraError, FailureKind};
use crate::imaging;
use crate::types::{CameraMode, Frame, ModeParams, PixelFormat, SinkStats};
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{
    ApiBackend, CameraFormat, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType,
    Resolution,
};
use nokhwa::{query, Buffer, CallbackCamera};
use std::path::Path;
use std::time::{Duration, Instant};

#[cfg(feature = "recording")]
use crate::recording::Mp4Sink;
#[cfg(feature = "recording")]
use std::sync::{Arc, Mutex};

#[cfg(feature = "recording")]
type SharedSink = Arc<Mutex<Option<Mp4Sink>>>;

pub struct V4lCamera {
    index: u32,
    name: String,
    framerate: u32,
    warmup: Duration,
    camera: Option<CallbackCamera>,
    params: Option<ModeParams>,
    streaming: bool,
    warmed_up: bool,
    #[cfg(feature = "recording")]
    sink: Option<SharedSink>,
}

/// Frames discarded after reopening for a still, so exposure catches up.
const STILL_SETTLE_FRAMES: usize = 5;

fn decode(buffer: &Buffer) -> Result<Frame, CameraError> {
    let image = buffer
        .decode_image::<RgbFormat>()
        .map_err(|e| CameraError::frame_pull(format!("Failed to decode frame: {}", e)))?;
    let (width, height) = (image.width(), image.height());
    Ok(Frame::new(image.into_raw(), width, height, PixelFormat::Rgb8))
}

impl V4lCamera {
    /// Check that V4L2 device `index` exists. Nothing is opened until the
    /// first `configure`.
    pub fn open(index: u32, framerate: u32, warmup: Duration) -> Result<Self, CameraError> {
        let devices = query(ApiBackend::Video4Linux)
            .map_err(|e| CameraError::device_init(format!("Failed to query cameras: {}", e)))?;
        let info = devices
            .into_iter()
            .find(|info| *info.index() == CameraIndex::Index(index))
            .ok_or_else(|| CameraError::device_init(format!("No V4L2 camera at index {}", index)))?;

        log::info!("Found camera {}: {}", index, info.human_name());
        Ok(Self {
            index,
            name: info.human_name(),
            framerate,
            warmup,
            camera: None,
            params: None,
            streaming: false,
            warmed_up: false,
            #[cfg(feature = "recording")]
            sink: None,
        })
    }

    fn camera(&mut self) -> Result<&mut CallbackCamera, CameraError> {
        self.camera
            .as_mut()
            .ok_or_else(|| CameraError::reconfigure("camera not configured"))
    }

    /// Discard frames for the configured warm-up period so exposure settles.
    fn warm_up(&mut self) {
        if self.warmed_up || self.warmup.is_zero() {
            return;
        }
        let deadline = Instant::now() + self.warmup;
        if let Some(camera) = self.camera.as_mut() {
            while Instant::now() < deadline {
                if camera.poll_frame().is_err() {
                    break;
                }
            }
        }
        self.warmed_up = true;
    }

    /// Reopen at `width`x`height`, grab one settled frame, then put the
    /// `active` configuration back. A failed restore leaves the device in an
    /// unknown format, so it surfaces as `ReconfigureFailed`.
    fn capture_at(
        &mut self,
        active: &ModeParams,
        width: u32,
        height: u32,
    ) -> Result<Frame, CameraError> {
        log::debug!("Reopening camera {} at {}x{} for a still", self.index, width, height);
        self.stop()?;
        let grabbed = self
            .configure(&ModeParams::Preview { width, height })
            .and_then(|_| self.start())
            .and_then(|_| {
                for _ in 0..STILL_SETTLE_FRAMES {
                    if let Err(e) = self.capture_frame() {
                        log::debug!("Settle frame dropped: {}", e);
                    }
                }
                self.capture_frame()
            });

        let restored = self
            .stop()
            .and_then(|_| self.configure(active))
            .and_then(|_| self.start());
        if let Err(e) = restored {
            log::error!("Failed to restore {} after still: {}", active.mode().as_str(), e);
            return Err(CameraError::reconfigure(format!(
                "Failed to restore {} after still: {}",
                active.mode().as_str(),
                e.message
            )));
        }
        grabbed
    }

    #[cfg(feature = "recording")]
    fn sink_open(&self) -> bool {
        self.sink.is_some()
    }

    #[cfg(not(feature = "recording"))]
    fn sink_open(&self) -> bool {
        false
    }

    #[cfg(feature = "recording")]
    fn discard_sink(&mut self) {
        if self.sink.take().is_some() {
            log::warn!("Recording sink discarded before any frame was written");
        }
    }

    #[cfg(not(feature = "recording"))]
    fn discard_sink(&mut self) {}

    #[cfg(feature = "recording")]
    fn start_sink(&mut self, path: &Path, framerate: u32, bitrate: u32) -> Result<(), CameraError> {
        let camera = self.camera()?;
        let resolution = camera.resolution().map_err(|e| {
            CameraError::new(
                FailureKind::RecordingStartFailed,
                format!("Unknown capture resolution: {}", e),
            )
        })?;
        let sink = Mp4Sink::create(
            path,
            resolution.width_x,
            resolution.height_y,
            framerate,
            bitrate,
        )?;
        let shared: SharedSink = Arc::new(Mutex::new(Some(sink)));

        let pump = shared.clone();
        camera
            .set_callback(move |buffer: Buffer| {
                let frame = match decode(&buffer) {
                    Ok(frame) => frame,
                    Err(e) => {
                        log::debug!("Dropping undecodable frame: {}", e);
                        return;
                    }
                };
                if let Ok(mut guard) = pump.lock() {
                    if let Some(sink) = guard.as_mut() {
                        if let Err(e) = sink.write(&frame) {
                            log::warn!("Recording frame lost: {}", e);
                        }
                    }
                }
            })
            .map_err(|e| {
                CameraError::new(
                    FailureKind::RecordingStartFailed,
                    format!("Failed to attach recording pump: {}", e),
                )
            })?;
        self.sink = Some(shared);
        Ok(())
    }

    #[cfg(not(feature = "recording"))]
    fn start_sink(&mut self, _path: &Path, _framerate: u32, _bitrate: u32) -> Result<(), CameraError> {
        Err(CameraError::new(
            FailureKind::RecordingStartFailed,
            "MP4 recording requires the `recording` feature",
        ))
    }
}

impl CaptureDevice for V4lCamera {
    fn name(&self) -> &str {
        &self.name
    }

    fn stop(&mut self) -> Result<(), CameraError> {
        if self.sink_open() {
            return Err(CameraError::device_busy("recording sink still open"));
        }
        if let Some(mut camera) = self.camera.take() {
            if self.streaming {
                camera
                    .stop_stream()
                    .map_err(|e| CameraError::device_busy(format!("Failed to stop stream: {}", e)))?;
            }
        }
        self.streaming = false;
        Ok(())
    }

    fn configure(&mut self, params: &ModeParams) -> Result<(), CameraError> {
        if self.streaming {
            return Err(CameraError::device_busy("configure while streaming"));
        }
        if params.mode() == CameraMode::Recording && !cfg!(feature = "recording") {
            return Err(CameraError::reconfigure(
                "MP4 recording requires the `recording` feature",
            ));
        }

        let (width, height) = params.resolution();
        let requested = RequestedFormat::new::<RgbFormat>(RequestedFormatType::Closest(
            CameraFormat::new(Resolution::new(width, height), FrameFormat::MJPEG, self.framerate),
        ));
        let camera = CallbackCamera::new(CameraIndex::Index(self.index), requested, |_| {})
            .map_err(|e| {
                CameraError::reconfigure(format!(
                    "Failed to open camera {} at {}x{}: {}",
                    self.index, width, height, e
                ))
            })?;

        self.camera = Some(camera);
        self.params = Some(params.clone());
        Ok(())
    }

    fn start(&mut self) -> Result<(), CameraError> {
        let params = self
            .params
            .clone()
            .ok_or_else(|| CameraError::reconfigure("start before configure"))?;

        if let ModeParams::Recording {
            path,
            framerate,
            bitrate,
            ..
        } = &params
        {
            self.start_sink(path, *framerate, *bitrate)?;
        }

        if let Err(e) = self.camera()?.open_stream() {
            self.discard_sink();
            return Err(CameraError::reconfigure(format!("Failed to start stream: {}", e)));
        }
        self.streaming = true;

        if params.mode() != CameraMode::Recording {
            self.warm_up();
        }
        Ok(())
    }

    fn capture_frame(&mut self) -> Result<Frame, CameraError> {
        if !self.streaming {
            return Err(CameraError::frame_pull("stream not started"));
        }
        if self.params.as_ref().map(ModeParams::mode) == Some(CameraMode::Recording) {
            return Err(CameraError::device_busy("frames are going to the recording sink"));
        }
        let buffer = self
            .camera()?
            .poll_frame()
            .map_err(|e| CameraError::frame_pull(format!("Failed to capture frame: {}", e)))?;
        decode(&buffer)
    }

    #[cfg(feature = "recording")]
    fn finish_recording(&mut self) -> Result<SinkStats, CameraError> {
        let shared = self.sink.take().ok_or_else(|| {
            CameraError::new(FailureKind::RecordingStopFailed, "no recording in progress")
        })?;
        if let Some(camera) = self.camera.as_mut() {
            if let Err(e) = camera.stop_stream() {
                log::warn!("Stream did not stop cleanly before finalize: {}", e);
            }
        }
        self.streaming = false;

        let sink = shared
            .lock()
            .map_err(|_| CameraError::new(FailureKind::RecordingStopFailed, "sink lock poisoned"))?
            .take()
            .ok_or_else(|| CameraError::new(FailureKind::RecordingStopFailed, "sink already closed"))?;
        sink.finish()
    }

    #[cfg(not(feature = "recording"))]
    fn finish_recording(&mut self) -> Result<SinkStats, CameraError> {
        Err(CameraError::new(
            FailureKind::RecordingStopFailed,
            "MP4 recording requires the `recording` feature",
        ))
    }

    fn capture_still(
        &mut self,
        path: &Path,
        width: u32,
        height: u32,
        quality: u8,
    ) -> Result<u64, CameraError> {
        let active = self
            .params
            .clone()
            .ok_or_else(|| CameraError::frame_pull("stream not started"))?;
        if active.mode() == CameraMode::Recording {
            return Err(CameraError::device_busy("frames are going to the recording sink"));
        }

        let frame = if active.resolution() == (width, height) {
            self.capture_frame()?
        } else {
            self.capture_at(&active, width, height)?
        };

        let mut image = imaging::to_rgb_image(&frame)?;
        if image.width() > width || image.height() > height {
            image = image::imageops::resize(
                &image,
                width.min(image.width()),
                height.min(image.height()),
                image::imageops::FilterType::Triangle,
            );
        }
        if (image.width(), image.height()) != (width, height) {
            log::info!(
                "Still saved at {}x{}, the closest the driver offers to {}x{}",
                image.width(),
                image.height(),
                width,
                height
            );
        }
        let jpeg = imaging::encode_jpeg(&image, quality)?;
        std::fs::write(path, &jpeg)?;
        Ok(jpeg.len() as u64)
    }

    fn close(&mut self) {
        if self.sink_open() {
            if let Err(e) = self.finish_recording() {
                log::warn!("Recording discarded on close: {}", e);
            }
        }
        if let Some(mut camera) = self.camera.take() {
            let _ = camera.stop_stream();
        }
        self.streaming = false;
        log::info!("Camera {} closed", self.index);
    }
}

// SAFETY: the nokhwa handle is only touched through `&mut self`, and the
// frame source serializes every call behind its device mutex.
unsafe impl Send for V4lCamera {}
