//! Capture device abstraction.
//!
//! A [`CaptureDevice`] is the raw driver surface: it knows how to stop,
//! reconfigure and restart capture, hand out frames, and push frames into a
//! recording sink. It does not arbitrate between consumers; that is the job
//! of [`crate::source::FrameSource`], which is the only caller.

#[cfg(all(feature = "hardware", target_os = "linux"))]
pub mod linux;
pub mod synthetic;

use crate::config::SentryConfig;
use crate::errors::CameraError;
use crate::types::{Frame, ModeParams, SinkStats};
use std::path::Path;

pub use synthetic::{DeviceOp, SyntheticCamera, SyntheticControl};

/// Driver-level operations on one physical camera.
///
/// Calls are blocking and never made concurrently; callers hold the
/// source's device lock.
pub trait CaptureDevice: Send {
    fn name(&self) -> &str;

    /// Stop capture and release buffers held for the current configuration.
    fn stop(&mut self) -> Result<(), CameraError>;

    /// Apply a configuration. Capture must be stopped.
    fn configure(&mut self, params: &ModeParams) -> Result<(), CameraError>;

    /// Start capture with the last applied configuration. For a recording
    /// configuration this opens the output sink and starts pushing frames
    /// into it.
    fn start(&mut self) -> Result<(), CameraError>;

    /// Pull one frame. Only valid in pull modes.
    fn capture_frame(&mut self) -> Result<Frame, CameraError>;

    /// Flush and close the recording sink opened by `start`.
    fn finish_recording(&mut self) -> Result<SinkStats, CameraError>;

    /// Write one JPEG still to `path`, returning the bytes written.
    ///
    /// The still is taken at `width`x`height`, or the closest size the driver
    /// offers, and is never upscaled from a smaller mode. The active
    /// configuration is in place again when this returns.
    fn capture_still(
        &mut self,
        path: &Path,
        width: u32,
        height: u32,
        quality: u8,
    ) -> Result<u64, CameraError>;

    /// Release the device. Further calls may fail.
    fn close(&mut self);
}

/// Open the device named by `camera.backend`.
pub fn open_device(config: &SentryConfig) -> Result<Box<dyn CaptureDevice>, CameraError> {
    match config.camera.backend.as_str() {
        "synthetic" => {
            log::info!("Using synthetic capture device");
            Ok(Box::new(SyntheticCamera::new()))
        }
        "v4l" => open_v4l(config),
        other => Err(CameraError::device_init(format!(
            "Unknown camera backend: {}",
            other
        ))),
    }
}

#[cfg(all(feature = "hardware", target_os = "linux"))]
fn open_v4l(config: &SentryConfig) -> Result<Box<dyn CaptureDevice>, CameraError> {
    let camera = linux::V4lCamera::open(
        config.camera.device_index,
        config.camera.framerate,
        std::time::Duration::from_millis(config.camera.warmup_ms),
    )?;
    Ok(Box::new(camera))
}

#[cfg(not(all(feature = "hardware", target_os = "linux")))]
fn open_v4l(_config: &SentryConfig) -> Result<Box<dyn CaptureDevice>, CameraError> {
    Err(CameraError::device_init(
        "V4L2 backend requires Linux and the `hardware` feature",
    ))
}
