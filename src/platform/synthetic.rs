//! In-memory capture device.
//!
//! `SyntheticCamera` serves a deterministic static scene at the resolution of
//! the active mode, writes a small placeholder file as its recording sink, and
//! encodes real JPEG stills. A [`SyntheticControl`] handle lets tests inject
//! frames and failures, hold a reconfiguration mid-flight, and inspect the
//! order of driver calls.

use super::CaptureDevice;
use crate::errors::{CameraError, FailureKind};
use crate::imaging;
use crate::testing::synthetic_data::static_scene;
use crate::types::{CameraMode, Frame, ModeParams, PixelFormat, SinkStats};
use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// A driver call, as recorded by the synthetic device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceOp {
    Stop,
    Configure(CameraMode),
    Start(CameraMode),
    FinishRecording,
    Still,
    Close,
}

#[derive(Default)]
struct Script {
    frames: VecDeque<Frame>,
    fail_next_pull: Option<String>,
    fail_all_pulls: bool,
    fail_next_configure: Option<FailureKind>,
    fail_next_finish: Option<String>,
    fail_next_still: Option<String>,
    hold_configure: bool,
    configure_blocked: bool,
    ops: Vec<DeviceOp>,
    pulls: u64,
}

struct Shared {
    script: Mutex<Script>,
    cv: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Script> {
        // Script state stays usable even if a test thread panicked mid-update.
        self.script.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Test handle onto a [`SyntheticCamera`].
#[derive(Clone)]
pub struct SyntheticControl {
    shared: Arc<Shared>,
}

impl SyntheticControl {
    /// Queue a frame to be served before any generated ones.
    pub fn push_frame(&self, frame: Frame) {
        self.shared.lock().frames.push_back(frame);
    }

    pub fn push_frames(&self, frames: impl IntoIterator<Item = Frame>) {
        self.shared.lock().frames.extend(frames);
    }

    pub fn queued_frames(&self) -> usize {
        self.shared.lock().frames.len()
    }

    pub fn fail_next_pull(&self, message: impl Into<String>) {
        self.shared.lock().fail_next_pull = Some(message.into());
    }

    pub fn fail_all_pulls(&self, fail: bool) {
        self.shared.lock().fail_all_pulls = fail;
    }

    /// Make the next `configure` call fail with `kind`.
    pub fn fail_next_configure(&self, kind: FailureKind) {
        self.shared.lock().fail_next_configure = Some(kind);
    }

    pub fn fail_next_finish(&self, message: impl Into<String>) {
        self.shared.lock().fail_next_finish = Some(message.into());
    }

    pub fn fail_next_still(&self, message: impl Into<String>) {
        self.shared.lock().fail_next_still = Some(message.into());
    }

    /// Block every `configure` call until [`release_transitions`] is called.
    ///
    /// [`release_transitions`]: SyntheticControl::release_transitions
    pub fn hold_transitions(&self) {
        self.shared.lock().hold_configure = true;
    }

    pub fn release_transitions(&self) {
        self.shared.lock().hold_configure = false;
        self.shared.cv.notify_all();
    }

    /// Wait until some `configure` call is parked on the hold.
    pub fn wait_until_held(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut script = self.shared.lock();
        while !script.configure_blocked {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _) = self
                .shared
                .cv
                .wait_timeout(script, deadline - now)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            script = guard;
        }
        true
    }

    pub fn ops(&self) -> Vec<DeviceOp> {
        self.shared.lock().ops.clone()
    }

    pub fn clear_ops(&self) {
        self.shared.lock().ops.clear();
    }

    /// Number of successful frame pulls.
    pub fn pulls(&self) -> u64 {
        self.shared.lock().pulls
    }
}

struct Sink {
    path: PathBuf,
    writer: BufWriter<File>,
    framerate: u32,
    opened: Instant,
}

pub struct SyntheticCamera {
    shared: Arc<Shared>,
    params: Option<ModeParams>,
    streaming: bool,
    sink: Option<Sink>,
    scene: Option<Frame>,
}

impl SyntheticCamera {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                script: Mutex::new(Script::default()),
                cv: Condvar::new(),
            }),
            params: None,
            streaming: false,
            sink: None,
            scene: None,
        }
    }

    pub fn control(&self) -> SyntheticControl {
        SyntheticControl {
            shared: self.shared.clone(),
        }
    }

    fn mode(&self) -> Option<CameraMode> {
        self.params.as_ref().map(ModeParams::mode)
    }

    fn record(&self, op: DeviceOp) {
        self.shared.lock().ops.push(op);
    }

    fn open_sink(&mut self, path: &Path, framerate: u32) -> Result<(), CameraError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut writer = BufWriter::new(File::create(path)?);
        writeln!(writer, "SENTRYCAM-SYNTHETIC-VIDEO")?;
        self.sink = Some(Sink {
            path: path.to_path_buf(),
            writer,
            framerate,
            opened: Instant::now(),
        });
        Ok(())
    }
}

impl Default for SyntheticCamera {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureDevice for SyntheticCamera {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn stop(&mut self) -> Result<(), CameraError> {
        self.record(DeviceOp::Stop);
        if self.sink.is_some() {
            return Err(CameraError::device_busy(
                "recording sink still open; finish it before stopping",
            ));
        }
        self.streaming = false;
        self.scene = None;
        Ok(())
    }

    fn configure(&mut self, params: &ModeParams) -> Result<(), CameraError> {
        self.record(DeviceOp::Configure(params.mode()));
        if self.streaming {
            return Err(CameraError::device_busy("configure called while streaming"));
        }

        {
            let mut script = self.shared.lock();
            if script.hold_configure {
                script.configure_blocked = true;
                self.shared.cv.notify_all();
                while script.hold_configure {
                    script = self
                        .shared
                        .cv
                        .wait(script)
                        .unwrap_or_else(|poisoned| poisoned.into_inner());
                }
                script.configure_blocked = false;
            }
            if let Some(kind) = script.fail_next_configure.take() {
                return Err(CameraError::new(kind, "injected configure failure"));
            }
        }

        self.params = Some(params.clone());
        Ok(())
    }

    fn start(&mut self) -> Result<(), CameraError> {
        let params = self
            .params
            .clone()
            .ok_or_else(|| CameraError::reconfigure("start before configure"))?;
        self.record(DeviceOp::Start(params.mode()));

        if let ModeParams::Recording {
            path, framerate, ..
        } = &params
        {
            self.open_sink(path, *framerate)?;
        } else {
            let (width, height) = params.resolution();
            self.scene = Some(static_scene(width, height, PixelFormat::Rgb8));
        }
        self.streaming = true;
        Ok(())
    }

    fn capture_frame(&mut self) -> Result<Frame, CameraError> {
        if !self.streaming {
            return Err(CameraError::frame_pull("stream not started"));
        }
        if self.mode() == Some(CameraMode::Recording) {
            return Err(CameraError::device_busy("frames are going to the recording sink"));
        }

        let mut script = self.shared.lock();
        if script.fail_all_pulls {
            return Err(CameraError::frame_pull("injected persistent pull failure"));
        }
        if let Some(message) = script.fail_next_pull.take() {
            return Err(CameraError::frame_pull(message));
        }
        script.pulls += 1;
        if let Some(frame) = script.frames.pop_front() {
            return Ok(frame);
        }
        drop(script);

        let mut frame = self
            .scene
            .clone()
            .ok_or_else(|| CameraError::frame_pull("no scene for current mode"))?;
        frame.captured_at = chrono::Local::now();
        Ok(frame)
    }

    fn finish_recording(&mut self) -> Result<SinkStats, CameraError> {
        self.record(DeviceOp::FinishRecording);
        let mut sink = self
            .sink
            .take()
            .ok_or_else(|| CameraError::new(FailureKind::RecordingStopFailed, "no open sink"))?;

        if let Some(message) = self.shared.lock().fail_next_finish.take() {
            return Err(CameraError::new(FailureKind::RecordingStopFailed, message));
        }

        let frames_written =
            (sink.opened.elapsed().as_secs_f64() * sink.framerate as f64).round() as u64;
        writeln!(sink.writer, "frames={}", frames_written)?;
        sink.writer.flush()?;
        drop(sink.writer);

        let bytes_written = std::fs::metadata(&sink.path)?.len();
        Ok(SinkStats {
            path: sink.path,
            frames_written,
            bytes_written,
        })
    }

    fn capture_still(
        &mut self,
        path: &Path,
        width: u32,
        height: u32,
        quality: u8,
    ) -> Result<u64, CameraError> {
        self.record(DeviceOp::Still);
        if let Some(message) = self.shared.lock().fail_next_still.take() {
            return Err(CameraError::file_io(message));
        }

        let frame = static_scene(width, height, PixelFormat::Rgb8);
        let jpeg = imaging::encode_jpeg(&imaging::to_rgb_image(&frame)?, quality)?;
        std::fs::write(path, &jpeg)?;
        Ok(jpeg.len() as u64)
    }

    fn close(&mut self) {
        self.record(DeviceOp::Close);
        self.sink = None;
        self.streaming = false;
        self.params = None;
    }
}
