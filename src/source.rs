//! Camera mode arbitration.
//!
//! `FrameSource` owns the single [`CaptureDevice`] and is the only way to
//! reach it. Three consumers share it: the live stream and the motion loop
//! pull frames, the recording controller takes the device over exclusively.
//!
//! Two locks are involved. The device mutex serializes every driver call, so
//! a pull can never interleave with a reconfiguration. The transition flag is
//! taken *before* the device mutex and is never waited on: a second
//! `enter_mode` while one is in flight fails immediately with
//! `ModeTransitionInProgress`.
//!
//! Every driver call runs on the blocking pool.

use crate::assert_invariant;
use crate::errors::{CameraError, FailureKind};
use crate::platform::CaptureDevice;
use crate::types::{CameraMode, Frame, ModeParams, SinkStats};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

struct DeviceSlot {
    driver: Box<dyn CaptureDevice>,
    sink_open: bool,
    closed: bool,
}

struct Inner {
    device: Mutex<DeviceSlot>,
    mode: AtomicU8,
    transitioning: AtomicBool,
    sequence: AtomicU64,
    preview: ModeParams,
}

impl Inner {
    fn set_mode(&self, mode: CameraMode) {
        self.mode.store(encode_mode(mode), Ordering::SeqCst);
    }

    fn mode(&self) -> CameraMode {
        decode_mode(self.mode.load(Ordering::SeqCst))
    }
}

fn encode_mode(mode: CameraMode) -> u8 {
    match mode {
        CameraMode::Preview => 0,
        CameraMode::Recording => 1,
        CameraMode::MotionSampling => 2,
    }
}

fn decode_mode(raw: u8) -> CameraMode {
    match raw {
        1 => CameraMode::Recording,
        2 => CameraMode::MotionSampling,
        _ => CameraMode::Preview,
    }
}

/// Clears the transition flag when the reconfiguration finishes, including
/// when the blocking task unwinds.
struct TransitionGuard {
    inner: Arc<Inner>,
}

impl TransitionGuard {
    fn acquire(inner: &Arc<Inner>) -> Result<Self, CameraError> {
        inner
            .transitioning
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| CameraError::transition_in_progress())?;
        Ok(Self {
            inner: inner.clone(),
        })
    }
}

impl Drop for TransitionGuard {
    fn drop(&mut self) {
        self.inner.transitioning.store(false, Ordering::SeqCst);
    }
}

/// Shared handle to the capture device. Clones refer to the same device.
#[derive(Clone)]
pub struct FrameSource {
    inner: Arc<Inner>,
}

impl FrameSource {
    /// Take ownership of `driver` and start it in Preview with `preview`.
    pub async fn open(
        driver: Box<dyn CaptureDevice>,
        preview: ModeParams,
    ) -> Result<Self, CameraError> {
        if preview.mode() != CameraMode::Preview {
            return Err(CameraError::device_init(format!(
                "Idle mode must be preview, got {}",
                preview.mode().as_str()
            )));
        }

        let name = driver.name().to_string();
        let inner = Arc::new(Inner {
            device: Mutex::new(DeviceSlot {
                driver,
                sink_open: false,
                closed: false,
            }),
            mode: AtomicU8::new(encode_mode(CameraMode::Preview)),
            transitioning: AtomicBool::new(false),
            sequence: AtomicU64::new(0),
            preview,
        });

        let task_inner = inner.clone();
        tokio::task::spawn_blocking(move || {
            let mut slot = lock_device(&task_inner, FailureKind::DeviceInitFailed)?;
            slot.driver
                .configure(&task_inner.preview)
                .and_then(|_| slot.driver.start())
                .map_err(|e| e.escalate(FailureKind::DeviceInitFailed))
        })
        .await
        .map_err(|e| CameraError::device_init(format!("Device task failed: {}", e)))??;

        log::info!("Opened capture device '{}' in preview", name);
        Ok(Self { inner })
    }

    /// Lock-free view of the active mode.
    pub fn mode(&self) -> CameraMode {
        self.inner.mode()
    }

    pub fn is_transitioning(&self) -> bool {
        self.inner.transitioning.load(Ordering::SeqCst)
    }

    pub fn preview_params(&self) -> &ModeParams {
        &self.inner.preview
    }

    /// Exclusively reconfigure the device into `params`.
    ///
    /// The previous mode is torn down completely (open sink finalized,
    /// capture stopped) before the new configuration is applied. If the
    /// apply fails the device falls back to Preview.
    pub async fn enter_mode(&self, params: ModeParams) -> Result<(), CameraError> {
        self.transition(None, params).await
    }

    /// Like [`enter_mode`](Self::enter_mode), but only when the device is
    /// still in `expected` once the device lock is held. Otherwise fails with
    /// `DeviceBusy` and leaves the device untouched. Background consumers use
    /// this so they never tear down a mode someone else just entered.
    pub async fn enter_mode_from(
        &self,
        expected: CameraMode,
        params: ModeParams,
    ) -> Result<(), CameraError> {
        self.transition(Some(expected), params).await
    }

    async fn transition(
        &self,
        expected: Option<CameraMode>,
        params: ModeParams,
    ) -> Result<(), CameraError> {
        let guard = TransitionGuard::acquire(&self.inner)?;
        let inner = self.inner.clone();

        tokio::task::spawn_blocking(move || {
            let _guard = guard;
            transition(&inner, expected, &params)
        })
        .await
        .map_err(|e| CameraError::reconfigure(format!("Transition task failed: {}", e)))?
    }

    /// Return to Preview. A no-op when already there.
    pub async fn exit_to_preview(&self) -> Result<(), CameraError> {
        if self.mode() == CameraMode::Preview && !self.is_transitioning() {
            return Ok(());
        }
        self.enter_mode(self.inner.preview.clone()).await
    }

    /// Pull one frame. Rejected with `DeviceBusy` during Recording or while a
    /// transition is in flight.
    pub async fn capture_frame(&self) -> Result<Frame, CameraError> {
        if self.is_transitioning() {
            return Err(CameraError::device_busy("mode transition in progress"));
        }
        let inner = self.inner.clone();

        tokio::task::spawn_blocking(move || {
            let mut slot = lock_device(&inner, FailureKind::FramePullFailed)?;
            if slot.closed {
                return Err(CameraError::frame_pull("device closed"));
            }
            let mode = inner.mode();
            if !mode.permits_pull() {
                return Err(CameraError::device_busy(format!(
                    "frame pull not allowed in {} mode",
                    mode.as_str()
                )));
            }

            let frame = slot.driver.capture_frame().map_err(|e| match e.kind {
                FailureKind::DeviceBusy | FailureKind::FramePullFailed => e,
                _ => e.escalate(FailureKind::FramePullFailed),
            })?;
            let sequence = inner.sequence.fetch_add(1, Ordering::SeqCst);
            log::debug!("Pulled frame #{} ({}x{})", sequence, frame.width, frame.height);
            Ok(frame.with_sequence(sequence))
        })
        .await
        .map_err(|e| CameraError::frame_pull(format!("Capture task failed: {}", e)))?
    }

    /// Write one still to `path`. Allowed in the pull modes only.
    pub async fn capture_still(
        &self,
        path: PathBuf,
        width: u32,
        height: u32,
        quality: u8,
    ) -> Result<u64, CameraError> {
        if self.is_transitioning() {
            return Err(CameraError::device_busy("mode transition in progress"));
        }
        let inner = self.inner.clone();

        tokio::task::spawn_blocking(move || {
            let mut slot = lock_device(&inner, FailureKind::FileIoFailed)?;
            if slot.closed {
                return Err(CameraError::device_busy("device closed"));
            }
            if inner.mode() == CameraMode::Recording {
                return Err(CameraError::device_busy("camera is recording"));
            }
            slot.driver.capture_still(&path, width, height, quality)
        })
        .await
        .map_err(|e| CameraError::file_io(format!("Still task failed: {}", e)))?
    }

    /// Finalize the recording sink while the device is still in Recording.
    pub async fn finish_recording(&self) -> Result<SinkStats, CameraError> {
        let inner = self.inner.clone();

        tokio::task::spawn_blocking(move || {
            let mut slot = lock_device(&inner, FailureKind::RecordingStopFailed)?;
            if inner.mode() != CameraMode::Recording || !slot.sink_open {
                return Err(CameraError::new(
                    FailureKind::RecordingStopFailed,
                    "no recording sink is open",
                ));
            }
            slot.sink_open = false;
            slot.driver.finish_recording().map_err(|e| match e.kind {
                FailureKind::RecordingStopFailed => e,
                _ => e.escalate(FailureKind::RecordingStopFailed),
            })
        })
        .await
        .map_err(|e| {
            CameraError::new(
                FailureKind::RecordingStopFailed,
                format!("Finalize task failed: {}", e),
            )
        })?
    }

    /// Release the device. Later pulls fail with `FramePullFailed`.
    pub async fn close(&self) {
        let inner = self.inner.clone();
        let result = tokio::task::spawn_blocking(move || {
            let mut slot = lock_device(&inner, FailureKind::ReconfigureFailed)?;
            if slot.closed {
                return Ok(());
            }
            if slot.sink_open {
                if let Err(e) = slot.driver.finish_recording() {
                    log::warn!("Discarding recording sink on close: {}", e);
                }
                slot.sink_open = false;
            }
            slot.driver.close();
            slot.closed = true;
            inner.set_mode(CameraMode::Preview);
            Ok::<_, CameraError>(())
        })
        .await;

        match result {
            Ok(Ok(())) => log::info!("Capture device released"),
            Ok(Err(e)) => log::error!("Failed to release capture device: {}", e),
            Err(e) => log::error!("Device release task failed: {}", e),
        }
    }
}

/// A poisoned lock means a driver call panicked mid-operation; the device
/// state is unknown from then on, so callers get `kind` rather than a
/// retryable `DeviceBusy`.
fn lock_device(
    inner: &Inner,
    kind: FailureKind,
) -> Result<std::sync::MutexGuard<'_, DeviceSlot>, CameraError> {
    inner.device.lock().map_err(|_| {
        log::error!("Capture device lock poisoned by an earlier driver panic");
        CameraError::new(kind, "device lock poisoned")
    })
}

/// Runs on the blocking pool with the transition flag held.
fn transition(
    inner: &Inner,
    expected: Option<CameraMode>,
    params: &ModeParams,
) -> Result<(), CameraError> {
    let mut slot = lock_device(inner, FailureKind::ReconfigureFailed)?;
    if slot.closed {
        return Err(CameraError::reconfigure("device closed"));
    }

    let from = inner.mode();
    let to = params.mode();
    if let Some(expected) = expected {
        if from != expected {
            return Err(CameraError::device_busy(format!(
                "expected {} mode, device is in {}",
                expected.as_str(),
                from.as_str()
            )));
        }
    }

    if slot.sink_open {
        slot.sink_open = false;
        match slot.driver.finish_recording() {
            Ok(stats) => log::warn!(
                "Finalized open recording {} during switch to {}",
                stats.path.display(),
                to.as_str()
            ),
            Err(e) => log::error!("Failed to finalize recording during teardown: {}", e),
        }
    }

    slot.driver.stop().map_err(|e| match e.kind {
        FailureKind::DeviceBusy => e,
        _ => e.escalate(FailureKind::DeviceBusy),
    })?;

    let applied = slot
        .driver
        .configure(params)
        .and_then(|_| slot.driver.start());

    match applied {
        Ok(()) => {
            slot.sink_open = to == CameraMode::Recording;
            inner.set_mode(to);
            assert_invariant!(
                inner.mode() == to && slot.sink_open == (to == CameraMode::Recording),
                "sink is open exactly while recording",
                "source::transition"
            );
            log::info!("Camera mode {} -> {}", from.as_str(), to.as_str());
            Ok(())
        }
        Err(e) => {
            log::error!("Failed to enter {} mode: {}", to.as_str(), e);
            fall_back_to_preview(inner, &mut slot);
            Err(match e.kind {
                FailureKind::DeviceBusy | FailureKind::ReconfigureFailed => e,
                _ => e.escalate(FailureKind::ReconfigureFailed),
            })
        }
    }
}

fn fall_back_to_preview(inner: &Inner, slot: &mut DeviceSlot) {
    slot.sink_open = false;
    if let Err(e) = slot.driver.stop() {
        log::debug!("Stop before fallback reported: {}", e);
    }
    let restored = slot
        .driver
        .configure(&inner.preview)
        .and_then(|_| slot.driver.start());
    inner.set_mode(CameraMode::Preview);
    match restored {
        Ok(()) => log::warn!("Camera fell back to preview"),
        Err(e) => log::error!("Preview fallback failed, device is stopped: {}", e),
    }
}
