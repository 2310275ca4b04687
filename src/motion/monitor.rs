//! Background motion sampling loop.
//!
//! One tokio task at a time samples the frame source, feeds the detector,
//! publishes [`MotionState`] and starts an auto-stopping recording when motion
//! appears while nothing is recording. Stopping is cooperative: the flag is
//! checked at the top of each cycle.

use super::detector::{DetectorConfig, MotionDetector, MotionState};
use crate::config::SentryConfig;
use crate::errors::{CameraError, FailureKind};
use crate::recording::RecordingController;
use crate::source::FrameSource;
use crate::types::{CameraMode, ModeParams};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Why a sampling loop ended.
#[derive(Debug, Clone, PartialEq)]
pub enum LoopExit {
    /// `stop()` was called.
    Stopped,
    /// Motion sampling mode could not be entered.
    EnterFailed(CameraError),
    /// The device stopped producing frames.
    PullFailed(CameraError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct MonitorSettings {
    pub detector: DetectorConfig,
    pub sampling: ModeParams,
    pub sample_interval: Duration,
    pub auto_record: Duration,
}

impl From<&SentryConfig> for MonitorSettings {
    fn from(config: &SentryConfig) -> Self {
        let [width, height] = config.camera.sampling_resolution;
        Self {
            detector: DetectorConfig::from(&config.motion),
            sampling: ModeParams::MotionSampling { width, height },
            sample_interval: config.motion.sample_interval(),
            auto_record: config.motion.auto_record_duration(),
        }
    }
}

struct MonitorInner {
    source: FrameSource,
    controller: RecordingController,
    settings: MonitorSettings,
    active: AtomicBool,
    state: RwLock<MotionState>,
    triggered: AtomicU64,
    task: Mutex<Option<JoinHandle<LoopExit>>>,
}

impl MonitorInner {
    fn publish(&self, state: &MotionState) {
        match self.state.write() {
            Ok(mut slot) => *slot = state.clone(),
            Err(poisoned) => *poisoned.into_inner() = state.clone(),
        }
    }
}

#[derive(Clone)]
pub struct MotionMonitor {
    inner: Arc<MonitorInner>,
}

impl MotionMonitor {
    pub fn new(
        source: FrameSource,
        controller: RecordingController,
        settings: MonitorSettings,
    ) -> Self {
        Self {
            inner: Arc::new(MonitorInner {
                source,
                controller,
                settings,
                active: AtomicBool::new(false),
                state: RwLock::new(MotionState::default()),
                triggered: AtomicU64::new(0),
                task: Mutex::new(None),
            }),
        }
    }

    /// Start sampling. A no-op when already running.
    ///
    /// Motion sampling mode is entered before the task is spawned, so a
    /// device failure is reported here. While a recording owns the device
    /// the entry is deferred to the loop.
    pub async fn start(&self) -> Result<(), CameraError> {
        let mut task = self.inner.task.lock().await;
        if self.is_active() {
            return Ok(());
        }
        if let Some(previous) = task.take() {
            if let Ok(exit) = previous.await {
                log::debug!("Previous motion loop ended: {:?}", exit);
            }
        }

        if self.inner.source.mode() == CameraMode::Preview {
            match self
                .inner
                .source
                .enter_mode_from(CameraMode::Preview, self.inner.settings.sampling.clone())
                .await
            {
                Ok(()) => {}
                Err(e) if is_transient(&e) => {
                    log::debug!("Deferring motion sampling mode: {}", e);
                }
                Err(e) => {
                    log::error!("Motion detection could not start: {}", e);
                    return Err(e);
                }
            }
        }

        self.inner.active.store(true, Ordering::SeqCst);
        let inner = self.inner.clone();
        *task = Some(tokio::spawn(run_loop(inner)));
        log::info!(
            "Motion detection started (every {} ms)",
            self.inner.settings.sample_interval.as_millis()
        );
        Ok(())
    }

    /// Ask the loop to exit after its current cycle.
    pub fn stop(&self) {
        if self.inner.active.swap(false, Ordering::SeqCst) {
            log::info!("Motion detection stopping");
        }
    }

    /// Wait for the loop task to finish. `None` when no loop was started.
    pub async fn join(&self) -> Option<LoopExit> {
        let handle = self.inner.task.lock().await.take()?;
        match handle.await {
            Ok(exit) => Some(exit),
            Err(e) => {
                log::error!("Motion loop task failed: {}", e);
                None
            }
        }
    }

    pub async fn stop_and_join(&self) -> Option<LoopExit> {
        self.stop();
        self.join().await
    }

    pub fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> MotionState {
        match self.inner.state.read() {
            Ok(state) => state.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Recordings started by this monitor since creation.
    pub fn triggered_recordings(&self) -> u64 {
        self.inner.triggered.load(Ordering::SeqCst)
    }
}

fn is_transient(error: &CameraError) -> bool {
    matches!(
        error.kind,
        FailureKind::ModeTransitionInProgress | FailureKind::DeviceBusy
    )
}

async fn run_loop(inner: Arc<MonitorInner>) -> LoopExit {
    let settings = &inner.settings;
    let mut detector = MotionDetector::new(settings.detector);
    log::debug!(
        "Motion loop running: delta > {}, changed pixels > {}",
        detector.config().delta_threshold,
        detector.config().pixel_threshold
    );

    let exit = loop {
        if !inner.active.load(Ordering::SeqCst) {
            break LoopExit::Stopped;
        }

        match inner.source.mode() {
            CameraMode::Recording => {
                tokio::time::sleep(settings.sample_interval).await;
                continue;
            }
            CameraMode::Preview => {
                match inner
                    .source
                    .enter_mode_from(CameraMode::Preview, settings.sampling.clone())
                    .await
                {
                    Ok(()) => detector.reset(),
                    Err(e) if is_transient(&e) => {
                        log::debug!("Motion sampling re-entry deferred: {}", e);
                        tokio::time::sleep(settings.sample_interval).await;
                        continue;
                    }
                    Err(e) => {
                        log::error!("Motion sampling mode lost: {}", e);
                        break LoopExit::EnterFailed(e);
                    }
                }
            }
            CameraMode::MotionSampling => {}
        }

        match inner.source.capture_frame().await {
            Ok(frame) => {
                let result = detector.observe(&frame);
                inner.publish(detector.state());
                if result.detected {
                    on_motion(&inner, result.changed_pixels).await;
                }
            }
            Err(e) if e.is(FailureKind::DeviceBusy) => {
                log::debug!("Motion sample skipped: {}", e);
            }
            Err(e) => {
                log::error!("Motion detection stopped, frame pull failed: {}", e);
                break LoopExit::PullFailed(e);
            }
        }

        tokio::time::sleep(settings.sample_interval).await;
    };

    inner.active.store(false, Ordering::SeqCst);
    if inner.source.mode() == CameraMode::MotionSampling {
        let preview = inner.source.preview_params().clone();
        if let Err(e) = inner
            .source
            .enter_mode_from(CameraMode::MotionSampling, preview)
            .await
        {
            log::warn!("Motion loop could not hand the device back to preview: {}", e);
        }
    }
    log::info!("Motion detection stopped");
    exit
}

async fn on_motion(inner: &MonitorInner, changed_pixels: u32) {
    if inner.controller.is_recording() {
        log::debug!("Motion ({} px) during active recording", changed_pixels);
        return;
    }

    log::info!("Motion detected ({} changed pixels)", changed_pixels);
    match inner
        .controller
        .start(Some(inner.settings.auto_record))
        .await
    {
        Ok(session) => {
            inner.triggered.fetch_add(1, Ordering::SeqCst);
            log::info!("Motion-triggered recording {}", session.path.display());
        }
        Err(e) if e.is(FailureKind::AlreadyRecording) => {}
        Err(e) => log::warn!("Motion-triggered recording failed: {}", e),
    }
}
