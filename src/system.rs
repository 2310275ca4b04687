//! The assembled monitor.
//!
//! `SurveillanceSystem` wires one frame source to the recording controller,
//! the motion monitor and the catalog. It is a cheap handle; the web layer
//! and the binary share clones of it.

use crate::catalog::{Catalog, CleanupReport, FileListing};
use crate::config::SentryConfig;
use crate::errors::CameraError;
use crate::motion::{LoopExit, MonitorSettings, MotionMonitor};
use crate::platform::{self, CaptureDevice};
use crate::recording::{RecordingController, RecordingSession, RecordingSettings, RecordingSummary};
use crate::source::FrameSource;
use crate::stream::LiveStream;
use crate::types::{Artifact, ArtifactKind, CameraMode, ModeParams, DISPLAY_TIME_FORMAT};
use chrono::{DateTime, Local};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Body of `GET /status`.
#[derive(Debug, Clone, Serialize)]
pub struct SystemStatus {
    pub recording: bool,
    pub motion_detection: bool,
    pub motion_detected: bool,
    pub last_motion: Option<String>,
    /// Start time of the monitor.
    pub uptime: String,
    pub uptime_secs: u64,
    pub camera_mode: CameraMode,
    pub current_recording: Option<String>,
}

struct SystemInner {
    config: SentryConfig,
    source: FrameSource,
    controller: RecordingController,
    monitor: MotionMonitor,
    catalog: Catalog,
    started_at: DateTime<Local>,
    started: Instant,
}

#[derive(Clone)]
pub struct SurveillanceSystem {
    inner: Arc<SystemInner>,
}

impl SurveillanceSystem {
    /// Validate `config`, prepare the artifact directories and open the
    /// configured camera backend.
    pub async fn open(config: SentryConfig) -> Result<Self, CameraError> {
        config.validate().map_err(CameraError::config)?;
        let device = platform::open_device(&config)?;
        Self::with_device(config, device).await
    }

    /// Assemble around an already-opened driver.
    pub async fn with_device(
        config: SentryConfig,
        device: Box<dyn CaptureDevice>,
    ) -> Result<Self, CameraError> {
        let catalog = Catalog::from_config(&config);
        catalog.ensure_dirs()?;

        let [width, height] = config.camera.preview_resolution;
        let source = FrameSource::open(device, ModeParams::Preview { width, height }).await?;
        let controller = RecordingController::new(
            source.clone(),
            catalog.clone(),
            RecordingSettings::from(&config),
        );
        let monitor = MotionMonitor::new(
            source.clone(),
            controller.clone(),
            MonitorSettings::from(&config),
        );

        Ok(Self {
            inner: Arc::new(SystemInner {
                config,
                source,
                controller,
                monitor,
                catalog,
                started_at: Local::now(),
                started: Instant::now(),
            }),
        })
    }

    pub fn config(&self) -> &SentryConfig {
        &self.inner.config
    }

    pub fn source(&self) -> &FrameSource {
        &self.inner.source
    }

    pub fn controller(&self) -> &RecordingController {
        &self.inner.controller
    }

    pub fn monitor(&self) -> &MotionMonitor {
        &self.inner.monitor
    }

    pub fn catalog(&self) -> &Catalog {
        &self.inner.catalog
    }

    pub async fn start_recording(
        &self,
        duration: Option<Duration>,
    ) -> Result<RecordingSession, CameraError> {
        self.inner.controller.start(duration).await
    }

    pub async fn stop_recording(&self) -> Result<RecordingSummary, CameraError> {
        self.inner.controller.stop().await
    }

    /// Save one full-resolution still into the photos directory.
    pub async fn take_photo(&self) -> Result<Artifact, CameraError> {
        let path = self.inner.catalog.new_photo_path()?;
        let camera = &self.inner.config.camera;
        let [width, height] = camera.photo_resolution;

        let size_bytes = self
            .inner
            .source
            .capture_still(path.clone(), width, height, camera.jpeg_quality)
            .await
            .map_err(|e| {
                log::warn!("Photo failed: {}", e);
                e
            })?;

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        log::info!("Photo taken: {} ({} bytes)", name, size_bytes);
        Ok(Artifact {
            name,
            path,
            kind: ArtifactKind::Photo,
            created_at: Local::now(),
            size_bytes,
        })
    }

    pub async fn start_motion(&self) -> Result<(), CameraError> {
        self.inner.monitor.start().await
    }

    pub async fn stop_motion(&self) -> Option<LoopExit> {
        self.inner.monitor.stop_and_join().await
    }

    /// Flip motion detection, returning whether it is now active.
    pub async fn toggle_motion(&self) -> Result<bool, CameraError> {
        if self.inner.monitor.is_active() {
            self.stop_motion().await;
        } else {
            self.start_motion().await?;
        }
        Ok(self.inner.monitor.is_active())
    }

    pub fn status(&self) -> SystemStatus {
        let motion = self.inner.monitor.state();
        SystemStatus {
            recording: self.inner.controller.is_recording(),
            motion_detection: self.inner.monitor.is_active(),
            motion_detected: motion.detected,
            last_motion: motion
                .last_detected_at
                .map(|at| at.format(DISPLAY_TIME_FORMAT).to_string()),
            uptime: self.inner.started_at.format(DISPLAY_TIME_FORMAT).to_string(),
            uptime_secs: self.inner.started.elapsed().as_secs(),
            camera_mode: self.inner.source.mode(),
            current_recording: self.inner.controller.current_session().and_then(|s| {
                s.path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
            }),
        }
    }

    pub fn live_stream(&self) -> LiveStream {
        LiveStream::new(
            self.inner.source.clone(),
            self.inner.controller.clone(),
            self.inner.monitor.clone(),
            self.inner.config.server.stream_interval(),
            self.inner.config.camera.jpeg_quality,
        )
    }

    pub fn files(&self) -> Result<FileListing, CameraError> {
        self.inner.catalog.listing()
    }

    /// Delete artifacts older than `storage.cleanup_days`.
    pub fn cleanup(&self) -> Result<CleanupReport, CameraError> {
        let report = self
            .inner
            .catalog
            .cleanup_days(self.inner.config.storage.cleanup_days)?;
        if !report.removed.is_empty() {
            log::info!("Retention cleanup removed {} files", report.removed.len());
        }
        Ok(report)
    }

    /// Stop motion detection and any recording, then release the camera.
    pub async fn shutdown(&self) {
        log::info!("Shutting down surveillance system");
        self.stop_motion().await;
        if let Some(summary) = self.inner.controller.shutdown().await {
            log::info!("Recording {} closed on shutdown", summary.path.display());
        }
        self.inner.source.close().await;
    }
}
