//! Recording lifecycle.
//!
//! One session at a time: `Idle -> Active -> Stopped`, with a short
//! `StoppingAuto` while an auto-stop finalizes. Start and stop both run
//! under the session lock for their whole duration, including the device
//! reconfiguration, so they cannot interleave. Readers never take that lock;
//! they read the last published [`RecorderStatus`] from a watch channel.

use crate::assert_invariant;
use crate::catalog::Catalog;
use crate::config::SentryConfig;
use crate::errors::{CameraError, FailureKind};
use crate::source::FrameSource;
use crate::types::{ModeParams, SinkStats};
use chrono::{DateTime, Local};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{watch, Mutex};

const PREVIEW_RETRY_ATTEMPTS: u32 = 20;
const PREVIEW_RETRY_DELAY: Duration = Duration::from_millis(25);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Active,
    StoppingAuto,
    Stopped,
}

impl SessionState {
    /// Whether a new session may start from this state.
    pub fn accepts_start(&self) -> bool {
        matches!(self, SessionState::Idle | SessionState::Stopped)
    }

    pub fn is_recording(&self) -> bool {
        matches!(self, SessionState::Active | SessionState::StoppingAuto)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Manual,
    AutoStop,
    Shutdown,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordingSession {
    pub id: u64,
    pub started_at: DateTime<Local>,
    pub path: PathBuf,
    pub planned_duration: Option<Duration>,
    pub state: SessionState,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordingSummary {
    pub session_id: u64,
    pub path: PathBuf,
    pub reason: StopReason,
    pub elapsed: Duration,
    pub frames_written: u64,
    pub bytes_written: u64,
}

/// Snapshot published after every state change.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecorderStatus {
    pub state: SessionState,
    pub session: Option<RecordingSession>,
}

impl Default for RecorderStatus {
    fn default() -> Self {
        Self {
            state: SessionState::Idle,
            session: None,
        }
    }
}

/// Encoder settings applied to every session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordingSettings {
    pub width: u32,
    pub height: u32,
    pub framerate: u32,
    pub bitrate: u32,
}

impl From<&SentryConfig> for RecordingSettings {
    fn from(config: &SentryConfig) -> Self {
        Self {
            width: config.camera.video_resolution[0],
            height: config.camera.video_resolution[1],
            framerate: config.camera.framerate,
            bitrate: config.recording.bitrate,
        }
    }
}

struct ControllerInner {
    source: FrameSource,
    catalog: Catalog,
    settings: RecordingSettings,
    session: Mutex<Option<RecordingSession>>,
    status: watch::Sender<RecorderStatus>,
    next_id: AtomicU64,
}

impl ControllerInner {
    fn publish(&self, session: Option<&RecordingSession>) {
        let status = match session {
            Some(session) => RecorderStatus {
                state: session.state,
                session: Some(session.clone()),
            },
            None => RecorderStatus::default(),
        };
        self.status.send_replace(status);
    }
}

#[derive(Clone)]
pub struct RecordingController {
    inner: Arc<ControllerInner>,
}

impl RecordingController {
    pub fn new(source: FrameSource, catalog: Catalog, settings: RecordingSettings) -> Self {
        let (status, _) = watch::channel(RecorderStatus::default());
        Self {
            inner: Arc::new(ControllerInner {
                source,
                catalog,
                settings,
                session: Mutex::new(None),
                status,
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Begin a session. With `duration`, an auto-stop fires after it unless
    /// the session has already ended.
    pub async fn start(&self, duration: Option<Duration>) -> Result<RecordingSession, CameraError> {
        let mut slot = self.inner.session.lock().await;
        let previous = slot.as_ref().map(|s| s.state).unwrap_or(SessionState::Idle);
        if !previous.accepts_start() {
            log::warn!("Start rejected: already recording");
            return Err(CameraError::already_recording());
        }

        let path = self
            .inner
            .catalog
            .new_video_path()
            .map_err(|e| e.escalate(FailureKind::RecordingStartFailed))?;
        let settings = self.inner.settings;
        let params = ModeParams::Recording {
            path: path.clone(),
            width: settings.width,
            height: settings.height,
            framerate: settings.framerate,
            bitrate: settings.bitrate,
        };

        if let Err(e) = self.inner.source.enter_mode(params).await {
            log::error!("Failed to start recording: {}", e);
            return Err(e.escalate(FailureKind::RecordingStartFailed));
        }

        let session = RecordingSession {
            id: self.inner.next_id.fetch_add(1, Ordering::SeqCst),
            started_at: Local::now(),
            path,
            planned_duration: duration,
            state: SessionState::Active,
        };
        assert_invariant!(
            previous.accepts_start() && session.state == SessionState::Active,
            "recording starts only from Idle or Stopped",
            "recording::controller"
        );
        *slot = Some(session.clone());
        self.inner.publish(slot.as_ref());
        drop(slot);

        match duration {
            Some(after) => {
                log::info!(
                    "Recording started: {} (auto-stop in {}s)",
                    session.path.display(),
                    after.as_secs()
                );
                self.spawn_auto_stop(session.id, after);
            }
            None => log::info!("Recording started: {}", session.path.display()),
        }
        Ok(session)
    }

    /// Stop the active session. `NotRecording` when there is none.
    pub async fn stop(&self) -> Result<RecordingSummary, CameraError> {
        self.finish_session(None, StopReason::Manual).await
    }

    /// Stop whatever is recording, for process exit. Idle is fine.
    pub async fn shutdown(&self) -> Option<RecordingSummary> {
        match self.finish_session(None, StopReason::Shutdown).await {
            Ok(summary) => Some(summary),
            Err(e) if e.is(FailureKind::NotRecording) => None,
            Err(e) => {
                log::error!("Recording did not finalize cleanly on shutdown: {}", e);
                None
            }
        }
    }

    pub fn state(&self) -> SessionState {
        self.inner.status.borrow().state
    }

    pub fn is_recording(&self) -> bool {
        self.state().is_recording()
    }

    pub fn status(&self) -> RecorderStatus {
        self.inner.status.borrow().clone()
    }

    pub fn current_session(&self) -> Option<RecordingSession> {
        self.inner
            .status
            .borrow()
            .session
            .clone()
            .filter(|s| s.state.is_recording())
    }

    pub fn subscribe(&self) -> watch::Receiver<RecorderStatus> {
        self.inner.status.subscribe()
    }

    fn spawn_auto_stop(&self, session_id: u64, after: Duration) {
        let weak: Weak<ControllerInner> = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let controller = RecordingController { inner };
            match controller
                .finish_session(Some(session_id), StopReason::AutoStop)
                .await
            {
                Ok(_) => {}
                Err(e) if e.is(FailureKind::NotRecording) => {
                    log::debug!("Auto-stop for session {} found nothing to stop", session_id);
                }
                Err(e) => log::error!("Auto-stop of session {} failed: {}", session_id, e),
            }
        });
    }

    /// Guarded stop. With `expected_id`, only that session is stopped.
    async fn finish_session(
        &self,
        expected_id: Option<u64>,
        reason: StopReason,
    ) -> Result<RecordingSummary, CameraError> {
        let mut slot = self.inner.session.lock().await;
        let session = match slot.as_mut() {
            Some(session)
                if session.state == SessionState::Active
                    && expected_id.map_or(true, |id| id == session.id) =>
            {
                session
            }
            _ => return Err(CameraError::not_recording()),
        };

        if reason == StopReason::AutoStop {
            session.state = SessionState::StoppingAuto;
            self.inner.status.send_replace(RecorderStatus {
                state: session.state,
                session: Some(session.clone()),
            });
        }

        let finalized = self.inner.source.finish_recording().await;

        assert_invariant!(
            session.state.is_recording(),
            "recording stops only from Active",
            "recording::controller"
        );
        session.state = SessionState::Stopped;
        let session = session.clone();
        self.inner.publish(slot.as_ref());

        self.return_to_preview().await;
        drop(slot);

        let elapsed = (Local::now() - session.started_at)
            .to_std()
            .unwrap_or_default();
        let SinkStats {
            frames_written,
            bytes_written,
            ..
        } = finalized.map_err(|e| {
            log::error!("Recording {} did not finalize: {}", session.path.display(), e);
            e
        })?;

        log::info!(
            "Recording stopped ({:?}): {} after {:.1}s, {} bytes",
            reason,
            session.path.display(),
            elapsed.as_secs_f64(),
            bytes_written
        );
        Ok(RecordingSummary {
            session_id: session.id,
            path: session.path,
            reason,
            elapsed,
            frames_written,
            bytes_written,
        })
    }

    /// A motion loop may be mid-transition when a recording ends; wait it out.
    async fn return_to_preview(&self) {
        for _ in 0..PREVIEW_RETRY_ATTEMPTS {
            match self.inner.source.exit_to_preview().await {
                Ok(()) => return,
                Err(e) if e.is(FailureKind::ModeTransitionInProgress) => {
                    tokio::time::sleep(PREVIEW_RETRY_DELAY).await;
                }
                Err(e) => {
                    log::error!("Could not return to preview after recording: {}", e);
                    return;
                }
            }
        }
        log::error!("Gave up returning to preview: transitions kept colliding");
    }
}
