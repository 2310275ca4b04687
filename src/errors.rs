use std::fmt;

/// Category of a failure, stable across error messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
pub enum FailureKind {
    DeviceInitFailed,
    ModeTransitionInProgress,
    DeviceBusy,
    ReconfigureFailed,
    RecordingStartFailed,
    RecordingStopFailed,
    FramePullFailed,
    FileIoFailed,
    AlreadyRecording,
    NotRecording,
    ConfigInvalid,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::DeviceInitFailed => "device_init_failed",
            FailureKind::ModeTransitionInProgress => "mode_transition_in_progress",
            FailureKind::DeviceBusy => "device_busy",
            FailureKind::ReconfigureFailed => "reconfigure_failed",
            FailureKind::RecordingStartFailed => "recording_start_failed",
            FailureKind::RecordingStopFailed => "recording_stop_failed",
            FailureKind::FramePullFailed => "frame_pull_failed",
            FailureKind::FileIoFailed => "file_io_failed",
            FailureKind::AlreadyRecording => "already_recording",
            FailureKind::NotRecording => "not_recording",
            FailureKind::ConfigInvalid => "config_invalid",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct CameraError {
    pub kind: FailureKind,
    pub message: String,
}

impl CameraError {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn device_init(message: impl Into<String>) -> Self {
        Self::new(FailureKind::DeviceInitFailed, message)
    }

    pub fn transition_in_progress() -> Self {
        Self::new(
            FailureKind::ModeTransitionInProgress,
            "another mode transition is in progress",
        )
    }

    pub fn device_busy(message: impl Into<String>) -> Self {
        Self::new(FailureKind::DeviceBusy, message)
    }

    pub fn reconfigure(message: impl Into<String>) -> Self {
        Self::new(FailureKind::ReconfigureFailed, message)
    }

    pub fn frame_pull(message: impl Into<String>) -> Self {
        Self::new(FailureKind::FramePullFailed, message)
    }

    pub fn file_io(message: impl Into<String>) -> Self {
        Self::new(FailureKind::FileIoFailed, message)
    }

    pub fn already_recording() -> Self {
        Self::new(FailureKind::AlreadyRecording, "already recording")
    }

    pub fn not_recording() -> Self {
        Self::new(FailureKind::NotRecording, "no recording in progress")
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::new(FailureKind::ConfigInvalid, message)
    }

    /// Re-tag an error with a higher-level kind, keeping the cause in the message.
    pub fn escalate(self, kind: FailureKind) -> Self {
        Self {
            kind,
            message: format!("{} ({})", self.message, self.kind),
        }
    }

    pub fn is(&self, kind: FailureKind) -> bool {
        self.kind == kind
    }
}

impl From<std::io::Error> for CameraError {
    fn from(error: std::io::Error) -> Self {
        CameraError::file_io(error.to_string())
    }
}
