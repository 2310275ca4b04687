//! SentryCam: a single-camera surveillance monitor.
//!
//! One physical camera is shared by three consumers that cannot run at the
//! same time on the device: the live MJPEG stream, video recording and the
//! motion-sampling loop. [`source::FrameSource`] arbitrates between them,
//! [`recording::RecordingController`] owns the recording lifecycle and
//! [`motion::MotionMonitor`] turns frame differences into auto-stopping
//! recordings. [`system::SurveillanceSystem`] assembles everything and
//! [`web`] exposes it as a small HTTP control panel.
//!
//! # Usage
//! ```rust,ignore
//! let config = sentrycam::config::SentryConfig::load("sentrycam.toml")?;
//! let system = sentrycam::SurveillanceSystem::open(config).await?;
//! system.start_motion().await?;
//! sentrycam::web::serve(system.clone(), "0.0.0.0:5000", shutdown).await?;
//! ```
//!
//! Without hardware, set `camera.backend = "synthetic"` to run against the
//! in-memory camera from [`testing`].

pub mod catalog;
pub mod config;
pub mod errors;
pub mod imaging;
pub mod invariants;
pub mod motion;
pub mod overlay;
pub mod platform;
pub mod recording;
pub mod source;
pub mod stream;
pub mod system;
pub mod types;
pub mod web;

// Synthetic camera and frame generators, also used by integration tests
pub mod testing;

pub use config::SentryConfig;
pub use errors::{CameraError, FailureKind};
pub use source::FrameSource;
pub use system::{SurveillanceSystem, SystemStatus};
pub use types::{Artifact, ArtifactKind, CameraMode, Frame, ModeParams, PixelFormat};

/// Initialize logging: `sentrycam=info` unless `RUST_LOG` says otherwise.
pub fn init_logging() {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "sentrycam=info");
    }
    let _ = env_logger::try_init();
}

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");

/// Camera backends compiled into this build.
pub fn available_backends() -> Vec<&'static str> {
    let mut backends = vec!["synthetic"];
    if cfg!(all(feature = "hardware", target_os = "linux")) {
        backends.push("v4l");
    }
    backends
}

pub fn get_info() -> CrateInfo {
    CrateInfo {
        name: NAME.to_string(),
        version: VERSION.to_string(),
        description: DESCRIPTION.to_string(),
        backends: available_backends(),
        mp4_recording: cfg!(feature = "recording"),
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct CrateInfo {
    pub name: String,
    pub version: String,
    pub description: String,
    pub backends: Vec<&'static str>,
    pub mp4_recording: bool,
}
