//! Video recording.
//!
//! [`RecordingController`] owns the session lifecycle and drives the frame
//! source into and out of Recording mode. With the `recording` feature the
//! hardware adapter writes H.264 (openh264) muxed into MP4 (muxide) through
//! [`Mp4Sink`].

mod controller;
#[cfg(feature = "recording")]
mod encoder;
#[cfg(feature = "recording")]
mod mp4;

pub use controller::{
    RecorderStatus, RecordingController, RecordingSession, RecordingSettings, RecordingSummary,
    SessionState, StopReason,
};
#[cfg(feature = "recording")]
pub use encoder::{EncodedFrame, H264Encoder};
#[cfg(feature = "recording")]
pub use mp4::Mp4Sink;
