//! Motion detection: the frame-difference detector and the sampling loop
//! that turns detections into recordings.

mod detector;
mod monitor;

pub use detector::{DetectionResult, DetectorConfig, MotionDetector, MotionState};
pub use monitor::{LoopExit, MonitorSettings, MotionMonitor};
