//! Testing utilities for SentryCam
//!
//! Deterministic frame generators and a scriptable in-memory camera, so the
//! recording and motion logic can be exercised without hardware.

pub mod synthetic_data;

pub use crate::platform::synthetic::{DeviceOp, SyntheticCamera, SyntheticControl};
pub use synthetic_data::{
    scene_with_block, sequence_frame, static_scene, with_changed_pixels,
};

use crate::config::SentryConfig;
use std::path::Path;

/// Configuration for tests: synthetic backend, small frames, fast loops,
/// artifacts under `base_dir`.
pub fn test_config(base_dir: &Path) -> SentryConfig {
    let mut config = SentryConfig::default();
    config.camera.backend = "synthetic".to_string();
    config.camera.preview_resolution = [64, 48];
    config.camera.sampling_resolution = [64, 48];
    config.camera.video_resolution = [128, 96];
    config.camera.photo_resolution = [128, 96];
    config.camera.warmup_ms = 0;
    config.motion.pixel_threshold = 100;
    config.motion.sample_interval_ms = 20;
    config.storage.base_dir = base_dir.to_path_buf();
    config.server.stream_interval_ms = 10;
    config
}
