//! Frame-difference motion detection.
//!
//! Each observed frame is reduced to a luma plane and compared against the
//! previous one. Pixels whose intensity moved by more than the delta
//! threshold count as changed; motion is reported when the changed count
//! exceeds the pixel threshold. The baseline always slides forward.

use crate::config::MotionConfig;
use crate::imaging;
use crate::types::Frame;
use chrono::{DateTime, Local};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetectorConfig {
    /// Per-pixel intensity change (0-255) that counts as changed.
    pub delta_threshold: u8,
    /// Changed pixels must strictly exceed this to report motion.
    pub pixel_threshold: u32,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            delta_threshold: 30,
            pixel_threshold: 1000,
        }
    }
}

impl From<&MotionConfig> for DetectorConfig {
    fn from(config: &MotionConfig) -> Self {
        Self {
            delta_threshold: config.delta_threshold,
            pixel_threshold: config.pixel_threshold,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetectionResult {
    pub detected: bool,
    pub changed_pixels: u32,
}

impl DetectionResult {
    const NONE: DetectionResult = DetectionResult {
        detected: false,
        changed_pixels: 0,
    };
}

/// Latest detector output, as shown by status and the overlay.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MotionState {
    pub detected: bool,
    pub last_detected_at: Option<DateTime<Local>>,
    pub last_changed_pixels: u32,
    /// Frames observed since the detector was created.
    pub samples: u64,
}

struct Baseline {
    width: u32,
    height: u32,
    luma: Vec<u8>,
}

pub struct MotionDetector {
    config: DetectorConfig,
    baseline: Option<Baseline>,
    state: MotionState,
}

impl MotionDetector {
    pub fn new(config: DetectorConfig) -> Self {
        Self {
            config,
            baseline: None,
            state: MotionState::default(),
        }
    }

    pub fn config(&self) -> DetectorConfig {
        self.config
    }

    pub fn has_baseline(&self) -> bool {
        self.baseline.is_some()
    }

    /// Compare `frame` with the previous one and make it the new baseline.
    ///
    /// The first frame, and any frame whose size differs from the baseline,
    /// only seeds the baseline and reports no motion.
    pub fn observe(&mut self, frame: &Frame) -> DetectionResult {
        let luma = imaging::luma_plane(frame);
        let current = Baseline {
            width: frame.width,
            height: frame.height,
            luma,
        };

        let result = match self.baseline.take() {
            Some(previous)
                if previous.width == current.width
                    && previous.height == current.height
                    && previous.luma.len() == current.luma.len() =>
            {
                let changed_pixels =
                    count_changed(&previous.luma, &current.luma, self.config.delta_threshold);
                DetectionResult {
                    detected: changed_pixels > self.config.pixel_threshold,
                    changed_pixels,
                }
            }
            Some(previous) => {
                log::debug!(
                    "Frame size changed {}x{} -> {}x{}, reseeding baseline",
                    previous.width,
                    previous.height,
                    current.width,
                    current.height
                );
                DetectionResult::NONE
            }
            None => DetectionResult::NONE,
        };
        self.baseline = Some(current);

        self.state.samples += 1;
        self.state.detected = result.detected;
        self.state.last_changed_pixels = result.changed_pixels;
        if result.detected {
            self.state.last_detected_at = Some(frame.captured_at);
        }
        result
    }

    /// Drop the baseline; the next frame reseeds it.
    pub fn reset(&mut self) {
        self.baseline = None;
        self.state.detected = false;
        self.state.last_changed_pixels = 0;
    }

    pub fn state(&self) -> &MotionState {
        &self.state
    }
}

fn count_changed(previous: &[u8], current: &[u8], delta_threshold: u8) -> u32 {
    previous
        .iter()
        .zip(current)
        .filter(|(a, b)| a.abs_diff(**b) > delta_threshold)
        .count() as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{scene_with_block, static_scene, with_changed_pixels};
    use crate::types::PixelFormat;

    fn detector() -> MotionDetector {
        MotionDetector::new(DetectorConfig::default())
    }

    #[test]
    fn test_reset_keeps_thresholds() {
        let config = DetectorConfig {
            delta_threshold: 12,
            pixel_threshold: 40,
        };
        let mut detector = MotionDetector::new(config);
        detector.observe(&static_scene(16, 16, PixelFormat::Rgb8));
        detector.reset();
        assert!(!detector.has_baseline());
        assert_eq!(detector.config(), config);
    }

    #[test]
    fn test_first_frame_only_seeds_baseline() {
        let mut detector = detector();
        let result = detector.observe(&static_scene(64, 48, PixelFormat::Rgb8));
        assert!(!result.detected);
        assert!(detector.has_baseline());
    }

    #[test]
    fn test_identical_frames_report_nothing() {
        let mut detector = detector();
        let frame = static_scene(64, 48, PixelFormat::Rgb8);
        detector.observe(&frame);
        let result = detector.observe(&frame);
        assert_eq!(result.changed_pixels, 0);
        assert!(!result.detected);
    }

    #[test]
    fn test_changed_count_must_exceed_threshold() {
        let base = static_scene(100, 100, PixelFormat::Rgb8);

        let mut detector = detector();
        detector.observe(&base);
        let at = detector.observe(&with_changed_pixels(&base, 1000, 60));
        assert_eq!(at.changed_pixels, 1000);
        assert!(!at.detected);

        let mut detector = MotionDetector::new(DetectorConfig::default());
        detector.observe(&base);
        let over = detector.observe(&with_changed_pixels(&base, 1001, 60));
        assert!(over.detected);
    }

    #[test]
    fn test_delta_at_threshold_is_not_a_change() {
        let base = static_scene(64, 64, PixelFormat::Gray8);
        let mut detector = detector();
        detector.observe(&base);
        let result = detector.observe(&with_changed_pixels(&base, 4096, 30));
        assert_eq!(result.changed_pixels, 0);
    }

    #[test]
    fn test_resolution_change_reseeds() {
        let mut detector = detector();
        detector.observe(&static_scene(64, 48, PixelFormat::Rgb8));
        let result = detector.observe(&scene_with_block(32, 24, 0, 0, 24));
        assert!(!result.detected);
        assert_eq!(result.changed_pixels, 0);
    }

    #[test]
    fn test_last_detected_only_moves_on_detection() {
        let mut detector = MotionDetector::new(DetectorConfig {
            delta_threshold: 30,
            pixel_threshold: 10,
        });
        detector.observe(&scene_with_block(64, 48, 0, 0, 8));
        detector.observe(&scene_with_block(64, 48, 30, 30, 8));
        let detected_at = detector.state().last_detected_at;
        assert!(detected_at.is_some());

        detector.observe(&scene_with_block(64, 48, 30, 30, 8));
        assert!(!detector.state().detected);
        assert_eq!(detector.state().last_detected_at, detected_at);
        assert_eq!(detector.state().samples, 3);
    }

    #[test]
    fn test_reset_drops_baseline() {
        let mut detector = detector();
        detector.observe(&static_scene(64, 48, PixelFormat::Rgb8));
        detector.reset();
        assert!(!detector.has_baseline());
    }
}
