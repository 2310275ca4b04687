//! Frame source arbitration: exclusivity, teardown order and fallback.

use sentrycam::errors::{CameraError, FailureKind};
use sentrycam::motion::LoopExit;
use sentrycam::platform::CaptureDevice;
use sentrycam::testing::{test_config, DeviceOp, SyntheticCamera, SyntheticControl};
use sentrycam::types::{CameraMode, Frame, ModeParams, SinkStats};
use sentrycam::{FrameSource, SurveillanceSystem};
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;

fn preview() -> ModeParams {
    ModeParams::Preview {
        width: 64,
        height: 48,
    }
}

fn sampling() -> ModeParams {
    ModeParams::MotionSampling {
        width: 32,
        height: 24,
    }
}

fn recording(dir: &Path) -> ModeParams {
    ModeParams::Recording {
        path: dir.join("video_test.mp4"),
        width: 128,
        height: 96,
        framerate: 30,
        bitrate: 1_000_000,
    }
}

async fn open() -> (FrameSource, SyntheticControl) {
    let camera = SyntheticCamera::new();
    let control = camera.control();
    let source = FrameSource::open(Box::new(camera), preview()).await.unwrap();
    control.clear_ops();
    (source, control)
}

#[tokio::test]
async fn test_second_transition_rejected_while_first_in_flight() {
    let dir = TempDir::new().unwrap();
    let (source, control) = open().await;
    control.hold_transitions();

    let first = {
        let source = source.clone();
        let params = recording(dir.path());
        tokio::spawn(async move { source.enter_mode(params).await })
    };

    let waiter = control.clone();
    let held = tokio::task::spawn_blocking(move || waiter.wait_until_held(Duration::from_secs(5)))
        .await
        .unwrap();
    assert!(held, "first transition never reached configure");
    assert!(source.is_transitioning());

    let err = source.enter_mode(sampling()).await.unwrap_err();
    assert!(err.is(FailureKind::ModeTransitionInProgress));

    let err = source.capture_frame().await.unwrap_err();
    assert!(err.is(FailureKind::DeviceBusy));

    control.release_transitions();
    first.await.unwrap().unwrap();
    assert!(!source.is_transitioning());
    assert_eq!(source.mode(), CameraMode::Recording);
}

#[tokio::test]
async fn test_teardown_finalizes_sink_before_reconfiguring() {
    let dir = TempDir::new().unwrap();
    let (source, control) = open().await;

    source.enter_mode(recording(dir.path())).await.unwrap();
    control.clear_ops();
    source.enter_mode(sampling()).await.unwrap();

    assert_eq!(
        control.ops(),
        vec![
            DeviceOp::FinishRecording,
            DeviceOp::Stop,
            DeviceOp::Configure(CameraMode::MotionSampling),
            DeviceOp::Start(CameraMode::MotionSampling),
        ]
    );
    assert!(dir.path().join("video_test.mp4").exists());
}

#[tokio::test]
async fn test_pulls_refused_during_recording() {
    let dir = TempDir::new().unwrap();
    let (source, _) = open().await;
    source.enter_mode(recording(dir.path())).await.unwrap();

    let err = source.capture_frame().await.unwrap_err();
    assert!(err.is(FailureKind::DeviceBusy));

    let still = dir.path().join("still.jpg");
    let err = source.capture_still(still.clone(), 64, 48, 80).await.unwrap_err();
    assert!(err.is(FailureKind::DeviceBusy));
    assert!(!still.exists());
}

#[tokio::test]
async fn test_failed_apply_falls_back_to_preview() {
    let (source, control) = open().await;
    source.enter_mode(sampling()).await.unwrap();

    control.fail_next_configure(FailureKind::DeviceBusy);
    let err = source.enter_mode(preview()).await.unwrap_err();
    assert!(err.is(FailureKind::DeviceBusy));
    assert_eq!(source.mode(), CameraMode::Preview);
    assert!(source.capture_frame().await.is_ok());
}

#[tokio::test]
async fn test_driver_errors_surface_as_reconfigure_failed() {
    let (source, control) = open().await;
    control.fail_next_configure(FailureKind::FileIoFailed);
    let err = source.enter_mode(sampling()).await.unwrap_err();
    assert!(err.is(FailureKind::ReconfigureFailed));
    assert_eq!(source.mode(), CameraMode::Preview);
}

#[tokio::test]
async fn test_finish_outside_recording_fails() {
    let (source, _) = open().await;
    let err = source.finish_recording().await.unwrap_err();
    assert!(err.is(FailureKind::RecordingStopFailed));
}

#[tokio::test]
async fn test_finish_reports_sink_stats() {
    let dir = TempDir::new().unwrap();
    let (source, _) = open().await;
    source.enter_mode(recording(dir.path())).await.unwrap();

    let stats = source.finish_recording().await.unwrap();
    assert_eq!(stats.path, dir.path().join("video_test.mp4"));
    assert!(stats.bytes_written > 0);

    source.exit_to_preview().await.unwrap();
    assert_eq!(source.mode(), CameraMode::Preview);
}

#[tokio::test]
async fn test_pull_failures_are_frame_pull_failed() {
    let (source, control) = open().await;
    control.fail_next_pull("sensor unplugged");
    let err = source.capture_frame().await.unwrap_err();
    assert!(err.is(FailureKind::FramePullFailed));
    assert!(source.capture_frame().await.is_ok());
}

#[tokio::test]
async fn test_still_written_in_sampling_mode() {
    let dir = TempDir::new().unwrap();
    let (source, _) = open().await;
    source.enter_mode(sampling()).await.unwrap();

    let path = dir.path().join("still.jpg");
    let bytes = source.capture_still(path.clone(), 128, 96, 85).await.unwrap();
    assert_eq!(std::fs::metadata(&path).unwrap().len(), bytes);
    assert_eq!(image::image_dimensions(&path).unwrap(), (128, 96));
    assert_eq!(source.mode(), CameraMode::MotionSampling);

    let frame = source.capture_frame().await.unwrap();
    assert_eq!((frame.width, frame.height), (32, 24));
}

/// Delegates to a synthetic camera but panics inside its first pull.
struct PanicOnFirstPull {
    inner: SyntheticCamera,
    panicked: bool,
}

impl PanicOnFirstPull {
    fn new() -> Self {
        Self {
            inner: SyntheticCamera::new(),
            panicked: false,
        }
    }
}

impl CaptureDevice for PanicOnFirstPull {
    fn name(&self) -> &str {
        "panic-on-first-pull"
    }

    fn stop(&mut self) -> Result<(), CameraError> {
        self.inner.stop()
    }

    fn configure(&mut self, params: &ModeParams) -> Result<(), CameraError> {
        self.inner.configure(params)
    }

    fn start(&mut self) -> Result<(), CameraError> {
        self.inner.start()
    }

    fn capture_frame(&mut self) -> Result<Frame, CameraError> {
        if !self.panicked {
            self.panicked = true;
            panic!("driver fault during pull");
        }
        self.inner.capture_frame()
    }

    fn finish_recording(&mut self) -> Result<SinkStats, CameraError> {
        self.inner.finish_recording()
    }

    fn capture_still(
        &mut self,
        path: &Path,
        width: u32,
        height: u32,
        quality: u8,
    ) -> Result<u64, CameraError> {
        self.inner.capture_still(path, width, height, quality)
    }

    fn close(&mut self) {
        self.inner.close()
    }
}

#[tokio::test]
async fn test_driver_panic_leaves_device_failed_not_busy() {
    let dir = TempDir::new().unwrap();
    let source = FrameSource::open(Box::new(PanicOnFirstPull::new()), preview())
        .await
        .unwrap();

    let first = source.capture_frame().await.unwrap_err();
    assert!(first.is(FailureKind::FramePullFailed));

    let second = source.capture_frame().await.unwrap_err();
    assert!(second.is(FailureKind::FramePullFailed), "{:?}", second);

    let err = source.enter_mode(sampling()).await.unwrap_err();
    assert!(err.is(FailureKind::ReconfigureFailed), "{:?}", err);

    let err = source
        .capture_still(dir.path().join("still.jpg"), 64, 48, 80)
        .await
        .unwrap_err();
    assert!(!err.is(FailureKind::DeviceBusy), "{:?}", err);
}

#[tokio::test]
async fn test_motion_detection_reports_dead_device() {
    let dir = TempDir::new().unwrap();
    let system = SurveillanceSystem::with_device(
        test_config(dir.path()),
        Box::new(PanicOnFirstPull::new()),
    )
    .await
    .unwrap();

    system.start_motion().await.unwrap();
    match system.monitor().join().await {
        Some(LoopExit::PullFailed(e)) => assert!(e.is(FailureKind::FramePullFailed)),
        other => panic!("unexpected loop exit: {:?}", other),
    }
    assert!(!system.status().motion_detection);

    // A restarted loop fails on its first pull instead of idling forever.
    system.start_motion().await.unwrap();
    assert!(matches!(
        system.monitor().join().await,
        Some(LoopExit::PullFailed(_))
    ));
    assert!(!system.status().motion_detection);

    let err = system.start_recording(None).await.unwrap_err();
    assert!(err.is(FailureKind::RecordingStartFailed));
    assert!(!err.message.contains("device_busy"), "{}", err.message);
}
