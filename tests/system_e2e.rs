//! End-to-end behaviour of the assembled monitor on the synthetic camera.

use sentrycam::errors::FailureKind;
use sentrycam::invariants::contract_test;
use sentrycam::motion::LoopExit;
use sentrycam::recording::{SessionState, StopReason};
use sentrycam::testing::{
    static_scene, test_config, with_changed_pixels, DeviceOp, SyntheticCamera, SyntheticControl,
};
use sentrycam::types::{CameraMode, PixelFormat};
use sentrycam::{SentryConfig, SurveillanceSystem};
use std::time::Duration;
use tempfile::TempDir;

async fn system_with(config: SentryConfig) -> (SurveillanceSystem, SyntheticControl) {
    let camera = SyntheticCamera::new();
    let control = camera.control();
    let system = SurveillanceSystem::with_device(config, Box::new(camera))
        .await
        .unwrap();
    (system, control)
}

async fn system(dir: &TempDir) -> (SurveillanceSystem, SyntheticControl) {
    system_with(test_config(dir.path())).await
}

/// Poll `check` every 10 ms until it holds or `timeout` passes.
async fn eventually(timeout: Duration, check: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

#[tokio::test]
async fn test_timed_recording_stops_itself() {
    let dir = TempDir::new().unwrap();
    let (system, _) = system(&dir).await;
    let mut updates = system.controller().subscribe();

    let session = system
        .start_recording(Some(Duration::from_millis(150)))
        .await
        .unwrap();
    assert!(system.status().recording);
    assert_eq!(system.source().mode(), CameraMode::Recording);

    let controller = system.controller().clone();
    assert!(eventually(Duration::from_secs(3), || controller.state() == SessionState::Stopped).await);
    assert_eq!(system.source().mode(), CameraMode::Preview);

    // Intermediate watch values may be coalesced; the last one is Stopped.
    assert!(updates.has_changed().unwrap());
    assert_eq!(updates.borrow_and_update().state, SessionState::Stopped);

    let videos = system.files().unwrap().videos;
    assert_eq!(videos.len(), 1);
    assert_eq!(videos[0].path, session.path);

    let err = system.stop_recording().await.unwrap_err();
    assert!(err.is(FailureKind::NotRecording));
}

#[tokio::test]
async fn test_manual_stop_wins_over_pending_timer() {
    let dir = TempDir::new().unwrap();
    let (system, _) = system(&dir).await;

    system
        .start_recording(Some(Duration::from_millis(100)))
        .await
        .unwrap();
    let summary = system.stop_recording().await.unwrap();
    assert_eq!(summary.reason, StopReason::Manual);

    // A fresh untimed session must outlive the first session's timer.
    let second = system.start_recording(None).await.unwrap();
    tokio::time::sleep(Duration::from_millis(250)).await;
    assert_eq!(system.controller().state(), SessionState::Active);
    assert_eq!(
        system.controller().current_session().map(|s| s.id),
        Some(second.id)
    );
    system.stop_recording().await.unwrap();
}

#[tokio::test]
async fn test_motion_triggers_single_recording() {
    let dir = TempDir::new().unwrap();
    let (system, control) = system(&dir).await;

    let scene = static_scene(64, 48, PixelFormat::Rgb8);
    control.push_frames([scene.clone(), with_changed_pixels(&scene, 500, 80)]);

    system.start_motion().await.unwrap();
    let controller = system.controller().clone();
    assert!(eventually(Duration::from_secs(3), || controller.is_recording()).await);

    // The loop stands aside while the recording owns the device.
    let pulls = control.pulls();
    tokio::time::sleep(Duration::from_millis(120)).await;
    assert_eq!(control.pulls(), pulls);
    assert_eq!(system.monitor().triggered_recordings(), 1);
    assert_eq!(system.files().unwrap().videos.len(), 1);

    let status = system.status();
    assert!(status.recording);
    assert!(status.motion_detection);
    assert!(status.last_motion.is_some());
    assert!(status.current_recording.is_some());

    system.stop_recording().await.unwrap();
    let monitor = system.monitor().clone();
    let source = system.source().clone();
    assert!(eventually(Duration::from_secs(3), || source.mode() == CameraMode::MotionSampling).await);

    // Sampling resumes on a fresh baseline over the static scene.
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(monitor.triggered_recordings(), 1);
    assert!(!system.status().recording);

    assert_eq!(system.stop_motion().await, Some(LoopExit::Stopped));
    assert_eq!(system.source().mode(), CameraMode::Preview);
}

#[tokio::test]
async fn test_pull_failure_ends_motion_loop() {
    let dir = TempDir::new().unwrap();
    let (system, control) = system(&dir).await;

    system.start_motion().await.unwrap();
    control.fail_all_pulls(true);

    match system.monitor().join().await {
        Some(LoopExit::PullFailed(e)) => assert!(e.is(FailureKind::FramePullFailed)),
        other => panic!("unexpected loop exit: {:?}", other),
    }
    assert!(!system.status().motion_detection);
    assert_eq!(system.source().mode(), CameraMode::Preview);
}

#[tokio::test]
async fn test_toggle_motion() {
    let dir = TempDir::new().unwrap();
    let (system, _) = system(&dir).await;

    assert!(system.toggle_motion().await.unwrap());
    assert_eq!(system.source().mode(), CameraMode::MotionSampling);
    assert!(!system.toggle_motion().await.unwrap());
    assert_eq!(system.source().mode(), CameraMode::Preview);
    assert!(system.toggle_motion().await.unwrap());
    system.shutdown().await;
}

#[tokio::test]
async fn test_photo_saved_and_refused_while_recording() {
    let dir = TempDir::new().unwrap();
    let (system, _) = system(&dir).await;

    let photo = system.take_photo().await.unwrap();
    assert!(photo.name.starts_with("photo_"));
    assert!(photo.name.ends_with(".jpg"));
    assert_eq!(std::fs::metadata(&photo.path).unwrap().len(), photo.size_bytes);

    system.start_recording(None).await.unwrap();
    let err = system.take_photo().await.unwrap_err();
    assert!(err.is(FailureKind::DeviceBusy));
    system.stop_recording().await.unwrap();

    let listing = system.files().unwrap();
    assert_eq!(listing.photos.len(), 1);
    assert_eq!(listing.videos.len(), 1);
}

#[tokio::test]
async fn test_failed_start_leaves_system_idle() {
    let dir = TempDir::new().unwrap();
    let (system, control) = system(&dir).await;

    control.fail_next_configure(FailureKind::ReconfigureFailed);
    let err = system.start_recording(None).await.unwrap_err();
    assert!(err.is(FailureKind::RecordingStartFailed));
    assert_eq!(system.controller().state(), SessionState::Idle);
    assert_eq!(system.source().mode(), CameraMode::Preview);

    system.start_recording(None).await.unwrap();
    system.stop_recording().await.unwrap();
}

#[tokio::test]
async fn test_failed_finalize_still_releases_device() {
    let dir = TempDir::new().unwrap();
    let (system, control) = system(&dir).await;

    system.start_recording(None).await.unwrap();
    control.fail_next_finish("disk full");
    let err = system.stop_recording().await.unwrap_err();
    assert!(err.is(FailureKind::RecordingStopFailed));
    assert_eq!(system.controller().state(), SessionState::Stopped);
    assert_eq!(system.source().mode(), CameraMode::Preview);

    system.start_recording(None).await.unwrap();
    system.stop_recording().await.unwrap();
}

#[tokio::test]
async fn test_shutdown_finalizes_recording_and_closes_device() {
    let dir = TempDir::new().unwrap();
    let (system, control) = system(&dir).await;

    system.start_motion().await.unwrap();
    system.stop_motion().await;
    system.start_recording(None).await.unwrap();
    control.clear_ops();

    system.shutdown().await;
    let ops = control.ops();
    assert_eq!(ops.first(), Some(&DeviceOp::FinishRecording));
    assert_eq!(ops.last(), Some(&DeviceOp::Close));
    assert_eq!(system.controller().state(), SessionState::Stopped);

    let err = system.source().capture_frame().await.unwrap_err();
    assert!(err.is(FailureKind::FramePullFailed));
}

#[tokio::test]
async fn test_cleanup_keeps_fresh_artifacts() {
    let dir = TempDir::new().unwrap();
    let (system, _) = system(&dir).await;

    system.take_photo().await.unwrap();
    let report = system.cleanup().unwrap();
    assert!(report.removed.is_empty());
    assert_eq!(system.files().unwrap().photos.len(), 1);
}

#[tokio::test]
async fn test_invalid_config_rejected_on_open() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(dir.path());
    config.camera.video_resolution = [0, 0];
    let err = match SurveillanceSystem::open(config).await {
        Ok(_) => panic!("invalid config accepted"),
        Err(e) => e,
    };
    assert!(err.is(FailureKind::ConfigInvalid));
}

#[tokio::test]
async fn test_lifecycle_contracts() {
    let dir = TempDir::new().unwrap();
    let (system, _) = system(&dir).await;
    system.start_recording(None).await.unwrap();
    system.stop_recording().await.unwrap();

    contract_test(
        "recording lifecycle",
        &[
            "recording starts only from Idle or Stopped",
            "recording stops only from Active",
            "sink is open exactly while recording",
        ],
    );
}

#[tokio::test]
async fn test_recording_rejected_while_motion_entry_in_flight() {
    let dir = TempDir::new().unwrap();
    let (system, control) = system(&dir).await;
    control.hold_transitions();

    let entering = {
        let system = system.clone();
        tokio::spawn(async move { system.start_motion().await })
    };
    let waiter = control.clone();
    let held = tokio::task::spawn_blocking(move || waiter.wait_until_held(Duration::from_secs(5)))
        .await
        .unwrap();
    assert!(held, "motion entry never reached configure");

    let err = system.controller().start(None).await.unwrap_err();
    assert!(err.is(FailureKind::RecordingStartFailed));
    assert!(err.message.contains("mode_transition_in_progress"), "{}", err);
    assert_eq!(system.controller().state(), SessionState::Idle);
    assert!(!system.status().recording);

    control.release_transitions();
    entering.await.unwrap().unwrap();
    assert_eq!(system.source().mode(), CameraMode::MotionSampling);

    system.stop_motion().await;
    assert_eq!(system.source().mode(), CameraMode::Preview);
    assert!(system.files().unwrap().videos.is_empty());
}
