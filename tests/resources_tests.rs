// SPDX-License-Identifier: GPL-3.0-only

//! Integration tests for transient resource ownership

use backdrop::backends::{BuiltinEngineFactory, LocalTrack};
use backdrop::pipelines::{
    Backdrop, BackgroundKind, DesiredState, LifecycleController, ReconcileOutcome, SessionContext,
    SessionSettings,
};
use backdrop::{DeviceProfile, QualityTier};
use image::{Rgba, RgbaImage};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

fn write_background(dir: &Path, name: &str, color: [u8; 4]) -> PathBuf {
    let path = dir.join(name);
    RgbaImage::from_pixel(16, 12, Rgba(color)).save(&path).unwrap();
    path
}

fn setup() -> (Arc<LocalTrack>, LifecycleController) {
    let settings = SessionSettings {
        first_frame_timeout: Duration::from_millis(5),
        ..SessionSettings::default()
    };
    let session = Arc::new(SessionContext::new(
        DesiredState::default(),
        DeviceProfile::default(),
        settings,
    ));
    let track = Arc::new(LocalTrack::new());
    let controller = LifecycleController::new(
        session,
        track.clone(),
        Arc::new(BuiltinEngineFactory::new(false)),
    );
    (track, controller)
}

fn upload(path: &Path) -> DesiredState {
    DesiredState {
        kind: BackgroundKind::Upload,
        source: Some(path.to_string_lossy().into_owned()),
        tier: QualityTier::Low,
        ..DesiredState::default()
    }
}

#[tokio::test]
async fn test_sequential_uploads_keep_one_resource() {
    let dir = tempfile::tempdir().unwrap();
    let (track, controller) = setup();

    let n = 4;
    for i in 0..n {
        let path = write_background(dir.path(), &format!("upload_{}.png", i), [0, 0, 200, 255]);
        let outcome = controller.reconcile(upload(&path)).await.unwrap();
        assert!(matches!(outcome, ReconcileOutcome::Applied(_)));
        assert_eq!(controller.active_resources(), 1);
    }

    assert_eq!(controller.revoked_resources(), n - 1);
    assert_eq!(
        track.with_stage(|s| matches!(s.backdrop(), Backdrop::Image(_))),
        Some(true)
    );
}

#[tokio::test]
async fn test_leaving_upload_releases_resource() {
    let dir = tempfile::tempdir().unwrap();
    let (_track, controller) = setup();
    let path = write_background(dir.path(), "upload.png", [10, 200, 10, 255]);

    controller.reconcile(upload(&path)).await.unwrap();
    controller
        .reconcile(DesiredState {
            kind: BackgroundKind::Blur,
            tier: QualityTier::Low,
            ..DesiredState::default()
        })
        .await
        .unwrap();

    assert_eq!(controller.active_resources(), 0);
    assert_eq!(controller.revoked_resources(), 1);
}

#[tokio::test]
async fn test_dispose_revokes_everything() {
    let dir = tempfile::tempdir().unwrap();
    let (track, controller) = setup();
    let path = write_background(dir.path(), "upload.png", [200, 10, 10, 255]);

    controller.reconcile(upload(&path)).await.unwrap();
    controller.dispose().await.unwrap();

    assert_eq!(controller.active_resources(), 0);
    assert_eq!(controller.revoked_resources(), 1);
    assert_eq!(track.detach_count(), 1);
}

#[tokio::test]
async fn test_unreadable_upload_proceeds_without_resource() {
    let dir = tempfile::tempdir().unwrap();
    let (track, controller) = setup();
    let path = dir.path().join("corrupt.png");
    std::fs::write(&path, b"not a png").unwrap();

    let outcome = controller.reconcile(upload(&path)).await.unwrap();

    assert!(matches!(outcome, ReconcileOutcome::Applied(_)));
    assert_eq!(controller.active_resources(), 0);
    assert_eq!(
        track.with_stage(|s| matches!(s.backdrop(), Backdrop::Blur { .. })),
        Some(true)
    );
}
