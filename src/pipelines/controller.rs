// SPDX-License-Identifier: GPL-3.0-only

//! Pipeline lifecycle controller
//!
//! Attaches, swaps and tears down the background stage on a live track.
//!
//! ```text
//! Idle ──► Applying ──► Applied
//!             ▲            │
//!             └────────────┘   (every desired-state change)
//!
//! any ──► Disposed
//! ```
//!
//! `reconcile` is single-flight: it claims the desired state before its first
//! await, and every later step checks that its claim is still the newest and
//! that the track is still live. A superseded call stops quietly; the newest
//! call always wins. Stage swaps on the track are serialized by a permit so
//! at most one replace is in flight.

use crate::backends::inference::{EngineFactory, ModelReference};
use crate::backends::track::TrackHandle;
use crate::errors::{PipelineError, PipelineResult};
use crate::pipelines::quality;
use crate::pipelines::resources::{ResourceGuardian, TransientResource, decode_image};
use crate::pipelines::session::SessionContext;
use crate::pipelines::transformer::{Backdrop, SegmentationTransformer};
use crate::pipelines::types::{
    AppliedState, BackendVariant, BackgroundKind, ControllerState, DesiredState,
    PipelineConfiguration, PipelineStatus, ReconcileOutcome,
};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

#[derive(Debug, Default)]
struct Inner {
    state: ControllerState,
    /// Newest desired state a reconcile has taken charge of
    claimed: Option<AppliedState>,
    /// Last state actually attached to the track
    realized: Option<AppliedState>,
    /// Bumped by every claim and by dispose
    generation: u64,
}

/// A stage ready to attach, with what it realizes
struct PreparedStage {
    stage: Option<SegmentationTransformer>,
    backend: Option<BackendVariant>,
    substituted: bool,
    /// Upload shown by `stage`, registered once the stage is attached
    upload: Option<TransientResource>,
}

impl PreparedStage {
    fn detached() -> Self {
        Self {
            stage: None,
            backend: None,
            substituted: false,
            upload: None,
        }
    }
}

/// Drives the background stage of one camera session
pub struct LifecycleController {
    session: Arc<SessionContext>,
    track: Arc<dyn TrackHandle>,
    engines: Arc<dyn EngineFactory>,
    guardian: Mutex<ResourceGuardian>,
    inner: Mutex<Inner>,
    replace_permit: tokio::sync::Mutex<()>,
    disposed: watch::Sender<bool>,
    enhanced_model: Option<PathBuf>,
}

impl LifecycleController {
    pub fn new(
        session: Arc<SessionContext>,
        track: Arc<dyn TrackHandle>,
        engines: Arc<dyn EngineFactory>,
    ) -> Self {
        let (disposed, _) = watch::channel(false);
        Self {
            session,
            track,
            engines,
            guardian: Mutex::new(ResourceGuardian::new()),
            inner: Mutex::new(Inner::default()),
            replace_permit: tokio::sync::Mutex::new(()),
            disposed,
            enhanced_model: None,
        }
    }

    /// Model file for the enhanced backend
    pub fn with_enhanced_model(mut self, path: impl Into<PathBuf>) -> Self {
        self.enhanced_model = Some(path.into());
        self
    }

    pub fn session(&self) -> &Arc<SessionContext> {
        &self.session
    }

    pub fn state(&self) -> ControllerState {
        self.lock_inner().state
    }

    /// Last configuration actually attached to the track
    pub fn applied_state(&self) -> Option<AppliedState> {
        self.lock_inner().realized.clone()
    }

    /// Number of live transient resources
    pub fn active_resources(&self) -> usize {
        self.lock_guardian().active_count()
    }

    /// Number of transient resources revoked so far
    pub fn revoked_resources(&self) -> u64 {
        self.lock_guardian().revoked_count()
    }

    fn lock_inner(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_guardian(&self) -> std::sync::MutexGuard<'_, ResourceGuardian> {
        self.guardian.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Bring the track in line with `desired`
    ///
    /// Superseded calls and calls whose track ended return `Ok`; only a
    /// session with no loadable backend is an error.
    pub async fn reconcile(&self, desired: DesiredState) -> PipelineResult<ReconcileOutcome> {
        self.run(move || desired).await
    }

    /// Bring the track in line with the session's desired state
    ///
    /// The desired state is read at claim time, so of several concurrent
    /// calls the one claiming last also holds the newest state.
    pub async fn reconcile_current(&self) -> PipelineResult<ReconcileOutcome> {
        self.run(|| self.session.desired()).await
    }

    async fn run(
        &self,
        desired: impl FnOnce() -> DesiredState,
    ) -> PipelineResult<ReconcileOutcome> {
        let (generation, desired) = {
            let mut inner = self.lock_inner();
            if inner.state == ControllerState::Disposed {
                return Ok(ReconcileOutcome::Disposed);
            }
            let desired = desired();
            if inner.claimed.as_ref().is_some_and(|c| c.matches(&desired)) {
                return Ok(ReconcileOutcome::Unchanged);
            }
            inner.claimed = Some(AppliedState::claim(&desired));
            inner.generation += 1;
            inner.state = ControllerState::Applying;
            (inner.generation, desired)
        };

        info!(
            generation,
            kind = %desired.kind,
            tier = %desired.tier,
            reapply = desired.reapply,
            "Applying background"
        );
        self.session.set_applying(true);
        self.session.set_status(PipelineStatus::Applying);
        if self.session.settings().hide_video_while_applying {
            self.session.set_video_visible(false);
        }

        let result = self.apply(generation, &desired).await;
        self.finish(generation, result)
    }

    async fn apply(&self, generation: u64, desired: &DesiredState) -> PipelineResult<AppliedState> {
        self.checkpoint(generation)?;

        let config = quality::resolve(desired.tier, desired.custom.as_ref());
        debug!(?config, "Resolved pipeline configuration");

        let prepared = match desired.kind {
            BackgroundKind::None if self.session.device().is_mobile => PreparedStage {
                stage: Some(SegmentationTransformer::zero_strength(config, self.engines.clone())),
                ..PreparedStage::detached()
            },
            BackgroundKind::None => PreparedStage::detached(),
            BackgroundKind::Blur => {
                let backdrop = Backdrop::Blur {
                    radius: config.blur_radius,
                };
                self.build_stage(generation, config, backdrop).await?
            }
            BackgroundKind::Image | BackgroundKind::Upload => {
                let (backdrop, upload) = self.load_backdrop(generation, desired, &config).await?;
                PreparedStage {
                    upload,
                    ..self.build_stage(generation, config, backdrop).await?
                }
            }
        };

        self.checkpoint(generation)?;
        let permit = self.replace_permit.lock().await;
        self.checkpoint(generation)?;

        let realized_tier = prepared.stage.as_ref().map(|s| s.config().tier);
        let processed = prepared.stage.as_ref().map(|s| s.subscribe_processed());

        self.track.replace_processing_stage(prepared.stage).await?;

        let applied = AppliedState::claim(desired).realized(realized_tier, prepared.backend);
        self.lock_inner().realized = Some(applied.clone());
        self.settle_resources(prepared.upload);
        drop(permit);

        if let Some(mut processed) = processed {
            let timeout = self.session.settings().first_frame_timeout;
            let delivered = tokio::time::timeout(timeout, processed.wait_for(|n| *n > 0))
                .await
                .is_ok_and(|r| r.is_ok());
            if delivered {
                debug!("First processed frame delivered");
            } else {
                warn!(?timeout, "No processed frame yet, showing video anyway");
            }
        }

        if self.is_current(generation) {
            let status = if realized_tier.is_none() {
                PipelineStatus::Idle
            } else {
                PipelineStatus::Active {
                    backend: prepared.backend,
                    substituted: prepared.substituted,
                }
            };
            self.session.set_status(status);
        }
        Ok(applied)
    }

    /// Decode the background image
    ///
    /// Uploads come back as a transient resource still to be registered.
    /// Falls back to a blur backdrop when the image cannot be loaded.
    async fn load_backdrop(
        &self,
        generation: u64,
        desired: &DesiredState,
        config: &PipelineConfiguration,
    ) -> PipelineResult<(Backdrop, Option<TransientResource>)> {
        let fallback = Backdrop::Blur {
            radius: config.blur_radius,
        };
        let Some(source) = desired.source.as_deref() else {
            warn!(kind = %desired.kind, "No background source selected, using blur");
            return Ok((fallback, None));
        };

        let image = match decode_image(source).await {
            Ok(image) => image,
            Err(e) => {
                warn!(error = %e, source, "Background image unavailable, using blur");
                return Ok((fallback, None));
            }
        };
        self.checkpoint(generation)?;

        if desired.kind == BackgroundKind::Upload {
            let resource = TransientResource::new(image, Some(PathBuf::from(source)));
            Ok((Backdrop::Image(resource.image().clone()), Some(resource)))
        } else {
            Ok((Backdrop::Image(Arc::new(image)), None))
        }
    }

    /// Revoke earlier uploads and take ownership of the one now attached
    ///
    /// Runs after the stage swap; a failed swap leaves the previous upload
    /// alive. Dispose marks the controller disposed before it revokes, and
    /// the check below holds the guardian lock.
    fn settle_resources(&self, upload: Option<TransientResource>) {
        let mut guardian = self.lock_guardian();
        let revoked = guardian.revoke_all();
        let disposed = self.lock_inner().state == ControllerState::Disposed;
        match upload {
            Some(resource) if !disposed => {
                let uri = guardian.track(resource);
                debug!(uri = %uri, revoked, "Upload registered");
            }
            Some(resource) => {
                debug!(uri = resource.uri(), "Session disposed, dropping upload");
            }
            None if revoked > 0 => debug!(revoked, "Released uploaded backgrounds"),
            None => {}
        }
    }

    /// Create and initialize the segmentation stage
    ///
    /// The enhanced backend falls back to the default one when it fails to
    /// load; only both failing is an error.
    async fn build_stage(
        &self,
        generation: u64,
        config: PipelineConfiguration,
        backdrop: Backdrop,
    ) -> PipelineResult<PreparedStage> {
        let requested = config.backend;
        let stage = SegmentationTransformer::new(
            config,
            self.model_reference(requested),
            backdrop.clone(),
            self.engines.clone(),
        );
        let primary_error = match stage.init().await {
            Ok(()) => {
                return Ok(PreparedStage {
                    stage: Some(stage),
                    backend: Some(requested),
                    ..PreparedStage::detached()
                });
            }
            Err(e) => e,
        };
        drop(stage);
        self.checkpoint(generation)?;

        if requested == BackendVariant::Default {
            return Err(PipelineError::BackendsUnavailable(primary_error.to_string()));
        }

        warn!(
            error = %primary_error,
            tier = %config.tier,
            "Enhanced backend failed to load, falling back to default"
        );
        let fallback_config = PipelineConfiguration {
            backend: BackendVariant::Default,
            ..config
        };
        let stage = SegmentationTransformer::new(
            fallback_config,
            ModelReference::builtin(BackendVariant::Default),
            backdrop,
            self.engines.clone(),
        );
        match stage.init().await {
            Ok(()) => Ok(PreparedStage {
                stage: Some(stage),
                backend: Some(BackendVariant::Default),
                substituted: true,
                upload: None,
            }),
            Err(e) => Err(PipelineError::BackendsUnavailable(format!(
                "enhanced: {}; default: {}",
                primary_error, e
            ))),
        }
    }

    fn model_reference(&self, variant: BackendVariant) -> ModelReference {
        match (&self.enhanced_model, variant) {
            (Some(path), BackendVariant::Enhanced) => ModelReference::with_path(variant, path),
            _ => ModelReference::builtin(variant),
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.lock_inner().generation == generation
    }

    /// Fail if this call was superseded or the track ended
    fn checkpoint(&self, generation: u64) -> PipelineResult<()> {
        if !self.is_current(generation) {
            return Err(PipelineError::Superseded);
        }
        if !self.track.is_live() {
            return Err(PipelineError::StreamInvalid);
        }
        Ok(())
    }

    fn finish(
        &self,
        generation: u64,
        result: PipelineResult<AppliedState>,
    ) -> PipelineResult<ReconcileOutcome> {
        let current = {
            let mut inner = self.lock_inner();
            let current = inner.generation == generation;
            if current {
                match &result {
                    Ok(_) => inner.state = ControllerState::Applied,
                    Err(_) => {
                        inner.claimed = inner.realized.clone();
                        inner.state = if inner.realized.is_some() {
                            ControllerState::Applied
                        } else {
                            ControllerState::Idle
                        };
                    }
                }
            }
            current
        };

        let outcome = match result {
            Ok(applied) => {
                info!(generation, ?applied, "Background applied");
                Ok(ReconcileOutcome::Applied(applied))
            }
            Err(PipelineError::Superseded) => {
                debug!(generation, "Reconcile superseded");
                Ok(ReconcileOutcome::Superseded)
            }
            Err(PipelineError::StreamInvalid) => {
                info!(generation, "Track ended, reconcile aborted");
                if current {
                    self.restore_status();
                }
                Ok(ReconcileOutcome::Aborted)
            }
            Err(e) => {
                error!(generation, error = %e, "Failed to apply background");
                if current {
                    self.session.set_status(PipelineStatus::Failed(e.to_string()));
                }
                Err(e)
            }
        };

        if current {
            self.session.set_applying(false);
            self.session.set_video_visible(true);
        }
        outcome
    }

    /// Status for the stage still attached after an abort
    fn restore_status(&self) {
        let realized = self.lock_inner().realized.clone();
        let status = match realized {
            Some(AppliedState {
                realized_tier: Some(_),
                realized_backend,
                ..
            }) => PipelineStatus::Active {
                backend: realized_backend,
                substituted: false,
            },
            _ => PipelineStatus::Idle,
        };
        self.session.set_status(status);
    }

    /// Reconcile on every desired-state change
    ///
    /// Each change runs as its own task so a newer change supersedes an
    /// older one instead of waiting behind it. Tasks may start out of order,
    /// so each reads the desired state when it claims rather than when it was
    /// spawned. Stops on dispose.
    pub fn spawn_driver(self: Arc<Self>) -> JoinHandle<()> {
        let mut desired = self.session.subscribe_desired();
        let mut disposed = self.disposed.subscribe();
        tokio::spawn(async move {
            loop {
                if *disposed.borrow_and_update() {
                    break;
                }
                desired.mark_unchanged();
                let controller = Arc::clone(&self);
                tokio::spawn(async move {
                    if let Err(e) = controller.reconcile_current().await {
                        debug!(error = %e, "Driver reconcile failed");
                    }
                });

                tokio::select! {
                    changed = desired.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    _ = disposed.changed() => break,
                }
            }
            debug!("Lifecycle driver stopped");
        })
    }

    /// End the session
    ///
    /// Supersedes in-flight work, revokes every transient resource and fully
    /// detaches the processing path. Further reconciles are no-ops.
    pub async fn dispose(&self) -> PipelineResult<()> {
        {
            let mut inner = self.lock_inner();
            if inner.state == ControllerState::Disposed {
                return Ok(());
            }
            inner.generation += 1;
            inner.state = ControllerState::Disposed;
        }
        self.disposed.send_replace(true);

        let revoked = self.lock_guardian().revoke_all();
        let result = {
            let _permit = self.replace_permit.lock().await;
            self.track.fully_detach().await
        };

        self.session.set_applying(false);
        self.session.set_video_visible(true);
        self.session.set_status(PipelineStatus::Disposed);
        info!(revoked, "Background session disposed");
        result
    }
}

impl std::fmt::Debug for LifecycleController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock_inner();
        f.debug_struct("LifecycleController")
            .field("state", &inner.state)
            .field("generation", &inner.generation)
            .field("realized", &inner.realized)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::inference::BuiltinEngineFactory;
    use crate::backends::track::LocalTrack;
    use crate::constants::QualityTier;
    use crate::device::DeviceProfile;
    use crate::pipelines::session::SessionSettings;
    use std::time::Duration;

    fn controller(is_mobile: bool, gpu: bool) -> (Arc<LocalTrack>, LifecycleController) {
        let device = DeviceProfile {
            is_mobile,
            has_gpu: gpu,
            ..DeviceProfile::default()
        };
        let settings = SessionSettings {
            first_frame_timeout: Duration::from_millis(5),
            ..SessionSettings::default()
        };
        let session = Arc::new(SessionContext::new(DesiredState::default(), device, settings));
        let track = Arc::new(LocalTrack::new());
        let controller = LifecycleController::new(
            session,
            track.clone(),
            Arc::new(BuiltinEngineFactory::new(gpu)),
        );
        (track, controller)
    }

    fn desired(kind: BackgroundKind, tier: QualityTier) -> DesiredState {
        DesiredState {
            kind,
            tier,
            ..DesiredState::default()
        }
    }

    #[tokio::test]
    async fn identical_desired_state_is_a_no_op() {
        let (track, controller) = controller(false, true);
        let blur = desired(BackgroundKind::Blur, QualityTier::Low);

        let first = controller.reconcile(blur.clone()).await.unwrap();
        assert!(matches!(first, ReconcileOutcome::Applied(_)));
        let second = controller.reconcile(blur).await.unwrap();
        assert_eq!(second, ReconcileOutcome::Unchanged);
        assert_eq!(track.replacement_count(), 1);
        assert_eq!(controller.state(), ControllerState::Applied);
    }

    #[tokio::test]
    async fn none_on_desktop_clears_the_stage() {
        let (track, controller) = controller(false, true);
        controller
            .reconcile(desired(BackgroundKind::Blur, QualityTier::Low))
            .await
            .unwrap();
        controller
            .reconcile(desired(BackgroundKind::None, QualityTier::Low))
            .await
            .unwrap();

        assert!(!track.has_stage());
        assert_eq!(track.detach_count(), 0);
        assert_eq!(controller.session().status(), PipelineStatus::Idle);
    }

    #[tokio::test]
    async fn none_on_mobile_keeps_a_zero_strength_stage() {
        let (track, controller) = controller(true, false);
        controller
            .reconcile(desired(BackgroundKind::None, QualityTier::Low))
            .await
            .unwrap();

        assert_eq!(track.with_stage(|s| s.is_zero_strength()), Some(true));
        assert_eq!(track.detach_count(), 0);
    }

    #[tokio::test]
    async fn enhanced_without_gpu_falls_back_to_default() {
        let (_track, controller) = controller(false, false);
        let outcome = controller
            .reconcile(desired(BackgroundKind::Blur, QualityTier::Ultra))
            .await
            .unwrap();

        let ReconcileOutcome::Applied(applied) = outcome else {
            panic!("expected an applied outcome, got {:?}", outcome);
        };
        assert_eq!(applied.realized_backend, Some(BackendVariant::Default));
        assert_eq!(
            controller.session().status(),
            PipelineStatus::Active {
                backend: Some(BackendVariant::Default),
                substituted: true
            }
        );
    }

    #[tokio::test]
    async fn missing_image_falls_back_to_blur() {
        let (track, controller) = controller(false, true);
        let state = DesiredState {
            source: Some("/nonexistent/beach.png".into()),
            ..desired(BackgroundKind::Image, QualityTier::Low)
        };
        let outcome = controller.reconcile(state).await.unwrap();

        assert!(matches!(outcome, ReconcileOutcome::Applied(_)));
        assert_eq!(
            track.with_stage(|s| matches!(s.backdrop(), Backdrop::Blur { .. })),
            Some(true)
        );
    }

    #[tokio::test]
    async fn dispose_detaches_and_blocks_further_work() {
        let (track, controller) = controller(false, true);
        controller
            .reconcile(desired(BackgroundKind::Blur, QualityTier::Low))
            .await
            .unwrap();

        controller.dispose().await.unwrap();
        controller.dispose().await.unwrap();

        assert_eq!(track.detach_count(), 1);
        assert!(!track.has_stage());
        assert_eq!(controller.state(), ControllerState::Disposed);
        assert_eq!(controller.session().status(), PipelineStatus::Disposed);

        let outcome = controller
            .reconcile(desired(BackgroundKind::Blur, QualityTier::High))
            .await
            .unwrap();
        assert_eq!(outcome, ReconcileOutcome::Disposed);
    }
}
