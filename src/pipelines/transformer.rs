// SPDX-License-Identifier: GPL-3.0-only

//! Segmentation frame transformer
//!
//! Per frame: infer a mask, refine it, smooth it against the previous mask,
//! then composite the sharp frame over the backdrop (a blurred copy of the
//! frame or a background image).
//!
//! ```text
//! frame ──► inference ──► refine ──► temporal smoothing ──┐
//!   │                                                     ▼
//!   └──────► backdrop (blur / image) ──────────────► composite ──► frame
//! ```
//!
//! The backend loads asynchronously in [`SegmentationTransformer::init`].
//! Until it is ready, and whenever inference fails, frames pass through
//! unmodified. Frames are never dropped.

use crate::backends::inference::{EngineFactory, ModelReference, SegmentationEngine};
use crate::constants::timing::FRAME_LOG_INTERVAL;
use crate::errors::PipelineResult;
use crate::media::blur::blur_rgba;
use crate::media::composite::{blend_over, cover_fit};
use crate::media::frame::{Dimensions, Mask, RGBA_BYTES, VideoFrame};
use crate::pipelines::refine::refine;
use crate::pipelines::smoothing::TemporalSmoothingBuffer;
use crate::pipelines::types::{BackendVariant, PipelineConfiguration};
use image::RgbaImage;
use std::sync::{Arc, Mutex, PoisonError, TryLockError};
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

/// What replaces the background
#[derive(Debug, Clone)]
pub enum Backdrop {
    /// Blurred copy of the frame; radius 0 leaves frames untouched
    Blur { radius: u32 },
    /// Static background image, cover-fitted to the frame
    Image(Arc<RgbaImage>),
}

/// A loaded segmentation backend
///
/// Both variants expose the same capabilities; the variant records which
/// model actually runs so fallbacks can be reported.
pub enum SegmentationBackend {
    Default(Box<dyn SegmentationEngine>),
    Enhanced(Box<dyn SegmentationEngine>),
}

impl SegmentationBackend {
    pub fn new(variant: BackendVariant, engine: Box<dyn SegmentationEngine>) -> Self {
        match variant {
            BackendVariant::Default => Self::Default(engine),
            BackendVariant::Enhanced => Self::Enhanced(engine),
        }
    }

    pub fn variant(&self) -> BackendVariant {
        match self {
            Self::Default(_) => BackendVariant::Default,
            Self::Enhanced(_) => BackendVariant::Enhanced,
        }
    }

    fn engine(&mut self) -> &mut dyn SegmentationEngine {
        match self {
            Self::Default(engine) | Self::Enhanced(engine) => engine.as_mut(),
        }
    }

    pub fn infer(&mut self, frame: &VideoFrame) -> PipelineResult<Mask> {
        self.engine().infer(frame)
    }

    pub fn close(&mut self) {
        self.engine().close();
    }
}

/// Per-resolution scratch state
struct FrameBuffers {
    dims: Dimensions,
    /// Cover-fitted background image for image backdrops
    backdrop: Option<Vec<u8>>,
}

impl FrameBuffers {
    fn allocate(dims: Dimensions, backdrop: &Backdrop) -> Self {
        let backdrop = match backdrop {
            Backdrop::Image(image) => Some(cover_fit(image, dims)),
            Backdrop::Blur { .. } => None,
        };
        Self { dims, backdrop }
    }
}

/// Background effect stage attached to a live track
pub struct SegmentationTransformer {
    config: PipelineConfiguration,
    model: ModelReference,
    backdrop: Backdrop,
    factory: Arc<dyn EngineFactory>,
    backend: Arc<Mutex<Option<SegmentationBackend>>>,
    smoothing: TemporalSmoothingBuffer,
    buffers: Option<FrameBuffers>,
    processed: watch::Sender<u64>,
    failed: u64,
    destroyed: bool,
}

impl SegmentationTransformer {
    pub fn new(
        config: PipelineConfiguration,
        model: ModelReference,
        backdrop: Backdrop,
        factory: Arc<dyn EngineFactory>,
    ) -> Self {
        let (processed, _) = watch::channel(0);
        Self {
            config,
            model,
            backdrop,
            factory,
            backend: Arc::new(Mutex::new(None)),
            smoothing: TemporalSmoothingBuffer::new(),
            buffers: None,
            processed,
            failed: 0,
            destroyed: false,
        }
    }

    /// Stage that stays attached without changing frames
    ///
    /// Used instead of a detach where tearing the stage down would hurt the
    /// underlying track.
    pub fn zero_strength(config: PipelineConfiguration, factory: Arc<dyn EngineFactory>) -> Self {
        let config = PipelineConfiguration {
            blur_radius: 0,
            ..config
        };
        Self::new(
            config,
            ModelReference::builtin(config.backend),
            Backdrop::Blur { radius: 0 },
            factory,
        )
    }

    pub fn is_zero_strength(&self) -> bool {
        matches!(self.backdrop, Backdrop::Blur { radius: 0 })
    }

    /// Load the segmentation backend
    ///
    /// Frames handed to [`transform`](Self::transform) before this completes
    /// pass through unchanged.
    pub async fn init(&self) -> PipelineResult<()> {
        if self.is_zero_strength() {
            return Ok(());
        }

        let engine = self.factory.create(&self.model, self.config.delegate).await?;
        let backend = SegmentationBackend::new(self.model.variant, engine);
        info!(
            variant = %backend.variant(),
            tier = %self.config.tier,
            delegate = %self.config.delegate,
            "Segmentation backend ready"
        );
        *self.backend.lock().unwrap_or_else(PoisonError::into_inner) = Some(backend);
        Ok(())
    }

    pub fn is_ready(&self) -> bool {
        self.is_zero_strength()
            || self
                .backend
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .is_some()
    }

    pub fn config(&self) -> &PipelineConfiguration {
        &self.config
    }

    pub fn backdrop(&self) -> &Backdrop {
        &self.backdrop
    }

    /// Variant of the loaded backend, if any
    pub fn backend_variant(&self) -> Option<BackendVariant> {
        self.backend
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(SegmentationBackend::variant)
    }

    /// Receiver counting frames this stage has processed
    pub fn subscribe_processed(&self) -> watch::Receiver<u64> {
        self.processed.subscribe()
    }

    pub fn processed_frames(&self) -> u64 {
        *self.processed.borrow()
    }

    /// Frames passed through because the effect failed
    pub fn failed_frames(&self) -> u64 {
        self.failed
    }

    /// Apply the background effect to one frame
    ///
    /// Consumes the input frame; on any failure the input is returned as is.
    pub fn transform(&mut self, frame: VideoFrame) -> VideoFrame {
        if self.destroyed {
            return frame;
        }
        if self.is_zero_strength() {
            self.mark_processed();
            return frame;
        }

        match self.process(&frame) {
            Ok(Some(data)) => {
                let out = VideoFrame {
                    width: frame.width,
                    height: frame.height,
                    stride: frame.width * RGBA_BYTES as u32,
                    data: data.into(),
                    captured_at: frame.captured_at,
                };
                drop(frame);
                self.mark_processed();
                out
            }
            Ok(None) => frame,
            Err(e) => {
                self.failed += 1;
                if should_log_failure(self.failed) {
                    warn!(
                        error = %e,
                        failed = self.failed,
                        "Background effect failed, passing frame through"
                    );
                }
                frame
            }
        }
    }

    /// Composite one frame, or `None` while the backend is not available
    fn process(&mut self, frame: &VideoFrame) -> PipelineResult<Option<Vec<u8>>> {
        let dims = frame.dimensions();
        if dims.is_empty() {
            return Ok(None);
        }

        if self.buffers.as_ref().map(|b| b.dims) != Some(dims) {
            if let Some(old) = &self.buffers {
                debug!(from = %old.dims, to = %dims, "Frame size changed, reallocating buffers");
            }
            self.smoothing.reset();
            self.buffers = Some(FrameBuffers::allocate(dims, &self.backdrop));
        }

        let Some(raw) = self.run_inference(frame)? else {
            return Ok(None);
        };
        let raw = if raw.dimensions() == dims {
            raw
        } else {
            raw.resized(dims)
        };

        let refined = refine(raw, &self.config.detection);
        let mask = self.smoothing.blend(refined, self.config.smoothing_factor);

        let pixels = frame.packed_rgba();
        let blurred;
        let background: &[u8] = match (&self.backdrop, self.buffers.as_ref()) {
            (Backdrop::Image(_), Some(FrameBuffers { backdrop: Some(fitted), .. })) => fitted,
            (Backdrop::Blur { radius }, _) => {
                blurred = blur_rgba(&pixels, dims.width, dims.height, *radius)?;
                &blurred
            }
            (Backdrop::Image(_), _) => {
                blurred = blur_rgba(&pixels, dims.width, dims.height, self.config.blur_radius)?;
                &blurred
            }
        };

        blend_over(&pixels, background, mask).map(Some)
    }

    fn run_inference(&self, frame: &VideoFrame) -> PipelineResult<Option<Mask>> {
        let mut guard = match self.backend.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::WouldBlock) => {
                trace!("Segmentation backend busy, passing frame through");
                return Ok(None);
            }
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
        };
        match guard.as_mut() {
            Some(backend) => backend.infer(frame).map(Some),
            None => Ok(None),
        }
    }

    fn mark_processed(&self) {
        self.processed.send_modify(|n| *n += 1);
        let n = *self.processed.borrow();
        if n % FRAME_LOG_INTERVAL == 0 {
            trace!(frames = n, tier = %self.config.tier, "Background effect running");
        }
    }

    /// Forget temporal state (after a dimension change)
    pub fn restart(&mut self) {
        self.smoothing.reset();
        self.buffers = None;
    }

    /// Release the backend and all buffers
    ///
    /// Safe to call more than once; also runs on drop.
    pub fn destroy(&mut self) {
        let backend = self
            .backend
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(mut backend) = backend {
            backend.close();
            debug!(variant = %backend.variant(), "Segmentation backend closed");
        }
        self.smoothing.reset();
        self.buffers = None;
        self.destroyed = true;
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }
}

/// First failure and then one in every `FRAME_LOG_INTERVAL`
fn should_log_failure(failed: u64) -> bool {
    failed == 1 || failed % FRAME_LOG_INTERVAL == 0
}

impl Drop for SegmentationTransformer {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl std::fmt::Debug for SegmentationTransformer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentationTransformer")
            .field("tier", &self.config.tier)
            .field("backdrop", &self.backdrop)
            .field("backend", &self.backend_variant())
            .field("destroyed", &self.destroyed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::inference::BuiltinEngineFactory;
    use crate::constants::QualityTier;
    use crate::errors::PipelineError;
    use crate::pipelines::quality::resolve;

    struct FailingEngine;

    impl SegmentationEngine for FailingEngine {
        fn infer(&mut self, _frame: &VideoFrame) -> PipelineResult<Mask> {
            Err(PipelineError::inference("boom"))
        }

        fn close(&mut self) {}
    }

    struct FailingFactory;

    #[async_trait::async_trait]
    impl crate::backends::inference::EngineFactory for FailingFactory {
        async fn create(
            &self,
            _model: &ModelReference,
            _delegate: crate::pipelines::types::Delegate,
        ) -> PipelineResult<Box<dyn SegmentationEngine>> {
            Ok(Box::new(FailingEngine))
        }
    }

    fn factory() -> Arc<dyn EngineFactory> {
        Arc::new(BuiltinEngineFactory::new(true))
    }

    /// Grey background, red subject in the centre
    fn subject_frame(width: u32, height: u32) -> VideoFrame {
        let mut data = Vec::with_capacity((width * height * 4) as usize);
        for y in 0..height {
            for x in 0..width {
                let inside =
                    x > width / 4 && x < 3 * width / 4 && y > height / 4 && y < 3 * height / 4;
                if inside {
                    data.extend_from_slice(&[230, 20, 20, 255]);
                } else if (x + y) % 2 == 0 {
                    data.extend_from_slice(&[80, 80, 80, 255]);
                } else {
                    data.extend_from_slice(&[100, 100, 100, 255]);
                }
            }
        }
        VideoFrame::from_rgba(width, height, data).unwrap()
    }

    fn blur_stage(tier: QualityTier) -> SegmentationTransformer {
        let config = resolve(tier, None);
        SegmentationTransformer::new(
            config,
            ModelReference::builtin(config.backend),
            Backdrop::Blur {
                radius: config.blur_radius,
            },
            factory(),
        )
    }

    #[test]
    fn frames_pass_through_before_init() {
        let mut stage = blur_stage(QualityTier::Medium);
        let frame = subject_frame(16, 16);
        let out = stage.transform(frame.clone());
        assert!(Arc::ptr_eq(&out.data, &frame.data));
        assert_eq!(stage.processed_frames(), 0);
    }

    #[tokio::test]
    async fn blur_keeps_subject_and_softens_background() {
        let mut stage = blur_stage(QualityTier::Low);
        stage.init().await.unwrap();
        let frame = subject_frame(32, 32);

        let out = stage.transform(frame.clone());

        assert_eq!(stage.processed_frames(), 1);
        // Subject pixel untouched
        assert_eq!(out.pixel(16, 16), frame.pixel(16, 16));
        // Checkerboard background averaged toward its mean
        let corner = out.pixel(1, 1)[0];
        assert!(corner > 80 && corner < 100, "corner = {}", corner);
    }

    #[tokio::test]
    async fn image_backdrop_replaces_background() {
        let config = resolve(QualityTier::Low, None);
        let image = Arc::new(RgbaImage::from_pixel(8, 8, image::Rgba([0, 0, 255, 255])));
        let mut stage = SegmentationTransformer::new(
            config,
            ModelReference::builtin(config.backend),
            Backdrop::Image(image),
            factory(),
        );
        stage.init().await.unwrap();

        let out = stage.transform(subject_frame(32, 32));
        assert_eq!(out.pixel(0, 0), [0, 0, 255, 255]);
        assert_eq!(out.pixel(16, 16), [230, 20, 20, 255]);
    }

    #[tokio::test]
    async fn inference_failure_passes_frame_through() {
        let config = resolve(QualityTier::Low, None);
        let mut stage = SegmentationTransformer::new(
            config,
            ModelReference::builtin(config.backend),
            Backdrop::Blur { radius: 6 },
            Arc::new(FailingFactory),
        );
        stage.init().await.unwrap();

        let frame = subject_frame(16, 16);
        let out = stage.transform(frame.clone());
        assert!(Arc::ptr_eq(&out.data, &frame.data));

        for _ in 1..FRAME_LOG_INTERVAL * 2 {
            stage.transform(subject_frame(16, 16));
        }
        assert_eq!(stage.failed_frames(), FRAME_LOG_INTERVAL * 2);
        assert_eq!(stage.processed_frames(), 0);
    }

    #[test]
    fn persistent_failures_are_logged_sparsely() {
        let logged = (1..=FRAME_LOG_INTERVAL * 3)
            .filter(|n| should_log_failure(*n))
            .count();
        assert_eq!(logged, 4);
        assert!(should_log_failure(1));
        assert!(!should_log_failure(2));
        assert!(should_log_failure(FRAME_LOG_INTERVAL));
    }

    #[tokio::test]
    async fn dimension_change_reallocates() {
        let mut stage = blur_stage(QualityTier::Medium);
        stage.init().await.unwrap();

        stage.transform(subject_frame(32, 24));
        let out = stage.transform(subject_frame(24, 32));

        assert_eq!(out.dimensions(), Dimensions::new(24, 32));
        assert_eq!(stage.smoothing.dimensions(), Some(Dimensions::new(24, 32)));
        assert_eq!(stage.processed_frames(), 2);
    }

    #[test]
    fn zero_strength_is_identity() {
        let config = resolve(QualityTier::High, None);
        let mut stage = SegmentationTransformer::zero_strength(config, factory());
        assert!(stage.is_ready());

        let frame = subject_frame(8, 8);
        let out = stage.transform(frame.clone());
        assert!(Arc::ptr_eq(&out.data, &frame.data));
        assert_eq!(stage.processed_frames(), 1);
    }

    #[tokio::test]
    async fn destroy_releases_backend() {
        let mut stage = blur_stage(QualityTier::Low);
        stage.init().await.unwrap();
        assert_eq!(stage.backend_variant(), Some(BackendVariant::Default));

        stage.destroy();
        stage.destroy();

        assert!(stage.is_destroyed());
        assert_eq!(stage.backend_variant(), None);
        let frame = subject_frame(8, 8);
        let out = stage.transform(frame.clone());
        assert!(Arc::ptr_eq(&out.data, &frame.data));
    }
}
