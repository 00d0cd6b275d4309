// SPDX-License-Identifier: GPL-3.0-only

//! Live video track abstraction
//!
//! A [`TrackHandle`] is the media collaborator the lifecycle controller drives:
//! it reports liveness and frame size, and it accepts a processing stage that
//! runs on every captured frame. [`LocalTrack`] is the in-process track used
//! by the CLI and tests; frames are pushed into it by the capture loop.

use crate::errors::{PipelineError, PipelineResult};
use crate::media::frame::{Dimensions, VideoFrame};
use crate::pipelines::transformer::SegmentationTransformer;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use tracing::{debug, info};

/// Live camera track that can carry one processing stage
#[async_trait]
pub trait TrackHandle: Send + Sync {
    /// Whether the track is still delivering frames
    fn is_live(&self) -> bool;

    /// Current frame size, once known
    fn frame_dimensions(&self) -> Option<Dimensions>;

    /// Swap the processing stage atomically
    ///
    /// `None` clears the stage. Frames keep flowing during the swap; the
    /// previous stage is destroyed after the new one is installed.
    async fn replace_processing_stage(
        &self,
        stage: Option<SegmentationTransformer>,
    ) -> PipelineResult<()>;

    /// Tear down the stage and release the processing path entirely
    ///
    /// Only called at session end; on some platforms this disturbs the
    /// underlying capture.
    async fn fully_detach(&self) -> PipelineResult<()>;
}

/// In-process track fed by [`push_frame`](LocalTrack::push_frame)
#[derive(Debug)]
pub struct LocalTrack {
    live: AtomicBool,
    dimensions: Mutex<Option<Dimensions>>,
    stage: Mutex<Option<SegmentationTransformer>>,
    replacements: AtomicU64,
    detaches: AtomicU64,
}

impl Default for LocalTrack {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalTrack {
    pub fn new() -> Self {
        Self {
            live: AtomicBool::new(true),
            dimensions: Mutex::new(None),
            stage: Mutex::new(None),
            replacements: AtomicU64::new(0),
            detaches: AtomicU64::new(0),
        }
    }

    /// Track that already knows its frame size
    pub fn with_dimensions(dims: Dimensions) -> Self {
        let track = Self::new();
        *track.dimensions.lock().unwrap_or_else(PoisonError::into_inner) = Some(dims);
        track
    }

    /// Run one captured frame through the attached stage
    ///
    /// Frames pushed after [`end`](Self::end) are returned unchanged.
    pub fn push_frame(&self, frame: VideoFrame) -> VideoFrame {
        *self.dimensions.lock().unwrap_or_else(PoisonError::into_inner) = Some(frame.dimensions());
        if !self.is_live() {
            return frame;
        }
        let mut stage = self.stage.lock().unwrap_or_else(PoisonError::into_inner);
        match stage.as_mut() {
            Some(stage) => stage.transform(frame),
            None => frame,
        }
    }

    /// Report a new frame size without delivering a frame
    pub fn set_dimensions(&self, dims: Dimensions) {
        *self.dimensions.lock().unwrap_or_else(PoisonError::into_inner) = Some(dims);
    }

    /// Stop the track
    pub fn end(&self) {
        if self.live.swap(false, Ordering::SeqCst) {
            info!("Track ended");
        }
    }

    pub fn has_stage(&self) -> bool {
        self.stage
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Run `f` against the attached stage, if any
    pub fn with_stage<R>(&self, f: impl FnOnce(&SegmentationTransformer) -> R) -> Option<R> {
        self.stage
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(f)
    }

    /// Number of stage swaps so far
    pub fn replacement_count(&self) -> u64 {
        self.replacements.load(Ordering::SeqCst)
    }

    /// Number of full detaches so far
    pub fn detach_count(&self) -> u64 {
        self.detaches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TrackHandle for LocalTrack {
    fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    fn frame_dimensions(&self) -> Option<Dimensions> {
        *self.dimensions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn replace_processing_stage(
        &self,
        stage: Option<SegmentationTransformer>,
    ) -> PipelineResult<()> {
        if !self.is_live() {
            return Err(PipelineError::StreamInvalid);
        }
        let previous = {
            let mut slot = self.stage.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut *slot, stage)
        };
        self.replacements.fetch_add(1, Ordering::SeqCst);
        if let Some(mut previous) = previous {
            previous.destroy();
            debug!("Previous processing stage destroyed");
        }
        Ok(())
    }

    async fn fully_detach(&self) -> PipelineResult<()> {
        let previous = self
            .stage
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(mut previous) = previous {
            previous.destroy();
        }
        self.detaches.fetch_add(1, Ordering::SeqCst);
        debug!("Processing path detached");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::inference::BuiltinEngineFactory;
    use crate::constants::QualityTier;
    use crate::pipelines::quality::resolve;
    use std::sync::Arc;

    fn identity_stage() -> SegmentationTransformer {
        SegmentationTransformer::zero_strength(
            resolve(QualityTier::Low, None),
            Arc::new(BuiltinEngineFactory::new(false)),
        )
    }

    #[tokio::test]
    async fn frames_flow_through_the_stage() {
        let track = LocalTrack::new();
        assert_eq!(track.frame_dimensions(), None);

        track.replace_processing_stage(Some(identity_stage())).await.unwrap();
        let frame = VideoFrame::solid(Dimensions::new(4, 2), [1, 2, 3, 255]);
        let out = track.push_frame(frame.clone());

        assert!(Arc::ptr_eq(&out.data, &frame.data));
        assert_eq!(track.frame_dimensions(), Some(Dimensions::new(4, 2)));
        assert_eq!(track.with_stage(|s| s.processed_frames()), Some(1));
    }

    #[tokio::test]
    async fn replace_on_ended_track_is_rejected() {
        let track = LocalTrack::new();
        track.end();
        let err = track
            .replace_processing_stage(Some(identity_stage()))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::StreamInvalid));
        assert!(!track.has_stage());
    }

    #[tokio::test]
    async fn clearing_the_stage_is_not_a_detach() {
        let track = LocalTrack::new();
        track.replace_processing_stage(Some(identity_stage())).await.unwrap();
        track.replace_processing_stage(None).await.unwrap();

        assert!(!track.has_stage());
        assert_eq!(track.replacement_count(), 2);
        assert_eq!(track.detach_count(), 0);

        track.fully_detach().await.unwrap();
        assert_eq!(track.detach_count(), 1);
    }
}
