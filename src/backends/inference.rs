// SPDX-License-Identifier: GPL-3.0-only

//! Segmentation inference backends
//!
//! The inference backend is a collaborator: an [`EngineFactory`] creates an
//! engine for a [`ModelReference`] and [`Delegate`], and the engine turns
//! frames into foreground masks. The built-in [`HeuristicEngine`] runs on the
//! CPU without a model file so the pipeline works out of the box.

use crate::constants::segmentation::{
    BORDER_BAND_FRACTION, DEFAULT_SAMPLE_STEP, ENHANCED_SAMPLE_STEP, FOREGROUND_RAMP_END,
    FOREGROUND_RAMP_START,
};
use crate::errors::{PipelineError, PipelineResult};
use crate::media::frame::{Dimensions, Mask, RGBA_BYTES, VideoFrame};
use crate::pipelines::types::{BackendVariant, Delegate};
use async_trait::async_trait;
use std::path::PathBuf;
use tracing::{debug, info};

/// Longest RGB distance (black to white)
const MAX_RGB_DISTANCE: f32 = 441.672_96;

/// Which model to load
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelReference {
    pub variant: BackendVariant,
    /// Model file, if the backend needs one
    pub path: Option<PathBuf>,
}

impl ModelReference {
    /// Model bundled with the backend
    pub fn builtin(variant: BackendVariant) -> Self {
        Self {
            variant,
            path: None,
        }
    }

    pub fn with_path(variant: BackendVariant, path: impl Into<PathBuf>) -> Self {
        Self {
            variant,
            path: Some(path.into()),
        }
    }
}

/// A loaded segmentation model
pub trait SegmentationEngine: Send {
    /// Produce a foreground mask for one frame
    ///
    /// The mask should match the frame's dimensions; callers resample it
    /// otherwise.
    fn infer(&mut self, frame: &VideoFrame) -> PipelineResult<Mask>;

    /// Release the model
    fn close(&mut self);
}

/// Loads segmentation engines
#[async_trait]
pub trait EngineFactory: Send + Sync {
    async fn create(
        &self,
        model: &ModelReference,
        delegate: Delegate,
    ) -> PipelineResult<Box<dyn SegmentationEngine>>;
}

/// CPU segmentation by colour distance from the frame border
///
/// Estimates the background colour from a band along the frame edges and
/// ramps each pixel's foreground confidence with its distance from it.
/// Works for subjects in front of plain backgrounds.
pub struct HeuristicEngine {
    sample_step: u32,
    closed: bool,
}

impl HeuristicEngine {
    pub fn new(sample_step: u32) -> Self {
        Self {
            sample_step: sample_step.max(1),
            closed: false,
        }
    }

    pub fn sample_step(&self) -> u32 {
        self.sample_step
    }
}

impl SegmentationEngine for HeuristicEngine {
    fn infer(&mut self, frame: &VideoFrame) -> PipelineResult<Mask> {
        if self.closed {
            return Err(PipelineError::inference("engine is closed"));
        }
        let dims = frame.dimensions();
        if dims.is_empty() {
            return Err(PipelineError::invalid_frame("empty frame"));
        }

        let pixels = frame.packed_rgba();
        let width = dims.width as usize;
        let step = self.sample_step as usize;
        let reference = border_mean(&pixels, dims, step);

        let sampled = Dimensions::new(
            dims.width.div_ceil(self.sample_step),
            dims.height.div_ceil(self.sample_step),
        );
        let mut data = Vec::with_capacity(sampled.area());
        for sy in 0..sampled.height as usize {
            for sx in 0..sampled.width as usize {
                let idx = ((sy * step) * width + sx * step) * RGBA_BYTES;
                let dist = rgb_distance(&pixels[idx..idx + 3], reference) / MAX_RGB_DISTANCE;
                let confidence = smoothstep(FOREGROUND_RAMP_START, FOREGROUND_RAMP_END, dist);
                data.push((confidence * 255.0).round() as u8);
            }
        }

        let mask = Mask {
            width: sampled.width,
            height: sampled.height,
            data,
        };
        Ok(mask.resized(dims))
    }

    fn close(&mut self) {
        self.closed = true;
    }
}

/// Mean colour of the border band
fn border_mean(pixels: &[u8], dims: Dimensions, step: usize) -> [f32; 3] {
    let width = dims.width as usize;
    let height = dims.height as usize;
    let band = ((width.min(height) as f32 * BORDER_BAND_FRACTION) as usize).max(1);

    let mut sum = [0f64; 3];
    let mut count = 0u64;
    for y in (0..height).step_by(step) {
        let edge_row = y < band || y + band >= height;
        for x in (0..width).step_by(step) {
            if !edge_row && x >= band && x + band < width {
                continue;
            }
            let idx = (y * width + x) * RGBA_BYTES;
            for c in 0..3 {
                sum[c] += f64::from(pixels[idx + c]);
            }
            count += 1;
        }
    }

    if count == 0 {
        return [0.0; 3];
    }
    [
        (sum[0] / count as f64) as f32,
        (sum[1] / count as f64) as f32,
        (sum[2] / count as f64) as f32,
    ]
}

fn rgb_distance(px: &[u8], reference: [f32; 3]) -> f32 {
    let dr = f32::from(px[0]) - reference[0];
    let dg = f32::from(px[1]) - reference[1];
    let db = f32::from(px[2]) - reference[2];
    (dr * dr + dg * dg + db * db).sqrt()
}

fn smoothstep(edge0: f32, edge1: f32, x: f32) -> f32 {
    let t = ((x - edge0) / (edge1 - edge0)).clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

/// Factory for the built-in engines
///
/// The enhanced variant needs a GPU when asked for the GPU delegate, and its
/// model file when one is configured; otherwise initialization fails and the
/// caller is expected to fall back to the default variant.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinEngineFactory {
    gpu_available: bool,
}

impl BuiltinEngineFactory {
    pub fn new(gpu_available: bool) -> Self {
        Self { gpu_available }
    }
}

#[async_trait]
impl EngineFactory for BuiltinEngineFactory {
    async fn create(
        &self,
        model: &ModelReference,
        delegate: Delegate,
    ) -> PipelineResult<Box<dyn SegmentationEngine>> {
        match model.variant {
            BackendVariant::Default => {
                if delegate == Delegate::Gpu && !self.gpu_available {
                    debug!("No GPU available, default backend runs on CPU");
                }
                Ok(Box::new(HeuristicEngine::new(DEFAULT_SAMPLE_STEP)))
            }
            BackendVariant::Enhanced => {
                if delegate == Delegate::Gpu && !self.gpu_available {
                    return Err(PipelineError::initialization(
                        "enhanced backend requested the GPU delegate but no GPU is available",
                    ));
                }
                if let Some(path) = &model.path {
                    tokio::fs::metadata(path).await.map_err(|e| {
                        PipelineError::initialization(format!(
                            "enhanced model {}: {}",
                            path.display(),
                            e
                        ))
                    })?;
                }
                info!(%delegate, "Enhanced segmentation backend loaded");
                Ok(Box::new(HeuristicEngine::new(ENHANCED_SAMPLE_STEP)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Grey frame with a red square in the middle
    fn subject_frame(size: u32, square: u32) -> VideoFrame {
        let mut data = Vec::with_capacity((size * size * 4) as usize);
        let lo = (size - square) / 2;
        let hi = lo + square;
        for y in 0..size {
            for x in 0..size {
                if (lo..hi).contains(&x) && (lo..hi).contains(&y) {
                    data.extend_from_slice(&[220, 30, 30, 255]);
                } else {
                    data.extend_from_slice(&[90, 90, 90, 255]);
                }
            }
        }
        VideoFrame::from_rgba(size, size, data).unwrap()
    }

    #[test]
    fn heuristic_separates_subject_from_plain_background() {
        let frame = subject_frame(40, 16);
        let mut engine = HeuristicEngine::new(1);
        let mask = engine.infer(&frame).unwrap();

        assert_eq!(mask.dimensions(), frame.dimensions());
        assert_eq!(mask.get(20, 20), 255);
        assert_eq!(mask.get(1, 1), 0);
    }

    #[test]
    fn sampled_mask_is_upsampled_to_frame_size() {
        let frame = subject_frame(41, 16);
        let mut engine = HeuristicEngine::new(4);
        let mask = engine.infer(&frame).unwrap();
        assert_eq!(mask.dimensions(), Dimensions::new(41, 41));
    }

    #[test]
    fn closed_engine_fails() {
        let mut engine = HeuristicEngine::new(1);
        engine.close();
        assert!(engine.infer(&subject_frame(8, 2)).is_err());
    }

    #[tokio::test]
    async fn enhanced_without_gpu_fails_to_initialize() {
        let factory = BuiltinEngineFactory::new(false);
        let enhanced = ModelReference::builtin(BackendVariant::Enhanced);
        assert!(factory.create(&enhanced, Delegate::Gpu).await.is_err());
        assert!(factory.create(&enhanced, Delegate::Cpu).await.is_ok());

        let default = ModelReference::builtin(BackendVariant::Default);
        assert!(factory.create(&default, Delegate::Gpu).await.is_ok());
    }

    #[tokio::test]
    async fn enhanced_with_missing_model_fails() {
        let factory = BuiltinEngineFactory::new(true);
        let model = ModelReference::with_path(BackendVariant::Enhanced, "/nonexistent/model.bin");
        assert!(factory.create(&model, Delegate::Gpu).await.is_err());
    }
}
