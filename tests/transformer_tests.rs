// SPDX-License-Identifier: GPL-3.0-only

//! Integration tests for the segmentation frame transformer and quality resolver

use backdrop::QualityTier;
use backdrop::backends::{BuiltinEngineFactory, ModelReference};
use backdrop::media::{Dimensions, VideoFrame};
use backdrop::pipelines::{
    Backdrop, BackendVariant, CustomSettings, Delegate, EnhancedDetection, SegmentationTransformer,
    resolve,
};
use std::sync::Arc;

const SUBJECT: [u8; 4] = [230, 20, 20, 255];

/// Plain grey frame with a small red speck
fn speck_frame() -> VideoFrame {
    let dims = Dimensions::new(64, 64);
    let mut data = Vec::with_capacity(dims.area() * 4);
    for y in 0..dims.height {
        for x in 0..dims.width {
            if (32..34).contains(&x) && (32..34).contains(&y) {
                data.extend_from_slice(&SUBJECT);
            } else {
                data.extend_from_slice(&[90, 90, 90, 255]);
            }
        }
    }
    VideoFrame::from_rgba(dims.width, dims.height, data).unwrap()
}

async fn stage(detection: EnhancedDetection) -> SegmentationTransformer {
    let custom = CustomSettings {
        blur_radius: 8,
        delegate: Delegate::Cpu,
        backend: BackendVariant::Default,
        detection,
        smoothing_factor: 1.0,
    };
    let config = resolve(QualityTier::High, Some(&custom));
    let stage = SegmentationTransformer::new(
        config,
        ModelReference::builtin(config.backend),
        Backdrop::Blur {
            radius: config.blur_radius,
        },
        Arc::new(BuiltinEngineFactory::new(false)),
    );
    stage.init().await.unwrap();
    stage
}

#[tokio::test]
async fn test_tiny_foreground_is_rejected_as_false_positive() {
    let high = resolve(QualityTier::High, None).detection;
    let mut refined = stage(high).await;
    let mut raw = stage(EnhancedDetection::DISABLED).await;

    let refined_out = refined.transform(speck_frame());
    let raw_out = raw.transform(speck_frame());

    // Without refinement the speck counts as foreground and stays sharp
    assert_eq!(raw_out.pixel(32, 32), SUBJECT);
    // With refinement it is below the minimum area and gets blurred away
    assert_ne!(refined_out.pixel(32, 32), SUBJECT);
    assert_eq!(refined.processed_frames(), 1);
}

#[tokio::test]
async fn test_output_keeps_frame_geometry_across_resizes() {
    let mut stage = stage(EnhancedDetection::DISABLED).await;
    for dims in [Dimensions::new(64, 48), Dimensions::new(48, 64), Dimensions::new(64, 48)] {
        let out = stage.transform(VideoFrame::solid(dims, [90, 90, 90, 255]));
        assert_eq!(out.dimensions(), dims);
    }
    assert_eq!(stage.processed_frames(), 3);
}

#[test]
fn test_backend_variant_follows_tier() {
    for tier in QualityTier::ALL {
        let config = resolve(tier, None);
        let expected = if tier.prefers_enhanced_backend() {
            BackendVariant::Enhanced
        } else {
            BackendVariant::Default
        };
        assert_eq!(config.backend, expected, "tier {}", tier);
        assert_eq!(config.detection.enabled, tier.prefers_enhanced_backend());
    }
    assert_eq!(resolve(QualityTier::Low, None).delegate, Delegate::Cpu);
}
