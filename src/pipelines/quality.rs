// SPDX-License-Identifier: GPL-3.0-only

//! Quality resolver
//!
//! Maps a [`QualityTier`] (optionally overridden by [`CustomSettings`]) to a
//! concrete [`PipelineConfiguration`]. Pure; no I/O.

use crate::constants::{MAX_BLUR_RADIUS, MAX_KERNEL_SIZE, MIN_SMOOTHING_FACTOR, QualityTier};
use crate::pipelines::types::{
    BackendVariant, CustomSettings, Delegate, EnhancedDetection, PipelineConfiguration,
};

/// Resolve a tier and optional override set into a pipeline configuration
///
/// Overrides replace every tier default. Values are clamped to the ranges the
/// transformer can honour.
pub fn resolve(tier: QualityTier, custom: Option<&CustomSettings>) -> PipelineConfiguration {
    let config = match custom {
        Some(custom) => PipelineConfiguration {
            tier,
            blur_radius: custom.blur_radius,
            delegate: custom.delegate,
            backend: custom.backend,
            detection: custom.detection,
            smoothing_factor: custom.smoothing_factor,
        },
        None => tier_defaults(tier),
    };
    sanitize(config)
}

/// Fixed defaults for a tier
pub fn tier_defaults(tier: QualityTier) -> PipelineConfiguration {
    match tier {
        QualityTier::Low => PipelineConfiguration {
            tier,
            blur_radius: 6,
            delegate: Delegate::Cpu,
            backend: BackendVariant::Default,
            detection: EnhancedDetection::DISABLED,
            smoothing_factor: 0.8,
        },
        QualityTier::Medium => PipelineConfiguration {
            tier,
            blur_radius: 10,
            delegate: Delegate::Gpu,
            backend: BackendVariant::Default,
            detection: EnhancedDetection::DISABLED,
            smoothing_factor: 0.7,
        },
        QualityTier::High => PipelineConfiguration {
            tier,
            blur_radius: 15,
            delegate: Delegate::Gpu,
            backend: BackendVariant::Enhanced,
            detection: EnhancedDetection {
                enabled: true,
                confidence_threshold: 0.5,
                kernel_size: 3,
                keep_largest_region: true,
                min_mask_area_ratio: 0.02,
            },
            smoothing_factor: 0.6,
        },
        QualityTier::Ultra => PipelineConfiguration {
            tier,
            blur_radius: 20,
            delegate: Delegate::Gpu,
            backend: BackendVariant::Enhanced,
            detection: EnhancedDetection {
                enabled: true,
                confidence_threshold: 0.6,
                kernel_size: 5,
                keep_largest_region: true,
                min_mask_area_ratio: 0.03,
            },
            smoothing_factor: 0.5,
        },
    }
}

fn sanitize(mut config: PipelineConfiguration) -> PipelineConfiguration {
    config.blur_radius = config.blur_radius.min(MAX_BLUR_RADIUS);
    config.smoothing_factor = if config.smoothing_factor.is_finite() {
        config.smoothing_factor.clamp(MIN_SMOOTHING_FACTOR, 1.0)
    } else {
        1.0
    };

    let detection = &mut config.detection;
    detection.confidence_threshold = finite_unit(detection.confidence_threshold);
    detection.min_mask_area_ratio = finite_unit(detection.min_mask_area_ratio);
    // Even kernels have no centre pixel
    detection.kernel_size = detection.kernel_size.clamp(1, MAX_KERNEL_SIZE) | 1;
    config
}

fn finite_unit(v: f32) -> f32 {
    if v.is_finite() { v.clamp(0.0, 1.0) } else { 0.0 }
}
