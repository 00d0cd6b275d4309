// SPDX-License-Identifier: GPL-3.0-only

//! Shared types for the background pipeline

use crate::constants::QualityTier;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Compute backend used for inference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Delegate {
    #[default]
    Cpu,
    Gpu,
}

impl std::fmt::Display for Delegate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Delegate::Cpu => write!(f, "CPU"),
            Delegate::Gpu => write!(f, "GPU"),
        }
    }
}

/// Segmentation backend variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum BackendVariant {
    /// Cheaper backend, always available
    #[default]
    Default,
    /// Higher quality backend that may fail to load
    Enhanced,
}

impl std::fmt::Display for BackendVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendVariant::Default => write!(f, "default"),
            BackendVariant::Enhanced => write!(f, "enhanced"),
        }
    }
}

/// Mask refinement parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EnhancedDetection {
    /// Whether refinement runs at all
    pub enabled: bool,
    /// Pixels below this confidence (0-1) become background
    pub confidence_threshold: f32,
    /// Side of the square morphological kernel (odd, 1 disables the pass)
    pub kernel_size: u32,
    /// Keep only the largest connected foreground region
    pub keep_largest_region: bool,
    /// Foreground smaller than this fraction of the frame is discarded entirely
    pub min_mask_area_ratio: f32,
}

impl EnhancedDetection {
    /// Refinement turned off
    pub const DISABLED: EnhancedDetection = EnhancedDetection {
        enabled: false,
        confidence_threshold: 0.0,
        kernel_size: 1,
        keep_largest_region: false,
        min_mask_area_ratio: 0.0,
    };
}

impl Default for EnhancedDetection {
    fn default() -> Self {
        Self::DISABLED
    }
}

/// Concrete settings for one pipeline instance
///
/// Produced by [`crate::pipelines::quality::resolve`]; never mutated, only replaced.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfiguration {
    pub tier: QualityTier,
    /// Blur radius in pixels (0 = no blur)
    pub blur_radius: u32,
    pub delegate: Delegate,
    pub backend: BackendVariant,
    pub detection: EnhancedDetection,
    /// Exponential smoothing factor applied to each new mask (1 = no smoothing)
    pub smoothing_factor: f32,
}

/// User-supplied override set
///
/// When present it replaces every tier default; nothing is merged.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CustomSettings {
    pub blur_radius: u32,
    pub delegate: Delegate,
    pub backend: BackendVariant,
    pub detection: EnhancedDetection,
    pub smoothing_factor: f32,
}

impl CustomSettings {
    /// Stable hash of every field, used to detect override changes
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.blur_radius.hash(&mut hasher);
        self.delegate.hash(&mut hasher);
        self.backend.hash(&mut hasher);
        self.detection.enabled.hash(&mut hasher);
        self.detection.confidence_threshold.to_bits().hash(&mut hasher);
        self.detection.kernel_size.hash(&mut hasher);
        self.detection.keep_largest_region.hash(&mut hasher);
        self.detection.min_mask_area_ratio.to_bits().hash(&mut hasher);
        self.smoothing_factor.to_bits().hash(&mut hasher);
        hasher.finish()
    }
}

impl From<PipelineConfiguration> for CustomSettings {
    fn from(config: PipelineConfiguration) -> Self {
        Self {
            blur_radius: config.blur_radius,
            delegate: config.delegate,
            backend: config.backend,
            detection: config.detection,
            smoothing_factor: config.smoothing_factor,
        }
    }
}

/// Kind of background effect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum BackgroundKind {
    /// No effect
    #[default]
    None,
    /// Blurred camera background
    Blur,
    /// Bundled static image
    Image,
    /// User-uploaded media
    Upload,
}

impl std::fmt::Display for BackgroundKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackgroundKind::None => write!(f, "none"),
            BackgroundKind::Blur => write!(f, "blur"),
            BackgroundKind::Image => write!(f, "image"),
            BackgroundKind::Upload => write!(f, "upload"),
        }
    }
}

/// What the UI wants the pipeline to show
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DesiredState {
    pub kind: BackgroundKind,
    /// Image path or upload identifier (unused for `None` and `Blur`)
    pub source: Option<String>,
    pub tier: QualityTier,
    pub custom: Option<CustomSettings>,
    /// Bumped to force a rebuild without a logical change
    pub reapply: u64,
}

impl DesiredState {
    pub fn custom_fingerprint(&self) -> Option<u64> {
        self.custom.as_ref().map(CustomSettings::fingerprint)
    }
}

/// Mirror of the comparable desired-state fields the controller acted on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedState {
    pub kind: BackgroundKind,
    pub source: Option<String>,
    pub tier: QualityTier,
    pub custom_fingerprint: Option<u64>,
    pub reapply: u64,
    /// Tier actually realized (None when no segmentation stage is attached)
    pub realized_tier: Option<QualityTier>,
    /// Backend actually running (differs from the request after a fallback)
    pub realized_backend: Option<BackendVariant>,
}

impl AppliedState {
    /// Claim for a desired state whose attach has not completed yet
    pub fn claim(desired: &DesiredState) -> Self {
        Self {
            kind: desired.kind,
            source: desired.source.clone(),
            tier: desired.tier,
            custom_fingerprint: desired.custom_fingerprint(),
            reapply: desired.reapply,
            realized_tier: None,
            realized_backend: None,
        }
    }

    /// Whether this state already covers `desired`
    pub fn matches(&self, desired: &DesiredState) -> bool {
        self.kind == desired.kind
            && self.source == desired.source
            && self.tier == desired.tier
            && self.custom_fingerprint == desired.custom_fingerprint()
            && self.reapply == desired.reapply
    }

    pub(crate) fn realized(
        mut self,
        tier: Option<QualityTier>,
        backend: Option<BackendVariant>,
    ) -> Self {
        self.realized_tier = tier;
        self.realized_backend = backend;
        self
    }
}

/// Lifecycle controller state per camera session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ControllerState {
    #[default]
    Idle,
    Applying,
    Applied,
    Disposed,
}

/// Status signal exposed to the UI
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PipelineStatus {
    /// Nothing attached yet
    #[default]
    Idle,
    /// A new stage is being prepared
    Applying,
    /// A stage is attached and running
    Active {
        backend: Option<BackendVariant>,
        /// The enhanced backend was requested but the default one is running
        substituted: bool,
    },
    /// No segmentation backend could be loaded; the camera feed is unmodified
    Failed(String),
    /// Session ended
    Disposed,
}

/// Result of one reconcile call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Desired state already applied or being applied
    Unchanged,
    /// The new stage is attached
    Applied(AppliedState),
    /// A newer reconcile took over
    Superseded,
    /// The track ended before the attach
    Aborted,
    /// The session was disposed
    Disposed,
}
