// SPDX-License-Identifier: GPL-3.0-only

//! Pipeline-wide constants

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

/// Background effect quality tiers
///
/// Each tier bundles a blur strength, compute delegate, segmentation backend
/// and mask refinement defaults. Strength increases from `Low` to `Ultra`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub enum QualityTier {
    /// Light blur on the cheap backend, CPU inference
    Low,
    /// Balanced blur and cost (default)
    #[default]
    Medium,
    /// Enhanced backend with mask refinement
    High,
    /// Strongest blur, enhanced backend, aggressive refinement
    Ultra,
}

impl QualityTier {
    /// Get all tiers for UI iteration, lowest first
    pub const ALL: [QualityTier; 4] = [
        QualityTier::Low,
        QualityTier::Medium,
        QualityTier::High,
        QualityTier::Ultra,
    ];

    /// Get display name for the tier
    pub fn display_name(&self) -> &'static str {
        match self {
            QualityTier::Low => "Low",
            QualityTier::Medium => "Medium",
            QualityTier::High => "High",
            QualityTier::Ultra => "Ultra",
        }
    }

    /// Whether this tier requests the enhanced segmentation backend
    pub fn prefers_enhanced_backend(&self) -> bool {
        matches!(self, QualityTier::High | QualityTier::Ultra)
    }
}

impl std::fmt::Display for QualityTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

impl FromStr for QualityTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(QualityTier::Low),
            "medium" | "med" => Ok(QualityTier::Medium),
            "high" => Ok(QualityTier::High),
            "ultra" => Ok(QualityTier::Ultra),
            other => Err(format!("unknown quality tier '{}'", other)),
        }
    }
}

/// Smallest temporal smoothing factor accepted from custom settings
///
/// A factor of zero would freeze the mask on its first value.
pub const MIN_SMOOTHING_FACTOR: f32 = 0.05;

/// Largest blur radius accepted from custom settings
pub const MAX_BLUR_RADIUS: u32 = 64;

/// Largest morphological kernel accepted from custom settings
pub const MAX_KERNEL_SIZE: u32 = 15;

/// Lifecycle controller timing constants
pub mod timing {
    use super::Duration;

    /// How long to wait for the first processed frame before revealing video
    pub const FIRST_FRAME_TIMEOUT: Duration = Duration::from_millis(1500);

    /// Frame counter modulo for periodic logging
    pub const FRAME_LOG_INTERVAL: u64 = 120;
}

/// Orientation/dimension watcher constants
pub mod orientation {
    use super::Duration;

    /// Interval between dimension readings after an orientation signal
    pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

    /// Consecutive identical readings required before dimensions count as settled
    pub const REQUIRED_STABLE_READINGS: u32 = 3;

    /// Maximum readings per orientation signal
    pub const MAX_ATTEMPTS: u32 = 30;
}

/// Built-in segmentation engine tuning
pub mod segmentation {
    /// Sampling step of the default (cheaper) backend
    pub const DEFAULT_SAMPLE_STEP: u32 = 4;

    /// Sampling step of the enhanced backend
    pub const ENHANCED_SAMPLE_STEP: u32 = 1;

    /// Border band used to estimate the background colour, as a fraction of the short side
    pub const BORDER_BAND_FRACTION: f32 = 0.05;

    /// Normalised colour distance at which a pixel starts to count as foreground
    pub const FOREGROUND_RAMP_START: f32 = 0.12;

    /// Normalised colour distance at which a pixel is certain foreground
    pub const FOREGROUND_RAMP_END: f32 = 0.30;
}

/// Supported background image file extensions
pub mod file_formats {
    /// Supported image file extensions
    pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "bmp", "webp"];

    /// Check if a file extension is a supported image format
    pub fn is_image_extension(ext: &str) -> bool {
        IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_parsing() {
        assert_eq!("HIGH".parse::<QualityTier>(), Ok(QualityTier::High));
        assert_eq!(" low ".parse::<QualityTier>(), Ok(QualityTier::Low));
        assert!("extreme".parse::<QualityTier>().is_err());
    }

    #[test]
    fn test_enhanced_preference() {
        assert!(!QualityTier::Low.prefers_enhanced_backend());
        assert!(!QualityTier::Medium.prefers_enhanced_backend());
        assert!(QualityTier::High.prefers_enhanced_backend());
        assert!(QualityTier::Ultra.prefers_enhanced_backend());
    }
}
