// SPDX-License-Identifier: GPL-3.0-only

//! Persisted background settings
//!
//! Read once when a camera session starts to seed its desired state. The
//! pipeline itself never writes this file.

use crate::constants::QualityTier;
use crate::constants::timing::FIRST_FRAME_TIMEOUT;
use crate::device::DeviceProfile;
use crate::errors::{PipelineError, PipelineResult};
use crate::pipelines::orientation::StabilityConfig;
use crate::pipelines::session::SessionSettings;
use crate::pipelines::types::{BackgroundKind, CustomSettings, DesiredState};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Application directory under the user config dir
const APP_DIR: &str = "backdrop";
const CONFIG_FILE: &str = "config.json";

/// Orientation polling settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrientationSettings {
    pub poll_interval_ms: u64,
    pub required_stable_readings: u32,
    pub max_attempts: u32,
}

impl Default for OrientationSettings {
    fn default() -> Self {
        let defaults = StabilityConfig::default();
        Self {
            poll_interval_ms: defaults.poll_interval.as_millis() as u64,
            required_stable_readings: defaults.required_stable_readings,
            max_attempts: defaults.max_attempts,
        }
    }
}

impl From<OrientationSettings> for StabilityConfig {
    fn from(settings: OrientationSettings) -> Self {
        Self {
            poll_interval: Duration::from_millis(settings.poll_interval_ms),
            required_stable_readings: settings.required_stable_readings,
            max_attempts: settings.max_attempts,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Last selected background effect
    pub background: BackgroundKind,
    /// Image path for image and upload backgrounds
    pub background_source: Option<String>,
    /// Explicit quality tier (None = device recommendation)
    pub quality_tier: Option<QualityTier>,
    /// Custom override set replacing the tier defaults
    pub custom_settings: Option<CustomSettings>,
    /// Hide local video while a new effect is being applied
    pub hide_video_while_applying: bool,
    /// Upper bound on waiting for the first processed frame
    pub first_frame_timeout_ms: u64,
    pub orientation: OrientationSettings,
    /// Model file for the enhanced segmentation backend
    pub enhanced_model_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            background: BackgroundKind::None,
            background_source: None,
            quality_tier: None,
            custom_settings: None,
            hide_video_while_applying: true,
            first_frame_timeout_ms: FIRST_FRAME_TIMEOUT.as_millis() as u64,
            orientation: OrientationSettings::default(),
            enhanced_model_path: None,
        }
    }
}

impl Config {
    /// `<config dir>/backdrop/config.json`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(APP_DIR).join(CONFIG_FILE))
    }

    /// Load from the default location, falling back to defaults
    pub fn load() -> PipelineResult<Self> {
        match Self::default_path() {
            Some(path) => Self::load_from(&path),
            None => {
                debug!("No config directory, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Load from `path`; a missing file yields the defaults
    pub fn load_from(path: &Path) -> PipelineResult<Self> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "Config file not found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(e.into()),
        };
        let config: Self = serde_json::from_str(&contents)
            .map_err(|e| PipelineError::Config(format!("{}: {}", path.display(), e)))?;
        info!(path = %path.display(), "Loaded config");
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> PipelineResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        debug!(path = %path.display(), "Saved config");
        Ok(())
    }

    /// Tier to start with: the saved choice, else the device recommendation
    pub fn initial_tier(&self, device: &DeviceProfile) -> QualityTier {
        self.quality_tier.unwrap_or_else(|| device.recommended_tier())
    }

    /// Desired state at session start
    pub fn initial_desired_state(&self, device: &DeviceProfile) -> DesiredState {
        DesiredState {
            kind: self.background,
            source: self.background_source.clone(),
            tier: self.initial_tier(device),
            custom: self.custom_settings,
            reapply: 0,
        }
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            hide_video_while_applying: self.hide_video_while_applying,
            first_frame_timeout: Duration::from_millis(self.first_frame_timeout_ms),
            stability: self.orientation.into(),
        }
    }
}
