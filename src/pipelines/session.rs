// SPDX-License-Identifier: GPL-3.0-only

//! Camera session context
//!
//! One [`SessionContext`] exists per camera session. It carries the desired
//! state the UI edits, and the signals the pipeline exposes back to the UI
//! (`is_applying`, video visibility and pipeline status). Both sides hold it by
//! `Arc`; every signal is a `watch` channel so late subscribers see the
//! current value.

use crate::constants::QualityTier;
use crate::constants::timing::FIRST_FRAME_TIMEOUT;
use crate::device::DeviceProfile;
use crate::pipelines::orientation::StabilityConfig;
use crate::pipelines::types::{BackgroundKind, CustomSettings, DesiredState, PipelineStatus};
use std::time::Duration;
use tokio::sync::watch;
use tracing::debug;

/// Per-session behaviour switches
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionSettings {
    /// Hide the local video while a new stage is being applied
    pub hide_video_while_applying: bool,
    /// Upper bound on waiting for the first processed frame
    pub first_frame_timeout: Duration,
    pub stability: StabilityConfig,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            hide_video_while_applying: true,
            first_frame_timeout: FIRST_FRAME_TIMEOUT,
            stability: StabilityConfig::default(),
        }
    }
}

/// Shared state of one camera session
#[derive(Debug)]
pub struct SessionContext {
    device: DeviceProfile,
    settings: SessionSettings,
    desired: watch::Sender<DesiredState>,
    applying: watch::Sender<bool>,
    video_visible: watch::Sender<bool>,
    status: watch::Sender<PipelineStatus>,
}

impl SessionContext {
    pub fn new(initial: DesiredState, device: DeviceProfile, settings: SessionSettings) -> Self {
        let (desired, _) = watch::channel(initial);
        let (applying, _) = watch::channel(false);
        let (video_visible, _) = watch::channel(true);
        let (status, _) = watch::channel(PipelineStatus::Idle);
        Self {
            device,
            settings,
            desired,
            applying,
            video_visible,
            status,
        }
    }

    pub fn device(&self) -> &DeviceProfile {
        &self.device
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    // Desired state (written by the UI)

    /// Snapshot of the current desired state
    pub fn desired(&self) -> DesiredState {
        self.desired.borrow().clone()
    }

    pub fn subscribe_desired(&self) -> watch::Receiver<DesiredState> {
        self.desired.subscribe()
    }

    /// Replace the whole desired state
    pub fn set_desired(&self, desired: DesiredState) {
        self.desired.send_if_modified(|current| {
            if *current == desired {
                return false;
            }
            *current = desired;
            true
        });
    }

    pub fn tier(&self) -> QualityTier {
        self.desired.borrow().tier
    }

    pub fn set_tier(&self, tier: QualityTier) {
        self.desired.send_if_modified(|d| {
            let changed = d.tier != tier;
            d.tier = tier;
            changed
        });
    }

    pub fn custom_settings(&self) -> Option<CustomSettings> {
        self.desired.borrow().custom
    }

    /// Set or clear the custom override set
    pub fn set_custom_settings(&self, custom: Option<CustomSettings>) {
        self.desired.send_if_modified(|d| {
            let changed = d.custom != custom;
            d.custom = custom;
            changed
        });
    }

    /// Choose the background effect and its source
    pub fn select_background(&self, kind: BackgroundKind, source: Option<String>) {
        self.desired.send_if_modified(|d| {
            let changed = d.kind != kind || d.source != source;
            d.kind = kind;
            d.source = source;
            changed
        });
    }

    /// Force a rebuild without a logical change
    pub fn request_reapply(&self) {
        self.desired.send_modify(|d| d.reapply += 1);
        debug!(reapply = self.desired.borrow().reapply, "Reapply requested");
    }

    // Signals (written by the pipeline)

    /// Whether a new stage is being applied
    pub fn is_applying(&self) -> bool {
        *self.applying.borrow()
    }

    pub fn subscribe_applying(&self) -> watch::Receiver<bool> {
        self.applying.subscribe()
    }

    /// Whether the local video should be shown
    pub fn video_visible(&self) -> bool {
        *self.video_visible.borrow()
    }

    pub fn subscribe_video_visible(&self) -> watch::Receiver<bool> {
        self.video_visible.subscribe()
    }

    pub fn status(&self) -> PipelineStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<PipelineStatus> {
        self.status.subscribe()
    }

    pub(crate) fn set_applying(&self, applying: bool) {
        self.applying.send_if_modified(|v| std::mem::replace(v, applying) != applying);
    }

    pub(crate) fn set_video_visible(&self, visible: bool) {
        self.video_visible
            .send_if_modified(|v| std::mem::replace(v, visible) != visible);
    }

    pub(crate) fn set_status(&self, status: PipelineStatus) {
        self.status.send_if_modified(|current| {
            if *current == status {
                return false;
            }
            debug!(?status, "Pipeline status changed");
            *current = status;
            true
        });
    }
}
