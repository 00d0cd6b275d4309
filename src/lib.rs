// SPDX-License-Identifier: GPL-3.0-only

//! Backdrop - live background blur and replacement for camera streams
//!
//! This library provides a per-frame segmentation stage that blurs or
//! replaces the background behind a person, and the controller that attaches
//! and swaps that stage on a live camera track without interrupting it.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`backends`]: Segmentation engine and live track abstractions
//! - [`media`]: Frames, masks, blur and compositing
//! - [`pipelines`]: The frame transformer, lifecycle controller and friends
//! - [`device`]: Device capability profiling for the default quality tier
//! - [`config`]: Persisted background settings
//!
//! # Example
//!
//! ```ignore
//! let session = Arc::new(SessionContext::new(desired, DeviceProfile::detect(), settings));
//! let controller = Arc::new(LifecycleController::new(session.clone(), track, engines));
//! let driver = controller.clone().spawn_driver();
//! session.set_tier(QualityTier::High);
//! ```

pub mod backends;
pub mod config;
pub mod constants;
pub mod device;
pub mod errors;
pub mod media;
pub mod pipelines;

// Re-export commonly used types
pub use config::Config;
pub use constants::QualityTier;
pub use device::{DeviceProfile, PowerLevel};
pub use errors::{PipelineError, PipelineResult};
pub use pipelines::{LifecycleController, SegmentationTransformer, SessionContext};
