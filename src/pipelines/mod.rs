// SPDX-License-Identifier: GPL-3.0-only

//! Background replacement pipeline
//!
//! A per-frame segmentation stage plus the controller that attaches, swaps
//! and tears it down on a live camera track without interrupting it.
//!
//! # Pipeline Architecture
//!
//! ```text
//! ┌──────────────┐     ┌───────────────────┐     ┌──────────────┐
//! │ UI / config  │ ──▶ │  SessionContext   │ ──▶ │  Lifecycle   │
//! │ (desired     │     │  (watch channels) │     │  Controller  │
//! │  state)      │     └───────────────────┘     └──────┬───────┘
//! └──────────────┘                                      │ replace stage
//!                                                       ▼
//! ┌──────────────┐     ┌───────────────────┐     ┌──────────────┐
//! │ Camera Frame │ ──▶ │ Segmentation      │ ──▶ │ Composited   │
//! │   (RGBA)     │     │ Transformer       │     │    Frame     │
//! └──────────────┘     └───────────────────┘     └──────────────┘
//! ```
//!
//! # Design Principles
//!
//! 1. **Never interrupt the track**: stages are swapped atomically, never
//!    detached and reattached
//! 2. **Last request wins**: newer desired states supersede in-flight work
//! 3. **Never drop a frame**: anything not ready or failing passes frames through
//! 4. **Graceful degradation**: the enhanced backend falls back to the default one
//!
//! # Modules
//!
//! - [`controller`]: single-flight reconcile of desired state onto the track
//! - [`orientation`]: bounded polling for settled frame size changes
//! - [`quality`]: quality tier to configuration mapping
//! - [`refine`]: mask thresholding, denoising and region filtering
//! - [`resources`]: ownership of uploaded background media
//! - [`session`]: per-session desired state and UI signals
//! - [`smoothing`]: temporal mask smoothing
//! - [`transformer`]: the per-frame segmentation and compositing stage
//! - [`types`]: shared configuration and state types

pub mod controller;
pub mod orientation;
pub mod quality;
pub mod refine;
pub mod resources;
pub mod session;
pub mod smoothing;
pub mod transformer;
pub mod types;

pub use controller::LifecycleController;
pub use orientation::{DimensionWatcher, PollState, StabilityConfig, spawn_orientation_listener};
pub use quality::resolve;
pub use resources::{ResourceGuardian, TransientResource};
pub use session::{SessionContext, SessionSettings};
pub use transformer::{Backdrop, SegmentationBackend, SegmentationTransformer};
pub use types::{
    AppliedState, BackendVariant, BackgroundKind, ControllerState, CustomSettings, Delegate,
    DesiredState, EnhancedDetection, PipelineConfiguration, PipelineStatus, ReconcileOutcome,
};
