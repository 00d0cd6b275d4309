// SPDX-License-Identifier: GPL-3.0-only

//! Collaborator layer for segmentation and live video
//!
//! The pipeline talks to two collaborators through traits:
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │            Lifecycle Controller             │
//! └──────────┬──────────────────────┬───────────┘
//!            │                      │
//! ┌──────────┴──────────┐ ┌─────────┴───────────┐
//! │   EngineFactory     │ │    TrackHandle      │
//! │  (segmentation      │ │  (live camera track │
//! │   model loading)    │ │   + stage slot)     │
//! └─────────────────────┘ └─────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`inference`]: segmentation engines and the built-in engine factory
//! - [`track`]: track abstraction and the in-process [`track::LocalTrack`]

pub mod inference;
pub mod track;

pub use inference::{BuiltinEngineFactory, EngineFactory, ModelReference, SegmentationEngine};
pub use track::{LocalTrack, TrackHandle};
