// SPDX-License-Identifier: GPL-3.0-only

//! Raster primitives used by the background pipeline
//!
//! - [`frame`]: RGBA video frames, frame geometry and single-channel masks
//! - [`blur`]: radius-independent CPU blur for the background layer
//! - [`composite`]: mask-driven blending and background image fitting

pub mod blur;
pub mod composite;
pub mod frame;

// Re-export commonly used types
pub use frame::{Dimensions, Mask, VideoFrame};
