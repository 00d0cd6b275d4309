// SPDX-License-Identifier: GPL-3.0-only

//! Temporal mask smoothing
//!
//! `mask = α·raw + (1-α)·previous`, with the result rounded toward `raw` so a
//! constant input is reached exactly instead of stalling one step short.

use crate::media::frame::{Dimensions, Mask};

/// Holds the previous frame's smoothed mask
#[derive(Debug, Default)]
pub struct TemporalSmoothingBuffer {
    previous: Option<Mask>,
}

impl TemporalSmoothingBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Blend `raw` with the previous mask and store the result
    ///
    /// The first mask after a reset (or after a size change) is taken as is.
    pub fn blend(&mut self, raw: Mask, alpha: f32) -> &Mask {
        let alpha = alpha.clamp(0.0, 1.0);
        let blended = match self.previous.take() {
            Some(prev) if prev.dimensions() == raw.dimensions() && alpha < 1.0 => {
                let data = raw
                    .data
                    .iter()
                    .zip(prev.data.iter())
                    .map(|(&r, &p)| smooth_value(r, p, alpha))
                    .collect();
                Mask {
                    width: raw.width,
                    height: raw.height,
                    data,
                }
            }
            _ => raw,
        };
        self.previous.insert(blended)
    }

    /// Forget the previous mask
    pub fn reset(&mut self) {
        self.previous = None;
    }

    pub fn previous(&self) -> Option<&Mask> {
        self.previous.as_ref()
    }

    /// Dimensions of the stored mask, if any
    pub fn dimensions(&self) -> Option<Dimensions> {
        self.previous.as_ref().map(Mask::dimensions)
    }
}

fn smooth_value(raw: u8, prev: u8, alpha: f32) -> u8 {
    let v = alpha * f32::from(raw) + (1.0 - alpha) * f32::from(prev);
    let v = if raw > prev { v.ceil() } else { v.floor() };
    v.clamp(f32::from(raw.min(prev)), f32::from(raw.max(prev))) as u8
}
