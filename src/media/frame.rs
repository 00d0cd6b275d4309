// SPDX-License-Identifier: GPL-3.0-only

//! Frame and mask rasters
//!
//! Frames are RGBA8 with an explicit row stride, stored in shared
//! `Arc<[u8]>` storage so a frame can be handed between the track and the
//! transformer without copying. Masks are single-channel, one byte per pixel,
//! always tightly packed.

use crate::errors::{PipelineError, PipelineResult};
use image::RgbaImage;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::sync::Arc;
use std::time::Instant;

/// Bytes per RGBA pixel
pub const RGBA_BYTES: usize = 4;

/// Frame geometry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Number of pixels
    pub fn area(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl std::fmt::Display for Dimensions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// One RGBA8 video frame
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub width: u32,
    pub height: u32,
    /// Row stride in bytes (may include padding)
    pub stride: u32,
    /// RGBA pixel data
    pub data: Arc<[u8]>,
    /// Timestamp when the frame was captured (for latency diagnostics)
    pub captured_at: Instant,
}

impl VideoFrame {
    /// Create a frame from tightly packed RGBA data
    pub fn from_rgba(width: u32, height: u32, data: Vec<u8>) -> PipelineResult<Self> {
        Self::with_stride(width, height, width * RGBA_BYTES as u32, data)
    }

    /// Create a frame from RGBA data with row padding
    pub fn with_stride(
        width: u32,
        height: u32,
        stride: u32,
        data: Vec<u8>,
    ) -> PipelineResult<Self> {
        let row_bytes = width as usize * RGBA_BYTES;
        if (stride as usize) < row_bytes {
            return Err(PipelineError::invalid_frame(format!(
                "stride {} shorter than row of {} bytes",
                stride, row_bytes
            )));
        }
        let needed = match height {
            0 => 0,
            h => stride as usize * (h as usize - 1) + row_bytes,
        };
        if data.len() < needed {
            return Err(PipelineError::invalid_frame(format!(
                "{} bytes for {}x{} frame with stride {}, expected at least {}",
                data.len(),
                width,
                height,
                stride,
                needed
            )));
        }
        Ok(Self {
            width,
            height,
            stride,
            data: data.into(),
            captured_at: Instant::now(),
        })
    }

    /// Wrap a decoded image
    pub fn from_image(image: RgbaImage) -> Self {
        let (width, height) = image.dimensions();
        Self {
            width,
            height,
            stride: width * RGBA_BYTES as u32,
            data: image.into_raw().into(),
            captured_at: Instant::now(),
        }
    }

    /// Create a frame filled with a single colour
    pub fn solid(dims: Dimensions, rgba: [u8; 4]) -> Self {
        let data = rgba.repeat(dims.area());
        Self {
            width: dims.width,
            height: dims.height,
            stride: dims.width * RGBA_BYTES as u32,
            data: data.into(),
            captured_at: Instant::now(),
        }
    }

    pub fn dimensions(&self) -> Dimensions {
        Dimensions::new(self.width, self.height)
    }

    /// RGBA data without stride padding
    ///
    /// Borrows when the frame is already tightly packed.
    pub fn packed_rgba(&self) -> Cow<'_, [u8]> {
        let width = self.width as usize;
        let height = self.height as usize;
        let stride = self.stride as usize;
        let row_bytes = width * RGBA_BYTES;

        if stride == row_bytes {
            return Cow::Borrowed(&self.data[..row_bytes * height]);
        }

        let mut packed = Vec::with_capacity(row_bytes * height);
        for y in 0..height {
            let start = y * stride;
            packed.extend_from_slice(&self.data[start..start + row_bytes]);
        }
        Cow::Owned(packed)
    }

    /// RGBA value at (x, y)
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let idx = y as usize * self.stride as usize + x as usize * RGBA_BYTES;
        [
            self.data[idx],
            self.data[idx + 1],
            self.data[idx + 2],
            self.data[idx + 3],
        ]
    }

    /// Convert into an `image` buffer (copies when padded)
    pub fn to_image(&self) -> Option<RgbaImage> {
        RgbaImage::from_raw(self.width, self.height, self.packed_rgba().into_owned())
    }
}

/// Single-channel foreground mask (0 = background, 255 = certain foreground)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mask {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl Mask {
    /// All-background mask
    pub fn background(dims: Dimensions) -> Self {
        Self::filled(dims, 0)
    }

    /// Mask with every pixel set to `value`
    pub fn filled(dims: Dimensions, value: u8) -> Self {
        Self {
            width: dims.width,
            height: dims.height,
            data: vec![value; dims.area()],
        }
    }

    pub fn from_raw(width: u32, height: u32, data: Vec<u8>) -> PipelineResult<Self> {
        let expected = width as usize * height as usize;
        if data.len() != expected {
            return Err(PipelineError::invalid_frame(format!(
                "mask has {} bytes, expected {} for {}x{}",
                data.len(),
                expected,
                width,
                height
            )));
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    pub fn dimensions(&self) -> Dimensions {
        Dimensions::new(self.width, self.height)
    }

    pub fn get(&self, x: u32, y: u32) -> u8 {
        self.data[y as usize * self.width as usize + x as usize]
    }

    /// Number of pixels with any foreground weight
    pub fn foreground_pixels(&self) -> usize {
        self.data.iter().filter(|&&v| v > 0).count()
    }

    /// Fraction of pixels with any foreground weight
    pub fn foreground_ratio(&self) -> f32 {
        if self.data.is_empty() {
            return 0.0;
        }
        self.foreground_pixels() as f32 / self.data.len() as f32
    }

    pub fn is_background(&self) -> bool {
        self.data.iter().all(|&v| v == 0)
    }

    /// Nearest-neighbour resample to `dims`
    pub fn resized(&self, dims: Dimensions) -> Self {
        if dims == self.dimensions() {
            return self.clone();
        }
        if self.data.is_empty() {
            return Self::background(dims);
        }

        let mut data = Vec::with_capacity(dims.area());
        for y in 0..dims.height {
            let sy = (y as u64 * self.height as u64 / dims.height as u64) as u32;
            for x in 0..dims.width {
                let sx = (x as u64 * self.width as u64 / dims.width as u64) as u32;
                data.push(self.get(sx, sy));
            }
        }
        Self {
            width: dims.width,
            height: dims.height,
            data,
        }
    }
}
