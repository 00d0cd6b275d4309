// SPDX-License-Identifier: GPL-3.0-only

//! Mask-driven compositing

use crate::errors::{PipelineError, PipelineResult};
use crate::media::frame::{Dimensions, Mask, RGBA_BYTES};
use image::RgbaImage;
use image::imageops::{self, FilterType};

/// Blend the sharp foreground over a backdrop using the mask as alpha
///
/// Mask value 255 keeps the foreground pixel, 0 keeps the backdrop pixel,
/// values in between blend linearly. Output alpha is opaque.
pub fn blend_over(foreground: &[u8], backdrop: &[u8], mask: &Mask) -> PipelineResult<Vec<u8>> {
    let expected = mask.dimensions().area() * RGBA_BYTES;
    if foreground.len() != expected || backdrop.len() != expected {
        return Err(PipelineError::invalid_frame(format!(
            "composite expects {} bytes for a {} mask, got {} and {}",
            expected,
            mask.dimensions(),
            foreground.len(),
            backdrop.len()
        )));
    }

    let mut out = vec![0u8; expected];
    for (i, &alpha) in mask.data.iter().enumerate() {
        let idx = i * RGBA_BYTES;
        let a = u16::from(alpha);
        match alpha {
            255 => out[idx..idx + 3].copy_from_slice(&foreground[idx..idx + 3]),
            0 => out[idx..idx + 3].copy_from_slice(&backdrop[idx..idx + 3]),
            _ => {
                for c in 0..3 {
                    out[idx + c] = mix(foreground[idx + c], backdrop[idx + c], a);
                }
            }
        }
        out[idx + 3] = 255;
    }
    Ok(out)
}

/// `fg * a + bg * (255 - a)`, divided by 255 with rounding
fn mix(fg: u8, bg: u8, a: u16) -> u8 {
    let v = u32::from(fg) * u32::from(a) + u32::from(bg) * u32::from(255 - a);
    ((v + 127) / 255) as u8
}

/// Scale a background image to cover `dims`, cropping the overflow centrally
pub fn cover_fit(image: &RgbaImage, dims: Dimensions) -> Vec<u8> {
    let (src_w, src_h) = image.dimensions();
    if dims.is_empty() || src_w == 0 || src_h == 0 {
        return vec![0u8; dims.area() * RGBA_BYTES];
    }
    if (src_w, src_h) == (dims.width, dims.height) {
        return image.as_raw().clone();
    }

    let scale = (dims.width as f32 / src_w as f32).max(dims.height as f32 / src_h as f32);
    let scaled_w = ((src_w as f32 * scale).ceil() as u32).max(dims.width);
    let scaled_h = ((src_h as f32 * scale).ceil() as u32).max(dims.height);

    let scaled = imageops::resize(image, scaled_w, scaled_h, FilterType::Triangle);
    let x = (scaled_w - dims.width) / 2;
    let y = (scaled_h - dims.height) / 2;
    imageops::crop_imm(&scaled, x, y, dims.width, dims.height)
        .to_image()
        .into_raw()
}
