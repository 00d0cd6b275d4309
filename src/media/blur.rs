// SPDX-License-Identifier: GPL-3.0-only

//! CPU background blur
//!
//! Three successive box blurs approximate a Gaussian. Each box pass keeps a
//! running sum, so the cost per pixel does not depend on the radius; that
//! keeps large blur radii inside the per-frame budget.

use crate::errors::{PipelineError, PipelineResult};
use crate::media::frame::RGBA_BYTES;

/// Number of box passes used to approximate the Gaussian
const BOX_PASSES: usize = 3;

/// Blur tightly packed RGBA8 data with the given radius
///
/// The radius is interpreted as roughly two standard deviations of the
/// equivalent Gaussian. A radius of zero returns an exact copy.
pub fn blur_rgba(src: &[u8], width: u32, height: u32, radius: u32) -> PipelineResult<Vec<u8>> {
    let expected = (width as usize)
        .checked_mul(height as usize)
        .and_then(|v| v.checked_mul(RGBA_BYTES))
        .ok_or_else(|| PipelineError::invalid_frame("blur buffer size overflow"))?;
    if src.len() != expected {
        return Err(PipelineError::invalid_frame(format!(
            "blur expects {} bytes for {}x{}, got {}",
            expected,
            width,
            height,
            src.len()
        )));
    }
    if radius == 0 || expected == 0 {
        return Ok(src.to_vec());
    }

    let sigma = radius as f32 / 2.0;
    let mut current = src.to_vec();
    let mut scratch = vec![0u8; expected];

    for box_radius in box_radii(sigma) {
        if box_radius == 0 {
            continue;
        }
        horizontal_box(&current, &mut scratch, width as usize, height as usize, box_radius);
        vertical_box(&scratch, &mut current, width as usize, height as usize, box_radius);
    }

    Ok(current)
}

/// Box radii whose successive application approximates a Gaussian of `sigma`
fn box_radii(sigma: f32) -> [usize; BOX_PASSES] {
    let n = BOX_PASSES as f32;
    let ideal = ((12.0 * sigma * sigma / n) + 1.0).sqrt();
    let mut lower = ideal.floor() as i64;
    if lower % 2 == 0 {
        lower -= 1;
    }
    let lower = lower.max(1);
    let upper = lower + 2;

    let lf = lower as f32;
    let m = ((12.0 * sigma * sigma - n * lf * lf - 4.0 * n * lf - 3.0 * n) / (-4.0 * lf - 4.0))
        .round() as usize;

    let mut radii = [0usize; BOX_PASSES];
    for (i, r) in radii.iter_mut().enumerate() {
        let size = if i < m { lower } else { upper };
        *r = ((size - 1) / 2) as usize;
    }
    radii
}

fn horizontal_box(src: &[u8], dst: &mut [u8], width: usize, height: usize, radius: usize) {
    let window = (2 * radius + 1) as u32;
    let last = width - 1;
    for y in 0..height {
        let row = y * width * RGBA_BYTES;
        let mut acc = [0u32; RGBA_BYTES];

        // Prime the window with clamped edge samples
        for dx in 0..=(2 * radius) {
            let sx = (dx as isize - radius as isize).clamp(0, last as isize) as usize;
            let idx = row + sx * RGBA_BYTES;
            for c in 0..RGBA_BYTES {
                acc[c] += u32::from(src[idx + c]);
            }
        }

        for x in 0..width {
            let out = row + x * RGBA_BYTES;
            for c in 0..RGBA_BYTES {
                dst[out + c] = ((acc[c] + window / 2) / window) as u8;
            }

            let leaving = x.saturating_sub(radius);
            let entering = (x + radius + 1).min(last);
            let li = row + leaving * RGBA_BYTES;
            let ei = row + entering * RGBA_BYTES;
            for c in 0..RGBA_BYTES {
                acc[c] = acc[c] + u32::from(src[ei + c]) - u32::from(src[li + c]);
            }
        }
    }
}

fn vertical_box(src: &[u8], dst: &mut [u8], width: usize, height: usize, radius: usize) {
    let window = (2 * radius + 1) as u32;
    let last = height - 1;
    let row_bytes = width * RGBA_BYTES;
    for x in 0..width {
        let col = x * RGBA_BYTES;
        let mut acc = [0u32; RGBA_BYTES];

        for dy in 0..=(2 * radius) {
            let sy = (dy as isize - radius as isize).clamp(0, last as isize) as usize;
            let idx = sy * row_bytes + col;
            for c in 0..RGBA_BYTES {
                acc[c] += u32::from(src[idx + c]);
            }
        }

        for y in 0..height {
            let out = y * row_bytes + col;
            for c in 0..RGBA_BYTES {
                dst[out + c] = ((acc[c] + window / 2) / window) as u8;
            }

            let leaving = y.saturating_sub(radius);
            let entering = (y + radius + 1).min(last);
            let li = leaving * row_bytes + col;
            let ei = entering * row_bytes + col;
            for c in 0..RGBA_BYTES {
                acc[c] = acc[c] + u32::from(src[ei + c]) - u32::from(src[li + c]);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blur_radius_0_is_identity() {
        let src = vec![1u8, 2, 3, 4, 5, 6, 7, 8];
        let out = blur_rgba(&src, 1, 2, 0).unwrap();
        assert_eq!(out, src);
    }

    #[test]
    fn blur_constant_image_is_identity() {
        let (w, h) = (6u32, 5u32);
        let px = [10u8, 20, 30, 255];
        let src = px.repeat((w * h) as usize);
        let out = blur_rgba(&src, w, h, 8).unwrap();
        assert_eq!(out, src);
    }

    #[test]
    fn blur_spreads_a_single_bright_pixel() {
        let (w, h) = (9u32, 9u32);
        let mut src = vec![0u8; (w * h * 4) as usize];
        let center = ((4 * w + 4) * 4) as usize;
        src[center..center + 4].copy_from_slice(&[255, 255, 255, 255]);

        let out = blur_rgba(&src, w, h, 4).unwrap();

        let lit = out.chunks_exact(4).filter(|px| px[0] != 0).count();
        assert!(lit > 1);
        assert!(out[center] < 255);
    }

    #[test]
    fn blur_rejects_mismatched_length() {
        assert!(blur_rgba(&[0u8; 7], 1, 2, 3).is_err());
    }

    #[test]
    fn box_radii_grow_with_sigma() {
        let small: usize = box_radii(1.0).iter().sum();
        let large: usize = box_radii(8.0).iter().sum();
        assert!(large > small);
    }
}
