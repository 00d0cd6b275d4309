// SPDX-License-Identifier: GPL-3.0-only

//! Enhanced-detection mask refinement
//!
//! Runs in order: confidence threshold, morphological opening, largest
//! region retention, minimum area rejection. Each step works on the mask in
//! place; the mask keeps its soft edge values wherever it stays foreground.

use crate::media::frame::Mask;
use crate::pipelines::types::EnhancedDetection;
use tracing::trace;

/// Refine a raw inference mask
pub fn refine(mut mask: Mask, detection: &EnhancedDetection) -> Mask {
    if !detection.enabled {
        return mask;
    }

    apply_threshold(&mut mask, detection.confidence_threshold);

    if detection.kernel_size > 1 {
        let radius = (detection.kernel_size / 2) as usize;
        morph_open(&mut mask, radius);
    }

    if detection.keep_largest_region {
        keep_largest_region(&mut mask);
    }

    let ratio = mask.foreground_ratio();
    if ratio < detection.min_mask_area_ratio {
        trace!(
            ratio,
            min = detection.min_mask_area_ratio,
            "Foreground below minimum area, treating frame as background"
        );
        mask.data.fill(0);
    }

    mask
}

/// Drop every pixel below `threshold` (0-1 confidence) to background
pub fn apply_threshold(mask: &mut Mask, threshold: f32) {
    let cut = (threshold.clamp(0.0, 1.0) * 255.0).round() as u8;
    if cut == 0 {
        return;
    }
    for v in mask.data.iter_mut() {
        if *v < cut {
            *v = 0;
        }
    }
}

/// Morphological opening (erode then dilate) with a square kernel
///
/// Removes foreground specks smaller than the kernel without shrinking
/// larger regions.
pub fn morph_open(mask: &mut Mask, radius: usize) {
    if radius == 0 || mask.data.is_empty() {
        return;
    }
    let eroded = separable_filter(mask, radius, u8::min, u8::MAX);
    let opened = separable_filter(&eroded, radius, u8::max, u8::MIN);
    *mask = opened;
}

fn separable_filter(mask: &Mask, radius: usize, pick: fn(u8, u8) -> u8, identity: u8) -> Mask {
    let width = mask.width as usize;
    let height = mask.height as usize;
    let mut horizontal = vec![0u8; mask.data.len()];

    for y in 0..height {
        let row = y * width;
        for x in 0..width {
            let lo = x.saturating_sub(radius);
            let hi = (x + radius).min(width - 1);
            horizontal[row + x] = mask.data[row + lo..=row + hi]
                .iter()
                .fold(identity, |acc, &v| pick(acc, v));
        }
    }

    let mut out = vec![0u8; mask.data.len()];
    for y in 0..height {
        let lo = y.saturating_sub(radius);
        let hi = (y + radius).min(height - 1);
        for x in 0..width {
            let mut acc = identity;
            for sy in lo..=hi {
                acc = pick(acc, horizontal[sy * width + x]);
            }
            out[y * width + x] = acc;
        }
    }

    Mask {
        width: mask.width,
        height: mask.height,
        data: out,
    }
}

/// Zero every foreground pixel outside the largest 4-connected region
pub fn keep_largest_region(mask: &mut Mask) {
    let width = mask.width as usize;
    let height = mask.height as usize;
    let mut labels = vec![0u32; mask.data.len()];
    let mut stack = Vec::new();
    let mut next_label = 0u32;
    let mut best = (0u32, 0usize);

    for start in 0..mask.data.len() {
        if mask.data[start] == 0 || labels[start] != 0 {
            continue;
        }
        next_label += 1;
        labels[start] = next_label;
        stack.push(start);
        let mut size = 0usize;

        while let Some(idx) = stack.pop() {
            size += 1;
            let x = idx % width;
            let y = idx / width;
            let mut visit = |n: usize| {
                if mask.data[n] != 0 && labels[n] == 0 {
                    labels[n] = next_label;
                    stack.push(n);
                }
            };
            if x > 0 {
                visit(idx - 1);
            }
            if x + 1 < width {
                visit(idx + 1);
            }
            if y > 0 {
                visit(idx - width);
            }
            if y + 1 < height {
                visit(idx + width);
            }
        }

        if size > best.1 {
            best = (next_label, size);
        }
    }

    if next_label <= 1 {
        return;
    }
    for (v, &label) in mask.data.iter_mut().zip(labels.iter()) {
        if label != best.0 {
            *v = 0;
        }
    }
}
