// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Smart-crop geometry.
//
// Detected faces arrive as normalized boxes that may be degenerate or spill
// slightly outside the unit square.  They are merged into one covering box,
// which is then turned into a pixel crop rectangle that always fits inside
// the image.  Nothing here fails: missing or malformed detections fall back
// to the whole image.

use bildwerk_core::types::{BoundingBox, CropArea};
use tracing::debug;

/// Merge detected face boxes into the smallest box covering all of them.
///
/// An empty slice, or any box with a non-finite coordinate, yields
/// [`BoundingBox::FULL`].  The result always lies within the unit square.
pub fn aggregate_bounding_boxes(boxes: &[BoundingBox]) -> BoundingBox {
    if boxes.is_empty() {
        return BoundingBox::FULL;
    }
    if boxes.iter().any(|b| {
        !(b.left.is_finite() && b.top.is_finite() && b.width.is_finite() && b.height.is_finite())
    }) {
        debug!("non-finite face box, using full image");
        return BoundingBox::FULL;
    }

    let min_left = boxes.iter().map(|b| b.left).fold(f64::INFINITY, f64::min);
    let min_top = boxes.iter().map(|b| b.top).fold(f64::INFINITY, f64::min);
    let max_right = boxes
        .iter()
        .map(BoundingBox::right)
        .fold(f64::NEG_INFINITY, f64::max);
    let max_bottom = boxes
        .iter()
        .map(BoundingBox::bottom)
        .fold(f64::NEG_INFINITY, f64::max);

    let left = min_left.clamp(0.0, 1.0);
    let top = min_top.clamp(0.0, 1.0);
    let mut width = (max_right.min(1.0) - left).max(0.0);
    let mut height = (max_bottom.min(1.0) - top).max(0.0);

    // Detector boxes can overflow the unit square.
    if left + width > 1.0 {
        width = 1.0 - left;
    }
    if top + height > 1.0 {
        height = 1.0 - top;
    }

    BoundingBox {
        left,
        top,
        width,
        height,
    }
}

/// Convert a normalized box plus `padding` pixels on every side into a pixel
/// rectangle clamped to `image_width` x `image_height`.
///
/// The result satisfies `left + width <= image_width` and
/// `top + height <= image_height`.  A zero-area result is legal; callers
/// decide what to do with it.
pub fn resolve_crop_area(
    bounding_box: &BoundingBox,
    padding: u32,
    image_width: u32,
    image_height: u32,
) -> CropArea {
    let padding = f64::from(padding);
    let full_width = f64::from(image_width);
    let full_height = f64::from(image_height);

    let left = to_pixels(bounding_box.left * full_width - padding);
    let top = to_pixels(bounding_box.top * full_height - padding);
    let width = to_pixels(bounding_box.width * full_width + 2.0 * padding);
    let height = to_pixels(bounding_box.height * full_height + 2.0 * padding);

    let left = left.clamp(0, i64::from(image_width));
    let top = top.clamp(0, i64::from(image_height));
    let width = width.clamp(0, i64::from(image_width) - left);
    let height = height.clamp(0, i64::from(image_height) - top);

    // Every value is now within [0, image dimension], so the casts are exact.
    CropArea {
        left: left as u32,
        top: top as u32,
        width: width as u32,
        height: height as u32,
    }
}

/// Floor to whole pixels; non-finite input collapses to zero.
fn to_pixels(value: f64) -> i64 {
    if value.is_finite() {
        value.floor() as i64
    } else {
        0
    }
}
