//! The compositing engine.
//!
//! Positions every stitchable ROI of one container onto a shared
//! multi-channel canvas:
//!
//! 1. The canvas frame is the axis-aligned micron-space bounding box of all
//!    boundary polygons; its pixel size is the finest per-axis pixel size
//!    across the ROIs, and its pixel dimensions are the box extents divided
//!    by that size, rounded up.
//! 2. ROIs are processed most-recent first by acquisition timestamp unless
//!    the caller supplies an explicit subset and order.
//! 3. Each ROI is decoded on demand, resampled to the canvas pixel size when
//!    needed, masked by its rasterized boundary polygon, placed with the
//!    vertical axis inverted (stage Y grows upward, canvas rows grow
//!    downward), clipped to the canvas, and composited; its buffers are
//!    dropped before the next ROI is touched.
//!
//! # Overlap policy
//!
//! Where ROIs overlap, **the last ROI composited wins**: a masked,
//! non-background source pixel overwrites whatever an earlier ROI wrote
//! there. Under the default newest-first order this means the oldest
//! acquisition ends up on top. The policy is deliberate and covered by an
//! explicit test; pixels outside the footprint mask or equal to background
//! never touch the canvas.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ndarray::Array3;
use tracing::{debug, info, warn};

use crate::error::StitchError;

use super::collector::RoiEntry;
use super::polygon::rasterize_polygon;
use super::resample::{needs_resample, resample_grid};

// =============================================================================
// Options, canvas, report
// =============================================================================

/// Caller-tunable compositing parameters.
#[derive(Clone, Default)]
pub struct StitchOptions {
    /// Explicit subset and order (indices into the entry slice). `None`
    /// composites every entry, most recent timestamp first.
    pub order: Option<Vec<usize>>,

    /// Value treated as "nothing was measured here"; such pixels never
    /// overwrite the canvas.
    pub background: f32,

    /// Cooperative cancellation, checked between ROIs.
    pub cancel: Option<Arc<AtomicBool>>,
}

/// The shared accumulation buffer plus its coordinate frame.
#[derive(Debug, Clone)]
pub struct Canvas {
    /// (channel, row, column) accumulator
    pub data: Array3<f32>,

    /// Micron position of the canvas's minimum corner in stage space
    pub origin_um: (f64, f64),

    /// Uniform physical pixel size in microns
    pub pixel_size_um: f64,

    /// Channel labels, taken from the first composited ROI
    pub channel_labels: Vec<String>,
}

/// What actually happened during one compositing pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StitchReport {
    /// ROIs pasted onto the canvas
    pub composited: usize,

    /// ROIs skipped (decode failure or placeholder data)
    pub skipped: usize,

    /// ROIs that went through the resampling path
    pub resampled: usize,

    /// ROIs whose channel labels disagreed with the first ROI's
    pub label_mismatches: usize,
}

// =============================================================================
// Compositing
// =============================================================================

/// Composite a collection of ROIs into one canvas.
///
/// # Errors
/// - `NoRoisFound` when the selection is empty; fatal for this container
/// - `NothingComposited` when every selected ROI had to be skipped
/// - `Cancelled` when the cancel flag was raised between ROIs
pub fn composite(
    entries: &[RoiEntry],
    options: &StitchOptions,
) -> Result<(Canvas, StitchReport), StitchError> {
    let ordered = select_order(entries, options);
    if ordered.is_empty() {
        return Err(StitchError::NoRoisFound);
    }

    let mut report = StitchReport::default();

    // The first ROI's labels are authoritative; disagreement is a warning.
    let channel_labels = ordered[0].channel_labels.clone();
    for entry in &ordered {
        if entry.channel_labels != channel_labels {
            warn!(
                roi = entry.id,
                "channel labels disagree with first ROI; keeping first ROI's labels"
            );
            report.label_mismatches += 1;
        }
    }

    // Canvas frame: bounding box of every boundary polygon, finest pixel
    // size, extents rounded up to whole pixels.
    let points = ordered.iter().flat_map(|e| e.boundary_um.iter().copied());
    let (min_x, min_y, max_x, max_y) = bounding_box(points).ok_or(StitchError::NoRoisFound)?;

    let canvas_px = ordered
        .iter()
        .flat_map(|e| [e.pixel_size_x, e.pixel_size_y])
        .fold(f64::INFINITY, f64::min);

    let canvas_width = (((max_x - min_x) / canvas_px).ceil() as usize).max(1);
    let canvas_height = (((max_y - min_y) / canvas_px).ceil() as usize).max(1);
    let channels = channel_labels.len();

    info!(
        width = canvas_width,
        height = canvas_height,
        channels,
        pixel_size_um = canvas_px,
        rois = ordered.len(),
        "compositing canvas"
    );

    let mut canvas = Array3::zeros((channels, canvas_height, canvas_width));

    for entry in &ordered {
        if let Some(cancel) = &options.cancel {
            if cancel.load(Ordering::Relaxed) {
                return Err(StitchError::Cancelled);
            }
        }

        let grid = match entry.source.resolve() {
            Ok(grid) => grid,
            Err(err) => {
                warn!(roi = entry.id, %err, "failed to resolve ROI pixels; skipping");
                report.skipped += 1;
                continue;
            }
        };
        if grid.is_unavailable() {
            warn!(roi = entry.id, "ROI has no usable pixel data; skipping");
            report.skipped += 1;
            continue;
        }

        let (src_channels, height, width) = grid.data.dim();

        // Resample to canvas resolution unless the ROI already matches it.
        let (resized, new_height, new_width) =
            if needs_resample(entry.pixel_size_x, entry.pixel_size_y, canvas_px) {
                let new_height = ((height as f64 * entry.pixel_size_y / canvas_px).ceil()
                    as usize)
                    .max(1);
                let new_width =
                    ((width as f64 * entry.pixel_size_x / canvas_px).ceil() as usize).max(1);
                report.resampled += 1;
                (
                    resample_grid(&grid.data, new_height, new_width),
                    new_height,
                    new_width,
                )
            } else {
                (grid.data, height, width)
            };

        // Footprint mask in the ROI's local pixel space.
        let Some((roi_min_x, roi_min_y, _, _)) =
            bounding_box(entry.boundary_um.iter().copied())
        else {
            report.skipped += 1;
            continue;
        };
        let local_polygon: Vec<(f64, f64)> = entry
            .boundary_um
            .iter()
            .map(|&(x, y)| ((x - roi_min_x) / canvas_px, (y - roi_min_y) / canvas_px))
            .collect();
        let mask = rasterize_polygon(&local_polygon, new_height, new_width);

        // Canvas offset of the ROI's top-left corner. Stage Y grows upward
        // while canvas rows grow downward, so the vertical axis inverts.
        let canvas_x = ((roi_min_x - min_x) / canvas_px).round() as i64;
        let canvas_y =
            canvas_height as i64 - ((roi_min_y - min_y) / canvas_px).round() as i64
                - new_height as i64;

        // Clip to canvas bounds; rounding can push a ROI partly outside.
        let y0 = canvas_y.max(0);
        let y1 = (canvas_y + new_height as i64).min(canvas_height as i64);
        let x0 = canvas_x.max(0);
        let x1 = (canvas_x + new_width as i64).min(canvas_width as i64);
        if y0 >= y1 || x0 >= x1 {
            debug!(roi = entry.id, "ROI lies entirely outside the canvas");
            report.skipped += 1;
            continue;
        }
        let (src_y0, src_x0) = ((y0 - canvas_y) as usize, (x0 - canvas_x) as usize);
        let (rows, cols) = ((y1 - y0) as usize, (x1 - x0) as usize);

        for c in 0..channels.min(src_channels) {
            for row in 0..rows {
                for col in 0..cols {
                    let (sy, sx) = (src_y0 + row, src_x0 + col);
                    if !mask[[sy, sx]] {
                        continue;
                    }
                    let value = resized[[c, sy, sx]];
                    if value <= options.background {
                        continue;
                    }
                    canvas[[c, y0 as usize + row, x0 as usize + col]] = value;
                }
            }
        }

        report.composited += 1;
        // `resized` and `mask` drop here; per-ROI buffers never accumulate.
    }

    if report.composited == 0 {
        return Err(StitchError::NothingComposited);
    }

    Ok((
        Canvas {
            data: canvas,
            origin_um: (min_x, min_y),
            pixel_size_um: canvas_px,
            channel_labels,
        },
        report,
    ))
}

/// Apply the caller's subset/order, or the default most-recent-first order.
fn select_order<'a>(entries: &'a [RoiEntry], options: &StitchOptions) -> Vec<&'a RoiEntry> {
    match &options.order {
        Some(indices) => indices
            .iter()
            .filter_map(|&i| {
                let entry = entries.get(i);
                if entry.is_none() {
                    warn!(index = i, "ROI order index out of range; ignored");
                }
                entry
            })
            .collect(),
        None => {
            let mut ordered: Vec<&RoiEntry> = entries.iter().collect();
            ordered.sort_by(|a, b| {
                match (a.timestamp, b.timestamp) {
                    (Some(ta), Some(tb)) => tb.cmp(&ta),
                    (Some(_), None) => std::cmp::Ordering::Less,
                    (None, Some(_)) => std::cmp::Ordering::Greater,
                    (None, None) => b.timestamp_raw.cmp(&a.timestamp_raw),
                }
            });
            ordered
        }
    }
}

fn bounding_box(
    points: impl Iterator<Item = (f64, f64)>,
) -> Option<(f64, f64, f64, f64)> {
    let mut bounds: Option<(f64, f64, f64, f64)> = None;
    for (x, y) in points {
        bounds = Some(match bounds {
            None => (x, y, x, y),
            Some((min_x, min_y, max_x, max_y)) => {
                (min_x.min(x), min_y.min(y), max_x.max(x), max_y.max(y))
            }
        });
    }
    bounds
}

// =============================================================================
// Tests
// =============================================================================
