//! Boundary-polygon rasterization.
//!
//! Acquisitions can be rotated relative to the stage, so their stage-space
//! boundary is a general polygon, not an axis-aligned rectangle. Before a
//! ROI is pasted onto the canvas, its boundary (translated into the ROI's
//! own local pixel space) is rasterized into a boolean footprint mask that
//! excludes the margins outside the scanned region.
//!
//! Rasterization is an even-odd scanline fill sampled at pixel centers: the
//! pixel (x, y) is inside when the point (x + 0.5, y + 0.5) is inside the
//! polygon.

use ndarray::Array2;

/// Rasterize a polygon into a `(height, width)` boolean mask.
///
/// Points are (x, y) in local pixel units. Fewer than three points cannot
/// enclose area and produce an all-false mask.
pub fn rasterize_polygon(points: &[(f64, f64)], height: usize, width: usize) -> Array2<bool> {
    let mut mask = Array2::from_elem((height, width), false);
    if points.len() < 3 || height == 0 || width == 0 {
        return mask;
    }

    let mut crossings: Vec<f64> = Vec::with_capacity(points.len());
    for y in 0..height {
        let yc = y as f64 + 0.5;

        crossings.clear();
        for i in 0..points.len() {
            let (x0, y0) = points[i];
            let (x1, y1) = points[(i + 1) % points.len()];
            // edge crosses the scanline when exactly one endpoint is below it
            if (y0 <= yc) != (y1 <= yc) {
                let t = (yc - y0) / (y1 - y0);
                crossings.push(x0 + t * (x1 - x0));
            }
        }
        crossings.sort_by(|a, b| a.total_cmp(b));

        for pair in crossings.chunks_exact(2) {
            let (enter, exit) = (pair[0], pair[1]);
            let first = (enter - 0.5).ceil().max(0.0) as usize;
            for x in first..width {
                if x as f64 + 0.5 >= exit {
                    break;
                }
                mask[[y, x]] = true;
            }
        }
    }

    mask
}

// =============================================================================
// Tests
// =============================================================================
