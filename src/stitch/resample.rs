//! Channel-plane resampling.
//!
//! When a ROI's pixel size differs from the canvas pixel size, every channel
//! plane is resampled to the scaled dimensions with an antialiased linear
//! filter that preserves the source value range. ROIs already at canvas
//! resolution bypass this module entirely so their values are copied
//! bit-exact.

use image::imageops::{self, FilterType};
use image::{ImageBuffer, Luma};
use ndarray::{Array2, Array3, ArrayView2};

/// Relative tolerance below which two pixel sizes count as equal.
pub const PIXEL_SIZE_TOLERANCE: f64 = 1e-6;

/// Whether a ROI at `(pixel_size_x, pixel_size_y)` needs resampling onto a
/// canvas with pixel size `canvas_px`.
pub fn needs_resample(pixel_size_x: f64, pixel_size_y: f64, canvas_px: f64) -> bool {
    (pixel_size_x - canvas_px).abs() > PIXEL_SIZE_TOLERANCE * canvas_px
        || (pixel_size_y - canvas_px).abs() > PIXEL_SIZE_TOLERANCE * canvas_px
}

/// Resample one channel plane to `(new_height, new_width)`.
pub fn resample_plane(
    plane: ArrayView2<'_, f32>,
    new_height: usize,
    new_width: usize,
) -> Array2<f32> {
    let (height, width) = plane.dim();
    let buffer: ImageBuffer<Luma<f32>, Vec<f32>> =
        ImageBuffer::from_fn(width as u32, height as u32, |x, y| {
            Luma([plane[[y as usize, x as usize]]])
        });

    let resized = imageops::resize(
        &buffer,
        new_width as u32,
        new_height as u32,
        FilterType::Triangle,
    );

    Array2::from_shape_fn((new_height, new_width), |(y, x)| {
        resized.get_pixel(x as u32, y as u32)[0]
    })
}

/// Resample every channel plane of a grid to `(new_height, new_width)`.
pub fn resample_grid(grid: &Array3<f32>, new_height: usize, new_width: usize) -> Array3<f32> {
    let channels = grid.dim().0;
    let mut out = Array3::zeros((channels, new_height, new_width));
    for c in 0..channels {
        let plane = resample_plane(grid.index_axis(ndarray::Axis(0), c), new_height, new_width);
        out.index_axis_mut(ndarray::Axis(0), c).assign(&plane);
    }
    out
}

// =============================================================================
// Tests
// =============================================================================
