//! Canvas output contract.
//!
//! Final image encoding (tiling, compression, pyramid generation) is an
//! external collaborator. This module defines what crosses that boundary: a
//! converted pixel buffer, a minimal descriptor document, and the
//! [`CanvasSink`] interface. [`PlanarFileSink`] is the reference sink: it
//! writes the descriptor followed by raw planes, through a temporary path
//! that is renamed into place only on success, so a cancelled or failed run
//! leaves no partial output file.

use std::fs;
use std::io::Write;
use std::path::Path;

use ndarray::Array3;
use serde::{Deserialize, Serialize};

use crate::error::OutputError;
use crate::stitch::Canvas;

/// Dimension order declared in every descriptor.
const DIMENSION_ORDER: &str = "XYZCT";

// =============================================================================
// Pixel type and converted canvas
// =============================================================================

/// Numeric representation of the output image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelType {
    /// Unsigned 16-bit; canvas values are clamped and rounded
    Uint16,
    /// 32-bit float; canvas values are cast directly
    Float32,
}

impl PixelType {
    /// Descriptor name of the pixel type.
    pub const fn name(self) -> &'static str {
        match self {
            PixelType::Uint16 => "uint16",
            PixelType::Float32 => "float",
        }
    }
}

/// A canvas converted to its output representation.
#[derive(Debug, Clone)]
pub enum OutputCanvas {
    Uint16(Array3<u16>),
    Float32(Array3<f32>),
}

impl OutputCanvas {
    /// Convert a finished canvas.
    ///
    /// The integer representation uses a saturating clamp-and-round; the
    /// float representation copies values unchanged.
    pub fn from_canvas(canvas: &Canvas, pixel_type: PixelType) -> Self {
        match pixel_type {
            PixelType::Uint16 => OutputCanvas::Uint16(
                canvas
                    .data
                    .mapv(|v| v.round().clamp(0.0, f32::from(u16::MAX)) as u16),
            ),
            PixelType::Float32 => OutputCanvas::Float32(canvas.data.clone()),
        }
    }

    /// (channels, height, width) of the buffer.
    pub fn dim(&self) -> (usize, usize, usize) {
        match self {
            OutputCanvas::Uint16(data) => data.dim(),
            OutputCanvas::Float32(data) => data.dim(),
        }
    }

    /// The pixel type of this buffer.
    pub fn pixel_type(&self) -> PixelType {
        match self {
            OutputCanvas::Uint16(_) => PixelType::Uint16,
            OutputCanvas::Float32(_) => PixelType::Float32,
        }
    }
}

// =============================================================================
// ImageDescriptor
// =============================================================================

/// One output channel: stable id plus display name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelDescriptor {
    pub id: String,
    pub name: String,
}

/// Minimal descriptor document embedded in the output image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageDescriptor {
    pub dimension_order: String,
    pub pixel_type: String,
    pub size_x: usize,
    pub size_y: usize,
    pub size_z: usize,
    pub size_c: usize,
    pub size_t: usize,
    pub physical_pixel_size_x: f64,
    pub physical_pixel_size_y: f64,
    pub channels: Vec<ChannelDescriptor>,
    pub tile_edge: u32,
    pub compression: Option<String>,
}

impl ImageDescriptor {
    /// Build the descriptor for a converted canvas.
    pub fn for_canvas(
        canvas: &Canvas,
        output: &OutputCanvas,
        tile_edge: u32,
        compression: Option<String>,
    ) -> Self {
        let (size_c, size_y, size_x) = output.dim();
        ImageDescriptor {
            dimension_order: DIMENSION_ORDER.to_string(),
            pixel_type: output.pixel_type().name().to_string(),
            size_x,
            size_y,
            size_z: 1,
            size_c,
            size_t: 1,
            physical_pixel_size_x: canvas.pixel_size_um,
            physical_pixel_size_y: canvas.pixel_size_um,
            channels: canvas
                .channel_labels
                .iter()
                .enumerate()
                .map(|(i, label)| ChannelDescriptor {
                    id: format!("Channel:{i}"),
                    name: label.clone(),
                })
                .collect(),
            tile_edge,
            compression,
        }
    }
}

// =============================================================================
// CanvasSink
// =============================================================================

/// Interface to whatever encodes the final image file.
pub trait CanvasSink {
    /// Write one canvas and its descriptor to `path`.
    ///
    /// Implementations must not leave a partial file at `path` on failure.
    fn write_canvas(
        &self,
        canvas: &OutputCanvas,
        descriptor: &ImageDescriptor,
        path: &Path,
    ) -> Result<(), OutputError>;
}

/// Reference sink: descriptor JSON plus raw planes in one file.
///
/// Written through a `.tmp` sibling and renamed into place at the end, so an
/// interrupted run never leaves a partial output file at the final path.
#[derive(Debug, Clone, Default)]
pub struct PlanarFileSink;

impl CanvasSink for PlanarFileSink {
    fn write_canvas(
        &self,
        canvas: &OutputCanvas,
        descriptor: &ImageDescriptor,
        path: &Path,
    ) -> Result<(), OutputError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let tmp_path = path.with_extension("tmp");
        let result = (|| -> Result<(), OutputError> {
            let mut file = fs::File::create(&tmp_path)?;
            let header = serde_json::to_string(descriptor)
                .map_err(|e| OutputError::Io(e.to_string()))?;
            file.write_all(header.as_bytes())?;
            file.write_all(b"\n")?;

            match canvas {
                OutputCanvas::Uint16(data) => {
                    for &value in data.iter() {
                        file.write_all(&value.to_le_bytes())?;
                    }
                }
                OutputCanvas::Float32(data) => {
                    for &value in data.iter() {
                        file.write_all(&value.to_le_bytes())?;
                    }
                }
            }
            file.flush()?;
            Ok(())
        })();

        match result {
            Ok(()) => {
                fs::rename(&tmp_path, path)?;
                Ok(())
            }
            Err(err) => {
                let _ = fs::remove_file(&tmp_path);
                Err(err)
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
