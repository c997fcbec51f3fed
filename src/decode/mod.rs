//! Acquisition pixel decoding.
//!
//! The raw payload of one acquisition is a sequence of fixed-width rows of
//! little-endian `f32` values: `(x, y, z, channel₀, …, channelₙ₋₁)`. Each row
//! is scattered by its (x, y) coordinates into a preallocated
//! `(channel, height, width)` grid.
//!
//! Two modes exist. *Strict* requires the declared byte range to be an exact
//! multiple of the row width and to lie inside the container. *Recovery*
//! reads in bounded chunks and tolerates truncated or partially corrupt
//! payloads: whatever whole rows can be read are kept, rows with
//! out-of-range coordinates are dropped per chunk.
//!
//! [`decode_acquisition`] composes the full fallback chain (strict, then
//! recovery, then the side-channel text export, then a degenerate 1×1×1 grid
//! tagged unavailable) so one bad acquisition never aborts a batch.

use std::path::PathBuf;

use byteorder::{ByteOrder, LittleEndian};
use ndarray::Array3;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::DecodeError;
use crate::format::{find_text_export, read_text_export, AcquisitionDescriptor};
use crate::io::RawContainer;

/// Rows decoded per chunk; bounds peak memory independent of payload size.
const DECODE_CHUNK_ROWS: usize = 50_000;

/// The only value width the instrument writes.
const SUPPORTED_VALUE_BYTES: u32 = 4;

// =============================================================================
// PixelGrid
// =============================================================================

/// Where an acquisition's pixel data ultimately came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataSource {
    /// Decoded from the container's binary payload
    Container,

    /// Recovered from a side-channel text export
    Text,

    /// Neither source was usable; the grid is a 1×1×1 placeholder
    Unavailable,
}

/// A decoded `(channel, height, width)` grid for exactly one acquisition.
///
/// Grids are created on demand and discarded once composited or serialized;
/// they are never retained for a whole run.
#[derive(Debug, Clone)]
pub struct PixelGrid {
    pub data: Array3<f32>,
    pub source: DataSource,
}

impl PixelGrid {
    /// Whether this grid is the data-source-unavailable placeholder.
    pub fn is_unavailable(&self) -> bool {
        self.source == DataSource::Unavailable
    }

    fn unavailable() -> Self {
        PixelGrid {
            data: Array3::zeros((1, 1, 1)),
            source: DataSource::Unavailable,
        }
    }
}

// =============================================================================
// Strict and recovery decodes
// =============================================================================

/// Decode the declared byte range, requiring exact geometry.
///
/// # Errors
/// - `UnsupportedValueWidth` unless values are 4-byte floats
/// - `InvalidByteRange` if the range is inverted or leaves the container
/// - `DataSizeMismatch` if the range is not a whole number of rows
pub fn decode_strict(
    container: &RawContainer,
    descriptor: &AcquisitionDescriptor,
) -> Result<Array3<f32>, DecodeError> {
    check_value_width(descriptor)?;

    let size = descriptor.data_size();
    if descriptor.data_start >= descriptor.data_end
        || descriptor.data_end > container.size()
    {
        return Err(DecodeError::InvalidByteRange {
            start: descriptor.data_start,
            end: descriptor.data_end,
            file_size: container.size(),
        });
    }

    let row_bytes = descriptor.row_bytes();
    if size % row_bytes != 0 {
        return Err(DecodeError::DataSizeMismatch {
            actual: size,
            row_bytes,
        });
    }

    let rows = (size / row_bytes) as usize;
    let mut grid = empty_grid(descriptor);
    let mut offset = descriptor.data_start;
    let mut remaining = rows;
    while remaining > 0 {
        let n = remaining.min(DECODE_CHUNK_ROWS);
        let chunk = container.read_exact_at(offset, n * row_bytes as usize)?;
        scatter_rows(&mut grid, &chunk, descriptor);
        offset += (n as u64) * row_bytes;
        remaining -= n;
    }

    Ok(grid)
}

/// Decode the declared byte range, tolerating truncation.
///
/// The range end is clamped to the container; a trailing partial row is
/// dropped. Rows with out-of-range coordinates are discarded per chunk
/// rather than aborting the decode.
///
/// # Errors
/// - `UnsupportedValueWidth` unless values are 4-byte floats
/// - `InvalidByteRange` only if the range is inverted or starts past the end
pub fn decode_recovery(
    container: &RawContainer,
    descriptor: &AcquisitionDescriptor,
) -> Result<Array3<f32>, DecodeError> {
    check_value_width(descriptor)?;

    if descriptor.data_start >= descriptor.data_end
        || descriptor.data_start >= container.size()
    {
        return Err(DecodeError::InvalidByteRange {
            start: descriptor.data_start,
            end: descriptor.data_end,
            file_size: container.size(),
        });
    }

    let row_bytes = descriptor.row_bytes();
    let available = descriptor.data_end.min(container.size()) - descriptor.data_start;
    let rows = (available / row_bytes) as usize;

    let mut grid = empty_grid(descriptor);
    let mut offset = descriptor.data_start;
    let mut remaining = rows;
    while remaining > 0 {
        let n = remaining.min(DECODE_CHUNK_ROWS);
        let chunk = container.read_at_most(offset, n * row_bytes as usize)?;
        let whole = chunk.len() / row_bytes as usize;
        scatter_rows(&mut grid, &chunk[..whole * row_bytes as usize], descriptor);
        if whole < n {
            break;
        }
        offset += (n as u64) * row_bytes;
        remaining -= n;
    }

    Ok(grid)
}

/// Decode one acquisition with the full fallback chain.
///
/// Order: strict decode, recovery decode, side-channel text export, then a
/// degenerate grid tagged [`DataSource::Unavailable`]. This function never
/// fails; per-acquisition problems are logged and absorbed.
pub fn decode_acquisition(
    container: &RawContainer,
    descriptor: &AcquisitionDescriptor,
    text_exports: &[PathBuf],
) -> PixelGrid {
    match decode_strict(container, descriptor) {
        Ok(data) => {
            return PixelGrid {
                data,
                source: DataSource::Container,
            }
        }
        Err(err) => debug!(
            acquisition = descriptor.id,
            %err,
            "strict decode failed, retrying in recovery mode"
        ),
    }

    match decode_recovery(container, descriptor) {
        Ok(data) => {
            warn!(
                acquisition = descriptor.id,
                "payload recovered in tolerant mode"
            );
            return PixelGrid {
                data,
                source: DataSource::Container,
            };
        }
        Err(err) => debug!(
            acquisition = descriptor.id,
            %err,
            "recovery decode failed, trying text export"
        ),
    }

    match find_text_export(text_exports, &descriptor.description, descriptor.id) {
        Some(path) => match read_text_export(&path) {
            Ok(export) => {
                warn!(
                    acquisition = descriptor.id,
                    path = %path.display(),
                    "pixel data read from text export"
                );
                return PixelGrid {
                    data: export.grid,
                    source: DataSource::Text,
                };
            }
            Err(err) => warn!(
                acquisition = descriptor.id,
                path = %path.display(),
                %err,
                "text export unusable"
            ),
        },
        None => debug!(acquisition = descriptor.id, "no matching text export"),
    }

    warn!(
        acquisition = descriptor.id,
        "no usable pixel source; emitting placeholder grid"
    );
    PixelGrid::unavailable()
}

// =============================================================================
// Helpers
// =============================================================================

fn check_value_width(descriptor: &AcquisitionDescriptor) -> Result<(), DecodeError> {
    if descriptor.value_bytes != SUPPORTED_VALUE_BYTES {
        return Err(DecodeError::UnsupportedValueWidth(descriptor.value_bytes));
    }
    Ok(())
}

fn empty_grid(descriptor: &AcquisitionDescriptor) -> Array3<f32> {
    Array3::zeros((
        descriptor.num_channels(),
        descriptor.height.max(1),
        descriptor.width.max(1),
    ))
}

/// Scatter whole rows from `chunk` into the grid, dropping rows whose (x, y)
/// fall outside the declared geometry.
fn scatter_rows(grid: &mut Array3<f32>, chunk: &[u8], descriptor: &AcquisitionDescriptor) {
    let channels = descriptor.num_channels();
    let row_bytes = descriptor.row_bytes() as usize;
    let (width, height) = (descriptor.width, descriptor.height);

    for row in chunk.chunks_exact(row_bytes) {
        let x = LittleEndian::read_f32(&row[0..4]);
        let y = LittleEndian::read_f32(&row[4..8]);
        if !(x >= 0.0 && y >= 0.0) {
            continue;
        }
        let (x, y) = (x as usize, y as usize);
        if x >= width || y >= height {
            continue;
        }
        for c in 0..channels {
            let start = (c + 3) * 4;
            grid[[c, y, x]] = LittleEndian::read_f32(&row[start..start + 4]);
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
