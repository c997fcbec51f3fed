//! Side-channel text exports.
//!
//! Some runs leave a tab-separated export per acquisition next to the
//! container, named `<description>_<id>.txt`. When the binary payload is
//! unreadable, the decoder falls back to these files. The header row names
//! the row values from a fixed starting column; the first three of those are
//! the x/y/z coordinates, the rest are measurement channels.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use ndarray::Array3;

use crate::error::DecodeError;

/// Column where row values (x, y, z, channels…) begin.
pub const FIRST_VALUE_COLUMN: usize = 3;

/// Coordinate columns preceding the measurement channels.
const COORDINATE_COLUMNS: usize = 3;

// =============================================================================
// TextExport
// =============================================================================

/// A decoded text export: channel names from the header plus the scattered
/// pixel grid.
#[derive(Debug, Clone)]
pub struct TextExport {
    pub channel_names: Vec<String>,
    pub grid: Array3<f32>,
}

/// Find the export matching an acquisition by the `<description>_<id>.txt`
/// naming convention.
pub fn find_text_export(
    candidates: &[PathBuf],
    description: &str,
    id: i64,
) -> Option<PathBuf> {
    let suffix = format!("{description}_{id}.txt");
    candidates
        .iter()
        .find(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(&suffix))
        })
        .cloned()
}

/// Read a text export into a pixel grid.
///
/// The grid shape is taken from the data itself: width and height are one
/// past the maximum x and y seen. Rows shorter than the header are rejected.
///
/// # Errors
/// - `TextExportEmpty` if the file has fewer than two lines
/// - `TextExportMalformed` for an unusable header or row
pub fn read_text_export(path: &Path) -> Result<TextExport, DecodeError> {
    let file = File::open(path).map_err(|e| DecodeError::TextExportMalformed {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    let mut lines = BufReader::new(file).lines();

    let header = match lines.next() {
        Some(Ok(line)) => line,
        _ => return Err(DecodeError::TextExportEmpty(path.to_path_buf())),
    };
    let columns: Vec<&str> = header.split('\t').collect();
    if columns.len() < FIRST_VALUE_COLUMN + COORDINATE_COLUMNS + 1 {
        return Err(DecodeError::TextExportMalformed {
            path: path.to_path_buf(),
            message: format!("header has only {} columns", columns.len()),
        });
    }
    let channel_names: Vec<String> = columns[FIRST_VALUE_COLUMN + COORDINATE_COLUMNS..]
        .iter()
        .map(|name| name.trim().to_string())
        .collect();
    let num_channels = channel_names.len();

    // First pass over the rows happens in memory: exports are tiny compared
    // to the binary payload they replace.
    let mut rows: Vec<(usize, usize, Vec<f32>)> = Vec::new();
    let mut max_x = 0usize;
    let mut max_y = 0usize;
    for line in lines {
        let line = line.map_err(|e| DecodeError::TextExportMalformed {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        if line.trim().is_empty() {
            continue;
        }

        let mut values = line.split('\t').skip(FIRST_VALUE_COLUMN).map(|v| {
            v.trim()
                .parse::<f32>()
                .map_err(|_| DecodeError::TextExportMalformed {
                    path: path.to_path_buf(),
                    message: format!("non-numeric value {v:?}"),
                })
        });

        let x = next_value(&mut values, path)? as usize;
        let y = next_value(&mut values, path)? as usize;
        let _z = next_value(&mut values, path)?;

        let channels: Vec<f32> = values.collect::<Result<_, _>>()?;
        if channels.len() < num_channels {
            return Err(DecodeError::TextExportMalformed {
                path: path.to_path_buf(),
                message: format!(
                    "row has {} channel values, header names {}",
                    channels.len(),
                    num_channels
                ),
            });
        }

        max_x = max_x.max(x);
        max_y = max_y.max(y);
        rows.push((x, y, channels));
    }

    if rows.is_empty() {
        return Err(DecodeError::TextExportEmpty(path.to_path_buf()));
    }

    let width = max_x + 1;
    let height = max_y + 1;
    let mut grid = Array3::zeros((num_channels, height, width));
    for (x, y, channels) in rows {
        for (c, value) in channels.into_iter().take(num_channels).enumerate() {
            grid[[c, y, x]] = value;
        }
    }

    Ok(TextExport {
        channel_names,
        grid,
    })
}

fn next_value(
    values: &mut impl Iterator<Item = Result<f32, DecodeError>>,
    path: &Path,
) -> Result<f32, DecodeError> {
    values
        .next()
        .unwrap_or(Err(DecodeError::TextExportMalformed {
            path: path.to_path_buf(),
            message: "row is missing coordinate columns".to_string(),
        }))
}

// =============================================================================
// Tests
// =============================================================================
