//! Intermediate acquisition store.
//!
//! The converter persists each container's decoded grids and metadata
//! summaries so stitching can run repeatedly, and in other processes,
//! without touching the slow binary decode again. The store mechanics are an
//! external collaborator, so the crate defines the [`AcquisitionStore`]
//! interface plus one minimal reference implementation,
//! [`DirectoryStore`]:
//!
//! ```text
//! <container>/
//!   attributes.json        container summary
//!   schema.xml             raw metadata document
//!   Q001/
//!     attributes.json      acquisition summary
//!     shape.json           [channels, height, width]
//!     data.bin             little-endian f32, C order
//!   Q002/ …
//! ```
//!
//! All writes are deterministic: converting the same container twice yields
//! byte-identical store content.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::DateTime;
use ndarray::Array3;
use serde::{Deserialize, Serialize};

use crate::decode::{DataSource, PixelGrid};
use crate::error::{DecodeError, StoreError};
use crate::format::AcquisitionDescriptor;
use crate::stitch::{PixelSource, RoiEntry};

/// Store file holding the serialized summary of a group or the root.
const ATTRIBUTES_FILE: &str = "attributes.json";

/// Store file holding the raw metadata document.
const SCHEMA_FILE: &str = "schema.xml";

/// Store file holding a group's grid shape.
const SHAPE_FILE: &str = "shape.json";

/// Store file holding a group's raw grid values.
const DATA_FILE: &str = "data.bin";

/// Group key for an acquisition id, zero-padded for stable ordering.
pub fn group_key(id: i64) -> String {
    format!("Q{id:03}")
}

// =============================================================================
// Summaries
// =============================================================================

/// One channel of an acquisition summary: metal tag and marker target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelSummary {
    pub metal: String,
    pub target: String,
}

/// Serializable metadata summary stored with each acquisition group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcquisitionSummary {
    pub id: i64,
    pub order_number: Option<i64>,
    pub description: String,
    pub timestamp: Option<String>,
    pub width: usize,
    pub height: usize,
    pub pixel_size_x: f64,
    pub pixel_size_y: f64,
    pub boundary_um: Vec<(f64, f64)>,
    pub channels: Vec<ChannelSummary>,
    pub data_source: DataSource,
}

impl AcquisitionSummary {
    /// Build the summary for a decoded acquisition.
    pub fn new(
        descriptor: &AcquisitionDescriptor,
        order_number: Option<i64>,
        data_source: DataSource,
    ) -> Self {
        AcquisitionSummary {
            id: descriptor.id,
            order_number,
            description: descriptor.description.clone(),
            timestamp: descriptor.timestamp_raw.clone(),
            width: descriptor.width,
            height: descriptor.height,
            pixel_size_x: descriptor.pixel_size_x,
            pixel_size_y: descriptor.pixel_size_y,
            boundary_um: descriptor.boundary_um.clone(),
            channels: descriptor
                .channels
                .iter()
                .map(|c| ChannelSummary {
                    metal: c.name.clone(),
                    target: c.label.clone(),
                })
                .collect(),
            data_source,
        }
    }

    /// Display labels in channel order.
    pub fn channel_labels(&self) -> Vec<String> {
        self.channels.iter().map(|c| c.target.clone()).collect()
    }
}

/// Serializable file-level summary mirrored at the store root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerSummary {
    pub description: String,
    pub n_acquisitions: usize,
    pub software_version: Option<String>,
    pub run_date: Option<String>,
    pub acquisitions: Vec<String>,
}

// =============================================================================
// AcquisitionStore
// =============================================================================

/// Interface between the converter and whatever persists decoded grids.
pub trait AcquisitionStore {
    /// Write the root summary and the raw metadata document.
    fn put_root(&self, summary: &ContainerSummary, raw_document: &str)
        -> Result<(), StoreError>;

    /// Write one acquisition group.
    fn put_acquisition(
        &self,
        key: &str,
        grid: &Array3<f32>,
        summary: &AcquisitionSummary,
    ) -> Result<(), StoreError>;

    /// Read the root summary back.
    fn read_root(&self) -> Result<ContainerSummary, StoreError>;

    /// List acquisition group keys in stable order.
    fn acquisition_keys(&self) -> Result<Vec<String>, StoreError>;

    /// Read one group's summary.
    fn read_summary(&self, key: &str) -> Result<AcquisitionSummary, StoreError>;

    /// Read one group's grid.
    fn read_grid(&self, key: &str) -> Result<Array3<f32>, StoreError>;
}

// =============================================================================
// DirectoryStore
// =============================================================================

/// Flat-directory reference implementation of [`AcquisitionStore`].
#[derive(Debug, Clone)]
pub struct DirectoryStore {
    root: PathBuf,
}

impl DirectoryStore {
    /// Create (or reuse) a store rooted at `root`.
    pub fn create(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(DirectoryStore { root })
    }

    /// Open an existing store.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        if !root.join(ATTRIBUTES_FILE).is_file() {
            return Err(StoreError::MissingGroup(format!(
                "{} (no root attributes)",
                root.display()
            )));
        }
        Ok(DirectoryStore { root })
    }

    /// Whether `path` looks like a store root.
    pub fn is_store(path: &Path) -> bool {
        path.join(ATTRIBUTES_FILE).is_file()
    }

    /// Root directory of the store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn group_dir(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    fn read_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &Path,
        group: &str,
    ) -> Result<T, StoreError> {
        let bytes = fs::read(path).map_err(|_| StoreError::MissingGroup(group.to_string()))?;
        serde_json::from_slice(&bytes).map_err(|e| StoreError::Corrupt {
            group: group.to_string(),
            message: e.to_string(),
        })
    }
}

impl AcquisitionStore for DirectoryStore {
    fn put_root(
        &self,
        summary: &ContainerSummary,
        raw_document: &str,
    ) -> Result<(), StoreError> {
        let json = serde_json::to_vec_pretty(summary).map_err(|e| StoreError::Corrupt {
            group: "root".to_string(),
            message: e.to_string(),
        })?;
        fs::write(self.root.join(ATTRIBUTES_FILE), json)?;
        fs::write(self.root.join(SCHEMA_FILE), raw_document)?;
        Ok(())
    }

    fn put_acquisition(
        &self,
        key: &str,
        grid: &Array3<f32>,
        summary: &AcquisitionSummary,
    ) -> Result<(), StoreError> {
        let dir = self.group_dir(key);
        fs::create_dir_all(&dir)?;

        let json = serde_json::to_vec_pretty(summary).map_err(|e| StoreError::Corrupt {
            group: key.to_string(),
            message: e.to_string(),
        })?;
        fs::write(dir.join(ATTRIBUTES_FILE), json)?;

        let shape = grid.dim();
        let shape_json = serde_json::to_vec(&[shape.0, shape.1, shape.2]).map_err(|e| {
            StoreError::Corrupt {
                group: key.to_string(),
                message: e.to_string(),
            }
        })?;
        fs::write(dir.join(SHAPE_FILE), shape_json)?;

        let mut bytes = Vec::with_capacity(grid.len() * 4);
        for &value in grid.iter() {
            bytes.extend_from_slice(&value.to_le_bytes());
        }
        fs::write(dir.join(DATA_FILE), bytes)?;

        Ok(())
    }

    fn read_root(&self) -> Result<ContainerSummary, StoreError> {
        self.read_json(&self.root.join(ATTRIBUTES_FILE), "root")
    }

    fn acquisition_keys(&self) -> Result<Vec<String>, StoreError> {
        let mut keys = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.path().is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if entry.path().join(ATTRIBUTES_FILE).is_file() && name.starts_with('Q') {
                keys.push(name);
            }
        }
        keys.sort();
        Ok(keys)
    }

    fn read_summary(&self, key: &str) -> Result<AcquisitionSummary, StoreError> {
        self.read_json(&self.group_dir(key).join(ATTRIBUTES_FILE), key)
    }

    fn read_grid(&self, key: &str) -> Result<Array3<f32>, StoreError> {
        let dir = self.group_dir(key);
        let shape: [usize; 3] = self.read_json(&dir.join(SHAPE_FILE), key)?;

        let bytes =
            fs::read(dir.join(DATA_FILE)).map_err(|_| StoreError::MissingGroup(key.to_string()))?;
        let expected = shape.iter().product::<usize>() * 4;
        if bytes.len() != expected {
            return Err(StoreError::Corrupt {
                group: key.to_string(),
                message: format!("{} data bytes, expected {expected}", bytes.len()),
            });
        }

        let values: Vec<f32> = bytes
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect();
        Array3::from_shape_vec((shape[0], shape[1], shape[2]), values).map_err(|e| {
            StoreError::Corrupt {
                group: key.to_string(),
                message: e.to_string(),
            }
        })
    }
}

// =============================================================================
// Stitching from a store
// =============================================================================

/// Pixel source backed by an acquisition group in a store.
pub struct StorePixelSource {
    store: Arc<DirectoryStore>,
    key: String,
    data_source: DataSource,
}

impl PixelSource for StorePixelSource {
    fn resolve(&self) -> Result<PixelGrid, DecodeError> {
        let data = self
            .store
            .read_grid(&self.key)
            .map_err(|e| DecodeError::Io(crate::error::ContainerError::Io(e.to_string())))?;
        Ok(PixelGrid {
            data,
            source: self.data_source,
        })
    }
}

/// Collect stitchable ROI entries from a converted store.
///
/// Groups without a boundary polygon are excluded, mirroring the collector's
/// behavior on a live metadata graph.
pub fn collect_rois_from_store(
    store: &Arc<DirectoryStore>,
) -> Result<Vec<RoiEntry>, StoreError> {
    let mut entries = Vec::new();

    for key in store.acquisition_keys()? {
        let summary = store.read_summary(&key)?;
        if summary.boundary_um.is_empty() {
            continue;
        }

        let timestamp = summary
            .timestamp
            .as_deref()
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok());

        entries.push(RoiEntry {
            id: summary.id,
            description: summary.description.clone(),
            boundary_um: summary.boundary_um.clone(),
            pixel_size_x: summary.pixel_size_x,
            pixel_size_y: summary.pixel_size_y,
            width: summary.width,
            height: summary.height,
            channel_labels: summary.channel_labels(),
            timestamp,
            timestamp_raw: summary.timestamp.clone(),
            source: Arc::new(StorePixelSource {
                store: Arc::clone(store),
                key,
                data_source: summary.data_source,
            }),
        });
    }

    Ok(entries)
}

// =============================================================================
// Tests
// =============================================================================
