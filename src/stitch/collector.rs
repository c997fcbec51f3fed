//! ROI collection.
//!
//! The collector walks the metadata graph and extracts the subset of
//! acquisitions that can take part in stitching: those carrying a
//! stage-space boundary polygon. Each becomes a [`RoiEntry`] pairing the
//! acquisition's geometry with a lazily-resolvable pixel source, so pixel
//! payloads are decoded only when the compositor actually needs them.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, FixedOffset};
use tracing::{debug, warn};

use crate::decode::{decode_acquisition, PixelGrid};
use crate::error::DecodeError;
use crate::format::{AcquisitionDescriptor, MetadataGraph};
use crate::io::RawContainer;

// =============================================================================
// PixelSource
// =============================================================================

/// Decode-on-demand access to one acquisition's pixel grid.
///
/// The compositor resolves each ROI's source right before pasting it and
/// drops the grid right after, keeping per-ROI memory from accumulating
/// across a run.
pub trait PixelSource: Send + Sync {
    /// Decode the acquisition's pixel grid.
    fn resolve(&self) -> Result<PixelGrid, DecodeError>;
}

/// Pixel source backed by the raw container's binary payload, with the full
/// strict → recovery → text-export fallback chain.
pub struct ContainerPixelSource {
    container: Arc<RawContainer>,
    descriptor: AcquisitionDescriptor,
    text_exports: Vec<PathBuf>,
}

impl PixelSource for ContainerPixelSource {
    fn resolve(&self) -> Result<PixelGrid, DecodeError> {
        Ok(decode_acquisition(
            &self.container,
            &self.descriptor,
            &self.text_exports,
        ))
    }
}

// =============================================================================
// RoiEntry
// =============================================================================

/// One stitchable region: boundary geometry, channel labels, timestamp and a
/// lazy pixel source.
pub struct RoiEntry {
    pub id: i64,
    pub description: String,

    /// Stage-space boundary polygon in microns
    pub boundary_um: Vec<(f64, f64)>,

    /// Physical pixel size per axis in microns
    pub pixel_size_x: f64,
    pub pixel_size_y: f64,

    /// Declared pixel extent
    pub width: usize,
    pub height: usize,

    pub channel_labels: Vec<String>,

    pub timestamp: Option<DateTime<FixedOffset>>,
    pub timestamp_raw: Option<String>,

    pub source: Arc<dyn PixelSource>,
}

impl std::fmt::Debug for RoiEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoiEntry")
            .field("id", &self.id)
            .field("description", &self.description)
            .field("boundary_um", &self.boundary_um)
            .field("width", &self.width)
            .field("height", &self.height)
            .finish_non_exhaustive()
    }
}

impl RoiEntry {
    /// Build an entry from a descriptor and a pixel source.
    pub fn new(descriptor: &AcquisitionDescriptor, source: Arc<dyn PixelSource>) -> Self {
        RoiEntry {
            id: descriptor.id,
            description: descriptor.description.clone(),
            boundary_um: descriptor.boundary_um.clone(),
            pixel_size_x: descriptor.pixel_size_x,
            pixel_size_y: descriptor.pixel_size_y,
            width: descriptor.width,
            height: descriptor.height,
            channel_labels: descriptor.channel_labels(),
            timestamp: descriptor.timestamp,
            timestamp_raw: descriptor.timestamp_raw.clone(),
            source,
        }
    }
}

// =============================================================================
// Collection
// =============================================================================

/// Collect the stitchable ROIs of one container.
///
/// Acquisitions without a boundary polygon are excluded silently; that is
/// expected for tuning scans. Acquisitions whose metadata cannot be turned
/// into a descriptor are logged and skipped; a single bad record does not
/// fail the container.
pub fn collect_rois(
    graph: &MetadataGraph,
    container: &Arc<RawContainer>,
    text_exports: &[PathBuf],
) -> Vec<RoiEntry> {
    let mut entries = Vec::new();

    for node in graph.acquisitions() {
        let descriptor = match AcquisitionDescriptor::from_graph(graph, node) {
            Ok(descriptor) => descriptor,
            Err(err) => {
                warn!(acquisition = node.id, %err, "unusable acquisition metadata");
                continue;
            }
        };

        if !descriptor.is_stitchable() {
            debug!(
                acquisition = descriptor.id,
                "no boundary polygon; excluded from stitching"
            );
            continue;
        }

        let source = Arc::new(ContainerPixelSource {
            container: Arc::clone(container),
            descriptor: descriptor.clone(),
            text_exports: text_exports.to_vec(),
        });
        entries.push(RoiEntry::new(&descriptor, source));
    }

    entries
}

// =============================================================================
// Tests
// =============================================================================
