//! Derived acquisition view.
//!
//! An [`AcquisitionDescriptor`] is a cheap typed projection of one
//! `Acquisition` node: everything the pixel decoder and the compositor need,
//! resolved once from the property maps of the node and its relatives.

use chrono::{DateTime, FixedOffset};

use crate::error::FormatError;

use super::graph::{
    MetadataGraph, MetadataNode, NodeKind, FIELD_CHANNEL_LABEL, FIELD_CHANNEL_NAME,
    FIELD_DATA_END_OFFSET, FIELD_DATA_START_OFFSET, FIELD_DESCRIPTION, FIELD_MAX_X, FIELD_MAX_Y,
    FIELD_SHOT_DISTANCE_X, FIELD_SHOT_DISTANCE_Y, FIELD_SLIDE_X_POS, FIELD_SLIDE_Y_POS,
    FIELD_START_TIMESTAMP, FIELD_VALUE_BYTES,
};

/// Pixel size assumed when the acquisition does not record shot distances.
const DEFAULT_PIXEL_SIZE_UM: f64 = 1.0;

/// Value width assumed when the acquisition does not record one.
const DEFAULT_VALUE_BYTES: u32 = 4;

/// Channel records describing row coordinates rather than measurements.
const COORDINATE_CHANNELS: [&str; 3] = ["X", "Y", "Z"];

// =============================================================================
// ChannelInfo
// =============================================================================

/// One measurement channel of an acquisition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelInfo {
    /// Instrument channel name (the metal tag)
    pub name: String,

    /// Display label (the marker target); falls back to the name
    pub label: String,
}

// =============================================================================
// AcquisitionDescriptor
// =============================================================================

/// Typed view over one acquisition's metadata.
///
/// The channel list excludes the X/Y/Z coordinate pseudo-channels the
/// document records alongside the measurement channels; the decoder accounts
/// for those three coordinate values in its row stride instead.
#[derive(Debug, Clone)]
pub struct AcquisitionDescriptor {
    pub id: i64,
    pub description: String,

    /// Byte range of the raw payload within the container
    pub data_start: u64,
    pub data_end: u64,

    /// Width of one stored value in bytes
    pub value_bytes: u32,

    /// Declared pixel geometry
    pub width: usize,
    pub height: usize,

    /// Measurement channels in acquisition order
    pub channels: Vec<ChannelInfo>,

    /// Physical pixel size per axis in microns
    pub pixel_size_x: f64,
    pub pixel_size_y: f64,

    /// Acquisition start timestamp, parsed when possible
    pub timestamp: Option<DateTime<FixedOffset>>,
    pub timestamp_raw: Option<String>,

    /// Stage-space boundary polygon in microns; empty when the acquisition
    /// is not stitchable
    pub boundary_um: Vec<(f64, f64)>,
}

impl AcquisitionDescriptor {
    /// Build the descriptor for one `Acquisition` node.
    ///
    /// # Errors
    /// `MissingField` / `InvalidIntegerField` when the byte range or pixel
    /// geometry is absent or unusable; these make the acquisition undecodable.
    pub fn from_graph(
        graph: &MetadataGraph,
        node: &MetadataNode,
    ) -> Result<Self, FormatError> {
        debug_assert_eq!(node.kind, NodeKind::Acquisition);

        let data_start = required_int(node, FIELD_DATA_START_OFFSET)? as u64;
        let data_end = required_int(node, FIELD_DATA_END_OFFSET)? as u64;
        let width = required_int(node, FIELD_MAX_X)? as usize;
        let height = required_int(node, FIELD_MAX_Y)? as usize;

        let value_bytes = node
            .int_property(FIELD_VALUE_BYTES)
            .map(|v| v.unsigned_abs() as u32)
            .unwrap_or(DEFAULT_VALUE_BYTES);

        let channels = graph
            .children_by_order(node, NodeKind::Channel)
            .into_iter()
            .filter_map(|channel| {
                let name = channel.property(FIELD_CHANNEL_NAME)?.to_string();
                if COORDINATE_CHANNELS.contains(&name.as_str()) {
                    return None;
                }
                let label = channel
                    .property(FIELD_CHANNEL_LABEL)
                    .filter(|l| !l.is_empty())
                    .unwrap_or(&name)
                    .to_string();
                Some(ChannelInfo { name, label })
            })
            .collect();

        let timestamp_raw = node.property(FIELD_START_TIMESTAMP).map(str::to_string);
        let timestamp = timestamp_raw
            .as_deref()
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok());

        let boundary_um = boundary_polygon(graph, node);

        Ok(AcquisitionDescriptor {
            id: node.id,
            description: node
                .property(FIELD_DESCRIPTION)
                .unwrap_or_default()
                .to_string(),
            data_start,
            data_end,
            value_bytes,
            width,
            height,
            channels,
            pixel_size_x: node
                .float_property(FIELD_SHOT_DISTANCE_X)
                .filter(|v| *v > 0.0)
                .unwrap_or(DEFAULT_PIXEL_SIZE_UM),
            pixel_size_y: node
                .float_property(FIELD_SHOT_DISTANCE_Y)
                .filter(|v| *v > 0.0)
                .unwrap_or(DEFAULT_PIXEL_SIZE_UM),
            timestamp,
            timestamp_raw,
            boundary_um,
        })
    }

    /// Number of measurement channels (coordinate pseudo-channels excluded).
    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    /// Display labels in channel order.
    pub fn channel_labels(&self) -> Vec<String> {
        self.channels.iter().map(|c| c.label.clone()).collect()
    }

    /// Declared payload size in bytes.
    pub fn data_size(&self) -> u64 {
        self.data_end.saturating_sub(self.data_start)
    }

    /// Width of one payload row: x, y, z plus one value per channel.
    pub fn row_bytes(&self) -> u64 {
        (self.num_channels() as u64 + 3) * self.value_bytes as u64
    }

    /// Stage position of the first boundary point, if any.
    pub fn stage_position(&self) -> Option<(f64, f64)> {
        self.boundary_um.first().copied()
    }

    /// Whether this acquisition can take part in stitching.
    pub fn is_stitchable(&self) -> bool {
        !self.boundary_um.is_empty()
    }
}

/// Collect the stage-space boundary polygon from the parent ROI's points,
/// ordered by point order number. Points without both coordinates are
/// dropped; an acquisition without a parent ROI yields an empty polygon.
fn boundary_polygon(graph: &MetadataGraph, node: &MetadataNode) -> Vec<(f64, f64)> {
    let Some(roi) = graph.parent_of(node, NodeKind::AcquisitionRoi) else {
        return Vec::new();
    };

    graph
        .children_by_order(roi, NodeKind::RoiPoint)
        .into_iter()
        .filter_map(|point| {
            Some((
                point.float_property(FIELD_SLIDE_X_POS)?,
                point.float_property(FIELD_SLIDE_Y_POS)?,
            ))
        })
        .collect()
}

fn required_int(node: &MetadataNode, field: &'static str) -> Result<i64, FormatError> {
    match node.property(field) {
        None => Err(FormatError::MissingField {
            record: node.kind.tag(),
            field,
        }),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| FormatError::InvalidIntegerField {
                record: node.kind.tag(),
                field: field.to_string(),
                value: value.to_string(),
            }),
    }
}

// =============================================================================
// Tests
// =============================================================================
