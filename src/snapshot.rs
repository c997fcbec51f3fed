//! Embedded snapshot images.
//!
//! Besides the measurement payload, the instrument embeds camera snapshots
//! in the container: one slide photograph, one panorama image per panorama,
//! and before/after ablation images per acquisition. Their byte ranges are
//! recorded as node properties; the actual image payload begins a fixed 161
//! bytes past the recorded start offset.

use std::fs;
use std::path::Path;

use tracing::{debug, warn};

use crate::error::ContainerError;
use crate::format::graph::{
    MetadataGraph, MetadataNode, NodeKind, FIELD_AFTER_ABLATION_IMAGE_END,
    FIELD_AFTER_ABLATION_IMAGE_START, FIELD_BEFORE_ABLATION_IMAGE_END,
    FIELD_BEFORE_ABLATION_IMAGE_START, FIELD_IMAGE_END_OFFSET, FIELD_IMAGE_START_OFFSET,
};
use crate::io::RawContainer;

/// Distance from the recorded start offset to the first image byte.
pub const IMAGE_PAYLOAD_OFFSET: u64 = 161;

/// Extract every embedded snapshot image into `out_dir`.
///
/// Zero-length or unreadable ranges are skipped with a warning; a missing
/// snapshot never fails the conversion. Returns how many images were
/// written.
pub fn extract_snapshot_images(
    container: &RawContainer,
    graph: &MetadataGraph,
    out_dir: &Path,
) -> Result<usize, ContainerError> {
    fs::create_dir_all(out_dir)?;
    let mut written = 0;

    for slide in graph.nodes_of(NodeKind::Slide) {
        written += save_image(
            container,
            slide,
            FIELD_IMAGE_START_OFFSET,
            FIELD_IMAGE_END_OFFSET,
            &out_dir.join("Slide.jpg"),
        )?;
    }

    for panorama in graph.nodes_of(NodeKind::Panorama) {
        written += save_image(
            container,
            panorama,
            FIELD_IMAGE_START_OFFSET,
            FIELD_IMAGE_END_OFFSET,
            &out_dir.join(format!("Panorama_{}.png", panorama.id)),
        )?;
    }

    for acquisition in graph.nodes_of(NodeKind::Acquisition) {
        written += save_image(
            container,
            acquisition,
            FIELD_BEFORE_ABLATION_IMAGE_START,
            FIELD_BEFORE_ABLATION_IMAGE_END,
            &out_dir.join(format!("Acquisition_{}_Before.png", acquisition.id)),
        )?;
        written += save_image(
            container,
            acquisition,
            FIELD_AFTER_ABLATION_IMAGE_START,
            FIELD_AFTER_ABLATION_IMAGE_END,
            &out_dir.join(format!("Acquisition_{}_After.png", acquisition.id)),
        )?;
    }

    Ok(written)
}

fn save_image(
    container: &RawContainer,
    node: &MetadataNode,
    start_field: &str,
    end_field: &str,
    path: &Path,
) -> Result<usize, ContainerError> {
    let (Some(start), Some(end)) = (
        node.int_property(start_field),
        node.int_property(end_field),
    ) else {
        return Ok(0);
    };

    let start = start as u64 + IMAGE_PAYLOAD_OFFSET;
    let end = end as u64;
    if end <= start {
        debug!(kind = node.kind.tag(), id = node.id, "empty snapshot range");
        return Ok(0);
    }

    let bytes = match container.read_exact_at(start, (end - start) as usize) {
        Ok(bytes) => bytes,
        Err(err) => {
            warn!(
                kind = node.kind.tag(),
                id = node.id,
                %err,
                "snapshot range unreadable; skipped"
            );
            return Ok(0);
        }
    };

    fs::write(path, &bytes)?;
    Ok(1)
}

// =============================================================================
// Tests
// =============================================================================
