//! Format and decode integration tests.
//!
//! Tests verify:
//! - The locator finds exactly one well-formed document on valid containers
//! - Both marker encodings (plain and NUL-interleaved) parse identically
//! - Strict decode round-trips a consistent payload with no unexplained
//!   zero cells
//! - Recovery decode handles mid-row truncation
//! - Conversion of the same container twice is byte-identical

use std::sync::Arc;

use mcd_mosaic::batch::{convert_container, ConvertOptions};
use mcd_mosaic::decode::{decode_acquisition, decode_strict, DataSource};
use mcd_mosaic::format::{
    extract_document_text, locate_metadata_document, parse_document, AcquisitionDescriptor,
    MetadataGraph, NodeKind,
};
use mcd_mosaic::io::RawContainer;

use super::test_utils::{build_container, dir_contents, write_container, AcqSpec};

fn parse_container(container: &RawContainer) -> MetadataGraph {
    let range = locate_metadata_document(container).unwrap();
    let text = extract_document_text(container, range).unwrap();
    let records = parse_document(&text).unwrap();
    MetadataGraph::from_records(&records, text).unwrap()
}

fn cancel_flag() -> mcd_mosaic::batch::CancelFlag {
    Arc::new(std::sync::atomic::AtomicBool::new(false))
}

// =============================================================================
// Locator Tests
// =============================================================================

#[test]
fn test_locator_finds_one_well_formed_document() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_container(dir.path(), "run.mcd", &[AcqSpec::new(1, (0.0, 0.0), 4, 4)]);
    let container = RawContainer::open(path).unwrap();

    let range = locate_metadata_document(&container).unwrap();
    let text = extract_document_text(&container, range).unwrap();
    assert!(text.starts_with("<MCDSchema"));
    assert!(text.ends_with("</MCDSchema>"));
    // parses as exactly one document with the expected records
    let records = parse_document(&text).unwrap();
    assert_eq!(records.iter().filter(|r| r.kind == "Slide").count(), 1);
    assert_eq!(records.iter().filter(|r| r.kind == "Acquisition").count(), 1);
}

#[test]
fn test_nul_interleaved_document_parses_identically() {
    let dir = tempfile::tempdir().unwrap();
    let specs = [AcqSpec::new(1, (0.0, 0.0), 4, 4)];

    let plain_path = dir.path().join("plain.mcd");
    std::fs::write(&plain_path, build_container(&specs, false)).unwrap();
    let padded_path = dir.path().join("padded.mcd");
    std::fs::write(&padded_path, build_container(&specs, true)).unwrap();

    let plain = RawContainer::open(plain_path).unwrap();
    let padded = RawContainer::open(padded_path).unwrap();

    let plain_text =
        extract_document_text(&plain, locate_metadata_document(&plain).unwrap()).unwrap();
    let padded_text =
        extract_document_text(&padded, locate_metadata_document(&padded).unwrap()).unwrap();
    assert_eq!(plain_text, padded_text);
}

// =============================================================================
// Graph and Decode Tests
// =============================================================================

#[test]
fn test_graph_links_full_hierarchy() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_container(
        dir.path(),
        "run.mcd",
        &[
            AcqSpec::new(1, (0.0, 0.0), 4, 4),
            AcqSpec::new(2, (4.0, 0.0), 4, 4),
        ],
    );
    let container = RawContainer::open(path).unwrap();
    let graph = parse_container(&container);

    assert_eq!(graph.acquisitions().len(), 2);
    let slide = graph.node(NodeKind::Slide, 0).unwrap();
    let panoramas = graph.children_of(slide, NodeKind::Panorama);
    assert_eq!(panoramas.len(), 1);
    let rois = graph.children_of(panoramas[0], NodeKind::AcquisitionRoi);
    assert_eq!(rois.len(), 2);
}

#[test]
fn test_strict_decode_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let spec = AcqSpec::new(1, (0.0, 0.0), 6, 3);
    let path = write_container(dir.path(), "run.mcd", &[spec.clone()]);
    let container = RawContainer::open(path).unwrap();
    let graph = parse_container(&container);

    let node = graph.node(NodeKind::Acquisition, 1).unwrap();
    let descriptor = AcquisitionDescriptor::from_graph(&graph, node).unwrap();
    assert_eq!(descriptor.channel_labels(), vec!["DNA1", "DNA2"]);

    let grid = decode_strict(&container, &descriptor).unwrap();
    assert_eq!(grid.dim(), (2, 3, 6));
    // no unexplained zero cells: every pixel carries its channel fill
    for y in 0..3 {
        for x in 0..6 {
            assert_eq!(grid[[0, y, x]], spec.channel_fill[0]);
            assert_eq!(grid[[1, y, x]], spec.channel_fill[1]);
        }
    }
}

#[test]
fn test_recovery_of_truncated_payload() {
    let dir = tempfile::tempdir().unwrap();

    let intact = AcqSpec::new(1, (0.0, 0.0), 4, 4);
    let intact_path = write_container(dir.path(), "intact.mcd", &[intact]);
    let intact_container = RawContainer::open(intact_path).unwrap();
    let intact_graph = parse_container(&intact_container);
    let intact_node = intact_graph.node(NodeKind::Acquisition, 1).unwrap();
    let intact_descriptor =
        AcquisitionDescriptor::from_graph(&intact_graph, intact_node).unwrap();
    let intact_grid = decode_acquisition(&intact_container, &intact_descriptor, &[]);

    // same acquisition, payload cut mid-row; the document still declares the
    // full range
    let mut truncated = AcqSpec::new(1, (0.0, 0.0), 4, 4);
    truncated.truncate_bytes = 10;
    let truncated_path = write_container(dir.path(), "truncated.mcd", &[truncated]);
    let truncated_container = RawContainer::open(truncated_path).unwrap();
    let truncated_graph = parse_container(&truncated_container);
    let truncated_node = truncated_graph.node(NodeKind::Acquisition, 1).unwrap();
    let truncated_descriptor =
        AcquisitionDescriptor::from_graph(&truncated_graph, truncated_node).unwrap();

    // strict fails, the chain falls through to recovery and still yields a
    // container-sourced grid
    assert!(decode_strict(&truncated_container, &truncated_descriptor).is_err());
    let recovered = decode_acquisition(&truncated_container, &truncated_descriptor, &[]);
    assert_eq!(recovered.source, DataSource::Container);

    let intact_count = intact_grid.data.iter().filter(|&&v| v != 0.0).count();
    let recovered_count = recovered.data.iter().filter(|&&v| v != 0.0).count();
    assert!(recovered_count <= intact_count);
    assert!(recovered_count > 0);
}

// =============================================================================
// Idempotence Tests
// =============================================================================

#[test]
fn test_conversion_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_container(
        dir.path(),
        "run.mcd",
        &[
            AcqSpec::new(1, (0.0, 0.0), 4, 4),
            AcqSpec::new(2, (4.0, 0.0), 4, 4),
        ],
    );

    let options = ConvertOptions::default();
    let out_a = dir.path().join("a");
    let out_b = dir.path().join("b");
    convert_container(&path, &out_a, &options, &cancel_flag()).unwrap();
    convert_container(&path, &out_b, &options, &cancel_flag()).unwrap();

    let a = dir_contents(&out_a);
    let b = dir_contents(&out_b);
    assert!(!a.is_empty());
    assert_eq!(a.len(), b.len());
    for ((path_a, bytes_a), (path_b, bytes_b)) in a.iter().zip(b.iter()) {
        assert_eq!(path_a, path_b);
        assert_eq!(bytes_a, bytes_b, "store file {} differs", path_a.display());
    }
}
