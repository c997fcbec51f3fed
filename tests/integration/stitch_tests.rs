//! Stitching integration tests.
//!
//! Tests verify:
//! - Scenario A: two edge-to-edge ROIs tile the canvas with no overlap
//! - Canvas sizing for gap-free tilings
//! - The y flip between stage coordinates and canvas rows
//! - Scenario B: the last-write-wins overlap policy through the pipeline
//! - Stitching from the intermediate store matches direct stitching

use std::sync::Arc;

use mcd_mosaic::batch::{convert_container, ConvertOptions};
use mcd_mosaic::format::{
    extract_document_text, locate_metadata_document, parse_document, MetadataGraph,
};
use mcd_mosaic::io::RawContainer;
use mcd_mosaic::stitch::{collect_rois, composite, StitchOptions};
use mcd_mosaic::store::{collect_rois_from_store, DirectoryStore};

use super::test_utils::{write_container, AcqSpec};

fn graph_for(container: &RawContainer) -> MetadataGraph {
    let range = locate_metadata_document(container).unwrap();
    let text = extract_document_text(container, range).unwrap();
    let records = parse_document(&text).unwrap();
    MetadataGraph::from_records(&records, text).unwrap()
}

fn cancel_flag() -> mcd_mosaic::batch::CancelFlag {
    Arc::new(std::sync::atomic::AtomicBool::new(false))
}

// =============================================================================
// Scenario A: Side-by-Side ROIs
// =============================================================================

#[test]
fn test_two_rois_tile_without_overlap() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_container(
        dir.path(),
        "run.mcd",
        &[
            AcqSpec::new(1, (0.0, 0.0), 10, 10),
            AcqSpec::new(2, (10.0, 0.0), 10, 10),
        ],
    );
    let container = Arc::new(RawContainer::open(path).unwrap());
    let graph = graph_for(&container);

    let entries = collect_rois(&graph, &container, &[]);
    assert_eq!(entries.len(), 2);

    let (canvas, report) = composite(&entries, &StitchOptions::default()).unwrap();
    assert_eq!(canvas.data.dim(), (2, 10, 20));
    assert_eq!(report.composited, 2);
    assert_eq!(report.resampled, 0);
    assert_eq!(canvas.channel_labels, vec!["DNA1", "DNA2"]);

    // ROI 1 fills columns 0-9, ROI 2 fills columns 10-19; every source
    // pixel appears exactly once regardless of overlap policy
    for y in 0..10 {
        for x in 0..10 {
            assert_eq!(canvas.data[[0, y, x]], 1.0);
            assert_eq!(canvas.data[[0, y, x + 10]], 2.0);
        }
    }
}

#[test]
fn test_gap_free_tiling_covers_every_canvas_pixel() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_container(
        dir.path(),
        "run.mcd",
        &[
            AcqSpec::new(1, (0.0, 0.0), 5, 5),
            AcqSpec::new(2, (5.0, 0.0), 5, 5),
            AcqSpec::new(3, (0.0, 5.0), 5, 5),
            AcqSpec::new(4, (5.0, 5.0), 5, 5),
        ],
    );
    let container = Arc::new(RawContainer::open(path).unwrap());
    let graph = graph_for(&container);
    let entries = collect_rois(&graph, &container, &[]);

    let (canvas, _) = composite(&entries, &StitchOptions::default()).unwrap();
    // canvas dimensions = ceil(total extent / pixel size)
    assert_eq!(canvas.data.dim(), (2, 10, 10));
    assert!(canvas.data.iter().all(|&v| v != 0.0));
}

#[test]
fn test_stage_y_maps_to_inverted_canvas_rows() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_container(
        dir.path(),
        "run.mcd",
        &[
            AcqSpec::new(1, (0.0, 0.0), 4, 4),
            AcqSpec::new(2, (0.0, 4.0), 4, 4),
        ],
    );
    let container = Arc::new(RawContainer::open(path).unwrap());
    let graph = graph_for(&container);
    let entries = collect_rois(&graph, &container, &[]);

    let (canvas, _) = composite(&entries, &StitchOptions::default()).unwrap();
    // the ROI higher on the stage (larger Y) lands on the upper canvas rows
    assert_eq!(canvas.data[[0, 0, 0]], 2.0);
    assert_eq!(canvas.data[[0, 7, 0]], 1.0);
}

// =============================================================================
// Scenario B: Overlap Policy
// =============================================================================

#[test]
fn test_overlap_retains_last_processed_roi() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_container(
        dir.path(),
        "run.mcd",
        &[
            AcqSpec::new(1, (0.0, 0.0), 10, 10),
            AcqSpec::new(2, (5.0, 0.0), 10, 10),
        ],
    );
    let container = Arc::new(RawContainer::open(path).unwrap());
    let graph = graph_for(&container);
    let entries = collect_rois(&graph, &container, &[]);

    // explicit order: entry for acquisition 1 first, then acquisition 2
    let first = entries.iter().position(|e| e.id == 1).unwrap();
    let second = entries.iter().position(|e| e.id == 2).unwrap();
    let options = StitchOptions {
        order: Some(vec![first, second]),
        ..Default::default()
    };

    let (canvas, _) = composite(&entries, &options).unwrap();
    // the 5-column overlap holds the last-processed ROI's values
    for y in 0..10 {
        for x in 5..10 {
            assert_eq!(canvas.data[[0, y, x]], 2.0);
        }
    }
    assert_eq!(canvas.data[[0, 0, 0]], 1.0);
    assert_eq!(canvas.data[[0, 0, 12]], 2.0);
}

#[test]
fn test_caller_subset_excludes_rois() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_container(
        dir.path(),
        "run.mcd",
        &[
            AcqSpec::new(1, (0.0, 0.0), 4, 4),
            AcqSpec::new(2, (4.0, 0.0), 4, 4),
        ],
    );
    let container = Arc::new(RawContainer::open(path).unwrap());
    let graph = graph_for(&container);
    let entries = collect_rois(&graph, &container, &[]);

    let keep = entries.iter().position(|e| e.id == 1).unwrap();
    let options = StitchOptions {
        order: Some(vec![keep]),
        ..Default::default()
    };

    let (canvas, report) = composite(&entries, &options).unwrap();
    assert_eq!(report.composited, 1);
    // the canvas only spans the selected ROI
    assert_eq!(canvas.data.dim(), (2, 4, 4));
}

// =============================================================================
// Stitching From the Store
// =============================================================================

#[test]
fn test_store_stitch_matches_direct_stitch() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_container(
        dir.path(),
        "run.mcd",
        &[
            AcqSpec::new(1, (0.0, 0.0), 6, 6),
            AcqSpec::new(2, (6.0, 0.0), 6, 6),
        ],
    );

    // direct: container -> graph -> composite
    let container = Arc::new(RawContainer::open(&path).unwrap());
    let graph = graph_for(&container);
    let direct_entries = collect_rois(&graph, &container, &[]);
    let (direct_canvas, _) = composite(&direct_entries, &StitchOptions::default()).unwrap();

    // via the intermediate representation
    let store_dir = dir.path().join("store");
    convert_container(&path, &store_dir, &ConvertOptions::default(), &cancel_flag()).unwrap();
    let store = Arc::new(DirectoryStore::open(&store_dir).unwrap());
    let store_entries = collect_rois_from_store(&store).unwrap();
    let (store_canvas, _) = composite(&store_entries, &StitchOptions::default()).unwrap();

    assert_eq!(direct_canvas.data, store_canvas.data);
    assert_eq!(direct_canvas.channel_labels, store_canvas.channel_labels);
    assert_eq!(direct_canvas.pixel_size_um, store_canvas.pixel_size_um);
}
