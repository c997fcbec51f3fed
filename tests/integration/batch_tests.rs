//! Batch driver integration tests.
//!
//! Tests verify:
//! - Directory conversion produces one store per container
//! - Per-item failures are contained, logged, and reflected in the exit
//!   status
//! - Stitch runs produce finalized output files (no temp leftovers)
//! - A store without stitchable ROIs fails alone, the batch continues
//! - A pre-cancelled run skips everything and writes no output

use std::fs;
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use ndarray::Array3;

use mcd_mosaic::batch::{
    run_convert, run_stitch, CancelFlag, ConvertOptions, ExitStatus, StitchRunOptions,
    CONVERT_ERROR_LOG, STITCH_ERROR_LOG,
};
use mcd_mosaic::decode::DataSource;
use mcd_mosaic::store::{
    group_key, AcquisitionStore, AcquisitionSummary, ContainerSummary, DirectoryStore,
};

use super::test_utils::{write_container, AcqSpec};

fn cancel_flag() -> CancelFlag {
    Arc::new(AtomicBool::new(false))
}

fn two_roi_specs() -> Vec<AcqSpec> {
    vec![
        AcqSpec::new(1, (0.0, 0.0), 4, 4),
        AcqSpec::new(2, (4.0, 0.0), 4, 4),
    ]
}

async fn convert_dir(input: &Path, output: &Path) -> mcd_mosaic::batch::BatchSummary {
    run_convert(
        input,
        Some(output),
        &ConvertOptions::default(),
        cancel_flag(),
    )
    .await
}

// =============================================================================
// Convert Batch Tests
// =============================================================================

#[tokio::test]
async fn test_convert_directory_of_containers() {
    let dir = tempfile::tempdir().unwrap();
    write_container(dir.path(), "first.mcd", &two_roi_specs());
    write_container(dir.path(), "second.mcd", &two_roi_specs());

    let out = dir.path().join("converted");
    let summary = convert_dir(dir.path(), &out).await;

    assert_eq!(summary.succeeded, 2);
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.status(), ExitStatus::Success);
    assert!(DirectoryStore::is_store(&out.join("first")));
    assert!(DirectoryStore::is_store(&out.join("second")));

    let store = DirectoryStore::open(out.join("first")).unwrap();
    assert_eq!(
        store.acquisition_keys().unwrap(),
        vec![group_key(1), group_key(2)]
    );
    assert_eq!(store.read_root().unwrap().n_acquisitions, 2);
}

#[tokio::test]
async fn test_bad_container_fails_alone() {
    let dir = tempfile::tempdir().unwrap();
    write_container(dir.path(), "good.mcd", &two_roi_specs());
    // a container without any metadata document
    fs::write(dir.path().join("bad.mcd"), vec![0u8; 4096]).unwrap();

    let out = dir.path().join("converted");
    let summary = convert_dir(dir.path(), &out).await;

    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.status(), ExitStatus::Partial);
    assert!(DirectoryStore::is_store(&out.join("good")));

    // the failure was appended to the run-scoped error log
    let log = fs::read_to_string(out.join(CONVERT_ERROR_LOG)).unwrap();
    assert!(log.contains("bad.mcd"));
    assert!(log.contains("start marker"));
}

#[tokio::test]
async fn test_convert_missing_input_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let summary = convert_dir(&dir.path().join("nothing_here"), &dir.path().join("out")).await;
    assert_eq!(summary.status(), ExitStatus::Fatal);
}

// =============================================================================
// Stitch Batch Tests
// =============================================================================

#[tokio::test]
async fn test_stitch_converted_directory() {
    let dir = tempfile::tempdir().unwrap();
    write_container(dir.path(), "first.mcd", &two_roi_specs());

    let converted = dir.path().join("converted");
    convert_dir(dir.path(), &converted).await;

    let stitched = dir.path().join("stitched");
    let summary = run_stitch(
        &converted,
        Some(&stitched),
        &StitchRunOptions::default(),
        cancel_flag(),
    )
    .await;

    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.status(), ExitStatus::Success);

    let out_path = stitched.join("first_stitched.img");
    assert!(out_path.is_file());
    assert!(!stitched.join("first_stitched.tmp").exists());

    // the output carries a parseable descriptor header
    let content = fs::read(&out_path).unwrap();
    let newline = content.iter().position(|&b| b == b'\n').unwrap();
    let descriptor: serde_json::Value = serde_json::from_slice(&content[..newline]).unwrap();
    assert_eq!(descriptor["dimension_order"], "XYZCT");
    assert_eq!(descriptor["size_x"], 8);
    assert_eq!(descriptor["size_y"], 4);
    assert_eq!(descriptor["size_c"], 2);
    // u16 planes follow
    assert_eq!(content.len() - newline - 1, 8 * 4 * 2 * 2);
}

#[tokio::test]
async fn test_store_without_rois_fails_alone() {
    let dir = tempfile::tempdir().unwrap();
    write_container(dir.path(), "good.mcd", &two_roi_specs());
    let converted = dir.path().join("converted");
    convert_dir(dir.path(), &converted).await;

    // a store whose only acquisition has no boundary polygon
    let empty = DirectoryStore::create(converted.join("boundaryless")).unwrap();
    empty
        .put_root(
            &ContainerSummary {
                description: "no rois".to_string(),
                n_acquisitions: 1,
                software_version: None,
                run_date: None,
                acquisitions: vec![group_key(1)],
            },
            "<MCDSchema/>",
        )
        .unwrap();
    empty
        .put_acquisition(
            &group_key(1),
            &Array3::from_elem((1, 2, 2), 1.0),
            &AcquisitionSummary {
                id: 1,
                order_number: None,
                description: "tuning".to_string(),
                timestamp: None,
                width: 2,
                height: 2,
                pixel_size_x: 1.0,
                pixel_size_y: 1.0,
                boundary_um: Vec::new(),
                channels: Vec::new(),
                data_source: DataSource::Container,
            },
        )
        .unwrap();

    let stitched = dir.path().join("stitched");
    let summary = run_stitch(
        &converted,
        Some(&stitched),
        &StitchRunOptions::default(),
        cancel_flag(),
    )
    .await;

    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.status(), ExitStatus::Partial);
    assert!(stitched.join("good_stitched.img").is_file());
    assert!(!stitched.join("boundaryless_stitched.img").exists());

    let log = fs::read_to_string(stitched.join(STITCH_ERROR_LOG)).unwrap();
    assert!(log.contains("boundaryless"));
}

#[tokio::test]
async fn test_cancelled_run_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    write_container(dir.path(), "first.mcd", &two_roi_specs());
    let converted = dir.path().join("converted");
    convert_dir(dir.path(), &converted).await;

    let cancel = Arc::new(AtomicBool::new(true));
    let stitched = dir.path().join("stitched");
    let summary = run_stitch(
        &converted,
        Some(&stitched),
        &StitchRunOptions::default(),
        cancel,
    )
    .await;

    assert_eq!(summary.succeeded, 0);
    assert_eq!(summary.skipped, 1);
    // nothing was composited, so no output file exists, partial or final
    let leftovers: Vec<_> = fs::read_dir(&stitched)
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|name| name.ends_with(".img") || name.ends_with(".tmp"))
        .collect();
    assert!(leftovers.is_empty(), "unexpected outputs: {leftovers:?}");
}
