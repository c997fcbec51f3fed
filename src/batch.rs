//! Batch conversion and stitching drivers.
//!
//! A batch run maps many independent containers through the per-container
//! pipeline. Containers share no mutable state, so they are fanned out to a
//! bounded worker pool; within one container the pipeline stays sequential.
//!
//! Failure containment follows the per-item rule throughout: one bad
//! container is logged to a run-scoped error-log file and the batch moves
//! on. The summary reports how many items succeeded, were skipped, or
//! failed, and maps onto a three-way process exit status.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::decode::decode_acquisition;
use crate::error::StitchError;
use crate::format::graph::{FIELD_DESCRIPTION, FIELD_SW_VERSION};
use crate::format::{
    extract_document_text, locate_metadata_document, parse_document, AcquisitionDescriptor,
    MetadataGraph, NodeKind,
};
use crate::io::RawContainer;
use crate::output::{CanvasSink, ImageDescriptor, OutputCanvas, PixelType, PlanarFileSink};
use crate::snapshot::extract_snapshot_images;
use crate::store::{
    collect_rois_from_store, group_key, AcquisitionStore, AcquisitionSummary, ContainerSummary,
    DirectoryStore,
};
use crate::stitch::{composite, StitchOptions};

/// Shared cancellation flag, checked between containers and between ROIs.
pub type CancelFlag = Arc<AtomicBool>;

/// Error-log file appended to during a convert run.
pub const CONVERT_ERROR_LOG: &str = "conversion_error_log.txt";

/// Error-log file appended to during a stitch run.
pub const STITCH_ERROR_LOG: &str = "stitching_error_log.txt";

/// File extension of the reference output sink.
const OUTPUT_EXTENSION: &str = "img";

// =============================================================================
// Summary and exit status
// =============================================================================

/// Three-way process outcome of a batch run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    /// Every item succeeded
    Success,
    /// Some items failed but the run completed
    Partial,
    /// Nothing succeeded
    Fatal,
}

impl ExitStatus {
    /// Process exit code for this status.
    pub const fn code(self) -> u8 {
        match self {
            ExitStatus::Success => 0,
            ExitStatus::Partial => 1,
            ExitStatus::Fatal => 2,
        }
    }
}

/// Per-item tallies for one batch run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl BatchSummary {
    /// Collapse the tallies into an exit status.
    pub fn status(&self) -> ExitStatus {
        if self.failed == 0 && self.succeeded + self.skipped > 0 {
            ExitStatus::Success
        } else if self.succeeded > 0 {
            ExitStatus::Partial
        } else {
            ExitStatus::Fatal
        }
    }
}

/// Outcome of one item inside a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome {
    /// The item completed and its output exists
    Succeeded,
    /// The item was not attempted (cancellation) or was cancelled mid-way
    Skipped,
    /// The item failed; the message goes to the error log
    Failed(String),
}

// =============================================================================
// Error log
// =============================================================================

/// Run-scoped error log. Per-item failures are appended here so the console
/// stays a summary; full diagnostics go to the tracing log.
struct ErrorLog {
    path: PathBuf,
}

impl ErrorLog {
    fn new(dir: &Path, file_name: &str) -> Self {
        ErrorLog {
            path: dir.join(file_name),
        }
    }

    fn append(&self, message: &str) {
        let line = format!(
            "{} - {message}\n",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
        );
        let result = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .and_then(|mut file| file.write_all(line.as_bytes()));
        if let Err(err) = result {
            warn!(%err, path = %self.path.display(), "failed to write error log");
        }
        error!("{message}");
    }
}

// =============================================================================
// Options
// =============================================================================

/// Options for a convert run.
#[derive(Debug, Clone)]
pub struct ConvertOptions {
    /// Worker-pool size; defaults to available parallelism minus one.
    pub workers: Option<usize>,

    /// Extract embedded snapshot images alongside the store.
    pub extract_snapshots: bool,
}

impl Default for ConvertOptions {
    fn default() -> Self {
        ConvertOptions {
            workers: None,
            extract_snapshots: true,
        }
    }
}

/// Options for a stitch run.
#[derive(Debug, Clone)]
pub struct StitchRunOptions {
    pub pixel_type: PixelType,
    pub tile_edge: u32,
    pub compression: Option<String>,
    pub workers: Option<usize>,
}

impl Default for StitchRunOptions {
    fn default() -> Self {
        StitchRunOptions {
            pixel_type: PixelType::Uint16,
            tile_edge: 256,
            compression: Some("zstd".to_string()),
            workers: None,
        }
    }
}

// =============================================================================
// Convert
// =============================================================================

/// Convert one container or a directory of containers to the intermediate
/// representation.
pub async fn run_convert(
    input: &Path,
    output: Option<&Path>,
    options: &ConvertOptions,
    cancel: CancelFlag,
) -> BatchSummary {
    let containers = find_containers(input);
    if containers.is_empty() {
        error!("no containers found at {}", input.display());
        return BatchSummary {
            failed: 1,
            ..Default::default()
        };
    }

    let out_base = match output {
        Some(path) => path.to_path_buf(),
        None => default_sibling(input, "converted"),
    };
    if let Err(err) = fs::create_dir_all(&out_base) {
        error!(%err, "cannot create output directory {}", out_base.display());
        return BatchSummary {
            failed: containers.len(),
            ..Default::default()
        };
    }

    info!(
        containers = containers.len(),
        output = %out_base.display(),
        "starting conversion"
    );

    let log = Arc::new(ErrorLog::new(&out_base, CONVERT_ERROR_LOG));
    let convert_options = options.clone();
    let out_base_for_job = out_base.clone();
    let job_cancel = Arc::clone(&cancel);

    run_pool(
        containers,
        worker_count(options.workers),
        cancel,
        log,
        move |path| {
            if job_cancel.load(Ordering::Relaxed) {
                return ItemOutcome::Skipped;
            }
            let stem = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "container".to_string());
            match convert_container(
                path,
                &out_base_for_job.join(stem),
                &convert_options,
                &job_cancel,
            ) {
                Ok(()) => ItemOutcome::Succeeded,
                // a cancellation surfacing mid-container is not a failure
                Err(_) if job_cancel.load(Ordering::Relaxed) => ItemOutcome::Skipped,
                Err(message) => ItemOutcome::Failed(message),
            }
        },
    )
    .await
}

/// Convert a single container into a directory store.
///
/// Fatal before the metadata document parses; per-acquisition decode
/// problems are absorbed by the fallback chain.
pub fn convert_container(
    mcd_path: &Path,
    out_dir: &Path,
    options: &ConvertOptions,
    cancel: &CancelFlag,
) -> Result<(), String> {
    info!("converting {}", mcd_path.display());
    let container = RawContainer::open(mcd_path).map_err(|e| e.to_string())?;

    let range = locate_metadata_document(&container).map_err(|e| e.to_string())?;
    let text = extract_document_text(&container, range).map_err(|e| e.to_string())?;
    let records = parse_document(&text).map_err(|e| e.to_string())?;
    let graph = MetadataGraph::from_records(&records, text).map_err(|e| e.to_string())?;

    let text_exports = sibling_text_exports(mcd_path);
    let store = DirectoryStore::create(out_dir).map_err(|e| e.to_string())?;

    // Descriptors first: the root summary lists every usable acquisition.
    let mut descriptors = Vec::new();
    for node in graph.acquisitions() {
        match AcquisitionDescriptor::from_graph(&graph, node) {
            Ok(descriptor) => descriptors.push((descriptor, node.order_number)),
            Err(err) => {
                warn!(acquisition = node.id, %err, "unusable acquisition metadata; skipped");
            }
        }
    }

    let summary = container_summary(&graph, &descriptors);
    store
        .put_root(&summary, graph.raw_document())
        .map_err(|e| e.to_string())?;

    for (descriptor, order_number) in &descriptors {
        if cancel.load(Ordering::Relaxed) {
            return Err("conversion cancelled".to_string());
        }
        let grid = decode_acquisition(&container, descriptor, &text_exports);
        let acquisition_summary =
            AcquisitionSummary::new(descriptor, *order_number, grid.source);
        store
            .put_acquisition(&group_key(descriptor.id), &grid.data, &acquisition_summary)
            .map_err(|e| e.to_string())?;
        // the grid drops here; decoded payloads never accumulate
    }

    if options.extract_snapshots {
        if let Err(err) = extract_snapshot_images(&container, &graph, &out_dir.join("snapshots"))
        {
            warn!(%err, "snapshot extraction failed");
        }
    }

    container.close();
    info!("converted {}", mcd_path.display());
    Ok(())
}

/// Build the file-level summary mirrored at the store root.
fn container_summary(
    graph: &MetadataGraph,
    descriptors: &[(AcquisitionDescriptor, Option<i64>)],
) -> ContainerSummary {
    let slide = graph.nodes_of(NodeKind::Slide).next();
    ContainerSummary {
        description: slide
            .and_then(|s| s.property(FIELD_DESCRIPTION))
            .unwrap_or_default()
            .to_string(),
        n_acquisitions: descriptors.len(),
        software_version: slide
            .and_then(|s| s.property(FIELD_SW_VERSION))
            .map(str::to_string),
        run_date: descriptors
            .first()
            .and_then(|(d, _)| d.timestamp_raw.clone()),
        acquisitions: descriptors
            .iter()
            .map(|(d, _)| group_key(d.id))
            .collect(),
    }
}

// =============================================================================
// Stitch
// =============================================================================

/// Stitch one converted store, or a directory of stores, into composited
/// output images.
pub async fn run_stitch(
    input: &Path,
    output: Option<&Path>,
    options: &StitchRunOptions,
    cancel: CancelFlag,
) -> BatchSummary {
    let stores = find_stores(input);
    if stores.is_empty() {
        error!("no converted stores found at {}", input.display());
        return BatchSummary {
            failed: 1,
            ..Default::default()
        };
    }

    let out_base = match output {
        Some(path) => path.to_path_buf(),
        None => default_sibling(input, "stitched"),
    };
    if let Err(err) = fs::create_dir_all(&out_base) {
        error!(%err, "cannot create output directory {}", out_base.display());
        return BatchSummary {
            failed: stores.len(),
            ..Default::default()
        };
    }

    info!(
        stores = stores.len(),
        output = %out_base.display(),
        "starting stitching"
    );

    let log = Arc::new(ErrorLog::new(&out_base, STITCH_ERROR_LOG));
    let stitch_options = options.clone();
    let out_base_for_job = out_base.clone();
    let job_cancel = Arc::clone(&cancel);

    run_pool(
        stores,
        worker_count(options.workers),
        cancel,
        log,
        move |path| {
            if job_cancel.load(Ordering::Relaxed) {
                return ItemOutcome::Skipped;
            }
            let name = path
                .file_name()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "store".to_string());
            let out_path =
                out_base_for_job.join(format!("{name}_stitched.{OUTPUT_EXTENSION}"));
            stitch_store(path, &out_path, &stitch_options, &job_cancel)
        },
    )
    .await
}

/// Stitch a single converted store into one output image.
pub fn stitch_store(
    store_dir: &Path,
    out_path: &Path,
    options: &StitchRunOptions,
    cancel: &CancelFlag,
) -> ItemOutcome {
    info!("stitching {}", store_dir.display());

    let store = match DirectoryStore::open(store_dir) {
        Ok(store) => Arc::new(store),
        Err(err) => return ItemOutcome::Failed(err.to_string()),
    };
    let entries = match collect_rois_from_store(&store) {
        Ok(entries) => entries,
        Err(err) => return ItemOutcome::Failed(err.to_string()),
    };

    let stitch_options = StitchOptions {
        cancel: Some(Arc::clone(cancel)),
        ..Default::default()
    };
    let (canvas, report) = match composite(&entries, &stitch_options) {
        Ok(result) => result,
        Err(StitchError::Cancelled) => return ItemOutcome::Skipped,
        Err(err) => return ItemOutcome::Failed(err.to_string()),
    };
    debug!(?report, "compositing finished");

    let output = OutputCanvas::from_canvas(&canvas, options.pixel_type);
    let descriptor =
        ImageDescriptor::for_canvas(&canvas, &output, options.tile_edge, options.compression.clone());
    if let Err(err) = PlanarFileSink.write_canvas(&output, &descriptor, out_path) {
        return ItemOutcome::Failed(err.to_string());
    }

    info!("stitched {} -> {}", store_dir.display(), out_path.display());
    ItemOutcome::Succeeded
}

// =============================================================================
// Worker pool
// =============================================================================

/// Fan items out to a bounded worker pool and tally the outcomes.
async fn run_pool<F>(
    items: Vec<PathBuf>,
    workers: usize,
    cancel: CancelFlag,
    log: Arc<ErrorLog>,
    job: F,
) -> BatchSummary
where
    F: Fn(&Path) -> ItemOutcome + Send + Sync + 'static,
{
    let job = Arc::new(job);
    let semaphore = Arc::new(Semaphore::new(workers));
    let mut join_set: JoinSet<(PathBuf, ItemOutcome)> = JoinSet::new();
    let mut summary = BatchSummary::default();

    for item in items {
        if cancel.load(Ordering::Relaxed) {
            summary.skipped += 1;
            continue;
        }
        let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
            break;
        };
        let job = Arc::clone(&job);
        join_set.spawn(async move {
            let _permit = permit;
            let path = item.clone();
            match tokio::task::spawn_blocking(move || job(&item)).await {
                Ok(outcome) => (path, outcome),
                Err(err) => (path, ItemOutcome::Failed(format!("worker panicked: {err}"))),
            }
        });
    }

    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok((_, ItemOutcome::Succeeded)) => summary.succeeded += 1,
            Ok((_, ItemOutcome::Skipped)) => summary.skipped += 1,
            Ok((path, ItemOutcome::Failed(message))) => {
                summary.failed += 1;
                log.append(&format!("{}: {message}", path.display()));
            }
            Err(err) => {
                summary.failed += 1;
                log.append(&format!("worker task failed: {err}"));
            }
        }
    }

    info!(
        succeeded = summary.succeeded,
        skipped = summary.skipped,
        failed = summary.failed,
        "batch finished"
    );
    summary
}

fn worker_count(requested: Option<usize>) -> usize {
    requested.unwrap_or_else(|| {
        std::thread::available_parallelism()
            .map(|n| n.get().saturating_sub(1).max(1))
            .unwrap_or(1)
    })
}

// =============================================================================
// Input discovery
// =============================================================================

/// Containers named by `input`: the file itself, or every `.mcd` file in the
/// directory, sorted for stable processing order.
fn find_containers(input: &Path) -> Vec<PathBuf> {
    if input.is_file() {
        return if has_extension(input, "mcd") {
            vec![input.to_path_buf()]
        } else {
            Vec::new()
        };
    }

    let mut containers: Vec<PathBuf> = read_dir_paths(input)
        .into_iter()
        .filter(|p| p.is_file() && has_extension(p, "mcd"))
        .collect();
    containers.sort();
    containers
}

/// Stores named by `input`: the directory itself if it is a store root, or
/// every store subdirectory, sorted.
fn find_stores(input: &Path) -> Vec<PathBuf> {
    if DirectoryStore::is_store(input) {
        return vec![input.to_path_buf()];
    }

    let mut stores: Vec<PathBuf> = read_dir_paths(input)
        .into_iter()
        .filter(|p| p.is_dir() && DirectoryStore::is_store(p))
        .collect();
    stores.sort();
    stores
}

/// Text exports next to a container, for the side-channel decode fallback.
fn sibling_text_exports(mcd_path: &Path) -> Vec<PathBuf> {
    let Some(parent) = mcd_path.parent() else {
        return Vec::new();
    };
    let mut exports: Vec<PathBuf> = read_dir_paths(parent)
        .into_iter()
        .filter(|p| p.is_file() && has_extension(p, "txt"))
        .collect();
    exports.sort();
    exports
}

fn read_dir_paths(dir: &Path) -> Vec<PathBuf> {
    fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|entry| entry.ok())
                .map(|entry| entry.path())
                .collect()
        })
        .unwrap_or_default()
}

fn has_extension(path: &Path, extension: &str) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(extension))
}

fn default_sibling(input: &Path, name: &str) -> PathBuf {
    if input.is_file() {
        input
            .parent()
            .map(|p| p.join(name))
            .unwrap_or_else(|| PathBuf::from(name))
    } else {
        input.join(name)
    }
}

// =============================================================================
// Tests
// =============================================================================
