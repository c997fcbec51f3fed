//! # MCD Mosaic
//!
//! Converts proprietary binary instrument-output containers (raw
//! per-pixel acquisition payloads plus one trailing metadata document) into
//! per-acquisition pixel grids, and composites the stage-positioned regions
//! of a container into one shared multi-channel canvas for downstream
//! viewing and analysis.
//!
//! ## Pipeline
//!
//! ```text
//! RawContainer ─▶ locate/parse metadata ─▶ MetadataGraph
//!        │                                     │
//!        └──────▶ decode acquisitions ◀────────┘
//!                        │
//!                  DirectoryStore  (intermediate representation)
//!                        │
//!                  collect ROIs ─▶ composite ─▶ Canvas ─▶ CanvasSink
//! ```
//!
//! ## Architecture
//!
//! - [`io`] - raw container file access (positioned range reads)
//! - [`format`] - document locator, metadata graph, acquisition descriptors
//! - [`decode`] - strict/recovery pixel decoding with fallback chain
//! - [`stitch`] - ROI collection, resampling, masking and compositing
//! - [`store`] - intermediate acquisition store interface
//! - [`output`] - canvas output contract
//! - [`snapshot`] - embedded snapshot-image extraction
//! - [`batch`] - worker-pool batch drivers
//! - [`config`] - CLI configuration types
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use mcd_mosaic::format::{
//!     extract_document_text, locate_metadata_document, parse_document, MetadataGraph,
//! };
//! use mcd_mosaic::io::RawContainer;
//! use mcd_mosaic::stitch::{collect_rois, composite, StitchOptions};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let container = Arc::new(RawContainer::open("run.mcd")?);
//!     let range = locate_metadata_document(&container)?;
//!     let text = extract_document_text(&container, range)?;
//!     let records = parse_document(&text)?;
//!     let graph = MetadataGraph::from_records(&records, text)?;
//!
//!     let entries = collect_rois(&graph, &container, &[]);
//!     let (canvas, report) = composite(&entries, &StitchOptions::default())?;
//!     println!(
//!         "{} ROIs composited onto a {:?} canvas",
//!         report.composited,
//!         canvas.data.dim()
//!     );
//!     Ok(())
//! }
//! ```

pub mod batch;
pub mod config;
pub mod decode;
pub mod error;
pub mod format;
pub mod io;
pub mod output;
pub mod snapshot;
pub mod store;
pub mod stitch;

// Re-export commonly used types
pub use batch::{
    run_convert, run_stitch, BatchSummary, CancelFlag, ConvertOptions, ExitStatus,
    StitchRunOptions,
};
pub use config::{Cli, Command, ConvertConfig, StitchConfig};
pub use decode::{decode_acquisition, decode_recovery, decode_strict, DataSource, PixelGrid};
pub use error::{
    ContainerError, DecodeError, FormatError, OutputError, StitchError, StoreError,
};
pub use format::{
    extract_document_text, locate_metadata_document, parse_document, AcquisitionDescriptor,
    ChannelInfo, DocumentRange, MetadataGraph, MetadataNode, NodeKind, RawRecord,
};
pub use io::RawContainer;
pub use output::{
    CanvasSink, ChannelDescriptor, ImageDescriptor, OutputCanvas, PixelType, PlanarFileSink,
};
pub use snapshot::extract_snapshot_images;
pub use store::{
    collect_rois_from_store, group_key, AcquisitionStore, AcquisitionSummary, ChannelSummary,
    ContainerSummary, DirectoryStore,
};
pub use stitch::{collect_rois, composite, Canvas, PixelSource, RoiEntry, StitchOptions, StitchReport};
