//! Container metadata parsing.
//!
//! A raw container carries one structured XML document appended after the
//! acquisition payloads. This module locates that document, parses it into
//! untyped records, links the records into a typed parent/child object
//! graph, and derives per-acquisition descriptor views from the graph.
//!
//! # Pipeline
//!
//! 1. [`locate_metadata_document`]: bounded backward scan for the document
//!    markers (plain and legacy NUL-interleaved encodings).
//! 2. [`parse_document`]: generic record/field tree from the XML text.
//! 3. [`MetadataGraph::from_records`]: typed graph with a `(kind, id)`
//!    arena index and two-way parent/child links.
//! 4. [`AcquisitionDescriptor::from_graph`]: everything the decoder and the
//!    compositor need for one acquisition.

pub mod descriptor;
pub mod document;
pub mod graph;
pub mod locator;
pub mod text;

pub use descriptor::{AcquisitionDescriptor, ChannelInfo};
pub use document::{parse_document, RawRecord};
pub use graph::{MetadataGraph, MetadataNode, NodeKind};
pub use locator::{
    extract_document_text, locate_metadata_document, DocumentRange, DOCUMENT_START_MARKER,
    DOCUMENT_STOP_MARKER,
};
pub use text::{find_text_export, read_text_export, TextExport};
