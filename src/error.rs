use std::path::PathBuf;

use thiserror::Error;

/// I/O errors that can occur when reading from a raw container file
#[derive(Debug, Clone, Error)]
pub enum ContainerError {
    /// Failed to open the container file
    #[error("failed to open container {path:?}: {message}")]
    Open { path: PathBuf, message: String },

    /// Requested range exceeds container bounds
    #[error("range out of bounds: requested {requested} bytes at offset {offset}, size is {size}")]
    RangeOutOfBounds {
        offset: u64,
        requested: u64,
        size: u64,
    },

    /// Underlying read failure
    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for ContainerError {
    fn from(err: std::io::Error) -> Self {
        ContainerError::Io(err.to_string())
    }
}

/// Errors raised while locating or parsing the embedded metadata document.
///
/// These are fatal for the whole container: without a well-formed document
/// there is no acquisition geometry to decode against.
#[derive(Debug, Clone, Error)]
pub enum FormatError {
    /// I/O error while scanning the container
    #[error("I/O error: {0}")]
    Io(#[from] ContainerError),

    /// The document start marker was not found in the trailing search window
    #[error("metadata document start marker not found")]
    StartMarkerNotFound,

    /// The document stop marker was not found in the trailing search window
    #[error("metadata document stop marker not found")]
    StopMarkerNotFound,

    /// The located byte range is not valid UTF-8 after NUL stripping
    #[error("metadata document is not valid text: {0}")]
    InvalidText(String),

    /// The document text is not well-formed XML
    #[error("malformed metadata document: {0}")]
    MalformedDocument(String),

    /// A record field that must be an integer failed to parse
    #[error("invalid integer field {field} in {record}: {value:?}")]
    InvalidIntegerField {
        record: &'static str,
        field: String,
        value: String,
    },

    /// A record is missing a field required to link or decode it
    #[error("{record} record is missing required field {field}")]
    MissingField {
        record: &'static str,
        field: &'static str,
    },

    /// A foreign-key field referenced a node that does not exist
    #[error("record {record} {id} references unknown parent {parent_kind} {parent_id}")]
    UnknownParent {
        record: &'static str,
        id: i64,
        parent_kind: &'static str,
        parent_id: i64,
    },

    /// Two records of the same kind share an identifier
    #[error("duplicate {record} id {id}")]
    DuplicateId { record: &'static str, id: i64 },
}

/// Errors raised while decoding one acquisition's pixel payload.
///
/// These are local to a single acquisition; the caller falls through the
/// recovery and side-channel paths before giving up on it.
#[derive(Debug, Clone, Error)]
pub enum DecodeError {
    /// I/O error while reading the payload range
    #[error("I/O error: {0}")]
    Io(#[from] ContainerError),

    /// Declared byte range lies outside the container or is inverted
    #[error("invalid payload range {start}..{end} in a {file_size}-byte container")]
    InvalidByteRange {
        start: u64,
        end: u64,
        file_size: u64,
    },

    /// Payload length is not an exact multiple of the row width
    #[error("payload size {actual} is not a multiple of the {row_bytes}-byte row")]
    DataSizeMismatch { actual: u64, row_bytes: u64 },

    /// Only 4-byte little-endian float values are supported
    #[error("unsupported value width: {0} bytes")]
    UnsupportedValueWidth(u32),

    /// No side-channel text export matches this acquisition
    #[error("no text export found for acquisition {0}")]
    TextExportMissing(i64),

    /// The matching text export holds no data rows
    #[error("text export {0:?} is empty")]
    TextExportEmpty(PathBuf),

    /// The text export header or a data row could not be parsed
    #[error("malformed text export {path:?}: {message}")]
    TextExportMalformed { path: PathBuf, message: String },
}

/// Errors raised by the compositing engine.
#[derive(Debug, Clone, Error)]
pub enum StitchError {
    /// No acquisition in the container carries a boundary polygon
    #[error("no stitchable ROIs found")]
    NoRoisFound,

    /// All candidate ROIs failed to resolve pixel data
    #[error("every ROI was skipped; nothing was composited")]
    NothingComposited,

    /// The run was cancelled between ROIs
    #[error("stitching cancelled")]
    Cancelled,
}

/// Errors raised by the intermediate acquisition store.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// Underlying filesystem failure
    #[error("store I/O error: {0}")]
    Io(String),

    /// A requested acquisition group does not exist
    #[error("no acquisition group {0} in store")]
    MissingGroup(String),

    /// Stored data does not match its recorded shape or attributes
    #[error("corrupt store entry {group}: {message}")]
    Corrupt { group: String, message: String },
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Io(err.to_string())
    }
}

/// Errors raised while writing a finished canvas.
#[derive(Debug, Clone, Error)]
pub enum OutputError {
    /// Underlying filesystem failure
    #[error("output I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for OutputError {
    fn from(err: std::io::Error) -> Self {
        OutputError::Io(err.to_string())
    }
}
