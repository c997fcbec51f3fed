//! Locating the embedded metadata document.
//!
//! The instrument appends one structured XML document to the end of the raw
//! container, delimited by literal start and stop markers. Because payload
//! regions can run into the gigabytes, the search scans backward from the end
//! of the file over a bounded trailing window, reading fixed-size chunks that
//! overlap by marker-length − 1 bytes so a marker split across a chunk
//! boundary is still found.
//!
//! Older instrument software wrote the document in a legacy encoding where
//! every character is interleaved with a NUL byte. Each marker is therefore
//! searched twice: plain bytes first, then the padded form.

use crate::error::FormatError;
use crate::io::RawContainer;

// =============================================================================
// Constants
// =============================================================================

/// Literal start marker of the metadata document.
pub const DOCUMENT_START_MARKER: &str = "<MCDSchema";

/// Literal stop marker of the metadata document.
pub const DOCUMENT_STOP_MARKER: &str = "</MCDSchema>";

/// The document is searched for only within this many trailing bytes.
const SEARCH_WINDOW_BYTES: u64 = 100 * 1024 * 1024;

/// Size of one backward-scan read, before the marker overlap is added.
const SCAN_CHUNK_BYTES: usize = 8192;

// =============================================================================
// DocumentRange
// =============================================================================

/// Byte range of the located metadata document within the container.
///
/// `start` points at the first byte of the start marker, `end` one past the
/// last byte of the stop marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DocumentRange {
    pub start: u64,
    pub end: u64,
}

impl DocumentRange {
    /// Length of the document in bytes.
    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    /// Whether the range is empty (never true for a located document).
    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }
}

// =============================================================================
// Locating
// =============================================================================

/// Find the byte range of the embedded metadata document.
///
/// Scans backward from the end of the container within the bounded trailing
/// window. Each marker is tried in plain bytes first and in the legacy
/// NUL-interleaved form if the plain search fails.
///
/// # Errors
/// - `StartMarkerNotFound` / `StopMarkerNotFound` if a marker is absent;
///   fatal for the whole container.
pub fn locate_metadata_document(container: &RawContainer) -> Result<DocumentRange, FormatError> {
    let lower_bound = container.size().saturating_sub(SEARCH_WINDOW_BYTES);

    let start = match rfind_marker(container, DOCUMENT_START_MARKER.as_bytes(), lower_bound)? {
        Some(pos) => pos,
        None => {
            rfind_marker(container, &interleave_nuls(DOCUMENT_START_MARKER), lower_bound)?
                .ok_or(FormatError::StartMarkerNotFound)?
        }
    };

    let plain_stop = DOCUMENT_STOP_MARKER.as_bytes();
    let end = match rfind_marker(container, plain_stop, lower_bound)? {
        Some(pos) => pos + plain_stop.len() as u64,
        None => {
            let padded = interleave_nuls(DOCUMENT_STOP_MARKER);
            let pos = rfind_marker(container, &padded, lower_bound)?
                .ok_or(FormatError::StopMarkerNotFound)?;
            pos + padded.len() as u64
        }
    };

    Ok(DocumentRange { start, end })
}

/// Read the located document and clean it up for XML parsing.
///
/// Strips embedded NUL bytes (covering the legacy interleaved encoding) and
/// the two namespace-prefix artifacts some instrument versions leave behind.
pub fn extract_document_text(
    container: &RawContainer,
    range: DocumentRange,
) -> Result<String, FormatError> {
    let raw = container.read_exact_at(range.start, range.len() as usize)?;
    let stripped: Vec<u8> = raw.iter().copied().filter(|&b| b != 0).collect();
    let text =
        String::from_utf8(stripped).map_err(|e| FormatError::InvalidText(e.to_string()))?;

    Ok(text.replace("diffgr:", "").replace("msdata:", ""))
}

/// Find the last occurrence of `needle` at or above `lower_bound`.
///
/// Reads overlapping chunks from the file end toward `lower_bound`. Because
/// consecutive chunks overlap by `needle.len() − 1` bytes, a match straddling
/// a chunk boundary is seen by exactly one chunk.
fn rfind_marker(
    container: &RawContainer,
    needle: &[u8],
    lower_bound: u64,
) -> Result<Option<u64>, FormatError> {
    if needle.is_empty() || container.size() <= lower_bound {
        return Ok(None);
    }

    let overlap = (needle.len() - 1) as u64;
    let mut window_end = container.size();

    loop {
        let window_start = window_end
            .saturating_sub(SCAN_CHUNK_BYTES as u64 + overlap)
            .max(lower_bound);
        let len = (window_end - window_start) as usize;
        let chunk = container.read_exact_at(window_start, len)?;

        if let Some(pos) = rfind_slice(&chunk, needle) {
            return Ok(Some(window_start + pos as u64));
        }

        if window_start == lower_bound {
            return Ok(None);
        }
        window_end = window_start + overlap;
    }
}

/// Last occurrence of `needle` in `haystack`.
fn rfind_slice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.len() > haystack.len() {
        return None;
    }
    haystack.windows(needle.len()).rposition(|w| w == needle)
}

/// Interleave a NUL byte after every character of a marker.
fn interleave_nuls(marker: &str) -> Vec<u8> {
    let mut padded = Vec::with_capacity(marker.len() * 2);
    for &b in marker.as_bytes() {
        padded.push(b);
        padded.push(0);
    }
    padded
}

// =============================================================================
// Tests
// =============================================================================
