//! Generic parsing of the metadata document.
//!
//! The document is a flat XML schema: the root element holds one child
//! element per record (`Slide`, `Panorama`, `AcquisitionROI`, `Acquisition`,
//! `ROIPoint`, `AcquisitionChannel`), and each record holds leaf elements
//! whose text content is a scalar field. This module turns that document into
//! an untyped list of records; typing and linking happen in
//! [`super::graph`].

use std::collections::BTreeMap;

use quick_xml::events::Event;
use quick_xml::Reader;

use crate::error::FormatError;

// =============================================================================
// RawRecord
// =============================================================================

/// One untyped record from the metadata document: its element name and a map
/// of scalar fields. Records keep their document order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    /// Element name of the record (e.g. `Acquisition`)
    pub kind: String,

    /// Leaf fields of the record, keyed by element name
    pub fields: BTreeMap<String, String>,
}

impl RawRecord {
    /// Look up a field by name.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }
}

// =============================================================================
// Parsing
// =============================================================================

/// Parse the cleaned document text into a list of untyped records.
///
/// Depth-1 elements become records, depth-2 elements become their fields;
/// anything nested deeper is ignored (no known instrument version produces
/// it). Namespace prefixes on element names are dropped.
///
/// # Errors
/// `MalformedDocument` if the XML is not well-formed.
pub fn parse_document(xml: &str) -> Result<Vec<RawRecord>, FormatError> {
    let mut reader = Reader::from_str(xml);
    let mut records = Vec::new();

    let mut depth = 0usize;
    let mut current: Option<RawRecord> = None;
    let mut field: Option<String> = None;
    let mut text = String::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                depth += 1;
                let name = local_name(e.name().as_ref());
                match depth {
                    2 => {
                        current = Some(RawRecord {
                            kind: name,
                            fields: BTreeMap::new(),
                        });
                    }
                    3 => {
                        field = Some(name);
                        text.clear();
                    }
                    _ => {}
                }
            }
            Ok(Event::Empty(e)) => {
                let name = local_name(e.name().as_ref());
                match depth {
                    1 => records.push(RawRecord {
                        kind: name,
                        fields: BTreeMap::new(),
                    }),
                    2 => {
                        if let Some(record) = current.as_mut() {
                            record.fields.insert(name, String::new());
                        }
                    }
                    _ => {}
                }
            }
            Ok(Event::Text(e)) => {
                if field.is_some() {
                    let chunk = e
                        .unescape()
                        .map_err(|err| FormatError::MalformedDocument(err.to_string()))?;
                    text.push_str(&chunk);
                }
            }
            Ok(Event::End(_)) => {
                match depth {
                    3 => {
                        if let (Some(record), Some(name)) = (current.as_mut(), field.take()) {
                            record.fields.insert(name, text.trim().to_string());
                        }
                    }
                    2 => {
                        if let Some(record) = current.take() {
                            records.push(record);
                        }
                    }
                    _ => {}
                }
                depth = depth.saturating_sub(1);
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(err) => return Err(FormatError::MalformedDocument(err.to_string())),
        }
    }

    Ok(records)
}

/// Strip a namespace prefix from an element name and return it as a string.
fn local_name(name: &[u8]) -> String {
    let start = name
        .iter()
        .rposition(|&b| b == b':')
        .map(|pos| pos + 1)
        .unwrap_or(0);
    String::from_utf8_lossy(&name[start..]).into_owned()
}

// =============================================================================
// Tests
// =============================================================================
