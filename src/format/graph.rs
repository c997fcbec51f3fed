//! Typed metadata object graph.
//!
//! Records from the parsed document are linked into a parent/child graph of
//! six entity kinds. The graph is an arena keyed by `(kind, id)`; parent and
//! child links are stored as id references resolved through the arena, never
//! as embedded ownership, so the linked structure cannot form reference
//! cycles.
//!
//! Linking runs in a fixed dependency order (slides before panoramas before
//! ROIs before acquisitions before points and channels), which guarantees
//! every foreign key resolves to an already-inserted node and keeps the graph
//! acyclic by construction.

use std::collections::BTreeMap;

use crate::error::FormatError;

use super::document::RawRecord;

// =============================================================================
// Property keys
// =============================================================================

pub const FIELD_ID: &str = "ID";
pub const FIELD_ORDER_NUMBER: &str = "OrderNumber";
pub const FIELD_DESCRIPTION: &str = "Description";
pub const FIELD_DATA_START_OFFSET: &str = "DataStartOffset";
pub const FIELD_DATA_END_OFFSET: &str = "DataEndOffset";
pub const FIELD_VALUE_BYTES: &str = "ValueBytes";
pub const FIELD_MAX_X: &str = "MaxX";
pub const FIELD_MAX_Y: &str = "MaxY";
pub const FIELD_START_TIMESTAMP: &str = "StartTimeStamp";
pub const FIELD_CHANNEL_NAME: &str = "ChannelName";
pub const FIELD_CHANNEL_LABEL: &str = "ChannelLabel";
pub const FIELD_SHOT_DISTANCE_X: &str = "AblationDistanceBetweenShotsX";
pub const FIELD_SHOT_DISTANCE_Y: &str = "AblationDistanceBetweenShotsY";
pub const FIELD_SLIDE_X_POS: &str = "SlideXPosUm";
pub const FIELD_SLIDE_Y_POS: &str = "SlideYPosUm";
pub const FIELD_IMAGE_START_OFFSET: &str = "ImageStartOffset";
pub const FIELD_IMAGE_END_OFFSET: &str = "ImageEndOffset";
pub const FIELD_BEFORE_ABLATION_IMAGE_START: &str = "BeforeAblationImageStartOffset";
pub const FIELD_BEFORE_ABLATION_IMAGE_END: &str = "BeforeAblationImageEndOffset";
pub const FIELD_AFTER_ABLATION_IMAGE_START: &str = "AfterAblationImageStartOffset";
pub const FIELD_AFTER_ABLATION_IMAGE_END: &str = "AfterAblationImageEndOffset";
pub const FIELD_SW_VERSION: &str = "SwVersion";

// =============================================================================
// NodeKind
// =============================================================================

/// The closed set of entity kinds in the metadata document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum NodeKind {
    Slide,
    Panorama,
    AcquisitionRoi,
    Acquisition,
    RoiPoint,
    Channel,
}

impl NodeKind {
    /// Linking order; parents always precede their children here.
    pub const LINK_ORDER: [NodeKind; 6] = [
        NodeKind::Slide,
        NodeKind::Panorama,
        NodeKind::AcquisitionRoi,
        NodeKind::Acquisition,
        NodeKind::RoiPoint,
        NodeKind::Channel,
    ];

    /// The record element name for this kind.
    pub const fn tag(self) -> &'static str {
        match self {
            NodeKind::Slide => "Slide",
            NodeKind::Panorama => "Panorama",
            NodeKind::AcquisitionRoi => "AcquisitionROI",
            NodeKind::Acquisition => "Acquisition",
            NodeKind::RoiPoint => "ROIPoint",
            NodeKind::Channel => "AcquisitionChannel",
        }
    }

    /// Map a record element name back to a kind.
    pub fn from_tag(tag: &str) -> Option<NodeKind> {
        NodeKind::LINK_ORDER.into_iter().find(|k| k.tag() == tag)
    }

    /// If `field` is a foreign-key field, the kind of node it references.
    fn foreign_key(field: &str) -> Option<NodeKind> {
        match field {
            "SlideID" => Some(NodeKind::Slide),
            "PanoramaID" => Some(NodeKind::Panorama),
            "AcquisitionROIID" => Some(NodeKind::AcquisitionRoi),
            "AcquisitionID" => Some(NodeKind::Acquisition),
            _ => None,
        }
    }
}

// =============================================================================
// MetadataNode
// =============================================================================

/// One typed entity from the metadata document.
///
/// The object id and order number are coerced to integers; every other field
/// stays text in the property map so unknown instrument fields survive a
/// round trip.
#[derive(Debug, Clone)]
pub struct MetadataNode {
    pub kind: NodeKind,
    pub id: i64,
    pub order_number: Option<i64>,

    /// Raw scalar fields, foreign keys included
    pub properties: BTreeMap<String, String>,

    /// Parent references by (kind, id); empty for top-level nodes
    pub parents: Vec<(NodeKind, i64)>,

    /// Ordered child ids per child kind (document order)
    pub children: BTreeMap<NodeKind, Vec<i64>>,
}

impl MetadataNode {
    /// Look up a text property.
    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    /// Look up a property and parse it as an integer.
    pub fn int_property(&self, key: &str) -> Option<i64> {
        self.property(key)?.trim().parse().ok()
    }

    /// Look up a property and parse it as a float.
    pub fn float_property(&self, key: &str) -> Option<f64> {
        self.property(key)?.trim().parse().ok()
    }
}

// =============================================================================
// MetadataGraph
// =============================================================================

/// The linked object graph for one container, plus the raw document text.
///
/// Nodes live in an arena indexed by `(kind, id)`. The raw text is retained
/// so the intermediate representation can persist the document verbatim.
#[derive(Debug, Clone)]
pub struct MetadataGraph {
    nodes: BTreeMap<(NodeKind, i64), MetadataNode>,
    raw_document: String,
}

impl MetadataGraph {
    /// Link parsed records into a graph.
    ///
    /// # Errors
    /// - `MissingField` / `InvalidIntegerField` for an unusable `ID`
    /// - `DuplicateId` when two records of one kind share an id
    /// - `UnknownParent` when a foreign key does not resolve
    pub fn from_records(
        records: &[RawRecord],
        raw_document: String,
    ) -> Result<Self, FormatError> {
        let mut graph = MetadataGraph {
            nodes: BTreeMap::new(),
            raw_document,
        };

        for kind in NodeKind::LINK_ORDER {
            for record in records.iter().filter(|r| r.kind == kind.tag()) {
                graph.link_record(kind, record)?;
            }
        }

        Ok(graph)
    }

    fn link_record(&mut self, kind: NodeKind, record: &RawRecord) -> Result<(), FormatError> {
        let id = parse_int_field(record, kind.tag(), FIELD_ID)?;
        if self.nodes.contains_key(&(kind, id)) {
            return Err(FormatError::DuplicateId {
                record: kind.tag(),
                id,
            });
        }

        let order_number = match record.field(FIELD_ORDER_NUMBER) {
            Some(_) => Some(parse_int_field(record, kind.tag(), FIELD_ORDER_NUMBER)?),
            None => None,
        };

        let mut parents = Vec::new();
        for (field, value) in &record.fields {
            let Some(parent_kind) = NodeKind::foreign_key(field) else {
                continue;
            };
            let parent_id: i64 = value.trim().parse().map_err(|_| {
                FormatError::InvalidIntegerField {
                    record: kind.tag(),
                    field: field.clone(),
                    value: value.clone(),
                }
            })?;
            if !self.nodes.contains_key(&(parent_kind, parent_id)) {
                return Err(FormatError::UnknownParent {
                    record: kind.tag(),
                    id,
                    parent_kind: parent_kind.tag(),
                    parent_id,
                });
            }
            parents.push((parent_kind, parent_id));
        }

        // Record the child link on every parent.
        for &(parent_kind, parent_id) in &parents {
            if let Some(parent) = self.nodes.get_mut(&(parent_kind, parent_id)) {
                parent.children.entry(kind).or_default().push(id);
            }
        }

        self.nodes.insert(
            (kind, id),
            MetadataNode {
                kind,
                id,
                order_number,
                properties: record.fields.clone(),
                parents,
                children: BTreeMap::new(),
            },
        );

        Ok(())
    }

    /// Look up a node by kind and id.
    pub fn node(&self, kind: NodeKind, id: i64) -> Option<&MetadataNode> {
        self.nodes.get(&(kind, id))
    }

    /// All nodes of one kind, ordered by id.
    pub fn nodes_of(&self, kind: NodeKind) -> impl Iterator<Item = &MetadataNode> {
        self.nodes
            .range((kind, i64::MIN)..=(kind, i64::MAX))
            .map(|(_, node)| node)
    }

    /// Children of `node` of the given kind, in document order.
    pub fn children_of(&self, node: &MetadataNode, kind: NodeKind) -> Vec<&MetadataNode> {
        node.children
            .get(&kind)
            .into_iter()
            .flatten()
            .filter_map(|&id| self.node(kind, id))
            .collect()
    }

    /// Children of `node` of the given kind, sorted by order number.
    pub fn children_by_order(&self, node: &MetadataNode, kind: NodeKind) -> Vec<&MetadataNode> {
        let mut children = self.children_of(node, kind);
        children.sort_by_key(|c| c.order_number.unwrap_or(i64::MAX));
        children
    }

    /// First parent of `node` of the given kind.
    pub fn parent_of(&self, node: &MetadataNode, kind: NodeKind) -> Option<&MetadataNode> {
        node.parents
            .iter()
            .find(|(k, _)| *k == kind)
            .and_then(|&(k, id)| self.node(k, id))
    }

    /// All acquisitions, ordered by id.
    pub fn acquisitions(&self) -> Vec<&MetadataNode> {
        self.nodes_of(NodeKind::Acquisition).collect()
    }

    /// The raw metadata document text.
    pub fn raw_document(&self) -> &str {
        &self.raw_document
    }
}

fn parse_int_field(
    record: &RawRecord,
    kind: &'static str,
    field: &'static str,
) -> Result<i64, FormatError> {
    let value = record.field(field).ok_or(FormatError::MissingField {
        record: kind,
        field,
    })?;
    value
        .trim()
        .parse()
        .map_err(|_| FormatError::InvalidIntegerField {
            record: kind,
            field: field.to_string(),
            value: value.to_string(),
        })
}

// =============================================================================
// Tests
// =============================================================================
