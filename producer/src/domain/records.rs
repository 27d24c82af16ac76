//! Records read from the event store.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use super::relations::RelationInfo;

/// Identifies one event stream and its watermark row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamKey {
    catalogue: String,
    collection: String,
}

impl StreamKey {
    /// Build a key from catalogue and collection names.
    pub fn new(catalogue: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            catalogue: catalogue.into(),
            collection: collection.into(),
        }
    }

    /// Catalogue name.
    pub fn catalogue(&self) -> &str {
        &self.catalogue
    }

    /// Collection name.
    pub fn collection(&self) -> &str {
        &self.collection
    }
}

impl std::fmt::Display for StreamKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.catalogue, self.collection)
    }
}

/// One row of the append-only event log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredEvent {
    /// Strictly increasing id within the stream.
    pub event_id: i64,
    /// Event action such as `ADD` or `MODIFY`; opaque to the producer.
    pub action: String,
    /// Stable identifier of the affected entity.
    pub tid: String,
}

/// Relation row joined to an entity snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelationRow {
    /// Destination entity tid.
    pub tid: Option<String>,
    /// Destination entity id.
    pub id: Option<String>,
    /// Relation validity start, already rendered as text.
    pub begin_validity: Option<String>,
    /// Relation validity end, already rendered as text.
    pub end_validity: Option<String>,
    /// Destination sequence number.
    pub sequence_number: Option<i64>,
}

/// Current state of one entity with its relations attached.
#[derive(Debug, Clone, PartialEq)]
pub struct EntitySnapshot {
    /// Internal surrogate key.
    pub gobid: i64,
    /// Stable external identifier.
    pub tid: String,
    /// Id of the last event that modified the entity.
    pub last_event: Option<i64>,
    /// Stored column values keyed by column name.
    pub attributes: Map<String, Value>,
    /// Relation rows keyed by reference attribute name.
    pub relations: BTreeMap<String, Vec<RelationRow>>,
}

impl EntitySnapshot {
    /// Keyset position of this snapshot in a full-load scan.
    pub fn cursor(&self) -> SnapshotCursor {
        SnapshotCursor {
            last_event: self.last_event.unwrap_or(-1),
            gobid: self.gobid,
        }
    }
}

/// Position after which the next snapshot page starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SnapshotCursor {
    /// Last modifying event id of the previous row.
    pub last_event: i64,
    /// Surrogate key of the previous row, breaking ties.
    pub gobid: i64,
}

/// Everything the store needs to read entities of one collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntitySource {
    /// Physical entity table.
    pub table: String,
    /// Whether entities carry a sequence number.
    pub has_states: bool,
    /// Resolved relations keyed by attribute name.
    pub relations: BTreeMap<String, RelationInfo>,
}

impl EntitySource {
    /// Relations whose rows must be attached to snapshots.
    ///
    /// Many-references are never forwarded, so their rows are not read.
    pub fn attached_relations(&self) -> impl Iterator<Item = (&str, &RelationInfo)> {
        self.relations
            .iter()
            .filter(|(_, info)| !info.is_multivalued)
            .map(|(attribute, info)| (attribute.as_str(), info))
    }
}
