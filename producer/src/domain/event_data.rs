//! Tagged value model for materialised event payloads.

use std::collections::BTreeMap;

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use serde_json::Value;

/// Key under which the internal surrogate identifier is carried.
pub const GOBID_KEY: &str = "_gobid";

/// Embedded projection of one related entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RelationTarget {
    /// Stable identifier of the referenced entity.
    pub tid: Option<String>,
    /// Functional identifier of the referenced entity.
    pub id: Option<String>,
    /// Start of the relation's validity.
    pub begin_validity: Option<String>,
    /// End of the relation's validity.
    pub end_validity: Option<String>,
    /// Sequence number; `None` when the destination has no states, in which
    /// case the key is omitted. A stateful destination always carries the
    /// key, `null` included.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sequence_number: Option<Option<i64>>,
}

/// One field of an event payload.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// Canonical scalar (string, number, boolean, JSON, or null).
    Scalar(Value),
    /// Single-valued reference; `None` serialises as `{}`.
    Reference(Option<RelationTarget>),
    /// Multi-valued reference, serialised as a list.
    References(Vec<RelationTarget>),
    /// Nested object produced by a mapping definition.
    Object(EventData),
}

impl FieldValue {
    /// The JSON null scalar.
    pub const fn null() -> Self {
        Self::Scalar(Value::Null)
    }
}

impl From<Value> for FieldValue {
    fn from(value: Value) -> Self {
        Self::Scalar(value)
    }
}

impl Serialize for FieldValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Scalar(value) => value.serialize(serializer),
            Self::Reference(Some(target)) => target.serialize(serializer),
            Self::Reference(None) => serializer.serialize_map(Some(0))?.end(),
            Self::References(targets) => targets.serialize(serializer),
            Self::Object(data) => data.serialize(serializer),
        }
    }
}

/// Ordered field map forming an event's `data` section.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct EventData(BTreeMap<String, FieldValue>);

impl EventData {
    /// Create an empty payload.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a field.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<FieldValue>) {
        self.0.insert(key.into(), value.into());
    }

    /// Look up a field.
    pub fn get(&self, key: &str) -> Option<&FieldValue> {
        self.0.get(key)
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the payload has no fields.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate fields in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.0.iter().map(|(key, value)| (key.as_str(), value))
    }
}

impl FromIterator<(String, FieldValue)> for EventData {
    fn from_iter<T: IntoIterator<Item = (String, FieldValue)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}
