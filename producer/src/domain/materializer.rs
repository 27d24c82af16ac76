//! Builds flat event payloads from entity snapshots.
//!
//! The plan is computed once per producer from the collection schema and the
//! resolved relations:
//!
//! - scalar attributes are converted through their declared type
//! - single references collapse to the first attached relation row, or `{}`
//! - many-references are always emitted as `[]`
//!
//! Output keys use the attribute's short name when one is declared. The
//! surrogate id is appended under [`GOBID_KEY`].

use std::collections::BTreeMap;

use serde_json::Value;

use super::conversion::{convert_scalar, ConversionError};
use super::event_data::{EventData, FieldValue, RelationTarget, GOBID_KEY};
use super::records::{EntitySnapshot, RelationRow};
use super::relations::RelationInfo;
use super::schema::{AttributeType, CollectionSchema};

/// Failure to materialise one attribute.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("attribute `{attribute}` of entity {tid}: {source}")]
pub struct MaterializeError {
    /// Internal attribute name.
    pub attribute: String,
    /// Entity being materialised.
    pub tid: String,
    #[source]
    source: ConversionError,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum FieldKind {
    Scalar(AttributeType),
    /// `None` when the relation did not resolve in this deployment.
    Reference { destination_has_states: Option<bool> },
    ManyReference,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct FieldPlan {
    attribute: String,
    output: String,
    kind: FieldKind,
}

/// Materialises [`EntitySnapshot`]s of one collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventDataBuilder {
    fields: Vec<FieldPlan>,
}

impl EventDataBuilder {
    /// Plan the payload layout for a collection.
    pub fn new(schema: &CollectionSchema, relations: &BTreeMap<String, RelationInfo>) -> Self {
        let fields = schema
            .attributes()
            .map(|attribute| {
                let kind = match attribute.attribute_type() {
                    AttributeType::Reference => FieldKind::Reference {
                        destination_has_states: relations
                            .get(attribute.name())
                            .map(|info| info.destination_has_states),
                    },
                    AttributeType::ManyReference => FieldKind::ManyReference,
                    other => FieldKind::Scalar(other),
                };
                FieldPlan {
                    attribute: attribute.name().to_owned(),
                    output: attribute.output_name().to_owned(),
                    kind,
                }
            })
            .collect();
        Self { fields }
    }

    /// Build the raw (unmapped) payload for one entity.
    pub fn build(&self, snapshot: &EntitySnapshot) -> Result<EventData, MaterializeError> {
        let mut data = EventData::new();
        for field in &self.fields {
            let value = match &field.kind {
                FieldKind::Scalar(attribute_type) => {
                    let stored = snapshot
                        .attributes
                        .get(&field.attribute)
                        .unwrap_or(&Value::Null);
                    let converted = convert_scalar(*attribute_type, stored).map_err(|source| {
                        MaterializeError {
                            attribute: field.attribute.clone(),
                            tid: snapshot.tid.clone(),
                            source,
                        }
                    })?;
                    FieldValue::Scalar(converted)
                }
                FieldKind::Reference {
                    destination_has_states,
                } => FieldValue::Reference(destination_has_states.and_then(|has_states| {
                    snapshot
                        .relations
                        .get(&field.attribute)
                        .and_then(|rows| rows.first())
                        .map(|row| project(row, has_states))
                })),
                FieldKind::ManyReference => FieldValue::References(Vec::new()),
            };
            data.insert(field.output.clone(), value);
        }
        data.insert(GOBID_KEY, Value::from(snapshot.gobid));
        Ok(data)
    }
}

fn project(row: &RelationRow, destination_has_states: bool) -> RelationTarget {
    RelationTarget {
        tid: row.tid.clone(),
        id: row.id.clone(),
        begin_validity: row.begin_validity.clone(),
        end_validity: row.end_validity.clone(),
        sequence_number: destination_has_states.then_some(row.sequence_number),
    }
}
