//! Field mappers turning materialised payloads into external payloads.

use std::collections::BTreeMap;

use super::event_data::{EventData, FieldValue, GOBID_KEY};
use super::mapping::{FieldMapping, MappingDefinition};

/// Fields projected from relation collection payloads, after aliasing.
const RELATION_FIELDS: [&str; 6] = [
    "src_id",
    "dst_id",
    "src_sequence",
    "dst_sequence",
    "begin_validity",
    "end_validity",
];

/// Output key carrying the relation row's surrogate id.
const RELATION_ID_FIELD: &str = "id";

/// Name lookups that a mapping definition cannot answer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MappingError {
    /// No top-level entry matches the name.
    #[error("{name} cannot be found in the mapping definition")]
    NotFound { name: String },
    /// More than one top-level entry maps to the same internal name.
    #[error("{name} is mapped by more than one external field")]
    Ambiguous { name: String },
}

/// Mapper driven by a [`MappingDefinition`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeclarativeMapper {
    definition: MappingDefinition,
}

impl DeclarativeMapper {
    /// Wrap a definition.
    pub fn new(definition: MappingDefinition) -> Self {
        Self { definition }
    }

    /// Internal source of a top-level external field.
    ///
    /// Nested object entries have no single source and are reported as not
    /// found.
    pub fn mapped_name_reverse(&self, external: &str) -> Result<&str, MappingError> {
        match self.definition.mapping.get(external) {
            Some(FieldMapping::Source(internal)) => Ok(internal),
            _ => Err(MappingError::NotFound {
                name: external.to_owned(),
            }),
        }
    }

    /// External name of a top-level internal field.
    pub fn mapped_name(&self, internal: &str) -> Result<&str, MappingError> {
        let mut matches = self
            .definition
            .mapping
            .iter()
            .filter(|(_, mapping)| matches!(mapping, FieldMapping::Source(source) if source == internal))
            .map(|(external, _)| external.as_str());
        let first = matches.next().ok_or_else(|| MappingError::NotFound {
            name: internal.to_owned(),
        })?;
        if matches.next().is_some() {
            return Err(MappingError::Ambiguous {
                name: internal.to_owned(),
            });
        }
        Ok(first)
    }

    fn map(&self, data: &EventData) -> EventData {
        map_entries(&self.definition.mapping, data)
    }
}

fn map_entries(
    mapping: &BTreeMap<String, FieldMapping>,
    data: &EventData,
) -> EventData {
    mapping
        .iter()
        .map(|(external, field)| {
            let value = match field {
                FieldMapping::Source(internal) => {
                    data.get(internal).cloned().unwrap_or_else(FieldValue::null)
                }
                FieldMapping::Object(object) => FieldValue::Object(map_entries(&object.mapping, data)),
            };
            (external.clone(), value)
        })
        .collect()
}

/// Mapper selected per catalogue/collection when a producer is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventDataMapper {
    /// Returns payloads unchanged.
    PassThrough,
    /// Applies a mapping definition.
    Declarative(DeclarativeMapper),
    /// Projects the fixed relation row fields.
    Relation,
}

impl EventDataMapper {
    /// Choose between pass-through and declarative mapping.
    pub fn for_definition(definition: Option<&MappingDefinition>) -> Self {
        definition.map_or(Self::PassThrough, |definition| {
            Self::Declarative(DeclarativeMapper::new(definition.clone()))
        })
    }

    /// Transform a materialised payload.
    pub fn map(&self, data: EventData) -> EventData {
        match self {
            Self::PassThrough => data,
            Self::Declarative(mapper) => mapper.map(&data),
            Self::Relation => {
                let mut mapped: EventData = RELATION_FIELDS
                    .iter()
                    .map(|field| {
                        let value = data.get(field).cloned().unwrap_or_else(FieldValue::null);
                        ((*field).to_owned(), value)
                    })
                    .collect();
                let id = data.get(GOBID_KEY).cloned().unwrap_or_else(FieldValue::null);
                mapped.insert(RELATION_ID_FIELD, id);
                mapped
            }
        }
    }

    /// Internal name of an external field.
    ///
    /// Pass-through mapping returns the name unchanged.
    pub fn mapped_name_reverse<'a>(&'a self, external: &'a str) -> Result<&'a str, MappingError> {
        match self {
            Self::Declarative(mapper) => mapper.mapped_name_reverse(external),
            Self::PassThrough | Self::Relation => Ok(external),
        }
    }

    /// External name of an internal field.
    ///
    /// Pass-through mapping returns the name unchanged.
    pub fn mapped_name<'a>(&'a self, internal: &'a str) -> Result<&'a str, MappingError> {
        match self {
            Self::Declarative(mapper) => mapper.mapped_name(internal),
            Self::PassThrough | Self::Relation => Ok(internal),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::{fixture, rstest};
    use serde_json::{json, Value};

    #[fixture]
    fn peilmerken() -> MappingDefinition {
        MappingDefinition::from_json_str(include_str!("../../fixtures/mappings/nap/peilmerken.json"))
            .expect("fixture parses")
    }

    fn data(value: Value) -> EventData {
        match value {
            Value::Object(map) => map
                .into_iter()
                .map(|(key, value)| (key, FieldValue::Scalar(value)))
                .collect(),
            _ => EventData::new(),
        }
    }

    #[rstest]
    fn declarative_mapping_round_trips_a_flat_field() {
        let mapper = EventDataMapper::for_definition(Some(&MappingDefinition::flat(
            "cat",
            "col",
            [("ext", "int")],
        )));
        let mapped = mapper.map(data(json!({"int": 5})));
        assert_eq!(serde_json::to_value(&mapped).expect("serialises"), json!({"ext": 5}));
        assert_eq!(mapper.mapped_name_reverse("ext"), Ok("int"));
        assert_eq!(mapper.mapped_name("int"), Ok("ext"));
    }

    #[rstest]
    fn declarative_mapping_builds_nested_objects(peilmerken: MappingDefinition) {
        let mapper = EventDataMapper::for_definition(Some(&peilmerken));
        let mapped = mapper.map(data(json!({
            "identificatie": "10180001",
            "merk_code": "1",
            "merk_omschrijving": "bout",
            "status_code": 1,
            "ligt_in_gebieden_bouwblok": {"tid": "x"},
            "_gobid": 3,
        })));
        let value = serde_json::to_value(&mapped).expect("serialises");

        assert_eq!(value["identificatie"], json!("10180001"));
        assert_eq!(value["merk"], json!({"code": "1", "omschrijving": "bout"}));
        assert_eq!(value["status"], json!({"code": 1, "omschrijving": null}));
        assert_eq!(value["ligt_in_bouwblok"], json!({"tid": "x"}));
        assert_eq!(value["jaar"], Value::Null);
        assert!(value.get("_gobid").is_none());
        assert!(value.get("merk_code").is_none());
    }

    #[rstest]
    fn reverse_lookup_of_unknown_or_nested_names_fails(peilmerken: MappingDefinition) {
        let mapper = DeclarativeMapper::new(peilmerken);
        assert_eq!(
            mapper.mapped_name_reverse("bogus"),
            Err(MappingError::NotFound {
                name: "bogus".to_owned()
            })
        );
        assert!(mapper.mapped_name_reverse("merk").is_err());
        assert_eq!(mapper.mapped_name("ligt_in_gebieden_bouwblok"), Ok("ligt_in_bouwblok"));
    }

    #[rstest]
    fn forward_lookup_rejects_ambiguous_sources() {
        let mapper = DeclarativeMapper::new(MappingDefinition::flat(
            "cat",
            "col",
            [("a", "same"), ("b", "same")],
        ));
        assert_eq!(
            mapper.mapped_name("same"),
            Err(MappingError::Ambiguous {
                name: "same".to_owned()
            })
        );
    }

    #[rstest]
    fn pass_through_keeps_everything() {
        let mapper = EventDataMapper::for_definition(None);
        let input = data(json!({"a": 1, "_gobid": 2}));
        assert_eq!(mapper.map(input.clone()), input);
        assert_eq!(mapper.mapped_name_reverse("a"), Ok("a"));
    }

    #[rstest]
    fn relation_mapper_projects_fixed_fields() {
        let mapped = EventDataMapper::Relation.map(data(json!({
            "src_id": "1",
            "dst_id": "2",
            "src_sequence": null,
            "dst_sequence": 3,
            "begin_validity": "2020-01-01T00:00:00",
            "end_validity": null,
            "_gobid": 99,
            "extra": "dropped",
        })));
        assert_eq!(
            serde_json::to_value(&mapped).expect("serialises"),
            json!({
                "src_id": "1",
                "dst_id": "2",
                "src_sequence": null,
                "dst_sequence": 3,
                "begin_validity": "2020-01-01T00:00:00",
                "end_validity": null,
                "id": 99,
            })
        );
    }
}
