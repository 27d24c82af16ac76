//! Declarative mapping definitions between internal and external schemas.
//!
//! A definition maps every external field name either to an internal field
//! name or to a nested object of further mappings:
//!
//! ```json
//! {
//!   "catalog": "nap",
//!   "collection": "peilmerken",
//!   "version": "v1.0.1",
//!   "mapping": {
//!     "ligt_in_bouwblok": "ligt_in_gebieden_bouwblok",
//!     "merk": {"type": "object", "mapping": {"code": "merk_code"}}
//!   }
//! }
//! ```

use std::collections::BTreeMap;

use serde::Deserialize;

/// Source of one external field.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum FieldMapping {
    /// Copy the internal field with this name.
    Source(String),
    /// Build a nested object.
    Object(MappedObject),
}

/// Nested object definition.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MappedObject {
    #[serde(rename = "type")]
    _kind: MappedObjectKind,
    /// External field name to source.
    pub mapping: BTreeMap<String, FieldMapping>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum MappedObjectKind {
    Object,
}

/// Versioned mapping for one catalogue/collection.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MappingDefinition {
    /// Catalogue the definition applies to.
    pub catalog: String,
    /// Collection the definition applies to.
    pub collection: String,
    /// External schema version this definition targets.
    pub version: String,
    /// External field name to source.
    pub mapping: BTreeMap<String, FieldMapping>,
}

impl MappingDefinition {
    /// Parse a definition from its JSON document.
    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Build a flat definition from `(external, internal)` pairs.
    pub fn flat<'a>(
        catalog: impl Into<String>,
        collection: impl Into<String>,
        pairs: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> Self {
        Self {
            catalog: catalog.into(),
            collection: collection.into(),
            version: "unversioned".to_owned(),
            mapping: pairs
                .into_iter()
                .map(|(external, internal)| {
                    (external.to_owned(), FieldMapping::Source(internal.to_owned()))
                })
                .collect(),
        }
    }
}

/// Errors raised while assembling the mapping registry.
#[derive(Debug, thiserror::Error)]
pub enum MappingLoadError {
    /// A document could not be parsed.
    #[error("failed to parse mapping definition {origin}: {source}")]
    Parse {
        /// Where the document came from.
        origin: String,
        #[source]
        source: serde_json::Error,
    },
    /// Two documents target the same catalogue/collection.
    #[error("duplicate mapping definition for {catalog}.{collection}")]
    Duplicate {
        /// Catalogue name.
        catalog: String,
        /// Collection name.
        collection: String,
    },
    /// The definition directory could not be read.
    #[error("failed to read mapping definitions from {origin}: {message}")]
    Io {
        /// Directory or file being read.
        origin: String,
        /// Underlying I/O failure.
        message: String,
    },
}

/// Static lookup of mapping definitions keyed by catalogue and collection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MappingRegistry {
    definitions: BTreeMap<(String, String), MappingDefinition>,
}

impl MappingRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a definition; each catalogue/collection may appear once.
    pub fn insert(&mut self, definition: MappingDefinition) -> Result<(), MappingLoadError> {
        let key = (definition.catalog.clone(), definition.collection.clone());
        if self.definitions.contains_key(&key) {
            return Err(MappingLoadError::Duplicate {
                catalog: key.0,
                collection: key.1,
            });
        }
        self.definitions.insert(key, definition);
        Ok(())
    }

    /// Parse and register a JSON document.
    pub fn insert_json(&mut self, origin: &str, json: &str) -> Result<(), MappingLoadError> {
        let definition =
            MappingDefinition::from_json_str(json).map_err(|source| MappingLoadError::Parse {
                origin: origin.to_owned(),
                source,
            })?;
        self.insert(definition)
    }

    /// Definition for a catalogue/collection, if any.
    pub fn get(&self, catalog: &str, collection: &str) -> Option<&MappingDefinition> {
        self.definitions
            .get(&(catalog.to_owned(), collection.to_owned()))
    }

    /// Number of registered definitions.
    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    /// Whether no definitions are registered.
    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}
