//! Read-only schema registry describing catalogues, collections, and their
//! attributes.
//!
//! The registry is loaded once from a JSON descriptor and handed to the
//! producer by reference. Relation collections are derived from the
//! reference attributes at construction time and exposed under the reserved
//! [`RELATION_CATALOGUE`].

use std::collections::BTreeMap;

use serde::Deserialize;

use super::relations::parse_relation_name;

/// Catalogue name under which relation collections are published.
pub const RELATION_CATALOGUE: &str = "rel";

/// Physical table name for a catalogue/collection pair.
///
/// # Examples
/// ```
/// use eventproducer::domain::schema::table_name;
///
/// assert_eq!(table_name("nap", "peilmerken"), "nap_peilmerken");
/// assert_eq!(table_name("rel", "nap_pmk_gbd_bbk_ligt_in_bouwblok"), "rel_nap_pmk_gbd_bbk_ligt_in_bouwblok");
/// ```
pub fn table_name(catalogue: &str, collection: &str) -> String {
    format!("{catalogue}_{collection}")
}

/// Declared type of a collection attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum AttributeType {
    #[serde(rename = "GOB.String")]
    String,
    #[serde(rename = "GOB.Character")]
    Character,
    #[serde(rename = "GOB.Integer")]
    Integer,
    #[serde(rename = "GOB.Decimal")]
    Decimal,
    #[serde(rename = "GOB.Boolean")]
    Boolean,
    #[serde(rename = "GOB.Date")]
    Date,
    #[serde(rename = "GOB.DateTime")]
    DateTime,
    #[serde(rename = "GOB.JSON")]
    Json,
    #[serde(
        rename = "GOB.Geo.Geometry",
        alias = "GOB.Geo.Point",
        alias = "GOB.Geo.Polygon"
    )]
    Geometry,
    /// Single-valued reference to another collection.
    #[serde(rename = "GOB.Reference")]
    Reference,
    /// Multi-valued reference to another collection.
    #[serde(rename = "GOB.ManyReference", alias = "GOB.VeryManyReference")]
    ManyReference,
    /// Any type this crate has no dedicated conversion for.
    #[serde(other)]
    Other,
}

impl AttributeType {
    /// Whether the attribute points at another collection.
    pub const fn is_reference(self) -> bool {
        matches!(self, Self::Reference | Self::ManyReference)
    }
}

/// Target of a reference attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceTarget {
    /// Destination catalogue name.
    pub catalogue: String,
    /// Destination collection name.
    pub collection: String,
}

/// One declared attribute of a collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeSchema {
    name: String,
    attribute_type: AttributeType,
    reference: Option<ReferenceTarget>,
    shortname: Option<String>,
    relation: Option<String>,
}

impl AttributeSchema {
    /// Build a scalar attribute.
    pub fn scalar(name: impl Into<String>, attribute_type: AttributeType) -> Self {
        Self {
            name: name.into(),
            attribute_type,
            reference: None,
            shortname: None,
            relation: None,
        }
    }

    /// Set the external alias used as output key.
    pub fn with_shortname(mut self, shortname: impl Into<String>) -> Self {
        self.shortname = Some(shortname.into());
        self
    }

    /// Internal attribute name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared attribute type.
    pub fn attribute_type(&self) -> AttributeType {
        self.attribute_type
    }

    /// Destination of a reference attribute.
    pub fn reference(&self) -> Option<&ReferenceTarget> {
        self.reference.as_ref()
    }

    /// Key under which the materialised value is emitted.
    pub fn output_name(&self) -> &str {
        self.shortname.as_deref().unwrap_or(&self.name)
    }

    /// Explicit relation name, used when the derived name is compressed.
    pub fn explicit_relation(&self) -> Option<&str> {
        self.relation.as_deref()
    }
}

/// Schema of one collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionSchema {
    catalogue: String,
    name: String,
    abbreviation: String,
    has_states: bool,
    attributes: BTreeMap<String, AttributeSchema>,
}

impl CollectionSchema {
    /// Owning catalogue name.
    pub fn catalogue(&self) -> &str {
        &self.catalogue
    }

    /// Collection name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Lowercase abbreviation used in relation names.
    pub fn abbreviation(&self) -> &str {
        &self.abbreviation
    }

    /// Whether entities are versioned by sequence number.
    pub fn has_states(&self) -> bool {
        self.has_states
    }

    /// Declared attributes keyed by internal name.
    pub fn attributes(&self) -> impl Iterator<Item = &AttributeSchema> {
        self.attributes.values()
    }

    /// Look up an attribute by internal name.
    pub fn attribute(&self, name: &str) -> Option<&AttributeSchema> {
        self.attributes.get(name)
    }

    /// Physical table holding the entity snapshots.
    pub fn table_name(&self) -> String {
        table_name(&self.catalogue, &self.name)
    }

    /// Whether this is a derived relation collection.
    pub fn is_relation(&self) -> bool {
        self.catalogue == RELATION_CATALOGUE
    }

    fn relation_table(name: &str) -> Self {
        let attributes = [
            AttributeSchema::scalar("src_id", AttributeType::String),
            AttributeSchema::scalar("src_volgnummer", AttributeType::Integer)
                .with_shortname("src_sequence"),
            AttributeSchema::scalar("dst_id", AttributeType::String),
            AttributeSchema::scalar("dst_volgnummer", AttributeType::Integer)
                .with_shortname("dst_sequence"),
            AttributeSchema::scalar("begin_geldigheid", AttributeType::DateTime)
                .with_shortname("begin_validity"),
            AttributeSchema::scalar("eind_geldigheid", AttributeType::DateTime)
                .with_shortname("end_validity"),
        ]
        .into_iter()
        .map(|attribute| (attribute.name.clone(), attribute))
        .collect();

        Self {
            catalogue: RELATION_CATALOGUE.to_owned(),
            name: name.to_owned(),
            abbreviation: RELATION_CATALOGUE.to_owned(),
            has_states: false,
            attributes,
        }
    }
}

/// Schema of one catalogue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogueSchema {
    name: String,
    abbreviation: String,
    collections: BTreeMap<String, CollectionSchema>,
}

impl CatalogueSchema {
    /// Catalogue name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Lowercase abbreviation used in relation names.
    pub fn abbreviation(&self) -> &str {
        &self.abbreviation
    }

    /// Collections in name order.
    pub fn collections(&self) -> impl Iterator<Item = &CollectionSchema> {
        self.collections.values()
    }
}

/// The collection and attribute that own a relation collection.
#[derive(Debug, Clone, Copy)]
pub struct RelationOwner<'a> {
    /// Source collection declaring the reference.
    pub collection: &'a CollectionSchema,
    /// Reference attribute whose relation table is the collection.
    pub attribute: &'a AttributeSchema,
}

/// Errors raised while loading a schema descriptor.
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    /// The descriptor is not valid JSON for the expected layout.
    #[error("failed to parse schema descriptor: {source}")]
    Parse {
        #[source]
        source: serde_json::Error,
    },
    /// The descriptor is well formed but inconsistent.
    #[error("invalid schema descriptor: {message}")]
    Invalid { message: String },
}

/// Explicitly constructed, read-only catalogue model.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaRegistry {
    catalogues: BTreeMap<String, CatalogueSchema>,
}

impl SchemaRegistry {
    /// Parse a registry from its JSON descriptor.
    ///
    /// # Examples
    /// ```
    /// use eventproducer::domain::schema::SchemaRegistry;
    ///
    /// let registry = SchemaRegistry::from_json_str(r#"{"catalogues": {}}"#)?;
    /// assert!(registry.catalogue("nap").is_none());
    /// # Ok::<(), eventproducer::domain::schema::SchemaError>(())
    /// ```
    pub fn from_json_str(json: &str) -> Result<Self, SchemaError> {
        let document: SchemaDocument =
            serde_json::from_str(json).map_err(|source| SchemaError::Parse { source })?;
        Self::from_document(document)
    }

    fn from_document(document: SchemaDocument) -> Result<Self, SchemaError> {
        let mut catalogues = BTreeMap::new();
        for (name, catalogue) in document.catalogues {
            if name == RELATION_CATALOGUE {
                return Err(SchemaError::Invalid {
                    message: format!("catalogue name `{RELATION_CATALOGUE}` is reserved"),
                });
            }
            let collections = catalogue
                .collections
                .into_iter()
                .map(|(collection, doc)| {
                    let schema = doc.into_schema(&name, &collection)?;
                    Ok((collection, schema))
                })
                .collect::<Result<BTreeMap<_, _>, SchemaError>>()?;
            catalogues.insert(
                name.clone(),
                CatalogueSchema {
                    name,
                    abbreviation: catalogue.abbreviation.to_lowercase(),
                    collections,
                },
            );
        }

        let mut registry = Self { catalogues };
        let relations = registry
            .source_collections()
            .flat_map(|collection| {
                collection
                    .attributes()
                    .filter_map(|attribute| registry.relation_name(collection, attribute))
                    .collect::<Vec<_>>()
            })
            .map(|name| {
                let schema = CollectionSchema::relation_table(&name);
                (name, schema)
            })
            .collect();
        registry.catalogues.insert(
            RELATION_CATALOGUE.to_owned(),
            CatalogueSchema {
                name: RELATION_CATALOGUE.to_owned(),
                abbreviation: RELATION_CATALOGUE.to_owned(),
                collections: relations,
            },
        );
        Ok(registry)
    }

    /// Look up a catalogue by name.
    pub fn catalogue(&self, name: &str) -> Option<&CatalogueSchema> {
        self.catalogues.get(name)
    }

    /// Look up a collection by catalogue and collection name.
    pub fn collection(&self, catalogue: &str, collection: &str) -> Option<&CollectionSchema> {
        self.catalogues.get(catalogue)?.collections.get(collection)
    }

    /// Look up a source collection by its catalogue and collection
    /// abbreviations (case insensitive).
    pub fn collection_by_abbreviations(
        &self,
        catalogue_abbreviation: &str,
        collection_abbreviation: &str,
    ) -> Option<&CollectionSchema> {
        let catalogue = self.catalogues.values().find(|catalogue| {
            catalogue.name != RELATION_CATALOGUE
                && catalogue
                    .abbreviation
                    .eq_ignore_ascii_case(catalogue_abbreviation)
        })?;
        catalogue.collections.values().find(|collection| {
            collection
                .abbreviation
                .eq_ignore_ascii_case(collection_abbreviation)
        })
    }

    /// Relation name for a reference attribute, if it can be derived.
    ///
    /// An explicit name in the descriptor wins. Otherwise the name is
    /// composed from the source and destination abbreviations and the
    /// attribute name, which requires the destination to be known.
    pub fn relation_name(
        &self,
        collection: &CollectionSchema,
        attribute: &AttributeSchema,
    ) -> Option<String> {
        if !attribute.attribute_type.is_reference() {
            return None;
        }
        if let Some(explicit) = attribute.explicit_relation() {
            return Some(explicit.to_lowercase());
        }
        let target = attribute.reference()?;
        let destination = self.collection(&target.catalogue, &target.collection)?;
        let source_catalogue = self.catalogue(collection.catalogue())?;
        let destination_catalogue = self.catalogue(destination.catalogue())?;
        Some(
            format!(
                "{}_{}_{}_{}_{}",
                source_catalogue.abbreviation,
                collection.abbreviation,
                destination_catalogue.abbreviation,
                destination.abbreviation,
                attribute.name
            )
            .to_lowercase(),
        )
    }

    /// Find the source collection and attribute owning a relation
    /// collection.
    pub fn relation_owner(&self, relation: &str) -> Option<RelationOwner<'_>> {
        let parsed = parse_relation_name(relation)?;
        let collection = self
            .collection_by_abbreviations(parsed.source_catalogue, parsed.source_collection)?;
        let attribute = collection.attributes().find(|attribute| {
            self.relation_name(collection, attribute).as_deref() == Some(relation)
        })?;
        Some(RelationOwner {
            collection,
            attribute,
        })
    }

    fn source_collections(&self) -> impl Iterator<Item = &CollectionSchema> {
        self.catalogues
            .values()
            .filter(|catalogue| catalogue.name != RELATION_CATALOGUE)
            .flat_map(CatalogueSchema::collections)
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SchemaDocument {
    catalogues: BTreeMap<String, CatalogueDocument>,
}

#[derive(Debug, Deserialize)]
struct CatalogueDocument {
    abbreviation: String,
    #[serde(default)]
    collections: BTreeMap<String, CollectionDocument>,
}

#[derive(Debug, Deserialize)]
struct CollectionDocument {
    abbreviation: String,
    #[serde(default)]
    has_states: bool,
    #[serde(default)]
    attributes: BTreeMap<String, AttributeDocument>,
}

#[derive(Debug, Deserialize)]
struct AttributeDocument {
    #[serde(rename = "type")]
    attribute_type: AttributeType,
    #[serde(rename = "ref")]
    reference: Option<String>,
    shortname: Option<String>,
    relation: Option<String>,
}

impl CollectionDocument {
    fn into_schema(self, catalogue: &str, name: &str) -> Result<CollectionSchema, SchemaError> {
        let attributes = self
            .attributes
            .into_iter()
            .map(|(attribute, doc)| {
                let reference = doc
                    .reference
                    .as_deref()
                    .map(|raw| parse_reference(catalogue, name, &attribute, raw))
                    .transpose()?;
                let schema = AttributeSchema {
                    name: attribute.clone(),
                    attribute_type: doc.attribute_type,
                    reference,
                    shortname: doc.shortname,
                    relation: doc.relation,
                };
                Ok((attribute, schema))
            })
            .collect::<Result<BTreeMap<_, _>, SchemaError>>()?;

        Ok(CollectionSchema {
            catalogue: catalogue.to_owned(),
            name: name.to_owned(),
            abbreviation: self.abbreviation.to_lowercase(),
            has_states: self.has_states,
            attributes,
        })
    }
}

fn parse_reference(
    catalogue: &str,
    collection: &str,
    attribute: &str,
    raw: &str,
) -> Result<ReferenceTarget, SchemaError> {
    match raw.split_once(':') {
        Some((dst_catalogue, dst_collection))
            if !dst_catalogue.is_empty() && !dst_collection.is_empty() =>
        {
            Ok(ReferenceTarget {
                catalogue: dst_catalogue.to_owned(),
                collection: dst_collection.to_owned(),
            })
        }
        _ => Err(SchemaError::Invalid {
            message: format!(
                "attribute {catalogue}.{collection}.{attribute} has malformed ref `{raw}`"
            ),
        }),
    }
}
