//! Relation resolution for reference attributes.
//!
//! Relation tables are named after the abbreviations of the source and
//! destination collections. The resolver derives that name for each
//! reference attribute, splits it back into its abbreviations, and looks the
//! destination up again. Anything that does not resolve is left out of the
//! result; the materialiser emits those attributes as empty.

use std::collections::BTreeMap;

use super::schema::{
    table_name, AttributeType, CollectionSchema, SchemaRegistry, RELATION_CATALOGUE,
};

/// Components of an encoded relation name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelationName<'a> {
    /// Source catalogue abbreviation.
    pub source_catalogue: &'a str,
    /// Source collection abbreviation.
    pub source_collection: &'a str,
    /// Destination catalogue abbreviation.
    pub destination_catalogue: &'a str,
    /// Destination collection abbreviation.
    pub destination_collection: &'a str,
    /// Attribute name, possibly containing underscores.
    pub attribute: &'a str,
}

/// Split a relation name (with or without the `rel_` table prefix).
///
/// # Examples
/// ```
/// use eventproducer::domain::relations::parse_relation_name;
///
/// let parsed = parse_relation_name("rel_nap_pmk_gbd_bbk_ligt_in_gebieden_bouwblok").unwrap();
/// assert_eq!(parsed.destination_collection, "bbk");
/// assert_eq!(parsed.attribute, "ligt_in_gebieden_bouwblok");
/// ```
pub fn parse_relation_name(name: &str) -> Option<RelationName<'_>> {
    let prefix = format!("{RELATION_CATALOGUE}_");
    let bare = name.strip_prefix(prefix.as_str()).unwrap_or(name);
    let mut parts = bare.splitn(5, '_');
    let parsed = RelationName {
        source_catalogue: parts.next()?,
        source_collection: parts.next()?,
        destination_catalogue: parts.next()?,
        destination_collection: parts.next()?,
        attribute: parts.next()?,
    };
    let all_present = [
        parsed.source_catalogue,
        parsed.source_collection,
        parsed.destination_catalogue,
        parsed.destination_collection,
        parsed.attribute,
    ]
    .iter()
    .all(|part| !part.is_empty());
    all_present.then_some(parsed)
}

/// Storage coordinates of one resolved relation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationInfo {
    /// Physical join table, `rel_{relation_name}`.
    pub relation_table: String,
    /// Physical table of the referenced entities.
    pub destination_table: String,
    /// Whether the attribute is a many-reference.
    pub is_multivalued: bool,
    /// Whether destination entities carry a sequence number.
    pub destination_has_states: bool,
}

/// Resolves reference attributes to relation and destination tables.
#[derive(Debug, Clone, Copy)]
pub struct RelationResolver<'a> {
    registry: &'a SchemaRegistry,
}

impl<'a> RelationResolver<'a> {
    /// Create a resolver over the given registry.
    pub fn new(registry: &'a SchemaRegistry) -> Self {
        Self { registry }
    }

    /// Resolve every reference attribute of a collection.
    ///
    /// Unknown collections and unresolvable relations yield no entries.
    pub fn resolve(&self, catalogue: &str, collection: &str) -> BTreeMap<String, RelationInfo> {
        self.registry
            .collection(catalogue, collection)
            .map(|schema| self.resolve_schema(schema))
            .unwrap_or_default()
    }

    /// Resolve every reference attribute of an already looked-up collection.
    pub fn resolve_schema(&self, schema: &CollectionSchema) -> BTreeMap<String, RelationInfo> {
        schema
            .attributes()
            .filter(|attribute| attribute.attribute_type().is_reference())
            .filter_map(|attribute| {
                let relation = self.registry.relation_name(schema, attribute)?;
                let info = self.resolve_relation(&relation, attribute.attribute_type())?;
                Some((attribute.name().to_owned(), info))
            })
            .collect()
    }

    fn resolve_relation(
        &self,
        relation: &str,
        attribute_type: AttributeType,
    ) -> Option<RelationInfo> {
        let relation_table = table_name(RELATION_CATALOGUE, relation);
        let parsed = parse_relation_name(&relation_table)?;
        let destination = self.registry.collection_by_abbreviations(
            parsed.destination_catalogue,
            parsed.destination_collection,
        )?;
        Some(RelationInfo {
            relation_table,
            destination_table: destination.table_name(),
            is_multivalued: attribute_type == AttributeType::ManyReference,
            destination_has_states: destination.has_states(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::{fixture, rstest};

    #[fixture]
    fn registry() -> SchemaRegistry {
        SchemaRegistry::from_json_str(include_str!("../../fixtures/schema.json"))
            .expect("fixture schema parses")
    }

    #[rstest]
    #[case("nap_pmk_gbd_bbk_ligt_in_gebieden_bouwblok", Some(("nap", "pmk", "gbd", "bbk", "ligt_in_gebieden_bouwblok")))]
    #[case("rel_gbd_bbk_gbd_brt_ligt_in_buurt", Some(("gbd", "bbk", "gbd", "brt", "ligt_in_buurt")))]
    #[case("gbd_bbk_gbd", None)]
    #[case("gbd__gbd_brt_x", None)]
    fn splits_relation_names(
        #[case] name: &str,
        #[case] expected: Option<(&str, &str, &str, &str, &str)>,
    ) {
        let parsed = parse_relation_name(name).map(|parsed| {
            (
                parsed.source_catalogue,
                parsed.source_collection,
                parsed.destination_catalogue,
                parsed.destination_collection,
                parsed.attribute,
            )
        });
        assert_eq!(parsed, expected);
    }

    #[rstest]
    fn resolves_single_reference(registry: SchemaRegistry) {
        let relations = RelationResolver::new(&registry).resolve("nap", "peilmerken");
        assert_eq!(
            relations.get("ligt_in_gebieden_bouwblok"),
            Some(&RelationInfo {
                relation_table: "rel_nap_pmk_gbd_bbk_ligt_in_gebieden_bouwblok".to_owned(),
                destination_table: "gebieden_bouwblokken".to_owned(),
                is_multivalued: false,
                destination_has_states: true,
            })
        );
    }

    #[rstest]
    fn omits_relations_without_destination(registry: SchemaRegistry) {
        let relations = RelationResolver::new(&registry).resolve("gebieden", "buurten");
        assert!(!relations.contains_key("ligt_in_wijk"));
        let many = relations
            .get("bestaat_uit_bouwblokken")
            .expect("many reference resolves");
        assert!(many.is_multivalued);
    }

    #[rstest]
    fn unknown_collection_resolves_to_nothing(registry: SchemaRegistry) {
        assert!(RelationResolver::new(&registry)
            .resolve("nap", "bogus")
            .is_empty());
    }
}
