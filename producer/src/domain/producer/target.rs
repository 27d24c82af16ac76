//! Header and routing derivation for primary and relation collections.

use crate::domain::mapper::EventDataMapper;
use crate::domain::mapping::MappingRegistry;
use crate::domain::naming::camel_case;
use crate::domain::schema::{SchemaRegistry, RELATION_CATALOGUE};
use crate::domain::Error;

/// Where a producer's events go and how they are labelled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductionTarget {
    /// `catalog` header value.
    pub catalog: String,
    /// `collection` header value.
    pub collection: String,
    /// Broker routing key.
    pub routing_key: String,
}

/// Derive the target and mapper for a catalogue/collection.
///
/// Relation collections are published under their owning collection:
/// `nap` / `peilmerken_ligtInBouwblok` on
/// `nap.peilmerken.rel.peilmerken_ligtInBouwblok`. The relation name in the
/// table is the internal attribute name, so the owning collection's mapping
/// translates it to the name consumers know before it is camel-cased.
pub fn resolve_target(
    registry: &SchemaRegistry,
    mappings: &MappingRegistry,
    catalogue: &str,
    collection: &str,
) -> Result<(ProductionTarget, EventDataMapper), Error> {
    if catalogue != RELATION_CATALOGUE {
        if registry.collection(catalogue, collection).is_none() {
            return Err(Error::not_found(format!(
                "unknown collection {catalogue}.{collection}"
            )));
        }
        let target = ProductionTarget {
            catalog: catalogue.to_owned(),
            collection: collection.to_owned(),
            routing_key: format!("{catalogue}.{collection}"),
        };
        let mapper = EventDataMapper::for_definition(mappings.get(catalogue, collection));
        return Ok((target, mapper));
    }

    let owner = registry.relation_owner(collection).ok_or_else(|| {
        Error::not_producible(format!(
            "relation {collection} is not defined in the schema"
        ))
    })?;
    let main_catalogue = owner.collection.catalogue();
    let main_collection = owner.collection.name();
    let main_mapper = EventDataMapper::for_definition(mappings.get(main_catalogue, main_collection));
    let relation_name = main_mapper
        .mapped_name(owner.attribute.name())
        .map_err(|err| Error::mapping_failed(format!("{main_catalogue}.{main_collection}: {err}")))?;
    let event_collection = format!("{main_collection}_{}", camel_case(relation_name));

    let target = ProductionTarget {
        catalog: main_catalogue.to_owned(),
        routing_key: format!("{main_catalogue}.{main_collection}.rel.{event_collection}"),
        collection: event_collection,
    };
    Ok((target, EventDataMapper::Relation))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::mapping::MappingDefinition;
    use crate::domain::ErrorCode;
    use rstest::{fixture, rstest};

    #[fixture]
    fn registry() -> SchemaRegistry {
        SchemaRegistry::from_json_str(include_str!("../../../fixtures/schema.json"))
            .expect("fixture schema parses")
    }

    #[fixture]
    fn mappings() -> MappingRegistry {
        let mut mappings = MappingRegistry::new();
        mappings
            .insert_json(
                "peilmerken.json",
                include_str!("../../../fixtures/mappings/nap/peilmerken.json"),
            )
            .expect("fixture mapping parses");
        mappings
    }

    #[rstest]
    fn primary_collections_route_on_catalogue_and_collection(
        registry: SchemaRegistry,
        mappings: MappingRegistry,
    ) {
        let (target, mapper) =
            resolve_target(&registry, &mappings, "nap", "peilmerken").expect("resolves");
        assert_eq!(target.routing_key, "nap.peilmerken");
        assert_eq!(target.catalog, "nap");
        assert!(matches!(mapper, EventDataMapper::Declarative(_)));

        let (_, unmapped) =
            resolve_target(&registry, &mappings, "gebieden", "buurten").expect("resolves");
        assert_eq!(unmapped, EventDataMapper::PassThrough);
    }

    #[rstest]
    fn relation_collections_use_the_mapped_attribute_name(
        registry: SchemaRegistry,
        mappings: MappingRegistry,
    ) {
        let (target, mapper) = resolve_target(
            &registry,
            &mappings,
            "rel",
            "nap_pmk_gbd_bbk_ligt_in_gebieden_bouwblok",
        )
        .expect("resolves");
        assert_eq!(
            target,
            ProductionTarget {
                catalog: "nap".to_owned(),
                collection: "peilmerken_ligtInBouwblok".to_owned(),
                routing_key: "nap.peilmerken.rel.peilmerken_ligtInBouwblok".to_owned(),
            }
        );
        assert_eq!(mapper, EventDataMapper::Relation);
    }

    #[rstest]
    fn unmapped_owners_keep_the_internal_name(registry: SchemaRegistry) {
        let (target, _) = resolve_target(
            &registry,
            &MappingRegistry::new(),
            "rel",
            "gbd_bbk_gbd_brt_ligt_in_buurt",
        )
        .expect("resolves");
        assert_eq!(target.collection, "bouwblokken_ligtInBuurt");
        assert_eq!(
            target.routing_key,
            "gebieden.bouwblokken.rel.bouwblokken_ligtInBuurt"
        );
    }

    #[rstest]
    fn missing_mapping_entries_fail_loudly(registry: SchemaRegistry) {
        let mut mappings = MappingRegistry::new();
        mappings
            .insert(MappingDefinition::flat(
                "nap",
                "peilmerken",
                [("identificatie", "identificatie")],
            ))
            .expect("insert succeeds");
        let error = resolve_target(
            &registry,
            &mappings,
            "rel",
            "nap_pmk_gbd_bbk_ligt_in_gebieden_bouwblok",
        )
        .expect_err("relation attribute is not mapped");
        assert_eq!(error.code(), ErrorCode::MappingFailed);
    }

    #[rstest]
    #[case("rel", "nap_pmk_gbd_bbk_unknown", ErrorCode::NotProducible)]
    #[case("nap", "bogus", ErrorCode::NotFound)]
    fn unknown_collections_are_rejected(
        registry: SchemaRegistry,
        mappings: MappingRegistry,
        #[case] catalogue: &str,
        #[case] collection: &str,
        #[case] code: ErrorCode,
    ) {
        let error = resolve_target(&registry, &mappings, catalogue, collection)
            .expect_err("collection is unknown");
        assert_eq!(error.code(), code);
    }
}
