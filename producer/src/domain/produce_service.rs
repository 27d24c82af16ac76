//! Produce command service.
//!
//! Validates a request before any I/O, binds an [`EventProducer`] to the
//! requested stream, and runs either a full load or an incremental run.

use std::sync::Arc;

use async_trait::async_trait;
use mockable::Clock;
use tracing::info;

use crate::domain::mapping::MappingRegistry;
use crate::domain::ports::{ProduceCommand, ProduceRequest, ProduceResponse, ProduceSummary};
use crate::domain::producer::{EventProducer, ProducerPorts, ProductionConfig};
use crate::domain::schema::SchemaRegistry;
use crate::domain::{Error, ErrorCode};

/// Domain service implementing [`ProduceCommand`].
#[derive(Clone)]
pub struct ProduceService {
    registry: Arc<SchemaRegistry>,
    mappings: Arc<MappingRegistry>,
    ports: ProducerPorts,
    clock: Arc<dyn Clock>,
    config: ProductionConfig,
}

impl ProduceService {
    /// Create a new produce service.
    pub fn new(
        registry: Arc<SchemaRegistry>,
        mappings: Arc<MappingRegistry>,
        ports: ProducerPorts,
        clock: Arc<dyn Clock>,
        config: ProductionConfig,
    ) -> Self {
        Self {
            registry,
            mappings,
            ports,
            clock,
            config,
        }
    }
}

#[async_trait]
impl ProduceCommand for ProduceService {
    async fn produce(&self, request: ProduceRequest) -> Result<ProduceResponse, Error> {
        let (catalogue, collection) = validate_request(&request)?;

        let producer = match EventProducer::new(
            &self.registry,
            &self.mappings,
            catalogue,
            collection,
            self.ports.clone(),
            Arc::clone(&self.clock),
            self.config.clone(),
        ) {
            Ok(producer) => producer,
            Err(error) if error.code() == ErrorCode::NotProducible => {
                info!(
                    catalogue,
                    collection,
                    reason = error.message(),
                    "relation is not producible; skipping"
                );
                return Ok(respond(request, 0));
            }
            Err(error) => return Err(error),
        };

        let produced = if request.header.is_full_load() {
            info!(catalogue, collection, "producing full load events");
            producer.produce_initial().await?
        } else {
            let (min_event_id, max_event_id) = request.contents.last_event.unwrap_or_default();
            info!(catalogue, collection, min_event_id, max_event_id, "producing events");
            producer.produce(min_event_id, max_event_id).await?
        };
        Ok(respond(request, produced))
    }
}

fn validate_request(request: &ProduceRequest) -> Result<(&str, &str), Error> {
    let catalogue = request
        .header
        .catalogue
        .as_deref()
        .filter(|value| !value.trim().is_empty());
    let collection = request
        .header
        .collection
        .as_deref()
        .filter(|value| !value.trim().is_empty());
    match (catalogue, collection) {
        (Some(catalogue), Some(collection)) => Ok((catalogue, collection)),
        _ => Err(Error::invalid_request(
            "missing catalogue and collection in header",
        )),
    }
}

fn respond(request: ProduceRequest, produced: usize) -> ProduceResponse {
    ProduceResponse {
        header: request.header,
        summary: ProduceSummary { produced },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::{EventBroker, MockEventBroker, RequestContents, RequestHeader};
    use crate::domain::records::StreamKey;
    use crate::test_support::{
        snapshot, FixedClock, InMemoryCheckpointRepository, InMemoryEventStore, RecordingBroker,
    };
    use rstest::{fixture, rstest};
    use serde_json::json;

    struct Fixture {
        store: Arc<InMemoryEventStore>,
        checkpoints: Arc<InMemoryCheckpointRepository>,
        broker: RecordingBroker,
    }

    impl Fixture {
        fn service(&self) -> ProduceService {
            self.service_with_broker(Arc::new(self.broker.clone()))
        }

        fn service_with_broker(&self, broker: Arc<dyn EventBroker>) -> ProduceService {
            let registry =
                SchemaRegistry::from_json_str(include_str!("../../fixtures/schema.json"))
                    .expect("fixture schema parses");
            ProduceService::new(
                Arc::new(registry),
                Arc::new(MappingRegistry::new()),
                ProducerPorts {
                    event_store: self.store.clone(),
                    checkpoints: self.checkpoints.clone(),
                    broker,
                },
                Arc::new(FixedClock::standard()),
                ProductionConfig::default(),
            )
        }
    }

    #[fixture]
    fn fixture() -> Fixture {
        let store = InMemoryEventStore::default();
        let stream = StreamKey::new("gebieden", "buurten");
        for event_id in [1, 2] {
            let tid = format!("brt.{event_id}");
            store.push_event(&stream, event_id, "ADD", &tid);
            store.put_entity(
                "gebieden_buurten",
                snapshot(json!({"_gobid": event_id, "_tid": tid, "_last_event": event_id})),
            );
        }
        Fixture {
            store: Arc::new(store),
            checkpoints: Arc::new(InMemoryCheckpointRepository::default()),
            broker: RecordingBroker::default(),
        }
    }

    fn request(catalogue: &str, collection: &str, mode: Option<&str>) -> ProduceRequest {
        let mut header = RequestHeader::for_stream(catalogue, collection);
        header.mode = mode.map(str::to_owned);
        header.extra.insert("jobid".to_owned(), json!(17));
        ProduceRequest {
            header,
            contents: RequestContents::default(),
        }
    }

    #[rstest]
    #[tokio::test]
    async fn incremental_requests_echo_the_header_with_a_count(fixture: Fixture) {
        let request = request("gebieden", "buurten", None);
        let response = fixture
            .service()
            .produce(request.clone())
            .await
            .expect("produce succeeds");

        assert_eq!(response.header, request.header);
        assert_eq!(response.summary.produced, 2);
        assert!(fixture.broker.events()[0]["header"]
            .get("full_load_sequence")
            .is_none());
    }

    #[rstest]
    #[tokio::test]
    async fn full_mode_runs_a_full_load(fixture: Fixture) {
        let response = fixture
            .service()
            .produce(request("gebieden", "buurten", Some("full")))
            .await
            .expect("full load succeeds");

        assert_eq!(response.summary.produced, 2);
        assert_eq!(
            fixture.broker.events()[0]["header"]["full_load_sequence"],
            json!(true)
        );
        assert!(fixture.store.event_queries().is_empty());
    }

    #[rstest]
    #[tokio::test]
    async fn requested_ranges_reach_the_producer(fixture: Fixture) {
        let mut request = request("gebieden", "buurten", Some("update"));
        request.contents.last_event = Some((None, Some(1)));

        let response = fixture
            .service()
            .produce(request)
            .await
            .expect("produce succeeds");

        assert_eq!(response.summary.produced, 1);
        assert_eq!(fixture.store.event_queries()[0].1, Some(1));
    }

    #[rstest]
    #[tokio::test]
    async fn unproducible_relations_report_zero_without_io(fixture: Fixture) {
        let mut broker = MockEventBroker::new();
        broker.expect_open_channel().never();
        let response = fixture
            .service_with_broker(Arc::new(broker))
            .produce(request("rel", "gbd_brt_gbd_wijk_unknown", None))
            .await
            .expect("not producible is not an error");

        assert_eq!(response.summary.produced, 0);
        assert!(fixture.checkpoints.history().is_empty());
    }

    #[rstest]
    #[case(None, Some("buurten"))]
    #[case(Some("gebieden"), None)]
    #[case(Some(" "), Some("buurten"))]
    #[tokio::test]
    async fn requests_without_a_stream_are_rejected_before_io(
        fixture: Fixture,
        #[case] catalogue: Option<&str>,
        #[case] collection: Option<&str>,
    ) {
        let mut broker = MockEventBroker::new();
        broker.expect_open_channel().never();
        let request = ProduceRequest {
            header: RequestHeader {
                catalogue: catalogue.map(str::to_owned),
                collection: collection.map(str::to_owned),
                ..RequestHeader::default()
            },
            contents: RequestContents::default(),
        };

        let error = fixture
            .service_with_broker(Arc::new(broker))
            .produce(request)
            .await
            .expect_err("request is incomplete");

        assert_eq!(error.code(), ErrorCode::InvalidRequest);
        assert!(fixture.store.event_queries().is_empty());
    }

    #[rstest]
    #[tokio::test]
    async fn unknown_collections_are_not_found(fixture: Fixture) {
        let error = fixture
            .service()
            .produce(request("gebieden", "stadsdelen", None))
            .await
            .expect_err("collection is unknown");
        assert_eq!(error.code(), ErrorCode::NotFound);
    }
}
