//! Behaviour tests for produce requests handled end to end.
//!
//! Requests enter through the JSON invocation handler and run against
//! in-memory event store, checkpoint, and broker doubles, with the schema
//! and mappings loaded from the packaged fixture files.

use std::cell::RefCell;
use std::path::Path;
use std::sync::Arc;

use eventproducer::domain::records::StreamKey;
use eventproducer::domain::{Error, ErrorCode, ProduceService, ProducerPorts, ProductionConfig};
use eventproducer::inbound::invocation::InvocationHandler;
use eventproducer::outbound::filesystem::{load_mapping_registry, load_schema_registry};
use eventproducer::test_support::{
    snapshot, FixedClock, InMemoryCheckpointRepository, InMemoryEventStore, RecordingBroker,
};
use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};
use serde_json::{json, Value};
use tokio::runtime::{Builder, Runtime};

struct ProduceWorld {
    runtime: Runtime,
    handler: InvocationHandler,
    store: Arc<InMemoryEventStore>,
    checkpoints: Arc<InMemoryCheckpointRepository>,
    broker: RecordingBroker,
    outcome: RefCell<Option<Result<Value, Error>>>,
}

impl ProduceWorld {
    fn new() -> Self {
        let fixtures = Path::new(env!("CARGO_MANIFEST_DIR")).join("fixtures");
        let registry =
            load_schema_registry(&fixtures.join("schema.json")).expect("fixture schema loads");
        let mappings =
            load_mapping_registry(&fixtures.join("mappings")).expect("fixture mappings load");

        let store = Arc::new(InMemoryEventStore::default());
        let checkpoints = Arc::new(InMemoryCheckpointRepository::default());
        let broker = RecordingBroker::default();
        let service = ProduceService::new(
            Arc::new(registry),
            Arc::new(mappings),
            ProducerPorts {
                event_store: store.clone(),
                checkpoints: checkpoints.clone(),
                broker: Arc::new(broker.clone()),
            },
            Arc::new(FixedClock::standard()),
            ProductionConfig::default(),
        );
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("create runtime");

        Self {
            runtime,
            handler: InvocationHandler::new(Arc::new(service)),
            store,
            checkpoints,
            broker,
            outcome: RefCell::new(None),
        }
    }

    fn seed_peilmerken(&self, count: i64) {
        let stream = peilmerken();
        for event_id in 1..=count {
            let tid = format!("pmk.{event_id}");
            self.store.push_event(&stream, event_id, "ADD", &tid);
            self.store.put_entity(
                "nap_peilmerken",
                snapshot(json!({
                    "_gobid": event_id,
                    "_tid": tid,
                    "_last_event": event_id,
                    "identificatie": format!("1000{event_id}"),
                })),
            );
        }
    }

    fn handle(&self, request: &Value) {
        let outcome = self.runtime.block_on(async {
            self.handler
                .handle_json(&request.to_string())
                .await
                .map(|output| serde_json::from_str(&output).expect("response is json"))
        });
        *self.outcome.borrow_mut() = Some(outcome);
    }

    fn response(&self) -> Value {
        match self.outcome.borrow().as_ref().expect("a request was handled") {
            Ok(response) => response.clone(),
            Err(error) => panic!("expected a response, got {error}"),
        }
    }

    fn error_code(&self) -> ErrorCode {
        match self.outcome.borrow().as_ref().expect("a request was handled") {
            Ok(response) => panic!("expected an error, got {response}"),
            Err(error) => error.code(),
        }
    }
}

fn peilmerken() -> StreamKey {
    StreamKey::new("nap", "peilmerken")
}

#[fixture]
fn world() -> ProduceWorld {
    ProduceWorld::new()
}

#[given("a peilmerken stream with {count} stored events")]
fn a_peilmerken_stream_with_stored_events(world: &ProduceWorld, count: i64) {
    world.seed_peilmerken(count);
}

#[when("a produce request for peilmerken is handled")]
fn a_produce_request_for_peilmerken_is_handled(world: &ProduceWorld) {
    world.handle(&json!({"header": {"catalogue": "nap", "collection": "peilmerken"}}));
}

#[when("a full load request for peilmerken is handled")]
fn a_full_load_request_for_peilmerken_is_handled(world: &ProduceWorld) {
    world.handle(&json!({
        "header": {"catalogue": "nap", "collection": "peilmerken", "mode": "full"}
    }));
}

#[when("a produce request without a collection is handled")]
fn a_produce_request_without_a_collection_is_handled(world: &ProduceWorld) {
    world.handle(&json!({"header": {"catalogue": "nap"}}));
}

#[when("a produce request for an unknown collection is handled")]
fn a_produce_request_for_an_unknown_collection_is_handled(world: &ProduceWorld) {
    world.handle(&json!({"header": {"catalogue": "nap", "collection": "bogus"}}));
}

#[then("{count} events are reported as produced")]
fn events_are_reported_as_produced(world: &ProduceWorld, count: u64) {
    assert_eq!(world.response()["summary"]["produced"], json!(count));
}

#[then("{count} message was published for peilmerken")]
fn messages_were_published_for_peilmerken(world: &ProduceWorld, count: usize) {
    let published = world.broker.published();
    assert_eq!(published.len(), count);
    assert!(
        published
            .iter()
            .all(|message| message.routing_key == "nap.peilmerken")
    );
}

#[then("the peilmerken watermark is {watermark}")]
fn the_peilmerken_watermark_is(world: &ProduceWorld, watermark: i64) {
    assert_eq!(world.checkpoints.watermark(&peilmerken()), Some(watermark));
}

#[then("every published event is an ADD event")]
fn every_published_event_is_an_add_event(world: &ProduceWorld) {
    let events = world.broker.events();
    assert!(!events.is_empty());
    assert!(
        events
            .iter()
            .all(|event| event["header"]["event_type"] == json!("ADD"))
    );
}

#[then("the request fails with an invalid request error")]
fn the_request_fails_with_an_invalid_request_error(world: &ProduceWorld) {
    assert_eq!(world.error_code(), ErrorCode::InvalidRequest);
}

#[then("the request fails with a not found error")]
fn the_request_fails_with_a_not_found_error(world: &ProduceWorld) {
    assert_eq!(world.error_code(), ErrorCode::NotFound);
}

#[then("no channel was opened")]
fn no_channel_was_opened(world: &ProduceWorld) {
    assert_eq!(world.broker.channel_counts(), (0, 0));
}

#[scenario(path = "tests/features/produce_requests.feature")]
fn produce_request_scenarios(world: ProduceWorld) {
    drop(world);
}
