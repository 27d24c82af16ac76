//! In-memory doubles shared by unit tests (in `src/`) and integration tests
//! (in `tests/`). Compiled for tests and behind the `test-support` feature.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Local, TimeZone, Utc};
use mockable::Clock;
use serde_json::{Map, Value};
use tracing::field::{Field, Visit};
use tracing::subscriber::DefaultGuard;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::Layer;

use crate::domain::ports::{
    CheckpointRepository, CheckpointRepositoryError, EventBroker, EventPublisherError,
    EventStore, EventStoreError, PublishChannel, NO_PROGRESS,
};
use crate::domain::records::{
    EntitySnapshot, EntitySource, RelationRow, SnapshotCursor, StoredEvent, StreamKey,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// One log event seen by a [`LogCapture`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedLog {
    /// Event level.
    pub level: Level,
    /// Formatted message, without fields.
    pub message: String,
}

/// Records log events emitted on the current thread while it is alive.
///
/// Pair it with single-threaded runtimes such as `#[tokio::test]`.
pub struct LogCapture {
    records: Arc<Mutex<Vec<CapturedLog>>>,
    _guard: DefaultGuard,
}

impl LogCapture {
    /// Install a capturing subscriber as the thread's default.
    pub fn start() -> Self {
        let records = Arc::new(Mutex::new(Vec::new()));
        let layer = CaptureLayer {
            records: Arc::clone(&records),
        };
        let guard = tracing::subscriber::set_default(tracing_subscriber::registry().with(layer));
        Self {
            records,
            _guard: guard,
        }
    }

    /// Every captured event, oldest first.
    pub fn records(&self) -> Vec<CapturedLog> {
        lock(&self.records).clone()
    }

    /// Messages captured at `level`.
    pub fn messages_at(&self, level: Level) -> Vec<String> {
        lock(&self.records)
            .iter()
            .filter(|record| record.level == level)
            .map(|record| record.message.clone())
            .collect()
    }
}

struct CaptureLayer {
    records: Arc<Mutex<Vec<CapturedLog>>>,
}

impl<S: Subscriber> Layer<S> for CaptureLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        lock(&self.records).push(CapturedLog {
            level: *event.metadata().level(),
            message: visitor.0,
        });
    }
}

#[derive(Default)]
struct MessageVisitor(String);

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.0 = format!("{value:?}");
        }
    }
}

/// Clock frozen at a fixed instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl FixedClock {
    /// Clock frozen at 2024-01-02T03:04:05Z.
    pub fn standard() -> Self {
        Self(
            Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5)
                .single()
                .unwrap_or_default(),
        )
    }
}

impl Clock for FixedClock {
    fn local(&self) -> DateTime<Local> {
        self.0.with_timezone(&Local)
    }

    fn utc(&self) -> DateTime<Utc> {
        self.0
    }
}

/// Checkpoint repository keeping watermarks in memory.
#[derive(Debug, Default)]
pub struct InMemoryCheckpointRepository {
    values: Mutex<BTreeMap<StreamKey, i64>>,
    history: Mutex<Vec<(StreamKey, i64)>>,
}

impl InMemoryCheckpointRepository {
    /// Repository seeded with one watermark.
    pub fn with_watermark(stream: &StreamKey, value: i64) -> Self {
        let repository = Self::default();
        lock(&repository.values).insert(stream.clone(), value);
        repository
    }

    /// Current watermark, if the row exists.
    pub fn watermark(&self, stream: &StreamKey) -> Option<i64> {
        lock(&self.values).get(stream).copied()
    }

    /// Every value written through `set`, in order.
    pub fn history(&self) -> Vec<i64> {
        lock(&self.history)
            .iter()
            .map(|(_, value)| *value)
            .collect()
    }
}

#[async_trait]
impl CheckpointRepository for InMemoryCheckpointRepository {
    async fn get_or_create(&self, stream: &StreamKey) -> Result<i64, CheckpointRepositoryError> {
        Ok(*lock(&self.values)
            .entry(stream.clone())
            .or_insert(NO_PROGRESS))
    }

    async fn set(
        &self,
        stream: &StreamKey,
        last_event_id: i64,
    ) -> Result<(), CheckpointRepositoryError> {
        lock(&self.values).insert(stream.clone(), last_event_id);
        lock(&self.history).push((stream.clone(), last_event_id));
        Ok(())
    }
}

/// One message captured by [`RecordingBroker`].
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedMessage {
    /// Target exchange.
    pub exchange: String,
    /// Routing key.
    pub routing_key: String,
    /// Decoded JSON payload.
    pub payload: Value,
}

impl PublishedMessage {
    /// Number of events in a batch payload (1 for a single object).
    pub fn batch_len(&self) -> usize {
        self.payload.as_array().map_or(1, Vec::len)
    }

    /// Events carried by the message.
    pub fn events(&self) -> Vec<Value> {
        match &self.payload {
            Value::Array(items) => items.clone(),
            other => vec![other.clone()],
        }
    }
}

#[derive(Debug, Default)]
struct BrokerState {
    published: Vec<PublishedMessage>,
    opened: usize,
    closed: usize,
    fail_after: Option<usize>,
}

/// Broker double recording every published message.
#[derive(Debug, Clone, Default)]
pub struct RecordingBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl RecordingBroker {
    /// Broker whose publishes fail once `successful` messages went through.
    pub fn failing_after(successful: usize) -> Self {
        let broker = Self::default();
        lock(&broker.state).fail_after = Some(successful);
        broker
    }

    /// Let every further publish succeed.
    pub fn recover(&self) {
        lock(&self.state).fail_after = None;
    }

    /// Messages published so far.
    pub fn published(&self) -> Vec<PublishedMessage> {
        lock(&self.state).published.clone()
    }

    /// All events across all messages, in publish order.
    pub fn events(&self) -> Vec<Value> {
        self.published()
            .iter()
            .flat_map(PublishedMessage::events)
            .collect()
    }

    /// Channels opened and closed so far.
    pub fn channel_counts(&self) -> (usize, usize) {
        let state = lock(&self.state);
        (state.opened, state.closed)
    }

    /// A channel not tracked by open/close counts.
    pub fn channel(&self) -> RecordingChannel {
        RecordingChannel {
            state: Arc::clone(&self.state),
        }
    }
}

#[async_trait]
impl EventBroker for RecordingBroker {
    async fn open_channel(&self) -> Result<Box<dyn PublishChannel>, EventPublisherError> {
        lock(&self.state).opened += 1;
        Ok(Box::new(self.channel()))
    }
}

/// Channel handed out by [`RecordingBroker`].
#[derive(Debug, Clone)]
pub struct RecordingChannel {
    state: Arc<Mutex<BrokerState>>,
}

#[async_trait]
impl PublishChannel for RecordingChannel {
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
    ) -> Result<(), EventPublisherError> {
        let mut state = lock(&self.state);
        if state
            .fail_after
            .is_some_and(|limit| state.published.len() >= limit)
        {
            return Err(EventPublisherError::publish(routing_key, "broker went away"));
        }
        let payload = serde_json::from_slice(payload)
            .map_err(|err| EventPublisherError::publish(routing_key, err.to_string()))?;
        state.published.push(PublishedMessage {
            exchange: exchange.to_owned(),
            routing_key: routing_key.to_owned(),
            payload,
        });
        Ok(())
    }

    async fn close(&self) -> Result<(), EventPublisherError> {
        lock(&self.state).closed += 1;
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct StoredEntity {
    snapshot: EntitySnapshot,
    deleted: bool,
}

#[derive(Debug, Default)]
struct StoreState {
    events: Vec<(StreamKey, StoredEvent)>,
    entities: BTreeMap<String, Vec<StoredEntity>>,
    event_queries: Vec<(i64, Option<i64>, usize)>,
}

/// Event store double backed by vectors.
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    state: Mutex<StoreState>,
}

impl InMemoryEventStore {
    /// Append an event to a stream's log.
    pub fn push_event(&self, stream: &StreamKey, event_id: i64, action: &str, tid: &str) {
        lock(&self.state).events.push((
            stream.clone(),
            StoredEvent {
                event_id,
                action: action.to_owned(),
                tid: tid.to_owned(),
            },
        ));
    }

    /// Store a live entity in a table.
    pub fn put_entity(&self, table: &str, snapshot: EntitySnapshot) {
        self.store(table, snapshot, false);
    }

    /// Store a soft-deleted entity in a table.
    pub fn put_deleted_entity(&self, table: &str, snapshot: EntitySnapshot) {
        self.store(table, snapshot, true);
    }

    /// `(after, until, limit)` of every `get_events` call.
    pub fn event_queries(&self) -> Vec<(i64, Option<i64>, usize)> {
        lock(&self.state).event_queries.clone()
    }

    fn store(&self, table: &str, snapshot: EntitySnapshot, deleted: bool) {
        let mut state = lock(&self.state);
        let rows = state.entities.entry(table.to_owned()).or_default();
        rows.retain(|row| row.snapshot.tid != snapshot.tid);
        rows.push(StoredEntity { snapshot, deleted });
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn get_events(
        &self,
        stream: &StreamKey,
        after: i64,
        until: Option<i64>,
        limit: usize,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let mut state = lock(&self.state);
        state.event_queries.push((after, until, limit));
        let mut events: Vec<StoredEvent> = state
            .events
            .iter()
            .filter(|(key, event)| {
                key == stream
                    && event.event_id > after
                    && until.is_none_or(|max| event.event_id <= max)
            })
            .map(|(_, event)| event.clone())
            .collect();
        events.sort_by_key(|event| event.event_id);
        events.truncate(limit);
        Ok(events)
    }

    async fn get_entity(
        &self,
        source: &EntitySource,
        tid: &str,
    ) -> Result<EntitySnapshot, EventStoreError> {
        lock(&self.state)
            .entities
            .get(&source.table)
            .and_then(|rows| rows.iter().find(|row| row.snapshot.tid == tid))
            .map(|row| row.snapshot.clone())
            .ok_or_else(|| EventStoreError::entity_not_found(source.table.as_str(), tid))
    }

    async fn list_entities(
        &self,
        source: &EntitySource,
        after: Option<SnapshotCursor>,
        limit: usize,
    ) -> Result<Vec<EntitySnapshot>, EventStoreError> {
        let state = lock(&self.state);
        let mut rows: Vec<EntitySnapshot> = state
            .entities
            .get(&source.table)
            .map(|rows| {
                rows.iter()
                    .filter(|row| !row.deleted)
                    .map(|row| row.snapshot.clone())
                    .collect()
            })
            .unwrap_or_default();
        rows.sort_by_key(EntitySnapshot::cursor);
        rows.retain(|row| after.is_none_or(|cursor| row.cursor() > cursor));
        rows.truncate(limit);
        Ok(rows)
    }
}

/// Build a snapshot from a JSON object of column values.
///
/// `_gobid`, `_tid`, and `_last_event` are lifted out of the attributes.
pub fn snapshot(columns: Value) -> EntitySnapshot {
    let attributes: Map<String, Value> = match columns {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    EntitySnapshot {
        gobid: attributes.get("_gobid").and_then(Value::as_i64).unwrap_or_default(),
        tid: attributes
            .get("_tid")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned(),
        last_event: attributes.get("_last_event").and_then(Value::as_i64),
        attributes,
        relations: BTreeMap::new(),
    }
}

/// Attach relation rows to a snapshot.
pub fn with_relation(
    mut snapshot: EntitySnapshot,
    attribute: &str,
    rows: Vec<RelationRow>,
) -> EntitySnapshot {
    snapshot.relations.insert(attribute.to_owned(), rows);
    snapshot
}
