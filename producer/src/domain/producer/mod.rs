//! Event producer orchestration.
//!
//! A producer is bound to one catalogue/collection stream. Incremental runs
//! replay the event log from the persisted watermark; full loads replay the
//! current state of every live entity as synthetic `ADD` events. Both runs
//! publish through a broker channel that is closed on every exit path.

mod target;

use std::sync::Arc;

use mockable::Clock;
use tracing::{info, warn};

pub use self::target::{resolve_target, ProductionTarget};
use crate::domain::batch_publisher::{BatchPublishError, BatchPublisher, PublishTarget};
use crate::domain::checkpoint::CheckpointStore;
use crate::domain::external_event::{EventHeader, ExternalEvent, FullLoadSequence, ADD_ACTION};
use crate::domain::mapper::EventDataMapper;
use crate::domain::mapping::MappingRegistry;
use crate::domain::materializer::{EventDataBuilder, MaterializeError};
use crate::domain::ports::{
    CheckpointRepository, CheckpointRepositoryError, EventBroker, EventPublisherError, EventStore,
    EventStoreError, PublishChannel, NO_PROGRESS,
};
use crate::domain::records::{EntitySnapshot, EntitySource, StreamKey};
use crate::domain::relations::RelationResolver;
use crate::domain::schema::SchemaRegistry;
use crate::domain::snapshot_stream::SnapshotStream;
use crate::domain::Error;

/// Default broker exchange.
pub const DEFAULT_EXCHANGE: &str = "gob.events";
/// Default number of events read per page.
pub const DEFAULT_PAGE_SIZE: usize = 200;
/// Default number of events per published message.
pub const DEFAULT_MAX_EVENTS_PER_MESSAGE: usize = 100;
/// Default progress log interval.
pub const DEFAULT_LOG_EVERY: usize = 10_000;

/// Event id carried by full-load events.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FullLoadEventIds {
    /// The entity's last modifying event id.
    #[default]
    LastEvent,
    /// Always `null`.
    Null,
}

/// Watermark handling after a completed full load.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FullLoadWatermark {
    /// Replace the watermark with the highest last event id emitted.
    #[default]
    Replace,
    /// Leave the watermark untouched.
    Keep,
}

/// Tunables of a production run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductionConfig {
    /// Broker exchange.
    pub exchange: String,
    /// Events or snapshots read per page.
    pub page_size: usize,
    /// Events per published message.
    pub max_events_per_message: usize,
    /// Progress log interval.
    pub log_every: usize,
    /// Event ids of full-load events.
    pub full_load_event_ids: FullLoadEventIds,
    /// Watermark policy of full loads.
    pub full_load_watermark: FullLoadWatermark,
}

impl Default for ProductionConfig {
    fn default() -> Self {
        Self {
            exchange: DEFAULT_EXCHANGE.to_owned(),
            page_size: DEFAULT_PAGE_SIZE,
            max_events_per_message: DEFAULT_MAX_EVENTS_PER_MESSAGE,
            log_every: DEFAULT_LOG_EVERY,
            full_load_event_ids: FullLoadEventIds::default(),
            full_load_watermark: FullLoadWatermark::default(),
        }
    }
}

/// Adapters a producer talks to.
#[derive(Clone)]
pub struct ProducerPorts {
    /// Source of events and entity snapshots.
    pub event_store: Arc<dyn EventStore>,
    /// Watermark persistence.
    pub checkpoints: Arc<dyn CheckpointRepository>,
    /// Broker publishing external events.
    pub broker: Arc<dyn EventBroker>,
}

/// Producer of external events for one catalogue/collection.
pub struct EventProducer {
    ports: ProducerPorts,
    clock: Arc<dyn Clock>,
    config: ProductionConfig,
    stream: StreamKey,
    target: ProductionTarget,
    source: EntitySource,
    builder: EventDataBuilder,
    mapper: EventDataMapper,
}

impl EventProducer {
    /// Bind a producer to a catalogue/collection.
    ///
    /// Fails with `not_found` for unknown collections, `not_producible` for
    /// relation collections without an owning attribute, and
    /// `mapping_failed` when the owner's mapping lacks the relation.
    pub fn new(
        registry: &SchemaRegistry,
        mappings: &MappingRegistry,
        catalogue: &str,
        collection: &str,
        ports: ProducerPorts,
        clock: Arc<dyn Clock>,
        config: ProductionConfig,
    ) -> Result<Self, Error> {
        let (target, mapper) = resolve_target(registry, mappings, catalogue, collection)?;
        let schema = registry.collection(catalogue, collection).ok_or_else(|| {
            Error::not_found(format!("unknown collection {catalogue}.{collection}"))
        })?;
        let relations = RelationResolver::new(registry).resolve_schema(schema);
        let builder = EventDataBuilder::new(schema, &relations);
        let source = EntitySource {
            table: schema.table_name(),
            has_states: schema.has_states(),
            relations,
        };
        Ok(Self {
            ports,
            clock,
            config,
            stream: StreamKey::new(catalogue, collection),
            target,
            source,
            builder,
            mapper,
        })
    }

    /// Stream this producer serves.
    pub fn stream(&self) -> &StreamKey {
        &self.stream
    }

    /// Header and routing of produced events.
    pub fn target(&self) -> &ProductionTarget {
        &self.target
    }

    /// Publish events after the persisted watermark, up to `max_event_id`.
    ///
    /// `min_event_id` is advisory: when it differs from the watermark a
    /// warning is logged and the watermark wins. Returns the number of
    /// events published.
    pub async fn produce(
        &self,
        min_event_id: Option<i64>,
        max_event_id: Option<i64>,
    ) -> Result<usize, Error> {
        let mut checkpoint = CheckpointStore::new(
            Arc::clone(&self.ports.checkpoints),
            self.stream.clone(),
        );
        let last_event_id = checkpoint.get().await.map_err(map_checkpoint_error)?;
        let start = self.reconcile_start(min_event_id, last_event_id);
        info!(
            catalogue = self.stream.catalogue(),
            collection = self.stream.collection(),
            start,
            max_event_id,
            "starting event production"
        );

        let channel = self
            .ports
            .broker
            .open_channel()
            .await
            .map_err(map_publisher_error)?;
        let outcome = self
            .publish_events(channel.as_ref(), &mut checkpoint, start, max_event_id)
            .await;
        let produced = close_channel(channel.as_ref(), outcome).await?;
        info!(
            catalogue = self.stream.catalogue(),
            collection = self.stream.collection(),
            produced,
            "finished event production"
        );
        Ok(produced)
    }

    /// Publish the current state of every live entity as a full-load
    /// sequence. Returns the number of events published.
    pub async fn produce_initial(&self) -> Result<usize, Error> {
        info!(
            catalogue = self.stream.catalogue(),
            collection = self.stream.collection(),
            "starting full load"
        );
        let channel = self
            .ports
            .broker
            .open_channel()
            .await
            .map_err(map_publisher_error)?;
        let outcome = self.publish_snapshots(channel.as_ref()).await;
        let produced = close_channel(channel.as_ref(), outcome).await?;
        info!(
            catalogue = self.stream.catalogue(),
            collection = self.stream.collection(),
            produced,
            "finished full load"
        );
        Ok(produced)
    }

    fn reconcile_start(&self, min_event_id: Option<i64>, last_event_id: i64) -> i64 {
        match min_event_id {
            None => info!(
                catalogue = self.stream.catalogue(),
                collection = self.stream.collection(),
                last_event_id,
                "no minimum event id requested; starting from watermark"
            ),
            Some(requested) if requested != last_event_id => {
                if last_event_id == NO_PROGRESS {
                    warn!(
                        catalogue = self.stream.catalogue(),
                        collection = self.stream.collection(),
                        requested,
                        "no previously produced events; starting from beginning"
                    );
                } else {
                    warn!(
                        catalogue = self.stream.catalogue(),
                        collection = self.stream.collection(),
                        requested,
                        last_event_id,
                        "watermark drift detected; recovering from watermark"
                    );
                }
            }
            Some(_) => {}
        }
        last_event_id
    }

    async fn publish_events(
        &self,
        channel: &dyn PublishChannel,
        checkpoint: &mut CheckpointStore,
        start: i64,
        max_event_id: Option<i64>,
    ) -> Result<usize, Error> {
        let page_size = self.config.page_size.max(1);
        let mut publisher = BatchPublisher::new(
            channel,
            self.publish_target(),
            Some(checkpoint),
            self.config.max_events_per_message,
            self.config.log_every,
        );
        let mut cursor = start;
        loop {
            let events = self
                .ports
                .event_store
                .get_events(&self.stream, cursor, max_event_id, page_size)
                .await
                .map_err(map_store_error)?;
            let Some(page_max) = events.last().map(|event| event.event_id) else {
                break;
            };
            let short_page = events.len() < page_size;
            for event in events {
                let snapshot = self
                    .ports
                    .event_store
                    .get_entity(&self.source, &event.tid)
                    .await
                    .map_err(map_store_error)?;
                let external =
                    self.build_event(&event.action, Some(event.event_id), &snapshot, None)?;
                publisher
                    .add(external, Some(event.event_id))
                    .await
                    .map_err(map_batch_error)?;
            }
            if short_page || page_max <= cursor {
                break;
            }
            cursor = page_max;
        }
        publisher.finish().await.map_err(map_batch_error)
    }

    async fn publish_snapshots(&self, channel: &dyn PublishChannel) -> Result<usize, Error> {
        let mut publisher = BatchPublisher::new(
            channel,
            self.publish_target(),
            None,
            self.config.max_events_per_message,
            self.config.log_every,
        );
        let mut scan = SnapshotStream::new(
            self.ports.event_store.as_ref(),
            &self.source,
            self.config.page_size,
        );
        let mut highest: Option<i64> = None;
        while let Some(scanned) = scan.next().await.map_err(map_store_error)? {
            let last_event = scanned.snapshot.last_event;
            highest = highest.max(last_event);
            let event_id = match self.config.full_load_event_ids {
                FullLoadEventIds::LastEvent => last_event,
                FullLoadEventIds::Null => None,
            };
            let sequence = FullLoadSequence::at(scanned.is_first, scanned.is_last);
            let external =
                self.build_event(ADD_ACTION, event_id, &scanned.snapshot, Some(sequence))?;
            publisher.add(external, None).await.map_err(map_batch_error)?;
        }
        let produced = publisher.finish().await.map_err(map_batch_error)?;

        if let (FullLoadWatermark::Replace, Some(watermark)) =
            (self.config.full_load_watermark, highest)
        {
            CheckpointStore::new(Arc::clone(&self.ports.checkpoints), self.stream.clone())
                .set(watermark)
                .await
                .map_err(map_checkpoint_error)?;
        }
        Ok(produced)
    }

    fn publish_target(&self) -> PublishTarget<'_> {
        PublishTarget {
            exchange: &self.config.exchange,
            routing_key: &self.target.routing_key,
        }
    }

    fn build_event(
        &self,
        event_type: &str,
        event_id: Option<i64>,
        snapshot: &EntitySnapshot,
        sequence: Option<FullLoadSequence>,
    ) -> Result<ExternalEvent, Error> {
        let data = self
            .builder
            .build(snapshot)
            .map_err(map_materialize_error)?;
        Ok(ExternalEvent {
            header: EventHeader {
                catalog: self.target.catalog.clone(),
                collection: self.target.collection.clone(),
                event_type: event_type.to_owned(),
                event_id,
                tid: snapshot.tid.clone(),
                generated_timestamp: self.clock.utc(),
                sequence,
            },
            data: self.mapper.map(data),
        })
    }
}

async fn close_channel(
    channel: &dyn PublishChannel,
    outcome: Result<usize, Error>,
) -> Result<usize, Error> {
    match (outcome, channel.close().await) {
        (Ok(produced), Ok(())) => Ok(produced),
        (Ok(_), Err(error)) => Err(map_publisher_error(error)),
        (Err(error), Ok(())) => Err(error),
        (Err(error), Err(close_error)) => {
            warn!(error = %close_error, "failed to close broker channel after a failed run");
            Err(error)
        }
    }
}

fn map_store_error(error: EventStoreError) -> Error {
    match error {
        EventStoreError::EntityNotFound { .. } => Error::not_found(error.to_string()),
        EventStoreError::Connection { message }
        | EventStoreError::Query { message } => {
            Error::service_unavailable(format!("failed to read event store: {message}"))
        }
        EventStoreError::MalformedRow { table, message } => {
            Error::internal(format!("malformed row in {table}: {message}"))
        }
    }
}

fn map_checkpoint_error(error: CheckpointRepositoryError) -> Error {
    match error {
        CheckpointRepositoryError::Connection { message }
        | CheckpointRepositoryError::Query { message } => {
            Error::service_unavailable(format!("failed to access watermark: {message}"))
        }
    }
}

fn map_publisher_error(error: EventPublisherError) -> Error {
    Error::service_unavailable(format!("failed to publish events: {error}"))
}

fn map_batch_error(error: BatchPublishError) -> Error {
    match error {
        BatchPublishError::Encode(source) => {
            Error::internal(format!("failed to encode event batch: {source}"))
        }
        BatchPublishError::Publish(source) => map_publisher_error(source),
        BatchPublishError::Checkpoint(source) => map_checkpoint_error(source),
    }
}

fn map_materialize_error(error: MaterializeError) -> Error {
    Error::internal(format!("failed to materialise entity: {error}"))
}
