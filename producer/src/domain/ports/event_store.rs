//! Domain port for reading the event log and entity snapshots.
//!
//! The store is passive: it answers page queries and never keeps state
//! between calls. Implementations attach relation rows for every
//! single-valued relation in [`EntitySource::attached_relations`].

use async_trait::async_trait;

use super::define_port_error;
use crate::domain::records::{EntitySnapshot, EntitySource, SnapshotCursor, StoredEvent, StreamKey};

define_port_error! {
    /// Errors raised when reading events or snapshots.
    pub enum EventStoreError {
        /// The store could not be reached.
        Connection { message: String } => "event store connection failed: {message}",
        /// A query failed.
        Query { message: String } => "event store query failed: {message}",
        /// No live entity carries the requested tid.
        EntityNotFound { table: String, tid: String } => "entity {tid} not found in {table}",
        /// A stored row could not be decoded.
        MalformedRow { table: String, message: String } => "malformed row in {table}: {message}",
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Events of a stream with `after < event_id <= until`, ascending, at
    /// most `limit` rows.
    async fn get_events(
        &self,
        stream: &StreamKey,
        after: i64,
        until: Option<i64>,
        limit: usize,
    ) -> Result<Vec<StoredEvent>, EventStoreError>;

    /// Current state of one entity with its relations attached.
    async fn get_entity(
        &self,
        source: &EntitySource,
        tid: &str,
    ) -> Result<EntitySnapshot, EventStoreError>;

    /// One page of live entities ordered by last modifying event id, then
    /// surrogate key, starting after `after`.
    async fn list_entities(
        &self,
        source: &EntitySource,
        after: Option<SnapshotCursor>,
        limit: usize,
    ) -> Result<Vec<EntitySnapshot>, EventStoreError>;
}

/// Fixture store with an empty log and no entities.
#[derive(Debug, Default, Clone, Copy)]
pub struct FixtureEventStore;

#[async_trait]
impl EventStore for FixtureEventStore {
    async fn get_events(
        &self,
        _stream: &StreamKey,
        _after: i64,
        _until: Option<i64>,
        _limit: usize,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        Ok(Vec::new())
    }

    async fn get_entity(
        &self,
        source: &EntitySource,
        tid: &str,
    ) -> Result<EntitySnapshot, EventStoreError> {
        Err(EventStoreError::entity_not_found(source.table.as_str(), tid))
    }

    async fn list_entities(
        &self,
        _source: &EntitySource,
        _after: Option<SnapshotCursor>,
        _limit: usize,
    ) -> Result<Vec<EntitySnapshot>, EventStoreError> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use rstest::rstest;

    fn source() -> EntitySource {
        EntitySource {
            table: "nap_peilmerken".to_owned(),
            has_states: false,
            relations: BTreeMap::new(),
        }
    }

    #[rstest]
    #[tokio::test]
    async fn fixture_store_has_no_events() {
        let events = FixtureEventStore
            .get_events(&StreamKey::new("nap", "peilmerken"), -1, None, 200)
            .await
            .expect("fixture succeeds");
        assert!(events.is_empty());
    }

    #[rstest]
    #[tokio::test]
    async fn fixture_store_reports_missing_entities() {
        let error = FixtureEventStore
            .get_entity(&source(), "1")
            .await
            .expect_err("no entities");
        assert_eq!(error, EventStoreError::entity_not_found("nap_peilmerken", "1"));
    }
}
