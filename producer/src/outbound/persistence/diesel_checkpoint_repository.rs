//! PostgreSQL-backed watermark repository.

use async_trait::async_trait;
use diesel::prelude::*;
use diesel::upsert::excluded;
use diesel_async::RunQueryDsl;

use crate::domain::ports::{CheckpointRepository, CheckpointRepositoryError, NO_PROGRESS};
use crate::domain::records::StreamKey;

use super::diesel_helpers::{is_connection_error, map_diesel_error_message, map_pool_error_message};
use super::pool::{DbPool, PoolError};
use super::schema::last_sent_events;

/// Diesel implementation of [`CheckpointRepository`] over `last_sent_events`.
#[derive(Clone)]
pub struct DieselCheckpointRepository {
    pool: DbPool,
}

impl DieselCheckpointRepository {
    /// Create a repository on the checkpoint database pool.
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, Insertable)]
#[diesel(table_name = last_sent_events)]
struct NewLastSentEvent<'a> {
    catalogue: &'a str,
    collection: &'a str,
    last_event: i64,
}

impl<'a> NewLastSentEvent<'a> {
    fn new(stream: &'a StreamKey, last_event: i64) -> Self {
        Self {
            catalogue: stream.catalogue(),
            collection: stream.collection(),
            last_event,
        }
    }
}

fn map_pool_error(error: PoolError) -> CheckpointRepositoryError {
    CheckpointRepositoryError::connection(map_pool_error_message(error))
}

fn map_diesel_error(error: diesel::result::Error, operation: &str) -> CheckpointRepositoryError {
    let connection_lost = is_connection_error(&error);
    let message = map_diesel_error_message(error, operation);
    if connection_lost {
        CheckpointRepositoryError::connection(message)
    } else {
        CheckpointRepositoryError::query(message)
    }
}

#[async_trait]
impl CheckpointRepository for DieselCheckpointRepository {
    async fn get_or_create(&self, stream: &StreamKey) -> Result<i64, CheckpointRepositoryError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;

        diesel::insert_into(last_sent_events::table)
            .values(NewLastSentEvent::new(stream, NO_PROGRESS))
            .on_conflict((last_sent_events::catalogue, last_sent_events::collection))
            .do_nothing()
            .execute(&mut conn)
            .await
            .map_err(|err| map_diesel_error(err, "create watermark"))?;

        last_sent_events::table
            .filter(last_sent_events::catalogue.eq(stream.catalogue()))
            .filter(last_sent_events::collection.eq(stream.collection()))
            .select(last_sent_events::last_event)
            .first::<i64>(&mut conn)
            .await
            .map_err(|err| map_diesel_error(err, "read watermark"))
    }

    async fn set(
        &self,
        stream: &StreamKey,
        last_event_id: i64,
    ) -> Result<(), CheckpointRepositoryError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;

        diesel::insert_into(last_sent_events::table)
            .values(NewLastSentEvent::new(stream, last_event_id))
            .on_conflict((last_sent_events::catalogue, last_sent_events::collection))
            .do_update()
            .set(last_sent_events::last_event.eq(excluded(last_sent_events::last_event)))
            .execute(&mut conn)
            .await
            .map_err(|err| map_diesel_error(err, "write watermark"))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use diesel::pg::Pg;
    use rstest::rstest;

    #[rstest]
    fn set_upserts_on_the_stream_key() {
        let stream = StreamKey::new("nap", "peilmerken");
        let query = diesel::insert_into(last_sent_events::table)
            .values(NewLastSentEvent::new(&stream, 12))
            .on_conflict((last_sent_events::catalogue, last_sent_events::collection))
            .do_update()
            .set(last_sent_events::last_event.eq(excluded(last_sent_events::last_event)));
        let sql = diesel::debug_query::<Pg, _>(&query).to_string();

        assert!(sql.contains("ON CONFLICT"));
        assert!(sql.contains("DO UPDATE SET"));
        assert!(sql.contains("excluded"));
    }

    #[rstest]
    fn pool_and_query_failures_are_classified() {
        let error = map_pool_error(PoolError::checkout("checkpoints", "timed out"));
        assert!(matches!(error, CheckpointRepositoryError::Connection { .. }));

        let error = map_diesel_error(diesel::result::Error::NotFound, "read watermark");
        assert_eq!(
            error,
            CheckpointRepositoryError::query("read watermark: Record not found")
        );
    }
}
