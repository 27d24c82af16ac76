//! PostgreSQL-backed event store adapter.
//!
//! Events are read with the Diesel DSL. Entity tables vary per collection,
//! so snapshots are read as `to_jsonb(row)` from table names validated by
//! [`quote_table_name`], and relation rows are joined from the `rel_*` table
//! to the destination table.

use std::collections::BTreeMap;

use async_trait::async_trait;
use diesel::prelude::*;
use diesel::sql_query;
use diesel::sql_types::{BigInt, Jsonb, Nullable, Text};
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use serde_json::Value;

use crate::domain::ports::{EventStore, EventStoreError};
use crate::domain::records::{
    EntitySnapshot, EntitySource, RelationRow, SnapshotCursor, StoredEvent, StreamKey,
};
use crate::domain::relations::RelationInfo;

use super::diesel_helpers::{
    is_connection_error, map_diesel_error_message, map_pool_error_message, quote_table_name,
    to_limit,
};
use super::pool::{DbPool, PoolError};
use super::schema::events;

const GOBID_COLUMN: &str = "_gobid";
const TID_COLUMN: &str = "_tid";
const LAST_EVENT_COLUMN: &str = "_last_event";
const ID_COLUMN: &str = "_id";
const SEQUENCE_COLUMN: &str = "volgnummer";

/// Diesel implementation of [`EventStore`].
#[derive(Clone)]
pub struct DieselEventStore {
    pool: DbPool,
}

impl DieselEventStore {
    /// Create a store on the event store pool.
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, Queryable, Selectable)]
#[diesel(table_name = events)]
#[diesel(check_for_backend(diesel::pg::Pg))]
struct EventRow {
    eventid: i32,
    action: String,
    tid: Option<String>,
}

#[derive(Debug, QueryableByName)]
struct EntityRow {
    #[diesel(sql_type = Jsonb)]
    entity: Value,
}

#[derive(Debug, QueryableByName)]
struct RelationJoinRow {
    #[diesel(sql_type = Nullable<Text>)]
    tid: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    id: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    begin_validity: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    end_validity: Option<String>,
    #[diesel(sql_type = Nullable<BigInt>)]
    sequence_number: Option<i64>,
}

impl From<RelationJoinRow> for RelationRow {
    fn from(row: RelationJoinRow) -> Self {
        Self {
            tid: row.tid,
            id: row.id,
            begin_validity: row.begin_validity,
            end_validity: row.end_validity,
            sequence_number: row.sequence_number,
        }
    }
}

fn map_pool_error(error: PoolError) -> EventStoreError {
    EventStoreError::connection(map_pool_error_message(error))
}

fn map_diesel_error(error: diesel::result::Error, operation: &str) -> EventStoreError {
    let connection_lost = is_connection_error(&error);
    let message = map_diesel_error_message(error, operation);
    if connection_lost {
        EventStoreError::connection(message)
    } else {
        EventStoreError::query(message)
    }
}

fn quoted(table: &str) -> Result<String, EventStoreError> {
    quote_table_name(table)
        .ok_or_else(|| EventStoreError::query(format!("refusing unsafe table name `{table}`")))
}

/// Event ids are `integer` in the store; bounds outside that range clamp.
fn clamp_event_id(value: i64) -> i32 {
    i32::try_from(value).unwrap_or(if value < 0 { i32::MIN } else { i32::MAX })
}

fn to_stored_event(row: EventRow) -> Result<StoredEvent, EventStoreError> {
    let tid = row.tid.ok_or_else(|| {
        EventStoreError::malformed_row("events", format!("event {} has no tid", row.eventid))
    })?;
    Ok(StoredEvent {
        event_id: i64::from(row.eventid),
        action: row.action,
        tid,
    })
}

fn to_snapshot(table: &str, entity: Value) -> Result<EntitySnapshot, EventStoreError> {
    let Value::Object(attributes) = entity else {
        return Err(EventStoreError::malformed_row(table, "row is not an object"));
    };
    let gobid = attributes
        .get(GOBID_COLUMN)
        .and_then(Value::as_i64)
        .ok_or_else(|| EventStoreError::malformed_row(table, "missing _gobid"))?;
    let tid = attributes
        .get(TID_COLUMN)
        .and_then(Value::as_str)
        .ok_or_else(|| EventStoreError::malformed_row(table, "missing _tid"))?
        .to_owned();
    let last_event = attributes.get(LAST_EVENT_COLUMN).and_then(Value::as_i64);
    Ok(EntitySnapshot {
        gobid,
        tid,
        last_event,
        attributes,
        relations: BTreeMap::new(),
    })
}

/// Column value rendered as text for joins on mixed key types.
fn column_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

fn entity_query(table: &str) -> Result<String, EventStoreError> {
    let table = quoted(table)?;
    Ok(format!(
        "SELECT to_jsonb(t) AS entity FROM {table} t WHERE t._tid = $1 LIMIT 1"
    ))
}

/// Entity row as JSON with long decimals rendered as strings, since
/// `serde_json` would round them through `f64`. Integers stay numbers.
const EXACT_DECIMALS: &str = "SELECT jsonb_object_agg(c.key, \
     CASE WHEN jsonb_typeof(c.value) = 'number' \
     AND c.value::text ~ '[.eE]' AND length(c.value::text) > 15 \
     THEN to_jsonb(c.value::text) ELSE c.value END) \
     FROM jsonb_each(to_jsonb(t)) c";

fn snapshot_page_query(table: &str, after: Option<SnapshotCursor>) -> Result<String, EventStoreError> {
    let table = quoted(table)?;
    let cursor = if after.is_some() {
        " AND (COALESCE(t._last_event, -1), t._gobid) > ($1, $2)"
    } else {
        ""
    };
    let limit = if after.is_some() { "$3" } else { "$1" };
    Ok(format!(
        "SELECT ({EXACT_DECIMALS}) AS entity FROM {table} t \
         WHERE t._date_deleted IS NULL{cursor} \
         ORDER BY COALESCE(t._last_event, -1), t._gobid \
         LIMIT {limit}"
    ))
}

fn relation_query(info: &RelationInfo, with_source_sequence: bool) -> Result<String, EventStoreError> {
    let relation = quoted(&info.relation_table)?;
    let destination = quoted(&info.destination_table)?;
    let (sequence_number, sequence_join) = if info.destination_has_states {
        (
            "d.volgnummer::bigint",
            " AND d.volgnummer::text = r.dst_volgnummer::text",
        )
    } else {
        ("NULL::bigint", "")
    };
    let source_sequence = if with_source_sequence {
        " AND r.src_volgnummer::text = $2"
    } else {
        ""
    };
    Ok(format!(
        "SELECT d._tid::text AS tid, d._id::text AS id, \
         r.begin_geldigheid::text AS begin_validity, \
         r.eind_geldigheid::text AS end_validity, \
         {sequence_number} AS sequence_number \
         FROM {relation} r \
         JOIN {destination} d ON d._id::text = r.dst_id::text{sequence_join} \
         WHERE r.src_id::text = $1{source_sequence} \
         ORDER BY r._gobid"
    ))
}

async fn attach_relations(
    conn: &mut AsyncPgConnection,
    source: &EntitySource,
    snapshot: &mut EntitySnapshot,
) -> Result<(), EventStoreError> {
    for (attribute, info) in source.attached_relations() {
        let Some(source_id) = snapshot.attributes.get(ID_COLUMN).and_then(column_text) else {
            snapshot.relations.insert(attribute.to_owned(), Vec::new());
            continue;
        };
        let source_sequence = source
            .has_states
            .then(|| snapshot.attributes.get(SEQUENCE_COLUMN).and_then(column_text))
            .flatten();
        let sql = relation_query(info, source_sequence.is_some())?;
        let rows = match source_sequence {
            Some(sequence) => {
                sql_query(sql)
                    .bind::<Text, _>(source_id)
                    .bind::<Text, _>(sequence)
                    .load::<RelationJoinRow>(conn)
                    .await
            }
            None => {
                sql_query(sql)
                    .bind::<Text, _>(source_id)
                    .load::<RelationJoinRow>(conn)
                    .await
            }
        }
        .map_err(|err| map_diesel_error(err, "read relation rows"))?;
        snapshot
            .relations
            .insert(attribute.to_owned(), rows.into_iter().map(RelationRow::from).collect());
    }
    Ok(())
}

#[async_trait]
impl EventStore for DieselEventStore {
    async fn get_events(
        &self,
        stream: &StreamKey,
        after: i64,
        until: Option<i64>,
        limit: usize,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;

        let mut query = events::table
            .filter(events::catalogue.eq(stream.catalogue()))
            .filter(events::entity.eq(stream.collection()))
            .filter(events::eventid.gt(clamp_event_id(after)))
            .into_boxed();
        if let Some(until) = until {
            query = query.filter(events::eventid.le(clamp_event_id(until)));
        }
        let rows = query
            .order(events::eventid.asc())
            .limit(to_limit(limit))
            .select(EventRow::as_select())
            .load::<EventRow>(&mut conn)
            .await
            .map_err(|err| map_diesel_error(err, "read events"))?;

        rows.into_iter().map(to_stored_event).collect()
    }

    async fn get_entity(
        &self,
        source: &EntitySource,
        tid: &str,
    ) -> Result<EntitySnapshot, EventStoreError> {
        let sql = entity_query(&source.table)?;
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;

        let row = sql_query(sql)
            .bind::<Text, _>(tid)
            .get_result::<EntityRow>(&mut conn)
            .await
            .optional()
            .map_err(|err| map_diesel_error(err, "read entity"))?
            .ok_or_else(|| EventStoreError::entity_not_found(source.table.as_str(), tid))?;

        let mut snapshot = to_snapshot(&source.table, row.entity)?;
        attach_relations(&mut conn, source, &mut snapshot).await?;
        Ok(snapshot)
    }

    async fn list_entities(
        &self,
        source: &EntitySource,
        after: Option<SnapshotCursor>,
        limit: usize,
    ) -> Result<Vec<EntitySnapshot>, EventStoreError> {
        let sql = snapshot_page_query(&source.table, after)?;
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;

        let rows = match after {
            Some(cursor) => {
                sql_query(sql)
                    .bind::<BigInt, _>(cursor.last_event)
                    .bind::<BigInt, _>(cursor.gobid)
                    .bind::<BigInt, _>(to_limit(limit))
                    .load::<EntityRow>(&mut conn)
                    .await
            }
            None => {
                sql_query(sql)
                    .bind::<BigInt, _>(to_limit(limit))
                    .load::<EntityRow>(&mut conn)
                    .await
            }
        }
        .map_err(|err| map_diesel_error(err, "list entities"))?;

        let mut snapshots = Vec::with_capacity(rows.len());
        for row in rows {
            let mut snapshot = to_snapshot(&source.table, row.entity)?;
            attach_relations(&mut conn, source, &mut snapshot).await?;
            snapshots.push(snapshot);
        }
        Ok(snapshots)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    fn relation(destination_has_states: bool) -> RelationInfo {
        RelationInfo {
            relation_table: "rel_gbd_bbk_gbd_brt_ligt_in_buurt".to_owned(),
            destination_table: "gebieden_buurten".to_owned(),
            is_multivalued: false,
            destination_has_states,
        }
    }

    #[rstest]
    fn relation_rows_join_on_destination_states() {
        let sql = relation_query(&relation(true), true).expect("tables are valid");

        assert!(sql.contains("FROM \"rel_gbd_bbk_gbd_brt_ligt_in_buurt\" r"));
        assert!(sql.contains("JOIN \"gebieden_buurten\" d ON d._id::text = r.dst_id::text AND d.volgnummer::text = r.dst_volgnummer::text"));
        assert!(sql.contains("d.volgnummer::bigint AS sequence_number"));
        assert!(sql.contains("WHERE r.src_id::text = $1 AND r.src_volgnummer::text = $2"));
    }

    #[rstest]
    fn stateless_destinations_have_no_sequence_number() {
        let sql = relation_query(&relation(false), false).expect("tables are valid");

        assert!(sql.contains("NULL::bigint AS sequence_number"));
        assert!(!sql.contains("dst_volgnummer"));
        assert!(!sql.contains("$2"));
    }

    #[rstest]
    fn unsafe_table_names_are_refused() {
        let mut info = relation(false);
        info.destination_table = "gebieden_buurten; --".to_owned();
        assert!(matches!(
            relation_query(&info, false),
            Err(EventStoreError::Query { .. })
        ));
        assert!(entity_query("x\"y").is_err());
    }

    #[rstest]
    #[case(None, "WHERE t._date_deleted IS NULL ORDER BY", "LIMIT $1")]
    #[case(
        Some(SnapshotCursor { last_event: 4, gobid: 9 }),
        "(COALESCE(t._last_event, -1), t._gobid) > ($1, $2)",
        "LIMIT $3"
    )]
    fn snapshot_pages_use_keyset_cursors(
        #[case] after: Option<SnapshotCursor>,
        #[case] filter: &str,
        #[case] limit: &str,
    ) {
        let sql = snapshot_page_query("nap_peilmerken", after).expect("table is valid");
        assert!(sql.contains(filter));
        assert!(sql.ends_with(limit));
        assert!(sql.contains("ORDER BY COALESCE(t._last_event, -1), t._gobid"));
    }

    #[rstest]
    fn snapshot_pages_keep_long_decimals_as_text() {
        let sql = snapshot_page_query("nap_peilmerken", None).expect("table is valid");
        assert!(sql.starts_with("SELECT (SELECT jsonb_object_agg(c.key,"));
        assert!(sql.contains("THEN to_jsonb(c.value::text) ELSE c.value END"));
        assert!(sql.contains("FROM jsonb_each(to_jsonb(t)) c) AS entity FROM \"nap_peilmerken\" t"));
    }

    #[rstest]
    fn rows_become_snapshots() {
        let snapshot = to_snapshot(
            "nap_peilmerken",
            json!({"_gobid": 3, "_tid": "pmk.3", "_last_event": null, "jaar": 1999}),
        )
        .expect("row is well formed");

        assert_eq!(snapshot.gobid, 3);
        assert_eq!(snapshot.tid, "pmk.3");
        assert_eq!(snapshot.last_event, None);
        assert_eq!(snapshot.attributes.get("jaar"), Some(&json!(1999)));
    }

    #[rstest]
    #[case(json!([1, 2]))]
    #[case(json!({"_tid": "pmk.3"}))]
    #[case(json!({"_gobid": 3}))]
    fn malformed_rows_are_reported(#[case] entity: Value) {
        assert!(matches!(
            to_snapshot("nap_peilmerken", entity),
            Err(EventStoreError::MalformedRow { .. })
        ));
    }

    #[rstest]
    #[case(-1, -1)]
    #[case(i64::MAX, i32::MAX)]
    #[case(i64::MIN, i32::MIN)]
    fn event_id_bounds_clamp_to_the_column_type(#[case] value: i64, #[case] expected: i32) {
        assert_eq!(clamp_event_id(value), expected);
    }

    #[rstest]
    fn events_without_tid_are_malformed() {
        let row = EventRow {
            eventid: 5,
            action: "ADD".to_owned(),
            tid: None,
        };
        assert_eq!(
            to_stored_event(row),
            Err(EventStoreError::malformed_row("events", "event 5 has no tid"))
        );
    }
}
