//! Diesel table definitions.
//!
//! `events` belongs to the event store and is read only. `last_sent_events`
//! is created by this crate's migrations.

diesel::table! {
    /// Append-only event log of the event store.
    events (eventid) {
        /// Strictly increasing event id.
        eventid -> Integer,
        /// Catalogue of the affected entity.
        catalogue -> Varchar,
        /// Collection of the affected entity.
        entity -> Varchar,
        /// Event action (`ADD`, `MODIFY`, `DELETE`, `CONFIRM`, ...).
        action -> Varchar,
        /// Stable identifier of the affected entity.
        tid -> Nullable<Varchar>,
    }
}

diesel::table! {
    /// Watermark per catalogue/collection stream.
    last_sent_events (catalogue, collection) {
        catalogue -> Varchar,
        collection -> Varchar,
        /// Last event id published; `-1` before the first run.
        last_event -> BigInt,
    }
}
