//! Messages published to external consumers.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Serialize, Serializer};

use super::event_data::EventData;

/// Event type used for synthetic full-load events.
pub const ADD_ACTION: &str = "ADD";

/// Markers carried by every event of a full-load sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FullLoadSequence {
    /// Always `true`; consumers key on its presence.
    pub full_load_sequence: bool,
    /// Set on the first event of the sequence only.
    pub first_of_sequence: bool,
    /// Set on the last event of the sequence only.
    pub last_of_sequence: bool,
}

impl FullLoadSequence {
    /// Markers for an event at the given position.
    pub const fn at(first: bool, last: bool) -> Self {
        Self {
            full_load_sequence: true,
            first_of_sequence: first,
            last_of_sequence: last,
        }
    }
}

/// Envelope header of an external event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventHeader {
    /// Target catalogue, after relation translation.
    pub catalog: String,
    /// Target collection, after relation translation.
    pub collection: String,
    /// Action of the originating event.
    pub event_type: String,
    /// Originating event id; `null` for some full-load events.
    pub event_id: Option<i64>,
    /// Stable identifier of the entity.
    pub tid: String,
    /// Moment the event was built.
    #[serde(serialize_with = "serialize_timestamp")]
    pub generated_timestamp: DateTime<Utc>,
    /// Present on full-load events only.
    #[serde(flatten, skip_serializing_if = "Option::is_none")]
    pub sequence: Option<FullLoadSequence>,
}

fn serialize_timestamp<S: Serializer>(
    timestamp: &DateTime<Utc>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&timestamp.to_rfc3339_opts(SecondsFormat::Micros, true))
}

/// Header plus mapped payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExternalEvent {
    /// Envelope header.
    pub header: EventHeader,
    /// Mapped entity payload.
    pub data: EventData,
}
