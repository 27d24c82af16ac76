//! Driving port for produce requests.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::domain::Error;

/// Mode value selecting a full load.
pub const FULL_LOAD_MODE: &str = "full";

/// Header of a produce request, echoed back in the response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestHeader {
    /// Catalogue to produce.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub catalogue: Option<String>,
    /// Collection to produce.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,
    /// `full` for a full load; anything else is incremental.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    /// Workflow bookkeeping (job ids, process ids) passed through as is.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl RequestHeader {
    /// Header addressing one catalogue/collection.
    pub fn for_stream(catalogue: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            catalogue: Some(catalogue.into()),
            collection: Some(collection.into()),
            ..Self::default()
        }
    }

    /// Whether the request asks for a full load.
    pub fn is_full_load(&self) -> bool {
        self.mode.as_deref() == Some(FULL_LOAD_MODE)
    }
}

/// Body of a produce request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestContents {
    /// Advisory `[min, max]` event id range.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_event: Option<(Option<i64>, Option<i64>)>,
    /// Other content keys, passed through.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Request to produce events for one catalogue/collection.
///
/// ```
/// use eventproducer::domain::ports::ProduceRequest;
///
/// let request: ProduceRequest = serde_json::from_str(
///     r#"{"header": {"catalogue": "nap", "collection": "peilmerken", "jobid": 4},
///         "contents": {"last_event": [10, null]}}"#,
/// )?;
/// assert_eq!(request.contents.last_event, Some((Some(10), None)));
/// assert!(!request.header.is_full_load());
/// # Ok::<(), serde_json::Error>(())
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProduceRequest {
    /// Addressing and mode.
    pub header: RequestHeader,
    /// Requested range.
    #[serde(default)]
    pub contents: RequestContents,
}

/// Count reported back to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProduceSummary {
    /// Number of events published.
    pub produced: usize,
}

/// Result of a produce request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProduceResponse {
    /// The request header, unchanged.
    pub header: RequestHeader,
    /// Outcome.
    pub summary: ProduceSummary,
}

/// Handles produce requests.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProduceCommand: Send + Sync {
    /// Run one production and report how many events were published.
    async fn produce(&self, request: ProduceRequest) -> Result<ProduceResponse, Error>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[rstest]
    fn unknown_header_keys_survive_a_round_trip() {
        let request: ProduceRequest = serde_json::from_value(json!({
            "header": {"catalogue": "nap", "collection": "peilmerken", "mode": "full", "jobid": 12},
        }))
        .expect("request parses");
        assert!(request.header.is_full_load());
        assert_eq!(request.contents, RequestContents::default());

        let response = ProduceResponse {
            header: request.header,
            summary: ProduceSummary { produced: 0 },
        };
        assert_eq!(
            serde_json::to_value(response).expect("response serialises"),
            json!({
                "header": {"catalogue": "nap", "collection": "peilmerken", "mode": "full", "jobid": 12},
                "summary": {"produced": 0},
            })
        );
    }

    #[rstest]
    #[case(json!({"header": {}}), None)]
    #[case(json!({"header": {}, "contents": {"last_event": [null, 9]}}), Some((None, Some(9))))]
    #[case(json!({"header": {}, "contents": {"last_event": null}}), None)]
    fn last_event_ranges_are_optional(
        #[case] input: Value,
        #[case] expected: Option<(Option<i64>, Option<i64>)>,
    ) {
        let request: ProduceRequest = serde_json::from_value(input).expect("request parses");
        assert_eq!(request.contents.last_event, expected);
    }
}
