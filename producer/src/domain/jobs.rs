//! Helpers deciding which produce jobs to start.
//!
//! Notifications about new events only trigger production for catalogues the
//! deployment listens to. A catalogue-wide request is split into one job per
//! collection, including the relation collections the catalogue owns.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::ports::{ProduceRequest, RequestHeader};
use super::records::StreamKey;
use super::schema::{SchemaRegistry, RELATION_CATALOGUE};
use super::Error;

/// Workflow started for accepted notifications.
pub const EVENT_PRODUCE_WORKFLOW: &str = "event_produce";

/// Header key linking split jobs to the request they came from.
pub const SPLIT_FROM_KEY: &str = "split_from";

/// Header key carrying the job id of a request.
pub const JOB_ID_KEY: &str = "jobid";

/// Notification that new events were stored for a collection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventNotification {
    /// Addressing and process bookkeeping.
    pub header: NotificationHeader,
    /// Event range and other contents, forwarded to the job.
    #[serde(default)]
    pub contents: Value,
}

/// Header of an [`EventNotification`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NotificationHeader {
    /// Catalogue with new events.
    #[serde(default)]
    pub catalogue: Option<String>,
    /// Collection with new events.
    #[serde(default)]
    pub collection: Option<String>,
    /// Process that stored the events.
    #[serde(default)]
    pub process_id: Option<Value>,
}

/// Request to start a produce workflow.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkflowStart {
    /// Workflow to start.
    pub workflow_name: &'static str,
    /// Target catalogue.
    pub catalogue: String,
    /// Target collection.
    pub collection: String,
    /// Always `null`, so jobs for one stream never run in parallel per application.
    pub application: Option<String>,
    /// Process that triggered the job.
    pub process_id: Option<Value>,
    /// Contents of the notification.
    pub contents: Value,
}

/// Decides which notifications trigger production.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotificationFilter {
    catalogues: BTreeSet<String>,
}

impl NotificationFilter {
    /// Listen to the given catalogues; blank names are ignored.
    pub fn new<I, S>(catalogues: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let catalogues = catalogues
            .into_iter()
            .map(|name| name.as_ref().trim().to_owned())
            .filter(|name| !name.is_empty())
            .collect();
        Self { catalogues }
    }

    /// Whether events of `catalogue`/`collection` should be produced.
    ///
    /// Relation collections are produced when the catalogue owning the
    /// relation is listened to.
    pub fn is_listening(
        &self,
        registry: &SchemaRegistry,
        catalogue: &str,
        collection: &str,
    ) -> bool {
        if self.catalogues.contains(catalogue) {
            return true;
        }
        catalogue == RELATION_CATALOGUE
            && registry
                .relation_owner(collection)
                .is_some_and(|owner| self.catalogues.contains(owner.collection.catalogue()))
    }

    /// Workflow to start for a notification, if any.
    pub fn accept(
        &self,
        registry: &SchemaRegistry,
        notification: EventNotification,
    ) -> Option<WorkflowStart> {
        let EventNotification { header, contents } = notification;
        let catalogue = header.catalogue?;
        let collection = header.collection?;
        if !self.is_listening(registry, &catalogue, &collection) {
            return None;
        }
        Some(WorkflowStart {
            workflow_name: EVENT_PRODUCE_WORKFLOW,
            catalogue,
            collection,
            application: None,
            process_id: header.process_id,
            contents,
        })
    }
}

/// Every stream of a catalogue: its collections, then the relation
/// collections whose name starts with the catalogue abbreviation.
pub fn split_catalogue(registry: &SchemaRegistry, catalogue: &str) -> Result<Vec<StreamKey>, Error> {
    let schema = registry
        .catalogue(catalogue)
        .filter(|schema| schema.name() != RELATION_CATALOGUE)
        .ok_or_else(|| Error::not_found(format!("unknown catalogue {catalogue}")))?;
    let mut streams: Vec<StreamKey> = schema
        .collections()
        .map(|collection| StreamKey::new(catalogue, collection.name()))
        .collect();
    if let Some(relations) = registry.catalogue(RELATION_CATALOGUE) {
        streams.extend(
            relations
                .collections()
                .filter(|relation| relation.name().starts_with(schema.abbreviation()))
                .map(|relation| StreamKey::new(RELATION_CATALOGUE, relation.name())),
        );
    }
    Ok(streams)
}

/// One produce request per stream of `catalogue`, derived from `original`.
///
/// Header keys of the original are kept; the stream is replaced and
/// `split_from` points at the original job id.
pub fn split_requests(
    registry: &SchemaRegistry,
    catalogue: &str,
    original: &ProduceRequest,
) -> Result<Vec<ProduceRequest>, Error> {
    let split_from = original
        .header
        .extra
        .get(JOB_ID_KEY)
        .cloned()
        .unwrap_or(Value::Null);
    Ok(split_catalogue(registry, catalogue)?
        .into_iter()
        .map(|stream| {
            let mut extra: Map<String, Value> = original.header.extra.clone();
            extra.insert(SPLIT_FROM_KEY.to_owned(), split_from.clone());
            ProduceRequest {
                header: RequestHeader {
                    catalogue: Some(stream.catalogue().to_owned()),
                    collection: Some(stream.collection().to_owned()),
                    mode: original.header.mode.clone(),
                    extra,
                },
                contents: original.contents.clone(),
            }
        })
        .collect())
}
