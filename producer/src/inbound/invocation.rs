//! JSON invocation adapter.
//!
//! Translates JSON documents received from a job runner (or stdin) into
//! domain calls and serialises the outcome. Error codes map onto `sysexits`
//! style process exit codes for the CLI.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, error};

use crate::domain::jobs::{split_requests, EventNotification, NotificationFilter, WorkflowStart};
use crate::domain::ports::{ProduceCommand, ProduceRequest};
use crate::domain::schema::SchemaRegistry;
use crate::domain::{Error, ErrorCode};

/// Exit code for a failed invocation.
pub fn exit_code_for(code: ErrorCode) -> u8 {
    match code {
        ErrorCode::InvalidRequest => 64,
        ErrorCode::NotFound => 66,
        ErrorCode::MappingFailed | ErrorCode::NotProducible => 65,
        ErrorCode::ServiceUnavailable => 69,
        ErrorCode::InternalError => 70,
    }
}

fn parse<T: serde::de::DeserializeOwned>(input: &str, what: &str) -> Result<T, Error> {
    serde_json::from_str(input)
        .map_err(|err| Error::invalid_request(format!("malformed {what}: {err}")))
}

fn render<T: Serialize>(value: &T) -> Result<String, Error> {
    serde_json::to_string(value).map_err(|err| {
        error!(error = %err, "failed to serialise invocation output");
        Error::internal(format!("failed to serialise output: {err}"))
    })
}

/// Handler turning JSON produce requests into [`ProduceCommand`] calls.
#[derive(Clone)]
pub struct InvocationHandler {
    command: Arc<dyn ProduceCommand>,
}

impl InvocationHandler {
    /// Wrap a produce command.
    pub fn new(command: Arc<dyn ProduceCommand>) -> Self {
        Self { command }
    }

    /// Run a produce request given as JSON; returns the response as JSON.
    ///
    /// # Examples
    /// ```ignore
    /// let output = handler
    ///     .handle_json(r#"{"header": {"catalogue": "nap", "collection": "peilmerken"}}"#)
    ///     .await?;
    /// ```
    pub async fn handle_json(&self, input: &str) -> Result<String, Error> {
        let request: ProduceRequest = parse(input, "produce request")?;
        debug!(
            catalogue = request.header.catalogue.as_deref(),
            collection = request.header.collection.as_deref(),
            "handling produce request"
        );
        let response = self.command.produce(request).await?;
        render(&response)
    }
}

/// Workflow to start for a JSON event notification, if it is listened to.
pub fn notification_workflow(
    registry: &SchemaRegistry,
    filter: &NotificationFilter,
    input: &str,
) -> Result<Option<WorkflowStart>, Error> {
    let notification: EventNotification = parse(input, "event notification")?;
    Ok(filter.accept(registry, notification))
}

/// Split a JSON produce request for a whole catalogue into one request per
/// stream, rendered as a JSON array.
pub fn split_job(registry: &SchemaRegistry, catalogue: &str, input: &str) -> Result<String, Error> {
    let original: ProduceRequest = parse(input, "produce request")?;
    let requests = split_requests(registry, catalogue, &original)?;
    debug!(catalogue, jobs = requests.len(), "split catalogue into jobs");
    render(&requests)
}
