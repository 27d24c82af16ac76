//! Domain port for publishing external events to the message broker.
//!
//! A [`PublishChannel`] is scoped to one production run. The producer closes
//! it on every exit path, including after a failed run.

use async_trait::async_trait;

use super::define_port_error;

define_port_error! {
    /// Errors raised by the broker adapter.
    pub enum EventPublisherError {
        /// The broker could not be reached.
        Connection { message: String } => "broker connection failed: {message}",
        /// A message could not be sent.
        Publish { routing_key: String, message: String } => "publishing to {routing_key} failed: {message}",
        /// The broker refused a message.
        Rejected { routing_key: String } => "broker rejected message for {routing_key}",
        /// The channel could not be closed cleanly.
        Close { message: String } => "closing broker channel failed: {message}",
    }
}

/// Open channel on which messages are published.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PublishChannel: Send + Sync {
    /// Publish one JSON payload and wait for the broker to accept it.
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
    ) -> Result<(), EventPublisherError>;

    /// Release the channel.
    async fn close(&self) -> Result<(), EventPublisherError>;
}

/// Factory for run-scoped publish channels.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EventBroker: Send + Sync {
    /// Open a new channel.
    async fn open_channel(&self) -> Result<Box<dyn PublishChannel>, EventPublisherError>;
}
