//! AMQP broker adapter backed by `lapin`.
//!
//! Each run opens its own connection and a channel in publisher-confirm
//! mode. Messages are persistent JSON; a negative acknowledgement fails the
//! publish.

use async_trait::async_trait;
use lapin::options::{BasicPublishOptions, ConfirmSelectOptions};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use tracing::debug;

use crate::domain::ports::{EventBroker, EventPublisherError, PublishChannel};

const JSON_CONTENT_TYPE: &str = "application/json";
const PERSISTENT_DELIVERY: u8 = 2;
const REPLY_SUCCESS: u16 = 200;

/// Broker publishing over AMQP 0.9.1.
#[derive(Debug, Clone)]
pub struct AmqpEventBroker {
    uri: String,
}

impl AmqpEventBroker {
    /// Create a broker for an `amqp://` or `amqps://` URI.
    pub fn new(uri: impl Into<String>) -> Self {
        Self { uri: uri.into() }
    }
}

fn message_properties() -> BasicProperties {
    BasicProperties::default()
        .with_content_type(JSON_CONTENT_TYPE.into())
        .with_delivery_mode(PERSISTENT_DELIVERY)
}

fn connection_error(error: lapin::Error) -> EventPublisherError {
    EventPublisherError::connection(error.to_string())
}

#[async_trait]
impl EventBroker for AmqpEventBroker {
    async fn open_channel(&self) -> Result<Box<dyn PublishChannel>, EventPublisherError> {
        let connection = Connection::connect(&self.uri, ConnectionProperties::default())
            .await
            .map_err(connection_error)?;
        let channel = connection
            .create_channel()
            .await
            .map_err(connection_error)?;
        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(connection_error)?;
        debug!(channel_id = channel.id(), "opened broker channel");
        Ok(Box::new(AmqpChannel {
            connection,
            channel,
        }))
    }
}

struct AmqpChannel {
    connection: Connection,
    channel: Channel,
}

#[async_trait]
impl PublishChannel for AmqpChannel {
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
    ) -> Result<(), EventPublisherError> {
        let publish_error =
            |error: lapin::Error| EventPublisherError::publish(routing_key, error.to_string());
        let confirmation = self
            .channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions::default(),
                payload,
                message_properties(),
            )
            .await
            .map_err(publish_error)?
            .await
            .map_err(publish_error)?;
        if confirmation.is_nack() {
            return Err(EventPublisherError::rejected(routing_key));
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), EventPublisherError> {
        let close_error = |error: lapin::Error| EventPublisherError::close(error.to_string());
        self.channel
            .close(REPLY_SUCCESS, "OK")
            .await
            .map_err(close_error)?;
        self.connection
            .close(REPLY_SUCCESS, "OK")
            .await
            .map_err(close_error)
    }
}
