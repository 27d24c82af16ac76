//! Broker stub used when no broker URL is configured.

use async_trait::async_trait;
use tracing::warn;

use crate::domain::ports::{EventBroker, EventPublisherError, PublishChannel};

/// Broker that logs every message instead of sending it.
///
/// All publishes succeed, so watermarks advance as if a real broker had
/// accepted the events. Intended for local runs and dry runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingEventBroker;

impl LoggingEventBroker {
    /// Create the stub broker.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl EventBroker for LoggingEventBroker {
    async fn open_channel(&self) -> Result<Box<dyn PublishChannel>, EventPublisherError> {
        Ok(Box::new(LoggingChannel))
    }
}

#[derive(Debug, Clone, Copy)]
struct LoggingChannel;

#[async_trait]
impl PublishChannel for LoggingChannel {
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
    ) -> Result<(), EventPublisherError> {
        // Warn so a misconfigured deployment is noticed.
        warn!(
            exchange,
            routing_key,
            bytes = payload.len(),
            "no broker configured; message logged and dropped"
        );
        Ok(())
    }

    async fn close(&self) -> Result<(), EventPublisherError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[tokio::test]
    async fn publishes_and_closes_without_a_broker() {
        let channel = LoggingEventBroker::new()
            .open_channel()
            .await
            .expect("stub channel opens");

        let result = channel.publish("gob.events", "nap.peilmerken", b"[]").await;
        assert!(result.is_ok(), "stub publish should succeed");
        assert!(channel.close().await.is_ok());
    }
}
