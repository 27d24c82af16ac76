//! Batching publisher that advances the watermark after each flush.
//!
//! Events are collected until `max_batch` is reached, then published as one
//! JSON list. The watermark moves to the position of the last event in the
//! flushed batch only after the broker accepted it, so a crash loses at most
//! the unflushed tail.

use tracing::{debug, info};

use super::checkpoint::CheckpointStore;
use super::external_event::ExternalEvent;
use super::ports::{CheckpointRepositoryError, EventPublisherError, PublishChannel};

/// Failures while flushing a batch.
#[derive(Debug, thiserror::Error)]
pub enum BatchPublishError {
    /// The batch could not be encoded.
    #[error("failed to encode event batch: {0}")]
    Encode(#[from] serde_json::Error),
    /// The broker did not accept the batch.
    #[error(transparent)]
    Publish(#[from] EventPublisherError),
    /// The watermark could not be advanced.
    #[error(transparent)]
    Checkpoint(#[from] CheckpointRepositoryError),
}

/// Destination of published batches.
#[derive(Debug, Clone, Copy)]
pub struct PublishTarget<'a> {
    /// Broker exchange.
    pub exchange: &'a str,
    /// Routing key of the stream.
    pub routing_key: &'a str,
}

/// Accumulates events and flushes them in bounded batches.
pub struct BatchPublisher<'a> {
    channel: &'a dyn PublishChannel,
    target: PublishTarget<'a>,
    checkpoint: Option<&'a mut CheckpointStore>,
    max_batch: usize,
    log_every: usize,
    pending: Vec<ExternalEvent>,
    pending_position: Option<i64>,
    added: usize,
}

impl<'a> BatchPublisher<'a> {
    /// Create a publisher. Without a checkpoint store the watermark is left
    /// alone.
    pub fn new(
        channel: &'a dyn PublishChannel,
        target: PublishTarget<'a>,
        checkpoint: Option<&'a mut CheckpointStore>,
        max_batch: usize,
        log_every: usize,
    ) -> Self {
        let max_batch = max_batch.max(1);
        Self {
            channel,
            target,
            checkpoint,
            max_batch,
            log_every: log_every.max(1),
            pending: Vec::with_capacity(max_batch),
            pending_position: None,
            added: 0,
        }
    }

    /// Queue an event; `position` becomes the watermark once it is flushed.
    pub async fn add(
        &mut self,
        event: ExternalEvent,
        position: Option<i64>,
    ) -> Result<(), BatchPublishError> {
        self.pending.push(event);
        if position.is_some() {
            self.pending_position = position;
        }
        self.added += 1;
        if self.added % self.log_every == 0 {
            info!(
                routing_key = self.target.routing_key,
                produced = self.added,
                "production progress"
            );
        }
        if self.pending.len() >= self.max_batch {
            self.flush().await?;
        }
        Ok(())
    }

    /// Flush the remaining events and return the total added.
    pub async fn finish(mut self) -> Result<usize, BatchPublishError> {
        self.flush().await?;
        info!(
            routing_key = self.target.routing_key,
            produced = self.added,
            "finished publishing"
        );
        Ok(self.added)
    }

    async fn flush(&mut self) -> Result<(), BatchPublishError> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let payload = serde_json::to_vec(&self.pending)?;
        self.channel
            .publish(self.target.exchange, self.target.routing_key, &payload)
            .await?;
        debug!(
            routing_key = self.target.routing_key,
            batch_size = self.pending.len(),
            "published batch"
        );
        if let (Some(position), Some(checkpoint)) =
            (self.pending_position, self.checkpoint.as_deref_mut())
        {
            checkpoint.set(position).await?;
        }
        self.pending.clear();
        self.pending_position = None;
        Ok(())
    }
}
