//! Domain port for the persisted per-stream watermark.

use async_trait::async_trait;

use super::define_port_error;
use crate::domain::records::StreamKey;

/// Watermark value meaning "nothing produced yet".
pub const NO_PROGRESS: i64 = -1;

define_port_error! {
    /// Errors raised by checkpoint persistence.
    pub enum CheckpointRepositoryError {
        /// The checkpoint database could not be reached.
        Connection { message: String } => "checkpoint store connection failed: {message}",
        /// A checkpoint query failed.
        Query { message: String } => "checkpoint query failed: {message}",
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CheckpointRepository: Send + Sync {
    /// Read the watermark, creating it as [`NO_PROGRESS`] when absent.
    async fn get_or_create(&self, stream: &StreamKey) -> Result<i64, CheckpointRepositoryError>;

    /// Persist a new watermark.
    async fn set(&self, stream: &StreamKey, last_event_id: i64)
        -> Result<(), CheckpointRepositoryError>;
}

/// Fixture repository that never remembers progress.
#[derive(Debug, Default, Clone, Copy)]
pub struct FixtureCheckpointRepository;

#[async_trait]
impl CheckpointRepository for FixtureCheckpointRepository {
    async fn get_or_create(&self, _stream: &StreamKey) -> Result<i64, CheckpointRepositoryError> {
        Ok(NO_PROGRESS)
    }

    async fn set(
        &self,
        _stream: &StreamKey,
        _last_event_id: i64,
    ) -> Result<(), CheckpointRepositoryError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[tokio::test]
    async fn fixture_repository_starts_from_no_progress() {
        let stream = StreamKey::new("nap", "peilmerken");
        let repo = FixtureCheckpointRepository;
        repo.set(&stream, 10).await.expect("set succeeds");
        assert_eq!(repo.get_or_create(&stream).await, Ok(NO_PROGRESS));
    }
}
