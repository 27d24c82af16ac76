//! Run-scoped access to the persisted watermark of one stream.

use std::sync::Arc;

use super::ports::{CheckpointRepository, CheckpointRepositoryError};
use super::records::StreamKey;

/// Watermark of one stream, cached for the duration of a run.
///
/// The first [`get`](Self::get) reads (or creates) the persisted row; later
/// reads return the cached value. [`set`](Self::set) writes through.
pub struct CheckpointStore {
    repository: Arc<dyn CheckpointRepository>,
    stream: StreamKey,
    cached: Option<i64>,
}

impl CheckpointStore {
    /// Scope a store to one stream.
    pub fn new(repository: Arc<dyn CheckpointRepository>, stream: StreamKey) -> Self {
        Self {
            repository,
            stream,
            cached: None,
        }
    }

    /// Stream this store tracks.
    pub fn stream(&self) -> &StreamKey {
        &self.stream
    }

    /// Current watermark; `-1` when nothing was produced yet.
    pub async fn get(&mut self) -> Result<i64, CheckpointRepositoryError> {
        if let Some(value) = self.cached {
            return Ok(value);
        }
        let value = self.repository.get_or_create(&self.stream).await?;
        self.cached = Some(value);
        Ok(value)
    }

    /// Persist a new watermark.
    pub async fn set(&mut self, last_event_id: i64) -> Result<(), CheckpointRepositoryError> {
        self.repository.set(&self.stream, last_event_id).await?;
        self.cached = Some(last_event_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::MockCheckpointRepository;
    use mockall::predicate::eq;
    use rstest::rstest;

    fn stream() -> StreamKey {
        StreamKey::new("nap", "peilmerken")
    }

    #[rstest]
    #[tokio::test]
    async fn reads_the_repository_once() {
        let mut repository = MockCheckpointRepository::new();
        repository
            .expect_get_or_create()
            .with(eq(stream()))
            .times(1)
            .returning(|_| Ok(41));
        let mut store = CheckpointStore::new(Arc::new(repository), stream());

        assert_eq!(store.get().await, Ok(41));
        assert_eq!(store.get().await, Ok(41));
    }

    #[rstest]
    #[tokio::test]
    async fn set_writes_through_and_updates_the_cache() {
        let mut repository = MockCheckpointRepository::new();
        repository.expect_get_or_create().times(0);
        repository
            .expect_set()
            .with(eq(stream()), eq(9_i64))
            .times(1)
            .returning(|_, _| Ok(()));
        let mut store = CheckpointStore::new(Arc::new(repository), stream());

        store.set(9).await.expect("set succeeds");
        assert_eq!(store.get().await, Ok(9));
    }

    #[rstest]
    #[tokio::test]
    async fn failed_writes_leave_the_cache_untouched() {
        let mut repository = MockCheckpointRepository::new();
        repository.expect_get_or_create().returning(|_| Ok(3));
        repository
            .expect_set()
            .returning(|_, _| Err(CheckpointRepositoryError::query("disk full")));
        let mut store = CheckpointStore::new(Arc::new(repository), stream());

        assert_eq!(store.get().await, Ok(3));
        assert!(store.set(4).await.is_err());
        assert_eq!(store.get().await, Ok(3));
    }
}
