//! Paged snapshot scan with a one-element lookahead.
//!
//! The full load needs to know whether the row it is emitting is the last
//! one. The stream therefore always holds the next row (if any) in
//! `ahead` before handing out the current one.

use std::collections::VecDeque;

use super::ports::{EventStore, EventStoreError};
use super::records::{EntitySnapshot, EntitySource, SnapshotCursor};

/// A snapshot with its position in the scan.
#[derive(Debug, Clone, PartialEq)]
pub struct ScannedSnapshot {
    /// The entity.
    pub snapshot: EntitySnapshot,
    /// Whether this is the first row of the scan.
    pub is_first: bool,
    /// Whether no row follows.
    pub is_last: bool,
}

/// Keyset-paged iterator over live entities of one table.
pub struct SnapshotStream<'a> {
    store: &'a dyn EventStore,
    source: &'a EntitySource,
    page_size: usize,
    page: VecDeque<EntitySnapshot>,
    cursor: Option<SnapshotCursor>,
    exhausted: bool,
    ahead: Option<EntitySnapshot>,
    primed: bool,
    emitted: usize,
}

impl<'a> SnapshotStream<'a> {
    /// Start a scan; nothing is read until [`next`](Self::next).
    pub fn new(store: &'a dyn EventStore, source: &'a EntitySource, page_size: usize) -> Self {
        Self {
            store,
            source,
            page_size: page_size.max(1),
            page: VecDeque::new(),
            cursor: None,
            exhausted: false,
            ahead: None,
            primed: false,
            emitted: 0,
        }
    }

    /// Next row, or `None` once the table is drained.
    pub async fn next(&mut self) -> Result<Option<ScannedSnapshot>, EventStoreError> {
        if !self.primed {
            self.ahead = self.pull().await?;
            self.primed = true;
        }
        let Some(current) = self.ahead.take() else {
            return Ok(None);
        };
        self.ahead = self.pull().await?;
        let is_first = self.emitted == 0;
        self.emitted += 1;
        Ok(Some(ScannedSnapshot {
            snapshot: current,
            is_first,
            is_last: self.ahead.is_none(),
        }))
    }

    async fn pull(&mut self) -> Result<Option<EntitySnapshot>, EventStoreError> {
        if self.page.is_empty() && !self.exhausted {
            let rows = self
                .store
                .list_entities(self.source, self.cursor, self.page_size)
                .await?;
            if rows.len() < self.page_size {
                self.exhausted = true;
            }
            if let Some(last) = rows.last() {
                self.cursor = Some(last.cursor());
            }
            self.page.extend(rows);
        }
        Ok(self.page.pop_front())
    }
}
