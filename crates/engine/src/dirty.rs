//! Which documents must be regenerated after a roster change.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::Utc;
use storage::models::{Championship, ClassId, DirtyMark, DocState, DocumentKey};
use storage::{DirtyStore, SyncStatusStore};

use crate::error::Result;

const DRAIN_PAGE_SIZE: usize = 50;

pub struct DirtyTracker<S> {
    store: Arc<S>,
}

impl<S> Clone for DirtyTracker<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S> DirtyTracker<S>
where
    S: DirtyStore + SyncStatusStore,
{
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Flags the document as needing regeneration. Marking twice is the same
    /// as marking once; a current document becomes stale.
    pub async fn mark_dirty(&self, key: &DocumentKey) -> Result<()> {
        self.store.mark(key, Utc::now()).await?;

        if let Some(mut status) = self.store.status(key).await? {
            if status.state == DocState::Current {
                status.state = DocState::Stale;
                self.store.save_status(&status).await?;
            }
        }

        tracing::debug!(document = %key, "Marked dirty");
        Ok(())
    }

    pub async fn mark_class(
        &self,
        championship: &Championship,
        class_id: ClassId,
        is_team: bool,
    ) -> Result<()> {
        self.mark_dirty(&DocumentKey::for_class(championship, class_id, is_team))
            .await
    }

    /// Walks the marks of `year` in key order without removing them.
    pub fn drain_dirty(&self, year: i32) -> DirtyDrain<S> {
        DirtyDrain::new(Arc::clone(&self.store), year, None)
    }

    /// Like [`Self::drain_dirty`], starting after `key`.
    pub fn drain_dirty_after(&self, year: i32, key: Option<DocumentKey>) -> DirtyDrain<S> {
        DirtyDrain::new(Arc::clone(&self.store), year, key)
    }

    /// Removes `mark` after a successful render, unless it was marked again in
    /// the meantime.
    pub async fn clear(&self, mark: &DirtyMark) -> Result<bool> {
        Ok(self.store.clear(&mark.key, mark.marked_at).await?)
    }
}

/// Cursor over dirty marks, fetched page by page.
///
/// Finite: it ends at the last mark present when its final page was fetched.
/// Restart with [`DirtyTracker::drain_dirty_after`] and [`DirtyDrain::position`].
pub struct DirtyDrain<S> {
    store: Arc<S>,
    year: i32,
    after: Option<DocumentKey>,
    buffered: VecDeque<DirtyMark>,
    exhausted: bool,
}

impl<S: DirtyStore> DirtyDrain<S> {
    fn new(store: Arc<S>, year: i32, after: Option<DocumentKey>) -> Self {
        Self {
            store,
            year,
            after,
            buffered: VecDeque::new(),
            exhausted: false,
        }
    }

    pub async fn next(&mut self) -> Result<Option<DirtyMark>> {
        if self.buffered.is_empty() && !self.exhausted {
            let page = self
                .store
                .page(self.year, self.after.as_ref(), DRAIN_PAGE_SIZE)
                .await?;
            self.exhausted = page.len() < DRAIN_PAGE_SIZE;
            self.buffered.extend(page);
        }

        let mark = self.buffered.pop_front();
        match &mark {
            Some(m) => self.after = Some(m.key.clone()),
            None => self.exhausted = true,
        }
        Ok(mark)
    }

    /// Key of the last mark handed out.
    pub fn position(&self) -> Option<&DocumentKey> {
        self.after.as_ref()
    }
}
