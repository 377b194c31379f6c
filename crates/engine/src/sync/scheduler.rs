use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use storage::models::{DEFAULT_LIMIT, DirtyMark, DocState, DocumentKey, SyncStatus};
use tokio::sync::{Mutex, Notify, watch};

use super::backoff::Backoff;
use super::document::{DocumentSummary, DocumentSync, ExternalRevision, RosterSnapshot, SyncError};
use super::quota::Quota;
use crate::dirty::DirtyTracker;
use crate::error::Result;
use crate::{Store, log_stamp};

#[derive(Debug, Clone)]
pub struct SyncSettings {
    /// Competition year whose documents are kept in sync.
    pub year: i32,
    /// Editor name the document service reports for our own renders.
    pub editor: String,
    pub quota_per_minute: u32,
    /// Pause between ticks while there is nothing to do.
    pub interval: Duration,
    pub backoff: Backoff,
    /// How long a document sits out after a transient failure.
    pub retry_after: Duration,
    /// Known documents are asked for their last-modified time again once
    /// their last look is this old.
    pub recheck_after: Duration,
}

impl SyncSettings {
    pub fn new(year: i32) -> Self {
        Self {
            year,
            editor: "roster-engine".to_string(),
            quota_per_minute: 45,
            interval: Duration::from_secs(3),
            backoff: Backoff::default(),
            retry_after: Duration::from_secs(60),
            recheck_after: Duration::from_secs(600),
        }
    }
}

/// The single unit of work a tick performed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    Idle,
    Inspected(DocumentKey),
    /// Asked for the last-modified time only.
    Checked(DocumentKey),
    Rendered(DocumentKey),
    Failed(DocumentKey),
}

/// Keeps external documents in line with the rosters.
///
/// Each tick does one bounded piece of work, taken from the first non-empty
/// queue: documents never inspected, documents edited externally since their
/// last inspection, dirty documents. With all three empty, the document looked
/// at longest ago is checked for external edits. A failed render keeps its
/// dirty mark and is retried when the drain comes around again. A document
/// whose inspection fails transiently is set aside for `retry_after`.
pub struct SyncScheduler<S> {
    store: Arc<S>,
    tracker: DirtyTracker<S>,
    sync: Arc<dyn DocumentSync>,
    quota: Quota,
    settings: SyncSettings,
    cursor: Mutex<Option<DocumentKey>>,
    wake: Arc<Notify>,
}

impl<S: Store> SyncScheduler<S> {
    pub fn new(store: Arc<S>, sync: Arc<dyn DocumentSync>, settings: SyncSettings) -> Self {
        Self {
            tracker: DirtyTracker::new(Arc::clone(&store)),
            store,
            sync,
            quota: Quota::per_minute(settings.quota_per_minute),
            settings,
            cursor: Mutex::new(None),
            wake: Arc::new(Notify::new()),
        }
    }

    /// Shares the wake signal, e.g. with the mutation handlers.
    pub fn with_wake(mut self, wake: Arc<Notify>) -> Self {
        self.wake = wake;
        self
    }

    pub fn wake_handle(&self) -> Arc<Notify> {
        Arc::clone(&self.wake)
    }

    pub async fn tick(&self) -> Result<TickOutcome> {
        let year = self.settings.year;
        let now = Utc::now();

        if let Some(status) = self.store.next_unknown(year, now).await? {
            return self.inspect(status).await;
        }

        if let Some(status) = self.store.next_reinspect(year, now).await? {
            return self.inspect(status).await;
        }

        match self.regenerate().await? {
            TickOutcome::Idle => {}
            outcome => return Ok(outcome),
        }

        let inspected_before = earlier(now, self.settings.recheck_after);
        match self.store.next_recheck(year, inspected_before, now).await? {
            Some(status) => self.recheck(status).await,
            None => Ok(TickOutcome::Idle),
        }
    }

    /// Records an edit reported by the document service so the document is
    /// inspected again. Our own renders are ignored.
    pub async fn notify_external_change(
        &self,
        key: &DocumentKey,
        at: DateTime<Utc>,
        editor: &str,
    ) -> Result<()> {
        if editor == self.settings.editor {
            tracing::debug!(document = %key, "Ignoring change made by our own render");
            return Ok(());
        }

        self.store.note_external_change(key, at, editor).await?;
        self.wake.notify_one();
        Ok(())
    }

    /// Ticks until `shutdown` flips to true. Work is done back to back; an
    /// idle tick waits for the interval or a wake-up.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            year = self.settings.year,
            quota_per_minute = self.settings.quota_per_minute,
            "Sync scheduler started"
        );

        while !*shutdown.borrow() {
            let busy = match self.tick().await {
                Ok(TickOutcome::Idle) => false,
                Ok(outcome) => {
                    tracing::debug!(?outcome, "Sync tick done");
                    true
                }
                Err(e) => {
                    tracing::error!("Sync tick failed: {}", e);
                    false
                }
            };

            if busy {
                tokio::task::yield_now().await;
                continue;
            }

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = self.wake.notified() => {}
                _ = tokio::time::sleep(self.settings.interval) => {}
            }
        }

        tracing::info!("Sync scheduler stopped");
    }

    async fn inspect(&self, mut status: SyncStatus) -> Result<TickOutcome> {
        let key = status.key.clone();

        let fetched = self.fetch_inspection(&key).await;
        let now = Utc::now();

        let (revision, summary) = match fetched {
            Ok(found) => found,
            Err(e) => {
                if !e.is_transient() {
                    // Not retried; the document leaves the inspection queue.
                    status.inspected_at = Some(now);
                }
                return self.defer(status, "Inspection", e, now).await;
            }
        };

        let edited_externally = match &revision {
            Some(revision) => {
                if status
                    .external_modified_at
                    .is_none_or(|known| revision.modified_at > known)
                {
                    status.external_modified_at = Some(revision.modified_at);
                }
                status.external_editor = Some(revision.editor.clone());
                revision.editor != self.settings.editor
                    && status
                        .rendered_at
                        .is_none_or(|rendered| revision.modified_at > rendered)
            }
            None => false,
        };

        status.state = match (status.state, edited_externally) {
            (DocState::Unknown, false) => DocState::Current,
            (DocState::Stale, _) | (_, true) => DocState::Stale,
            (DocState::Current, false) => DocState::Current,
        };
        // Never before the revision we just saw, or it would be picked up again.
        status.inspected_at = Some(status.external_modified_at.map_or(now, |m| m.max(now)));
        status.retry_at = None;
        status.phase = summary.phase;
        status.has_scores = summary.has_scores;
        status.is_complete = summary.is_complete;
        status.log.push_str(&format!(
            "{} Inspected: {}{}\n",
            log_stamp(now),
            status.state.as_str(),
            match &status.external_editor {
                Some(editor) if edited_externally => format!(", edited by {}", editor),
                _ => String::new(),
            }
        ));
        self.store.save_status(&status).await?;

        tracing::info!(
            document = %key,
            state = status.state.as_str(),
            phase = %status.phase,
            "Document inspected"
        );
        Ok(TickOutcome::Inspected(key))
    }

    /// Asks for the last-modified time of a known document. An edit by
    /// someone else puts the document in the re-inspection queue.
    async fn recheck(&self, mut status: SyncStatus) -> Result<TickOutcome> {
        let key = status.key.clone();

        let fetched = self
            .settings
            .backoff
            .run(&self.quota, "get_last_modified", || {
                self.sync.get_last_modified(&key)
            })
            .await;
        let now = Utc::now();

        let revision = match fetched {
            Ok(revision) => revision,
            Err(e) => {
                if !e.is_transient() {
                    status.inspected_at = Some(now);
                }
                return self.defer(status, "Change check", e, now).await;
            }
        };

        if let Some(revision) = revision {
            let edited_since = status
                .inspected_at
                .is_none_or(|inspected| revision.modified_at > inspected);
            if edited_since && revision.editor != self.settings.editor {
                tracing::info!(
                    document = %key,
                    editor = %revision.editor,
                    "External edit detected"
                );
                self.notify_external_change(&key, revision.modified_at, &revision.editor)
                    .await?;
                return Ok(TickOutcome::Checked(key));
            }
        }

        status.inspected_at = Some(status.inspected_at.map_or(now, |at| at.max(now)));
        status.retry_at = None;
        self.store.save_status(&status).await?;
        tracing::debug!(document = %key, "No external edit");
        Ok(TickOutcome::Checked(key))
    }

    /// Records a failed call. A transient failure sets the document aside so
    /// the other queues are served in the meantime.
    async fn defer(
        &self,
        mut status: SyncStatus,
        what: &str,
        error: SyncError,
        now: DateTime<Utc>,
    ) -> Result<TickOutcome> {
        let key = status.key.clone();
        if error.is_transient() {
            let retry_at = later(now, self.settings.retry_after);
            tracing::warn!(document = %key, %retry_at, "{} failed, retrying later: {}", what, error);
            status.retry_at = Some(retry_at);
        } else {
            tracing::error!(document = %key, "{} failed: {}", what, error);
            status.retry_at = None;
        }

        status
            .log
            .push_str(&format!("{} {} failed: {}\n", log_stamp(now), what, error));
        self.store.save_status(&status).await?;
        Ok(TickOutcome::Failed(key))
    }

    async fn fetch_inspection(
        &self,
        key: &DocumentKey,
    ) -> std::result::Result<(Option<ExternalRevision>, DocumentSummary), SyncError> {
        let backoff = &self.settings.backoff;
        let revision = backoff
            .run(&self.quota, "get_last_modified", || self.sync.get_last_modified(key))
            .await?;
        let summary = backoff
            .run(&self.quota, "read_summary", || self.sync.read_summary(key))
            .await?;
        Ok((revision, summary))
    }

    /// Next dirty mark after the cursor, wrapping around once at the end.
    async fn next_mark(&self) -> Result<Option<DirtyMark>> {
        let year = self.settings.year;
        let mut cursor = self.cursor.lock().await;

        let mut mark = self
            .tracker
            .drain_dirty_after(year, cursor.clone())
            .next()
            .await?;
        if mark.is_none() && cursor.is_some() {
            mark = self.tracker.drain_dirty(year).next().await?;
        }

        *cursor = mark.as_ref().map(|m| m.key.clone());
        Ok(mark)
    }

    async fn regenerate(&self) -> Result<TickOutcome> {
        let Some(mark) = self.next_mark().await? else {
            return Ok(TickOutcome::Idle);
        };
        let key = mark.key.clone();

        let Some(snapshot) = self.snapshot(&key).await? else {
            tracing::warn!(document = %key, "No championship for dirty document, dropping mark");
            self.tracker.clear(&mark).await?;
            return Ok(TickOutcome::Failed(key));
        };

        let rendered = self
            .settings
            .backoff
            .run(&self.quota, "render", || self.sync.render(&key, &snapshot))
            .await;

        let now = Utc::now();
        let tracked = self.store.status(&key).await?;

        match rendered {
            Ok(()) => {
                let cleared = self.tracker.clear(&mark).await?;
                if let Some(mut status) = tracked {
                    status.rendered_at = Some(now);
                    if cleared {
                        status.state = DocState::Current;
                    } else if status.state == DocState::Current {
                        status.state = DocState::Stale;
                    }
                    status.log.push_str(&format!(
                        "{} Rendered {} lines\n",
                        log_stamp(now),
                        snapshot.lines.len()
                    ));
                    self.store.save_status(&status).await?;
                }

                tracing::info!(document = %key, still_dirty = !cleared, "Document regenerated");
                Ok(TickOutcome::Rendered(key))
            }
            Err(e) => {
                tracing::warn!(document = %key, "Render failed, mark kept: {}", e);
                if let Some(mut status) = tracked {
                    status
                        .log
                        .push_str(&format!("{} Render failed: {}\n", log_stamp(now), e));
                    self.store.save_status(&status).await?;
                }
                Ok(TickOutcome::Failed(key))
            }
        }
    }

    async fn snapshot(&self, key: &DocumentKey) -> Result<Option<RosterSnapshot>> {
        let Some(championship) = self
            .store
            .find_championship(key.year, key.discipline, key.is_final_stage, key.zone)
            .await?
        else {
            return Ok(None);
        };

        let entries = self
            .store
            .load_class(championship.championship_id, key.class_id)
            .await?;
        let limit = if key.is_team {
            DEFAULT_LIMIT
        } else {
            self.store
                .load_limit(championship.championship_id, key.class_id)
                .await?
        };

        Ok(Some(RosterSnapshot::new(key, limit, &entries, Utc::now())))
    }
}

fn later(at: DateTime<Utc>, by: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(by)
        .ok()
        .and_then(|by| at.checked_add_signed(by))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

fn earlier(at: DateTime<Utc>, by: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(by)
        .ok()
        .and_then(|by| at.checked_sub_signed(by))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}
