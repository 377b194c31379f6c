use chrono::{DateTime, Utc};

use crate::Result;
use crate::models::{
    AthleteId, Championship, ChampionshipId, ClassId, DirtyMark, DocumentKey, MutationId,
    MutationRecord, MutationStatus, NewMutation, RosterEntry, SyncStatus,
};

/// Persistent roster entries and class limits.
#[async_trait::async_trait]
pub trait RosterStore: Send + Sync {
    async fn championship(&self, championship_id: ChampionshipId) -> Result<Championship>;

    async fn find_championship(
        &self,
        year: i32,
        discipline: i16,
        is_final_stage: bool,
        zone: Option<i16>,
    ) -> Result<Option<Championship>>;

    async fn class_ids(&self, championship_id: ChampionshipId) -> Result<Vec<ClassId>>;

    /// Entries ordered by sequence, then athlete id.
    async fn load_class(
        &self,
        championship_id: ChampionshipId,
        class_id: ClassId,
    ) -> Result<Vec<RosterEntry>>;

    async fn load_entry(
        &self,
        championship_id: ChampionshipId,
        athlete_id: AthleteId,
    ) -> Result<RosterEntry>;

    /// Atomic batch upsert keyed on (championship, athlete).
    async fn save(&self, entries: &[RosterEntry]) -> Result<()>;

    /// The class cut, [`crate::models::DEFAULT_LIMIT`] when no override exists.
    async fn load_limit(&self, championship_id: ChampionshipId, class_id: ClassId) -> Result<i32>;

    async fn set_limit(
        &self,
        championship_id: ChampionshipId,
        class_id: ClassId,
        limit: i32,
    ) -> Result<()>;

    async fn clear_limit(&self, championship_id: ChampionshipId, class_id: ClassId) -> Result<()>;
}

/// Durable append-only intent log.
#[async_trait::async_trait]
pub trait MutationLog: Send + Sync {
    async fn append(&self, mutation: NewMutation) -> Result<MutationRecord>;

    /// Oldest mutation still pending.
    async fn next_pending(&self) -> Result<Option<MutationRecord>>;

    /// Moves a pending mutation to applying. False when it was not pending.
    async fn claim(&self, mutation_id: MutationId) -> Result<bool>;

    async fn finish(
        &self,
        mutation_id: MutationId,
        status: MutationStatus,
        note: Option<String>,
    ) -> Result<()>;

    async fn pending_count(&self) -> Result<i64>;
}

/// Dirty marks shared by the mutation consumer (marking) and the sync
/// scheduler (clearing).
#[async_trait::async_trait]
pub trait DirtyStore: Send + Sync {
    /// Idempotent: marking an already dirty key only moves `marked_at`.
    async fn mark(&self, key: &DocumentKey, at: DateTime<Utc>) -> Result<()>;

    /// Marks of `year` with a key strictly greater than `after`, in key order.
    async fn page(
        &self,
        year: i32,
        after: Option<&DocumentKey>,
        limit: usize,
    ) -> Result<Vec<DirtyMark>>;

    /// Removes the mark unless it was marked again after `seen_marked_at`.
    /// Returns whether a mark was removed.
    async fn clear(&self, key: &DocumentKey, seen_marked_at: DateTime<Utc>) -> Result<bool>;
}

#[async_trait::async_trait]
pub trait SyncStatusStore: Send + Sync {
    async fn status(&self, key: &DocumentKey) -> Result<Option<SyncStatus>>;

    /// Starts tracking `key` in the unknown state. No-op when already tracked.
    async fn register(&self, key: &DocumentKey) -> Result<()>;

    async fn save_status(&self, status: &SyncStatus) -> Result<()>;

    /// A tracked document of `year` that was never inspected. Documents
    /// deferred past `now` are skipped.
    async fn next_unknown(&self, year: i32, now: DateTime<Utc>) -> Result<Option<SyncStatus>>;

    /// A document of `year` modified externally after its last inspection.
    async fn next_reinspect(&self, year: i32, now: DateTime<Utc>)
    -> Result<Option<SyncStatus>>;

    /// The inspected document of `year` looked at longest ago, provided that
    /// was before `inspected_before`.
    async fn next_recheck(
        &self,
        year: i32,
        inspected_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Option<SyncStatus>>;

    async fn note_external_change(
        &self,
        key: &DocumentKey,
        at: DateTime<Utc>,
        editor: &str,
    ) -> Result<()>;
}

/// Cross-process exclusion for the single mutation consumer.
#[async_trait::async_trait]
pub trait ConsumerLease: Send + Sync {
    /// Returns false when another consumer holds the lease.
    async fn try_acquire(&self) -> Result<bool>;

    async fn release(&self) -> Result<()>;
}
