//! In-process store used by tests and dry runs.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use validator::Validate;

use crate::error::{Result, StorageError};
use crate::models::{
    AthleteId, Championship, ChampionshipId, ClassId, DEFAULT_LIMIT, DirtyMark, DocumentKey,
    MutationId, MutationRecord, MutationStatus, NewMutation, RosterEntry, SyncStatus,
};
use crate::traits::{ConsumerLease, DirtyStore, MutationLog, RosterStore, SyncStatusStore};

#[derive(Default)]
struct Inner {
    championships: BTreeMap<ChampionshipId, Championship>,
    entries: BTreeMap<(ChampionshipId, AthleteId), RosterEntry>,
    limits: HashMap<(ChampionshipId, ClassId), i32>,
    mutations: Vec<MutationRecord>,
    dirty: BTreeMap<DocumentKey, DateTime<Utc>>,
    statuses: BTreeMap<DocumentKey, SyncStatus>,
}

/// Cloning shares the underlying state.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
    lease_taken: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_championship(&self, championship: Championship) {
        let mut inner = self.inner.lock().await;
        inner
            .championships
            .insert(championship.championship_id, championship);
    }

    pub async fn insert_entries(&self, entries: impl IntoIterator<Item = RosterEntry>) {
        let mut inner = self.inner.lock().await;
        for entry in entries {
            inner
                .entries
                .insert((entry.championship_id, entry.athlete_id), entry);
        }
    }

    pub async fn dirty_marks(&self) -> Vec<DirtyMark> {
        let inner = self.inner.lock().await;
        inner
            .dirty
            .iter()
            .map(|(key, marked_at)| DirtyMark {
                key: key.clone(),
                marked_at: *marked_at,
            })
            .collect()
    }

    pub async fn mutations(&self) -> Vec<MutationRecord> {
        self.inner.lock().await.mutations.clone()
    }

    pub async fn limit_override(
        &self,
        championship_id: ChampionshipId,
        class_id: ClassId,
    ) -> Option<i32> {
        let inner = self.inner.lock().await;
        inner.limits.get(&(championship_id, class_id)).copied()
    }

    /// A lease handle sharing this store's single consumer slot.
    pub fn lease(&self) -> MemoryLease {
        MemoryLease {
            taken: Arc::clone(&self.lease_taken),
            mine: AtomicBool::new(false),
        }
    }
}

#[async_trait::async_trait]
impl RosterStore for MemoryStore {
    async fn championship(&self, championship_id: ChampionshipId) -> Result<Championship> {
        let inner = self.inner.lock().await;
        inner
            .championships
            .get(&championship_id)
            .cloned()
            .ok_or(StorageError::NotFound)
    }

    async fn find_championship(
        &self,
        year: i32,
        discipline: i16,
        is_final_stage: bool,
        zone: Option<i16>,
    ) -> Result<Option<Championship>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .championships
            .values()
            .find(|c| {
                c.year == year
                    && c.discipline == discipline
                    && c.is_final_stage == is_final_stage
                    && c.zone == zone
            })
            .cloned())
    }

    async fn class_ids(&self, championship_id: ChampionshipId) -> Result<Vec<ClassId>> {
        let inner = self.inner.lock().await;
        let mut class_ids: Vec<ClassId> = inner
            .entries
            .values()
            .filter(|e| e.championship_id == championship_id)
            .map(|e| e.class_id)
            .collect();
        class_ids.sort_unstable();
        class_ids.dedup();
        Ok(class_ids)
    }

    async fn load_class(
        &self,
        championship_id: ChampionshipId,
        class_id: ClassId,
    ) -> Result<Vec<RosterEntry>> {
        let inner = self.inner.lock().await;
        let mut entries: Vec<RosterEntry> = inner
            .entries
            .values()
            .filter(|e| e.championship_id == championship_id && e.class_id == class_id)
            .cloned()
            .collect();
        entries.sort_by_key(|e| (e.sequence, e.athlete_id));
        Ok(entries)
    }

    async fn load_entry(
        &self,
        championship_id: ChampionshipId,
        athlete_id: AthleteId,
    ) -> Result<RosterEntry> {
        let inner = self.inner.lock().await;
        inner
            .entries
            .get(&(championship_id, athlete_id))
            .cloned()
            .ok_or(StorageError::NotFound)
    }

    async fn save(&self, entries: &[RosterEntry]) -> Result<()> {
        let mut inner = self.inner.lock().await;
        for entry in entries {
            inner
                .entries
                .insert((entry.championship_id, entry.athlete_id), entry.clone());
        }
        Ok(())
    }

    async fn load_limit(&self, championship_id: ChampionshipId, class_id: ClassId) -> Result<i32> {
        let inner = self.inner.lock().await;
        Ok(inner
            .limits
            .get(&(championship_id, class_id))
            .copied()
            .unwrap_or(DEFAULT_LIMIT))
    }

    async fn set_limit(
        &self,
        championship_id: ChampionshipId,
        class_id: ClassId,
        limit: i32,
    ) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.limits.insert((championship_id, class_id), limit);
        Ok(())
    }

    async fn clear_limit(&self, championship_id: ChampionshipId, class_id: ClassId) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.limits.remove(&(championship_id, class_id));
        Ok(())
    }
}

#[async_trait::async_trait]
impl MutationLog for MemoryStore {
    async fn append(&self, mutation: NewMutation) -> Result<MutationRecord> {
        mutation.validate()?;

        let mut inner = self.inner.lock().await;
        let mutation_id = inner.mutations.len() as MutationId + 1;
        let record = MutationRecord::from_new(mutation_id, mutation, Utc::now());
        inner.mutations.push(record.clone());
        Ok(record)
    }

    async fn next_pending(&self) -> Result<Option<MutationRecord>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .mutations
            .iter()
            .find(|m| m.status == MutationStatus::Pending)
            .cloned())
    }

    async fn claim(&self, mutation_id: MutationId) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        match inner
            .mutations
            .iter_mut()
            .find(|m| m.mutation_id == mutation_id && m.status == MutationStatus::Pending)
        {
            Some(record) => {
                record.status = MutationStatus::Applying;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn finish(
        &self,
        mutation_id: MutationId,
        status: MutationStatus,
        note: Option<String>,
    ) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let record = inner
            .mutations
            .iter_mut()
            .find(|m| m.mutation_id == mutation_id)
            .ok_or(StorageError::NotFound)?;
        record.status = status;
        record.note = note;
        record.processed_at = Some(Utc::now());
        Ok(())
    }

    async fn pending_count(&self) -> Result<i64> {
        let inner = self.inner.lock().await;
        Ok(inner
            .mutations
            .iter()
            .filter(|m| m.status == MutationStatus::Pending)
            .count() as i64)
    }
}

#[async_trait::async_trait]
impl DirtyStore for MemoryStore {
    async fn mark(&self, key: &DocumentKey, at: DateTime<Utc>) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let marked_at = inner.dirty.entry(key.clone()).or_insert(at);
        if at > *marked_at {
            *marked_at = at;
        }
        Ok(())
    }

    async fn page(
        &self,
        year: i32,
        after: Option<&DocumentKey>,
        limit: usize,
    ) -> Result<Vec<DirtyMark>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .dirty
            .iter()
            .filter(|(key, _)| key.year == year)
            .filter(|(key, _)| after.is_none_or(|after| *key > after))
            .take(limit)
            .map(|(key, marked_at)| DirtyMark {
                key: key.clone(),
                marked_at: *marked_at,
            })
            .collect())
    }

    async fn clear(&self, key: &DocumentKey, seen_marked_at: DateTime<Utc>) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        match inner.dirty.get(key) {
            Some(marked_at) if *marked_at <= seen_marked_at => {
                inner.dirty.remove(key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[async_trait::async_trait]
impl SyncStatusStore for MemoryStore {
    async fn status(&self, key: &DocumentKey) -> Result<Option<SyncStatus>> {
        Ok(self.inner.lock().await.statuses.get(key).cloned())
    }

    async fn register(&self, key: &DocumentKey) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner
            .statuses
            .entry(key.clone())
            .or_insert_with(|| SyncStatus::unknown(key.clone()));
        Ok(())
    }

    async fn save_status(&self, status: &SyncStatus) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.statuses.insert(status.key.clone(), status.clone());
        Ok(())
    }

    async fn next_unknown(&self, year: i32, now: DateTime<Utc>) -> Result<Option<SyncStatus>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .statuses
            .values()
            .find(|s| s.key.year == year && s.inspected_at.is_none() && !s.is_deferred(now))
            .cloned())
    }

    async fn next_reinspect(
        &self,
        year: i32,
        now: DateTime<Utc>,
    ) -> Result<Option<SyncStatus>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .statuses
            .values()
            .filter(|s| s.key.year == year && s.needs_reinspection() && !s.is_deferred(now))
            .min_by_key(|s| s.external_modified_at)
            .cloned())
    }

    async fn next_recheck(
        &self,
        year: i32,
        inspected_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Option<SyncStatus>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .statuses
            .values()
            .filter(|s| s.key.year == year && !s.is_deferred(now))
            .filter(|s| s.inspected_at.is_some_and(|at| at <= inspected_before))
            .min_by_key(|s| s.inspected_at)
            .cloned())
    }

    async fn note_external_change(
        &self,
        key: &DocumentKey,
        at: DateTime<Utc>,
        editor: &str,
    ) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if let Some(status) = inner.statuses.get_mut(key) {
            if status.external_modified_at.is_none_or(|known| at > known) {
                status.external_modified_at = Some(at);
            }
            status.external_editor = Some(editor.to_string());
        }
        Ok(())
    }
}

pub struct MemoryLease {
    taken: Arc<AtomicBool>,
    mine: AtomicBool,
}

#[async_trait::async_trait]
impl ConsumerLease for MemoryLease {
    async fn try_acquire(&self) -> Result<bool> {
        if self.mine.load(Ordering::SeqCst) {
            return Ok(true);
        }
        let acquired = self
            .taken
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();
        self.mine.store(acquired, Ordering::SeqCst);
        Ok(acquired)
    }

    async fn release(&self) -> Result<()> {
        if self.mine.swap(false, Ordering::SeqCst) {
            self.taken.store(false, Ordering::SeqCst);
        }
        Ok(())
    }
}
