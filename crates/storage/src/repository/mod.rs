pub mod dirty;
pub mod lease;
pub mod mutation;
pub mod roster;
pub mod sync_status;

use chrono::{DateTime, Utc};

pub use dirty::DirtyRepository;
pub use lease::PgConsumerLease;
pub use mutation::MutationRepository;
pub use roster::RosterRepository;
pub use sync_status::SyncStatusRepository;

use crate::Database;
use crate::error::Result;
use crate::models::{
    AthleteId, Championship, ChampionshipId, ClassId, DirtyMark, DocumentKey, MutationId,
    MutationRecord, MutationStatus, NewMutation, RosterEntry, SyncStatus,
};
use crate::traits::{DirtyStore, MutationLog, RosterStore, SyncStatusStore};

#[async_trait::async_trait]
impl RosterStore for Database {
    async fn championship(&self, championship_id: ChampionshipId) -> Result<Championship> {
        RosterRepository::new(self.pool())
            .get_championship(championship_id)
            .await
    }

    async fn find_championship(
        &self,
        year: i32,
        discipline: i16,
        is_final_stage: bool,
        zone: Option<i16>,
    ) -> Result<Option<Championship>> {
        RosterRepository::new(self.pool())
            .find_championship(year, discipline, is_final_stage, zone)
            .await
    }

    async fn class_ids(&self, championship_id: ChampionshipId) -> Result<Vec<ClassId>> {
        RosterRepository::new(self.pool())
            .list_class_ids(championship_id)
            .await
    }

    async fn load_class(
        &self,
        championship_id: ChampionshipId,
        class_id: ClassId,
    ) -> Result<Vec<RosterEntry>> {
        RosterRepository::new(self.pool())
            .list_class_entries(championship_id, class_id)
            .await
    }

    async fn load_entry(
        &self,
        championship_id: ChampionshipId,
        athlete_id: AthleteId,
    ) -> Result<RosterEntry> {
        RosterRepository::new(self.pool())
            .get_entry(championship_id, athlete_id)
            .await
    }

    async fn save(&self, entries: &[RosterEntry]) -> Result<()> {
        RosterRepository::new(self.pool())
            .upsert_entries(entries)
            .await
    }

    async fn load_limit(&self, championship_id: ChampionshipId, class_id: ClassId) -> Result<i32> {
        RosterRepository::new(self.pool())
            .get_limit(championship_id, class_id)
            .await
    }

    async fn set_limit(
        &self,
        championship_id: ChampionshipId,
        class_id: ClassId,
        limit: i32,
    ) -> Result<()> {
        RosterRepository::new(self.pool())
            .upsert_limit(championship_id, class_id, limit)
            .await
    }

    async fn clear_limit(&self, championship_id: ChampionshipId, class_id: ClassId) -> Result<()> {
        RosterRepository::new(self.pool())
            .delete_limit(championship_id, class_id)
            .await
    }
}

#[async_trait::async_trait]
impl MutationLog for Database {
    async fn append(&self, mutation: NewMutation) -> Result<MutationRecord> {
        MutationRepository::new(self.pool()).insert(mutation).await
    }

    async fn next_pending(&self) -> Result<Option<MutationRecord>> {
        MutationRepository::new(self.pool()).oldest_pending().await
    }

    async fn claim(&self, mutation_id: MutationId) -> Result<bool> {
        MutationRepository::new(self.pool()).claim(mutation_id).await
    }

    async fn finish(
        &self,
        mutation_id: MutationId,
        status: MutationStatus,
        note: Option<String>,
    ) -> Result<()> {
        MutationRepository::new(self.pool())
            .update_status(mutation_id, status, note)
            .await
    }

    async fn pending_count(&self) -> Result<i64> {
        MutationRepository::new(self.pool()).count_pending().await
    }
}

#[async_trait::async_trait]
impl DirtyStore for Database {
    async fn mark(&self, key: &DocumentKey, at: DateTime<Utc>) -> Result<()> {
        DirtyRepository::new(self.pool()).upsert_mark(key, at).await
    }

    async fn page(
        &self,
        year: i32,
        after: Option<&DocumentKey>,
        limit: usize,
    ) -> Result<Vec<DirtyMark>> {
        DirtyRepository::new(self.pool())
            .list_after(year, after, limit)
            .await
    }

    async fn clear(&self, key: &DocumentKey, seen_marked_at: DateTime<Utc>) -> Result<bool> {
        DirtyRepository::new(self.pool())
            .delete_if_unchanged(key, seen_marked_at)
            .await
    }
}

#[async_trait::async_trait]
impl SyncStatusStore for Database {
    async fn status(&self, key: &DocumentKey) -> Result<Option<SyncStatus>> {
        SyncStatusRepository::new(self.pool()).get(key).await
    }

    async fn register(&self, key: &DocumentKey) -> Result<()> {
        SyncStatusRepository::new(self.pool())
            .insert_unknown(key)
            .await
    }

    async fn save_status(&self, status: &SyncStatus) -> Result<()> {
        SyncStatusRepository::new(self.pool()).upsert(status).await
    }

    async fn next_unknown(&self, year: i32, now: DateTime<Utc>) -> Result<Option<SyncStatus>> {
        SyncStatusRepository::new(self.pool())
            .first_uninspected(year, now)
            .await
    }

    async fn next_reinspect(
        &self,
        year: i32,
        now: DateTime<Utc>,
    ) -> Result<Option<SyncStatus>> {
        SyncStatusRepository::new(self.pool())
            .first_modified_since_inspection(year, now)
            .await
    }

    async fn next_recheck(
        &self,
        year: i32,
        inspected_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Option<SyncStatus>> {
        SyncStatusRepository::new(self.pool())
            .least_recently_inspected(year, inspected_before, now)
            .await
    }

    async fn note_external_change(
        &self,
        key: &DocumentKey,
        at: DateTime<Utc>,
        editor: &str,
    ) -> Result<()> {
        SyncStatusRepository::new(self.pool())
            .record_external_change(key, at, editor)
            .await
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::traits::ConsumerLease;

    async fn database() -> Database {
        let url = std::env::var("DATABASE_URL").unwrap();
        let db = Database::new(&url).await.unwrap();
        db.run_migrations().await.unwrap();
        db
    }

    fn key(class_id: ClassId) -> DocumentKey {
        DocumentKey {
            year: 1999,
            discipline: 99,
            is_final_stage: false,
            is_team: false,
            zone: None,
            class_id,
        }
    }

    #[tokio::test]
    #[ignore] // Only run against a live database
    async fn test_clear_skips_mark_renewed_after_render() {
        let db = database().await;
        let key = key(1);
        db.clear(&key, Utc::now() + Duration::days(1)).await.unwrap();

        let first = Utc::now() - Duration::seconds(10);
        db.mark(&key, first).await.unwrap();
        let seen = db.page(1999, None, 10).await.unwrap();
        assert_eq!(seen.len(), 1);

        db.mark(&key, Utc::now()).await.unwrap();
        assert!(!db.clear(&key, seen[0].marked_at).await.unwrap());

        let renewed = db.page(1999, None, 10).await.unwrap();
        assert!(db.clear(&key, renewed[0].marked_at).await.unwrap());
        assert!(db.page(1999, None, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    #[ignore] // Only run against a live database
    async fn test_advisory_lease_admits_one_consumer() {
        let db = database().await;
        let first = PgConsumerLease::new(db.pool().clone(), 9_999_001);
        let second = PgConsumerLease::new(db.pool().clone(), 9_999_001);

        assert!(first.try_acquire().await.unwrap());
        assert!(!second.try_acquire().await.unwrap());

        first.release().await.unwrap();
        assert!(second.try_acquire().await.unwrap());
        second.release().await.unwrap();
    }

    #[tokio::test]
    #[ignore] // Only run against a live database
    async fn test_claimed_mutation_is_not_pending_again() {
        let db = database().await;
        let record = db
            .append(NewMutation::new("mark_dirty_documents", 1, "test"))
            .await
            .unwrap();

        assert!(db.claim(record.mutation_id).await.unwrap());
        assert!(!db.claim(record.mutation_id).await.unwrap());
        let next = db.next_pending().await.unwrap();
        assert!(next.is_none_or(|m| m.mutation_id != record.mutation_id));

        db.finish(record.mutation_id, MutationStatus::Done, None)
            .await
            .unwrap();
    }

    #[tokio::test]
    #[ignore] // Only run against a live database
    async fn test_deferred_document_is_skipped_until_retry_time() {
        let db = database().await;
        let key = key(2);
        let mut status = SyncStatus::unknown(key.clone());
        status.retry_at = Some(Utc::now() + Duration::minutes(1));
        db.save_status(&status).await.unwrap();

        let now = Utc::now();
        let next = db.next_unknown(1999, now).await.unwrap();
        assert!(next.is_none_or(|s| s.key != key));

        let later = now + Duration::minutes(2);
        let next = db.next_unknown(1999, later).await.unwrap();
        assert!(next.is_some_and(|s| s.key == key));

        status.retry_at = None;
        status.inspected_at = Some(now);
        db.save_status(&status).await.unwrap();
    }
}
