use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use validator::Validate;

use crate::error::{Result, StorageError};
use crate::models::{MutationId, MutationRecord, MutationStatus, NewMutation};

#[derive(FromRow)]
struct MutationRow {
    mutation_id: i64,
    kind: String,
    championship_id: i64,
    class_id: Option<i64>,
    athlete_id: Option<i64>,
    old_cut: Option<i32>,
    new_cut: Option<i32>,
    confirm_admitted: bool,
    requested_by: String,
    created_at: DateTime<Utc>,
    status: String,
    note: Option<String>,
    processed_at: Option<DateTime<Utc>>,
}

impl TryFrom<MutationRow> for MutationRecord {
    type Error = StorageError;

    fn try_from(row: MutationRow) -> Result<Self> {
        Ok(MutationRecord {
            mutation_id: row.mutation_id,
            kind: row.kind,
            championship_id: row.championship_id,
            class_id: row.class_id,
            athlete_id: row.athlete_id,
            old_cut: row.old_cut,
            new_cut: row.new_cut,
            confirm_admitted: row.confirm_admitted,
            requested_by: row.requested_by,
            created_at: row.created_at,
            status: row.status.parse()?,
            note: row.note,
            processed_at: row.processed_at,
        })
    }
}

pub struct MutationRepository<'a> {
    pool: &'a PgPool,
}

impl<'a> MutationRepository<'a> {
    pub fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, mutation: NewMutation) -> Result<MutationRecord> {
        mutation.validate()?;

        let row: MutationRow = sqlx::query_as(
            r#"
            INSERT INTO mutations (kind, championship_id, class_id, athlete_id, old_cut, new_cut,
                                   confirm_admitted, requested_by)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING mutation_id, kind, championship_id, class_id, athlete_id, old_cut, new_cut,
                      confirm_admitted, requested_by, created_at, status, note, processed_at
            "#,
        )
        .bind(&mutation.kind)
        .bind(mutation.championship_id)
        .bind(mutation.class_id)
        .bind(mutation.athlete_id)
        .bind(mutation.old_cut)
        .bind(mutation.new_cut)
        .bind(mutation.confirm_admitted)
        .bind(&mutation.requested_by)
        .fetch_one(self.pool)
        .await?;

        MutationRecord::try_from(row)
    }

    pub async fn oldest_pending(&self) -> Result<Option<MutationRecord>> {
        let row: Option<MutationRow> = sqlx::query_as(
            r#"
            SELECT mutation_id, kind, championship_id, class_id, athlete_id, old_cut, new_cut,
                   confirm_admitted, requested_by, created_at, status, note, processed_at
            FROM mutations
            WHERE status = 'pending'
            ORDER BY mutation_id
            LIMIT 1
            "#,
        )
        .fetch_optional(self.pool)
        .await?;

        row.map(MutationRecord::try_from).transpose()
    }

    pub async fn claim(&self, mutation_id: MutationId) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE mutations SET status = 'applying' WHERE mutation_id = $1 AND status = 'pending'",
        )
        .bind(mutation_id)
        .execute(self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn update_status(
        &self,
        mutation_id: MutationId,
        status: MutationStatus,
        note: Option<String>,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE mutations
            SET status = $2, note = $3, processed_at = NOW()
            WHERE mutation_id = $1
            "#,
        )
        .bind(mutation_id)
        .bind(status.as_str())
        .bind(note)
        .execute(self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound);
        }

        Ok(())
    }

    pub async fn count_pending(&self) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM mutations WHERE status = 'pending'",
        )
        .fetch_one(self.pool)
        .await?;

        Ok(count)
    }
}
