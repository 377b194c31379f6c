use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};

use super::dirty::{zone_column, zone_from_column};
use crate::error::{Result, StorageError};
use crate::models::{DocumentKey, SyncStatus};

#[derive(FromRow)]
struct SyncStatusRow {
    year: i32,
    discipline: i16,
    is_final_stage: bool,
    is_team: bool,
    zone: i16,
    class_id: i64,
    state: String,
    external_modified_at: Option<DateTime<Utc>>,
    external_editor: Option<String>,
    inspected_at: Option<DateTime<Utc>>,
    rendered_at: Option<DateTime<Utc>>,
    retry_at: Option<DateTime<Utc>>,
    phase: String,
    has_scores: bool,
    is_complete: bool,
    log: String,
}

impl TryFrom<SyncStatusRow> for SyncStatus {
    type Error = StorageError;

    fn try_from(row: SyncStatusRow) -> Result<Self> {
        Ok(SyncStatus {
            key: DocumentKey {
                year: row.year,
                discipline: row.discipline,
                is_final_stage: row.is_final_stage,
                is_team: row.is_team,
                zone: zone_from_column(row.zone),
                class_id: row.class_id,
            },
            state: row.state.parse()?,
            external_modified_at: row.external_modified_at,
            external_editor: row.external_editor,
            inspected_at: row.inspected_at,
            rendered_at: row.rendered_at,
            retry_at: row.retry_at,
            phase: row.phase,
            has_scores: row.has_scores,
            is_complete: row.is_complete,
            log: row.log,
        })
    }
}

const STATUS_COLUMNS: &str = r#"
    year, discipline, is_final_stage, is_team, zone, class_id, state,
    external_modified_at, external_editor, inspected_at, rendered_at, retry_at,
    phase, has_scores, is_complete, log
"#;

pub struct SyncStatusRepository<'a> {
    pool: &'a PgPool,
}

impl<'a> SyncStatusRepository<'a> {
    pub fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, key: &DocumentKey) -> Result<Option<SyncStatus>> {
        let query = format!(
            "SELECT {} FROM sync_statuses \
             WHERE year = $1 AND discipline = $2 AND is_final_stage = $3 \
               AND is_team = $4 AND zone = $5 AND class_id = $6",
            STATUS_COLUMNS
        );

        let row: Option<SyncStatusRow> = sqlx::query_as(&query)
            .bind(key.year)
            .bind(key.discipline)
            .bind(key.is_final_stage)
            .bind(key.is_team)
            .bind(zone_column(key))
            .bind(key.class_id)
            .fetch_optional(self.pool)
            .await?;

        row.map(SyncStatus::try_from).transpose()
    }

    pub async fn insert_unknown(&self, key: &DocumentKey) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sync_statuses (year, discipline, is_final_stage, is_team, zone, class_id)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(key.year)
        .bind(key.discipline)
        .bind(key.is_final_stage)
        .bind(key.is_team)
        .bind(zone_column(key))
        .bind(key.class_id)
        .execute(self.pool)
        .await?;

        Ok(())
    }

    pub async fn upsert(&self, status: &SyncStatus) -> Result<()> {
        let key = &status.key;
        sqlx::query(
            r#"
            INSERT INTO sync_statuses (year, discipline, is_final_stage, is_team, zone, class_id,
                                       state, external_modified_at, external_editor, inspected_at,
                                       rendered_at, retry_at, phase, has_scores, is_complete, log)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            ON CONFLICT (year, discipline, is_final_stage, is_team, zone, class_id)
            DO UPDATE SET
                state = EXCLUDED.state,
                external_modified_at = EXCLUDED.external_modified_at,
                external_editor = EXCLUDED.external_editor,
                inspected_at = EXCLUDED.inspected_at,
                rendered_at = EXCLUDED.rendered_at,
                retry_at = EXCLUDED.retry_at,
                phase = EXCLUDED.phase,
                has_scores = EXCLUDED.has_scores,
                is_complete = EXCLUDED.is_complete,
                log = EXCLUDED.log
            "#,
        )
        .bind(key.year)
        .bind(key.discipline)
        .bind(key.is_final_stage)
        .bind(key.is_team)
        .bind(zone_column(key))
        .bind(key.class_id)
        .bind(status.state.as_str())
        .bind(status.external_modified_at)
        .bind(&status.external_editor)
        .bind(status.inspected_at)
        .bind(status.rendered_at)
        .bind(status.retry_at)
        .bind(&status.phase)
        .bind(status.has_scores)
        .bind(status.is_complete)
        .bind(&status.log)
        .execute(self.pool)
        .await?;

        Ok(())
    }

    pub async fn first_uninspected(
        &self,
        year: i32,
        now: DateTime<Utc>,
    ) -> Result<Option<SyncStatus>> {
        let query = format!(
            "SELECT {} FROM sync_statuses \
             WHERE year = $1 AND inspected_at IS NULL \
               AND (retry_at IS NULL OR retry_at <= $2) \
             ORDER BY discipline, is_final_stage, is_team, zone, class_id \
             LIMIT 1",
            STATUS_COLUMNS
        );

        let row: Option<SyncStatusRow> = sqlx::query_as(&query)
            .bind(year)
            .bind(now)
            .fetch_optional(self.pool)
            .await?;

        row.map(SyncStatus::try_from).transpose()
    }

    pub async fn first_modified_since_inspection(
        &self,
        year: i32,
        now: DateTime<Utc>,
    ) -> Result<Option<SyncStatus>> {
        let query = format!(
            "SELECT {} FROM sync_statuses \
             WHERE year = $1 AND inspected_at IS NOT NULL \
               AND external_modified_at > inspected_at \
               AND (retry_at IS NULL OR retry_at <= $2) \
             ORDER BY external_modified_at \
             LIMIT 1",
            STATUS_COLUMNS
        );

        let row: Option<SyncStatusRow> = sqlx::query_as(&query)
            .bind(year)
            .bind(now)
            .fetch_optional(self.pool)
            .await?;

        row.map(SyncStatus::try_from).transpose()
    }

    pub async fn least_recently_inspected(
        &self,
        year: i32,
        inspected_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Option<SyncStatus>> {
        let query = format!(
            "SELECT {} FROM sync_statuses \
             WHERE year = $1 AND inspected_at <= $2 \
               AND (retry_at IS NULL OR retry_at <= $3) \
             ORDER BY inspected_at \
             LIMIT 1",
            STATUS_COLUMNS
        );

        let row: Option<SyncStatusRow> = sqlx::query_as(&query)
            .bind(year)
            .bind(inspected_before)
            .bind(now)
            .fetch_optional(self.pool)
            .await?;

        row.map(SyncStatus::try_from).transpose()
    }

    pub async fn record_external_change(
        &self,
        key: &DocumentKey,
        at: DateTime<Utc>,
        editor: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE sync_statuses
            SET external_modified_at = GREATEST(external_modified_at, $7),
                external_editor = $8
            WHERE year = $1 AND discipline = $2 AND is_final_stage = $3
              AND is_team = $4 AND zone = $5 AND class_id = $6
            "#,
        )
        .bind(key.year)
        .bind(key.discipline)
        .bind(key.is_final_stage)
        .bind(key.is_team)
        .bind(zone_column(key))
        .bind(key.class_id)
        .bind(at)
        .bind(editor)
        .execute(self.pool)
        .await?;

        Ok(())
    }
}
