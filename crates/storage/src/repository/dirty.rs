use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};

use crate::error::Result;
use crate::models::{DirtyMark, DocumentKey};

/// Stored zone for documents without one (final stage).
pub(crate) const NO_ZONE: i16 = 0;

pub(crate) fn zone_column(key: &DocumentKey) -> i16 {
    key.zone.unwrap_or(NO_ZONE)
}

pub(crate) fn zone_from_column(zone: i16) -> Option<i16> {
    (zone != NO_ZONE).then_some(zone)
}

#[derive(FromRow)]
struct DirtyRow {
    year: i32,
    discipline: i16,
    is_final_stage: bool,
    is_team: bool,
    zone: i16,
    class_id: i64,
    marked_at: DateTime<Utc>,
}

impl From<DirtyRow> for DirtyMark {
    fn from(row: DirtyRow) -> Self {
        DirtyMark {
            key: DocumentKey {
                year: row.year,
                discipline: row.discipline,
                is_final_stage: row.is_final_stage,
                is_team: row.is_team,
                zone: zone_from_column(row.zone),
                class_id: row.class_id,
            },
            marked_at: row.marked_at,
        }
    }
}

pub struct DirtyRepository<'a> {
    pool: &'a PgPool,
}

impl<'a> DirtyRepository<'a> {
    pub fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    pub async fn upsert_mark(&self, key: &DocumentKey, at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO dirty_marks (year, discipline, is_final_stage, is_team, zone, class_id, marked_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (year, discipline, is_final_stage, is_team, zone, class_id)
            DO UPDATE SET marked_at = GREATEST(dirty_marks.marked_at, EXCLUDED.marked_at)
            "#,
        )
        .bind(key.year)
        .bind(key.discipline)
        .bind(key.is_final_stage)
        .bind(key.is_team)
        .bind(zone_column(key))
        .bind(key.class_id)
        .bind(at)
        .execute(self.pool)
        .await?;

        Ok(())
    }

    pub async fn list_after(
        &self,
        year: i32,
        after: Option<&DocumentKey>,
        limit: usize,
    ) -> Result<Vec<DirtyMark>> {
        let limit = limit as i64;

        let rows: Vec<DirtyRow> = match after {
            Some(key) => {
                sqlx::query_as(
                    r#"
                    SELECT year, discipline, is_final_stage, is_team, zone, class_id, marked_at
                    FROM dirty_marks
                    WHERE year = $1
                      AND (discipline, is_final_stage, is_team, zone, class_id) > ($2, $3, $4, $5, $6)
                    ORDER BY discipline, is_final_stage, is_team, zone, class_id
                    LIMIT $7
                    "#,
                )
                .bind(year)
                .bind(key.discipline)
                .bind(key.is_final_stage)
                .bind(key.is_team)
                .bind(zone_column(key))
                .bind(key.class_id)
                .bind(limit)
                .fetch_all(self.pool)
                .await?
            }
            None => {
                sqlx::query_as(
                    r#"
                    SELECT year, discipline, is_final_stage, is_team, zone, class_id, marked_at
                    FROM dirty_marks
                    WHERE year = $1
                    ORDER BY discipline, is_final_stage, is_team, zone, class_id
                    LIMIT $2
                    "#,
                )
                .bind(year)
                .bind(limit)
                .fetch_all(self.pool)
                .await?
            }
        };

        Ok(rows.into_iter().map(DirtyMark::from).collect())
    }

    pub async fn delete_if_unchanged(
        &self,
        key: &DocumentKey,
        seen_marked_at: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            DELETE FROM dirty_marks
            WHERE year = $1 AND discipline = $2 AND is_final_stage = $3
              AND is_team = $4 AND zone = $5 AND class_id = $6
              AND marked_at <= $7
            "#,
        )
        .bind(key.year)
        .bind(key.discipline)
        .bind(key.is_final_stage)
        .bind(key.is_team)
        .bind(zone_column(key))
        .bind(key.class_id)
        .bind(seen_marked_at)
        .execute(self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}
