use rust_decimal::Decimal;
use sqlx::{FromRow, PgPool};

use crate::error::{Result, StorageError};
use crate::models::{
    AthleteId, Championship, ChampionshipId, ClassId, ClassLimit, DEFAULT_LIMIT, RosterEntry,
};

#[derive(FromRow)]
struct RosterRow {
    championship_id: i64,
    class_id: i64,
    athlete_id: i64,
    average: Decimal,
    secondary_average: Decimal,
    participation: String,
    rank: i32,
    sequence: i32,
    is_champion: bool,
    log: String,
}

impl TryFrom<RosterRow> for RosterEntry {
    type Error = StorageError;

    fn try_from(row: RosterRow) -> Result<Self> {
        Ok(RosterEntry {
            championship_id: row.championship_id,
            class_id: row.class_id,
            athlete_id: row.athlete_id,
            average: row.average,
            secondary_average: row.secondary_average,
            participation: row.participation.parse()?,
            rank: row.rank,
            sequence: row.sequence,
            is_champion: row.is_champion,
            log: row.log,
        })
    }
}

const ROSTER_COLUMNS: &str = r#"
    championship_id, class_id, athlete_id, average, secondary_average,
    participation, rank, sequence, is_champion, log
"#;

pub struct RosterRepository<'a> {
    pool: &'a PgPool,
}

impl<'a> RosterRepository<'a> {
    pub fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    pub async fn get_championship(&self, championship_id: ChampionshipId) -> Result<Championship> {
        let championship = sqlx::query_as::<_, Championship>(
            r#"
            SELECT championship_id, year, discipline, is_final_stage, zone
            FROM championships
            WHERE championship_id = $1
            "#,
        )
        .bind(championship_id)
        .fetch_optional(self.pool)
        .await?
        .ok_or(StorageError::NotFound)?;

        Ok(championship)
    }

    pub async fn find_championship(
        &self,
        year: i32,
        discipline: i16,
        is_final_stage: bool,
        zone: Option<i16>,
    ) -> Result<Option<Championship>> {
        let championship = sqlx::query_as::<_, Championship>(
            r#"
            SELECT championship_id, year, discipline, is_final_stage, zone
            FROM championships
            WHERE year = $1
              AND discipline = $2
              AND is_final_stage = $3
              AND zone IS NOT DISTINCT FROM $4
            LIMIT 1
            "#,
        )
        .bind(year)
        .bind(discipline)
        .bind(is_final_stage)
        .bind(zone)
        .fetch_optional(self.pool)
        .await?;

        Ok(championship)
    }

    pub async fn list_class_ids(&self, championship_id: ChampionshipId) -> Result<Vec<ClassId>> {
        let class_ids = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT DISTINCT class_id
            FROM roster_entries
            WHERE championship_id = $1
            ORDER BY class_id
            "#,
        )
        .bind(championship_id)
        .fetch_all(self.pool)
        .await?;

        Ok(class_ids)
    }

    pub async fn list_class_entries(
        &self,
        championship_id: ChampionshipId,
        class_id: ClassId,
    ) -> Result<Vec<RosterEntry>> {
        let query = format!(
            "SELECT {} FROM roster_entries \
             WHERE championship_id = $1 AND class_id = $2 \
             ORDER BY sequence, athlete_id",
            ROSTER_COLUMNS
        );

        let rows: Vec<RosterRow> = sqlx::query_as(&query)
            .bind(championship_id)
            .bind(class_id)
            .fetch_all(self.pool)
            .await?;

        rows.into_iter().map(RosterEntry::try_from).collect()
    }

    pub async fn get_entry(
        &self,
        championship_id: ChampionshipId,
        athlete_id: AthleteId,
    ) -> Result<RosterEntry> {
        let query = format!(
            "SELECT {} FROM roster_entries WHERE championship_id = $1 AND athlete_id = $2",
            ROSTER_COLUMNS
        );

        let row: RosterRow = sqlx::query_as(&query)
            .bind(championship_id)
            .bind(athlete_id)
            .fetch_optional(self.pool)
            .await?
            .ok_or(StorageError::NotFound)?;

        RosterEntry::try_from(row)
    }

    pub async fn upsert_entries(&self, entries: &[RosterEntry]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for entry in entries {
            sqlx::query(
                r#"
                INSERT INTO roster_entries (championship_id, class_id, athlete_id, average,
                                            secondary_average, participation, rank, sequence,
                                            is_champion, log)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                ON CONFLICT (championship_id, athlete_id)
                DO UPDATE SET
                    class_id = EXCLUDED.class_id,
                    average = EXCLUDED.average,
                    secondary_average = EXCLUDED.secondary_average,
                    participation = EXCLUDED.participation,
                    rank = EXCLUDED.rank,
                    sequence = EXCLUDED.sequence,
                    is_champion = EXCLUDED.is_champion,
                    log = EXCLUDED.log
                "#,
            )
            .bind(entry.championship_id)
            .bind(entry.class_id)
            .bind(entry.athlete_id)
            .bind(entry.average)
            .bind(entry.secondary_average)
            .bind(entry.participation.as_str())
            .bind(entry.rank)
            .bind(entry.sequence)
            .bind(entry.is_champion)
            .bind(&entry.log)
            .execute(&mut *tx)
            .await
            .map_err(|e| constraint_error(e, entry))?;
        }

        tx.commit().await?;
        Ok(())
    }

    pub async fn get_limit(&self, championship_id: ChampionshipId, class_id: ClassId) -> Result<i32> {
        let limit = sqlx::query_as::<_, ClassLimit>(
            r#"
            SELECT championship_id, class_id, cut
            FROM class_limits
            WHERE championship_id = $1 AND class_id = $2
            "#,
        )
        .bind(championship_id)
        .bind(class_id)
        .fetch_optional(self.pool)
        .await?;

        Ok(limit.map_or(DEFAULT_LIMIT, |l| l.limit))
    }

    pub async fn upsert_limit(
        &self,
        championship_id: ChampionshipId,
        class_id: ClassId,
        limit: i32,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO class_limits (championship_id, class_id, cut)
            VALUES ($1, $2, $3)
            ON CONFLICT (championship_id, class_id)
            DO UPDATE SET cut = EXCLUDED.cut
            "#,
        )
        .bind(championship_id)
        .bind(class_id)
        .bind(limit)
        .execute(self.pool)
        .await?;

        Ok(())
    }

    pub async fn delete_limit(&self, championship_id: ChampionshipId, class_id: ClassId) -> Result<()> {
        sqlx::query("DELETE FROM class_limits WHERE championship_id = $1 AND class_id = $2")
            .bind(championship_id)
            .bind(class_id)
            .execute(self.pool)
            .await?;

        Ok(())
    }
}

fn constraint_error(err: sqlx::Error, entry: &RosterEntry) -> StorageError {
    let err = StorageError::from(err);
    if err.is_foreign_key_violation() {
        StorageError::ConstraintViolation(format!(
            "athlete {}: championship {} does not exist",
            entry.athlete_id, entry.championship_id
        ))
    } else if err.is_unique_violation() {
        StorageError::ConstraintViolation(format!(
            "athlete {} saved twice in championship {}",
            entry.athlete_id, entry.championship_id
        ))
    } else {
        err
    }
}
