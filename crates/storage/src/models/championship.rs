use serde::{Deserialize, Serialize};
use sqlx::FromRow;

pub type ChampionshipId = i64;
pub type ClassId = i64;
pub type AthleteId = i64;

/// One championship of a competition year.
///
/// The zonal first round is held once per zone; the final stage is national
/// and has no zone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Championship {
    pub championship_id: ChampionshipId,
    pub year: i32,
    pub discipline: i16,
    pub is_final_stage: bool,
    pub zone: Option<i16>,
}
