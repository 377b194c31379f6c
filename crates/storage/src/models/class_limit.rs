use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::{ChampionshipId, ClassId};

/// Number of athletes admitted to a class when no override exists.
pub const DEFAULT_LIMIT: i32 = 24;

/// Per-class override of the qualification cut.
///
/// Only exists while the cut differs from [`DEFAULT_LIMIT`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct ClassLimit {
    pub championship_id: ChampionshipId,
    pub class_id: ClassId,
    #[sqlx(rename = "cut")]
    pub limit: i32,
}
