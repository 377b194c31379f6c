use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::{AthleteId, ChampionshipId, ClassId};
use crate::error::StorageError;

pub type MutationId = i64;

/// Processing state of a queued mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MutationStatus {
    Pending,
    /// Claimed by the consumer. A record stuck here was interrupted mid-apply
    /// and is never picked up again.
    Applying,
    Done,
    Failed,
    /// The consumer did not recognise the kind; left for an operator.
    Unrecognized,
}

impl MutationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Applying => "applying",
            Self::Done => "done",
            Self::Failed => "failed",
            Self::Unrecognized => "unrecognized",
        }
    }
}

impl fmt::Display for MutationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MutationStatus {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "applying" => Ok(Self::Applying),
            "done" => Ok(Self::Done),
            "failed" => Ok(Self::Failed),
            "unrecognized" => Ok(Self::Unrecognized),
            other => Err(StorageError::Corrupt(format!(
                "unknown mutation status '{}'",
                other
            ))),
        }
    }
}

/// An intent as submitted by a producer, before it is given an id.
///
/// `kind` is kept as its stored code so that producers running an older or
/// newer build can still append; the consumer decides whether it knows it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct NewMutation {
    #[validate(length(min = 1, message = "kind is required"))]
    pub kind: String,
    pub championship_id: ChampionshipId,
    pub class_id: Option<ClassId>,
    pub athlete_id: Option<AthleteId>,
    #[validate(range(min = 1, message = "old cut must be >= 1"))]
    pub old_cut: Option<i32>,
    #[validate(range(min = 1, message = "new cut must be >= 1"))]
    pub new_cut: Option<i32>,
    #[serde(default)]
    pub confirm_admitted: bool,
    #[validate(length(min = 1, message = "requested_by is required"))]
    pub requested_by: String,
}

impl NewMutation {
    pub fn new(
        kind: impl Into<String>,
        championship_id: ChampionshipId,
        requested_by: impl Into<String>,
    ) -> Self {
        Self {
            kind: kind.into(),
            championship_id,
            class_id: None,
            athlete_id: None,
            old_cut: None,
            new_cut: None,
            confirm_admitted: false,
            requested_by: requested_by.into(),
        }
    }

    pub fn with_class(mut self, class_id: ClassId) -> Self {
        self.class_id = Some(class_id);
        self
    }

    pub fn with_athlete(mut self, athlete_id: AthleteId) -> Self {
        self.athlete_id = Some(athlete_id);
        self
    }

    pub fn with_cuts(mut self, old_cut: i32, new_cut: i32) -> Self {
        self.old_cut = Some(old_cut);
        self.new_cut = Some(new_cut);
        self
    }

    pub fn confirming_admitted(mut self) -> Self {
        self.confirm_admitted = true;
        self
    }
}

/// A persisted intent. Never modified after creation apart from its
/// processing state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationRecord {
    pub mutation_id: MutationId,
    pub kind: String,
    pub championship_id: ChampionshipId,
    pub class_id: Option<ClassId>,
    pub athlete_id: Option<AthleteId>,
    pub old_cut: Option<i32>,
    pub new_cut: Option<i32>,
    pub confirm_admitted: bool,
    pub requested_by: String,
    pub created_at: DateTime<Utc>,
    pub status: MutationStatus,
    pub note: Option<String>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl MutationRecord {
    pub fn from_new(mutation_id: MutationId, new: NewMutation, created_at: DateTime<Utc>) -> Self {
        Self {
            mutation_id,
            kind: new.kind,
            championship_id: new.championship_id,
            class_id: new.class_id,
            athlete_id: new.athlete_id,
            old_cut: new.old_cut,
            new_cut: new.new_cut,
            confirm_admitted: new.confirm_admitted,
            requested_by: new.requested_by,
            created_at,
            status: MutationStatus::Pending,
            note: None,
            processed_at: None,
        }
    }
}
