use std::fmt;
use std::str::FromStr;

use storage::models::{AthleteId, ChampionshipId, ClassId, MutationRecord, NewMutation};

use crate::error::{EngineError, Result};

/// The kinds of queued intent the consumer knows how to apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MutationKind {
    Rebuild,
    ChangeCut,
    Register,
    Withdraw,
    ExtraEntry,
    MoveClass,
    RenumberTeams,
    SyncDocuments,
    MarkDirtyDocuments,
}

impl MutationKind {
    pub const ALL: [MutationKind; 9] = [
        Self::Rebuild,
        Self::ChangeCut,
        Self::Register,
        Self::Withdraw,
        Self::ExtraEntry,
        Self::MoveClass,
        Self::RenumberTeams,
        Self::SyncDocuments,
        Self::MarkDirtyDocuments,
    ];

    /// Code stored in the mutation log.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rebuild => "rebuild",
            Self::ChangeCut => "change_cut",
            Self::Register => "register",
            Self::Withdraw => "withdraw",
            Self::ExtraEntry => "extra_entry",
            Self::MoveClass => "move_class",
            Self::RenumberTeams => "renumber_teams",
            Self::SyncDocuments => "sync_documents",
            Self::MarkDirtyDocuments => "mark_dirty_documents",
        }
    }
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MutationKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("unknown mutation kind '{}'", s))
    }
}

/// A mutation record decoded into the fields its kind needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    /// One class, or every class of the championship when `class_id` is absent.
    Rebuild {
        championship_id: ChampionshipId,
        class_id: Option<ClassId>,
        confirm_admitted: bool,
    },
    ChangeCut {
        championship_id: ChampionshipId,
        class_id: ClassId,
        old_cut: i32,
        new_cut: i32,
    },
    Register {
        championship_id: ChampionshipId,
        athlete_id: AthleteId,
    },
    Withdraw {
        championship_id: ChampionshipId,
        athlete_id: AthleteId,
    },
    ExtraEntry {
        championship_id: ChampionshipId,
        athlete_id: AthleteId,
    },
    MoveClass {
        championship_id: ChampionshipId,
        athlete_id: AthleteId,
        to_class_id: ClassId,
    },
    RenumberTeams {
        championship_id: ChampionshipId,
        class_id: ClassId,
    },
    SyncDocuments {
        championship_id: ChampionshipId,
    },
    MarkDirtyDocuments {
        championship_id: ChampionshipId,
    },
}

impl Mutation {
    /// Decodes a stored record. `Ok(None)` means the kind is not one this
    /// build knows.
    pub fn decode(record: &MutationRecord) -> Result<Option<Self>> {
        let Ok(kind) = record.kind.parse::<MutationKind>() else {
            return Ok(None);
        };

        let missing = |field: &'static str| EngineError::MissingField {
            mutation_id: record.mutation_id,
            kind: record.kind.clone(),
            field,
        };
        let class_id = || record.class_id.ok_or_else(|| missing("class_id"));
        let athlete_id = || record.athlete_id.ok_or_else(|| missing("athlete_id"));
        let championship_id = record.championship_id;

        let mutation = match kind {
            MutationKind::Rebuild => Self::Rebuild {
                championship_id,
                class_id: record.class_id,
                confirm_admitted: record.confirm_admitted,
            },
            MutationKind::ChangeCut => Self::ChangeCut {
                championship_id,
                class_id: class_id()?,
                old_cut: record.old_cut.ok_or_else(|| missing("old_cut"))?,
                new_cut: record.new_cut.ok_or_else(|| missing("new_cut"))?,
            },
            MutationKind::Register => Self::Register {
                championship_id,
                athlete_id: athlete_id()?,
            },
            MutationKind::Withdraw => Self::Withdraw {
                championship_id,
                athlete_id: athlete_id()?,
            },
            MutationKind::ExtraEntry => Self::ExtraEntry {
                championship_id,
                athlete_id: athlete_id()?,
            },
            MutationKind::MoveClass => Self::MoveClass {
                championship_id,
                athlete_id: athlete_id()?,
                to_class_id: class_id()?,
            },
            MutationKind::RenumberTeams => Self::RenumberTeams {
                championship_id,
                class_id: class_id()?,
            },
            MutationKind::SyncDocuments => Self::SyncDocuments { championship_id },
            MutationKind::MarkDirtyDocuments => Self::MarkDirtyDocuments { championship_id },
        };

        Ok(Some(mutation))
    }

    pub fn kind(&self) -> MutationKind {
        match self {
            Self::Rebuild { .. } => MutationKind::Rebuild,
            Self::ChangeCut { .. } => MutationKind::ChangeCut,
            Self::Register { .. } => MutationKind::Register,
            Self::Withdraw { .. } => MutationKind::Withdraw,
            Self::ExtraEntry { .. } => MutationKind::ExtraEntry,
            Self::MoveClass { .. } => MutationKind::MoveClass,
            Self::RenumberTeams { .. } => MutationKind::RenumberTeams,
            Self::SyncDocuments { .. } => MutationKind::SyncDocuments,
            Self::MarkDirtyDocuments { .. } => MutationKind::MarkDirtyDocuments,
        }
    }

    /// The record a producer appends to the log for this intent.
    pub fn into_new(self, requested_by: impl Into<String>) -> NewMutation {
        let kind = self.kind();
        match self {
            Self::Rebuild {
                championship_id,
                class_id,
                confirm_admitted,
            } => {
                let mut new = NewMutation::new(kind.as_str(), championship_id, requested_by);
                new.class_id = class_id;
                new.confirm_admitted = confirm_admitted;
                new
            }
            Self::ChangeCut {
                championship_id,
                class_id,
                old_cut,
                new_cut,
            } => NewMutation::new(kind.as_str(), championship_id, requested_by)
                .with_class(class_id)
                .with_cuts(old_cut, new_cut),
            Self::Register {
                championship_id,
                athlete_id,
            }
            | Self::Withdraw {
                championship_id,
                athlete_id,
            }
            | Self::ExtraEntry {
                championship_id,
                athlete_id,
            } => NewMutation::new(kind.as_str(), championship_id, requested_by)
                .with_athlete(athlete_id),
            Self::MoveClass {
                championship_id,
                athlete_id,
                to_class_id,
            } => NewMutation::new(kind.as_str(), championship_id, requested_by)
                .with_athlete(athlete_id)
                .with_class(to_class_id),
            Self::RenumberTeams {
                championship_id,
                class_id,
            } => NewMutation::new(kind.as_str(), championship_id, requested_by).with_class(class_id),
            Self::SyncDocuments { championship_id }
            | Self::MarkDirtyDocuments { championship_id } => {
                NewMutation::new(kind.as_str(), championship_id, requested_by)
            }
        }
    }
}
