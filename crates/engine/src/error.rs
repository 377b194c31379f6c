use storage::error::StorageError;
use storage::models::{AthleteId, ClassId};
use thiserror::Error;

use crate::sync::SyncError;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Entry of athlete {athlete_id} belongs to class {found}, expected class {expected}")]
    ClassMismatch {
        expected: ClassId,
        found: ClassId,
        athlete_id: AthleteId,
    },

    #[error("Athlete {athlete_id} has no entry in class {class_id}")]
    EntryNotFound {
        class_id: ClassId,
        athlete_id: AthleteId,
    },

    #[error("Class {class_id} has {count} entries at reserve rank {rank}")]
    DuplicateReserve {
        class_id: ClassId,
        rank: i32,
        count: usize,
    },

    #[error("Ranking invariant violated in class {class_id}: {reason}")]
    InvariantViolation { class_id: ClassId, reason: String },

    #[error("Mutation {mutation_id} of kind '{kind}' is missing {field}")]
    MissingField {
        mutation_id: i64,
        kind: String,
        field: &'static str,
    },

    #[error("Another consumer holds the mutation queue lease")]
    LeaseHeld,

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Document sync error: {0}")]
    Sync(#[from] SyncError),
}

impl EngineError {
    /// Programmer or contract errors. These fail the mutation for operator
    /// inspection and are never retried.
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            Self::ClassMismatch { .. }
                | Self::EntryNotFound { .. }
                | Self::DuplicateReserve { .. }
                | Self::InvariantViolation { .. }
                | Self::MissingField { .. }
        )
    }
}
