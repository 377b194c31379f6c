use storage::models::{ClassId, RosterEntry};

use super::is_active;
use crate::error::{EngineError, Result};

/// Verifies a class roster after an operation.
///
/// `limit` is `None` when the operation does not know the class cut; the
/// checks that depend on it are skipped. Parked entries wait outside the
/// order and only need rank 0.
pub fn check_invariants(
    class_id: ClassId,
    entries: &[RosterEntry],
    limit: Option<i32>,
) -> Result<()> {
    let violation = |reason: String| EngineError::InvariantViolation { class_id, reason };

    if let Some(stray) = entries.iter().find(|e| e.class_id != class_id) {
        return Err(EngineError::ClassMismatch {
            expected: class_id,
            found: stray.class_id,
            athlete_id: stray.athlete_id,
        });
    }

    if let Some(parked) = entries.iter().find(|e| e.is_parked() && e.rank != 0) {
        return Err(violation(format!(
            "parked athlete {} has rank {}",
            parked.athlete_id, parked.rank
        )));
    }

    let mut ordered: Vec<&RosterEntry> = entries.iter().filter(|e| !e.is_parked()).collect();
    ordered.sort_by_key(|e| e.sequence);

    let mut expected_rank = 0;
    for (position, entry) in ordered.iter().enumerate() {
        let expected_sequence = position as i32 + 1;
        if entry.sequence != expected_sequence {
            return Err(violation(format!(
                "athlete {} has sequence {}, expected {}",
                entry.athlete_id, entry.sequence, expected_sequence
            )));
        }

        if is_active(entry) {
            expected_rank += 1;
            if entry.rank != expected_rank {
                return Err(violation(format!(
                    "athlete {} has rank {}, expected {}",
                    entry.athlete_id, entry.rank, expected_rank
                )));
            }
        } else if entry.rank != 0 {
            return Err(violation(format!(
                "withdrawn athlete {} has rank {}",
                entry.athlete_id, entry.rank
            )));
        }

        if entry.is_champion && is_active(entry) && entry.rank < 1 {
            return Err(violation(format!(
                "champion {} has no rank",
                entry.athlete_id
            )));
        }
    }

    if let Some(limit) = limit {
        let admitted = entries
            .iter()
            .filter(|e| (1..=limit).contains(&e.rank))
            .count();
        if admitted > limit.max(0) as usize {
            return Err(violation(format!(
                "{} entries admitted under a cut of {}",
                admitted, limit
            )));
        }
    }

    Ok(())
}
