//! Ordering and promotion of one class's qualification roster.
//!
//! Every operation is a pure function of the class's entries: the caller
//! loads a class, calls [`reorder`], persists the result. Entries are
//! returned sorted by sequence. Nothing here touches storage or the clock.

mod cut;
mod invariants;
mod placement;
mod rebuild;
mod withdraw;

use std::cmp::Ordering;

use storage::models::{AthleteId, ClassId, Participation, RosterEntry};

use crate::error::{EngineError, Result};

pub use invariants::check_invariants;
pub use placement::remove_entry;

/// A roster change applied by [`reorder`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Recompute the whole order from the averages.
    Rebuild { limit: i32, confirm_admitted: bool },
    /// A confirmation for the athlete. Only a withdrawn entry moves.
    Readmit { athlete_id: AthleteId, limit: i32 },
    /// Place an entry that is parked and not yet part of the order.
    PlaceExtra { athlete_id: AthleteId, limit: i32 },
    Withdraw { athlete_id: AthleteId, limit: i32 },
    ChangeCut { old_limit: i32, new_limit: i32 },
    /// Recompute ranks from the existing sequence.
    Renumber,
}

/// Something that happened to one entry, for its audit trail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RankingEvent {
    Confirmed {
        athlete_id: AthleteId,
    },
    Readmitted {
        athlete_id: AthleteId,
        to_waitlist: bool,
        sequence: i32,
    },
    Withdrawn {
        athlete_id: AthleteId,
    },
    ReservePromoted {
        athlete_id: AthleteId,
        sequence: i32,
    },
}

impl RankingEvent {
    pub fn athlete_id(&self) -> AthleteId {
        match self {
            Self::Confirmed { athlete_id }
            | Self::Readmitted { athlete_id, .. }
            | Self::Withdrawn { athlete_id }
            | Self::ReservePromoted { athlete_id, .. } => *athlete_id,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Self::Confirmed { .. } => "Participation set to yes".to_string(),
            Self::Readmitted {
                to_waitlist: true,
                sequence,
                ..
            } => format!("Placed on the waitlist at position {}", sequence),
            Self::Readmitted {
                to_waitlist: false,
                sequence,
                ..
            } => format!("Placed directly on the admitted list at position {}", sequence),
            Self::Withdrawn { .. } => "Participation set to no: withdrawal received".to_string(),
            Self::ReservePromoted { sequence, .. } => {
                format!("Reserve promoted to the admitted list at position {}", sequence)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Reordered {
    pub entries: Vec<RosterEntry>,
    pub events: Vec<RankingEvent>,
}

/// Applies `operation` to the entries of `class_id`.
///
/// An empty class is returned untouched. The result is checked against the
/// ranking invariants before it is handed back, so a caller never persists a
/// roster with duplicate or missing sequence numbers.
pub fn reorder(
    class_id: ClassId,
    mut entries: Vec<RosterEntry>,
    operation: Operation,
) -> Result<Reordered> {
    if entries.is_empty() {
        return Ok(Reordered {
            entries,
            events: Vec::new(),
        });
    }

    if let Some(stray) = entries.iter().find(|e| e.class_id != class_id) {
        return Err(EngineError::ClassMismatch {
            expected: class_id,
            found: stray.class_id,
            athlete_id: stray.athlete_id,
        });
    }

    let mut events = Vec::new();
    let limit = match operation {
        Operation::Rebuild {
            limit,
            confirm_admitted,
        } => {
            rebuild::rebuild(&mut entries, limit, confirm_admitted, &mut events);
            Some(limit)
        }
        Operation::Readmit { athlete_id, limit } => {
            placement::readmit(class_id, &mut entries, athlete_id, limit, &mut events)?;
            Some(limit)
        }
        Operation::PlaceExtra { athlete_id, limit } => {
            placement::place_extra(class_id, &mut entries, athlete_id, limit, &mut events)?;
            Some(limit)
        }
        Operation::Withdraw { athlete_id, limit } => {
            withdraw::withdraw(class_id, &mut entries, athlete_id, limit, &mut events)?;
            Some(limit)
        }
        Operation::ChangeCut {
            old_limit,
            new_limit,
        } => {
            if old_limit == new_limit {
                return Ok(Reordered { entries, events });
            }
            cut::change_cut(&mut entries, old_limit, new_limit);
            Some(new_limit)
        }
        Operation::Renumber => {
            renumber(&mut entries);
            None
        }
    };

    check_invariants(class_id, &entries, limit)?;
    Ok(Reordered { entries, events })
}

/// Highest average first; equal averages by the secondary average.
/// Used with the stable `sort_by`, so remaining ties keep their input order.
pub(crate) fn by_average_desc(a: &RosterEntry, b: &RosterEntry) -> Ordering {
    b.average
        .cmp(&a.average)
        .then_with(|| b.secondary_average.cmp(&a.secondary_average))
}

pub(crate) fn is_active(entry: &RosterEntry) -> bool {
    entry.participation != Participation::No
}

/// Sorts by sequence and hands out consecutive ranks, skipping withdrawn and
/// parked entries.
pub(crate) fn renumber(entries: &mut [RosterEntry]) {
    entries.sort_by_key(|e| e.sequence);

    let mut rank = 0;
    for entry in entries.iter_mut() {
        if is_active(entry) && !entry.is_parked() {
            rank += 1;
            entry.rank = rank;
        } else {
            entry.rank = 0;
        }
    }
}

/// Splits off the entries still waiting for a slot. They keep their parking
/// sequence until an extra-entry placement picks them up.
pub(crate) fn take_parked(entries: &mut Vec<RosterEntry>) -> Vec<RosterEntry> {
    let (parked, placed): (Vec<_>, Vec<_>) = entries.drain(..).partition(|e| e.is_parked());
    *entries = placed;
    parked
}

/// Gives `ordered` the sequence numbers 1..=N in its current order.
pub(crate) fn assign_sequences(ordered: &mut [RosterEntry]) {
    for (position, entry) in ordered.iter_mut().enumerate() {
        entry.sequence = position as i32 + 1;
    }
}

pub(crate) fn position_of(
    class_id: ClassId,
    entries: &[RosterEntry],
    athlete_id: AthleteId,
) -> Result<usize> {
    entries
        .iter()
        .position(|e| e.athlete_id == athlete_id)
        .ok_or(EngineError::EntryNotFound {
            class_id,
            athlete_id,
        })
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn test_empty_class_is_a_no_op() {
        let result = reorder(
            CLASS,
            Vec::new(),
            Operation::Rebuild {
                limit: 24,
                confirm_admitted: false,
            },
        )
        .unwrap();
        assert!(result.entries.is_empty());
        assert!(result.events.is_empty());
    }

    #[test]
    fn test_entry_from_other_class_is_rejected() {
        let mut stray = entry(2, "8.0");
        stray.class_id = CLASS + 1;

        let err = reorder(CLASS, vec![entry(1, "9.0"), stray], Operation::Renumber).unwrap_err();
        assert!(matches!(
            err,
            EngineError::ClassMismatch {
                found,
                athlete_id: 2,
                ..
            } if found == CLASS + 1
        ));
        assert!(err.is_contract_violation());
    }

    #[test]
    fn test_unknown_athlete_is_rejected() {
        let rebuilt = reorder(
            CLASS,
            vec![entry(1, "9.0")],
            Operation::Rebuild {
                limit: 24,
                confirm_admitted: false,
            },
        )
        .unwrap();

        let err = reorder(
            CLASS,
            rebuilt.entries,
            Operation::Withdraw {
                athlete_id: 99,
                limit: 24,
            },
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::EntryNotFound { athlete_id: 99, .. }));
    }

    #[test]
    fn test_renumber_skips_withdrawn_entries() {
        let mut entries = vec![entry(1, "9.0"), entry(2, "8.0"), entry(3, "7.0")];
        for (i, e) in entries.iter_mut().enumerate() {
            e.sequence = i as i32 + 1;
        }
        entries[1].participation = Participation::No;

        let result = reorder(CLASS, entries, Operation::Renumber).unwrap();
        assert_eq!(standings(&result.entries), vec![(1, 1), (2, 0), (3, 2)]);
    }

    #[test]
    fn test_event_descriptions_name_the_change() {
        let event = RankingEvent::Readmitted {
            athlete_id: 4,
            to_waitlist: true,
            sequence: 26,
        };
        assert_eq!(event.athlete_id(), 4);
        assert!(event.describe().contains("waitlist"));
    }
}
