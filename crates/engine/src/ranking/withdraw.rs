use storage::models::{AthleteId, ClassId, Participation, RosterEntry};

use super::{RankingEvent, is_active, position_of, renumber};
use crate::error::{EngineError, Result};

/// Withdraws `athlete_id`, who keeps their sequence slot with rank 0.
///
/// When the athlete held a place inside the cut, the first reserve moves into
/// the admitted block ahead of every admitted entry with a strictly lower
/// average.
pub(super) fn withdraw(
    class_id: ClassId,
    entries: &mut [RosterEntry],
    athlete_id: AthleteId,
    limit: i32,
    events: &mut Vec<RankingEvent>,
) -> Result<()> {
    let idx = position_of(class_id, entries, athlete_id)?;
    if entries[idx].participation.is_withdrawn() {
        return Ok(());
    }

    let old_rank = entries[idx].rank;
    let withdrawn_sequence = entries[idx].sequence;
    entries[idx].participation = Participation::No;
    entries[idx].rank = 0;
    events.push(RankingEvent::Withdrawn { athlete_id });

    if (1..=limit).contains(&old_rank) {
        promote_reserve(class_id, entries, idx, withdrawn_sequence, limit, events)?;
    }

    renumber(entries);
    Ok(())
}

fn promote_reserve(
    class_id: ClassId,
    entries: &mut [RosterEntry],
    withdrawn: usize,
    withdrawn_sequence: i32,
    limit: i32,
    events: &mut Vec<RankingEvent>,
) -> Result<()> {
    let reserve_rank = limit + 1;
    let reserves: Vec<usize> = entries
        .iter()
        .enumerate()
        .filter(|(_, e)| is_active(e) && e.rank == reserve_rank)
        .map(|(i, _)| i)
        .collect();

    let reserve = match reserves.as_slice() {
        [] => return Ok(()),
        [only] => *only,
        _ => {
            return Err(EngineError::DuplicateReserve {
                class_id,
                rank: reserve_rank,
                count: reserves.len(),
            });
        }
    };

    let reserve_sequence = entries[reserve].sequence;
    if reserve_sequence <= withdrawn_sequence {
        return Ok(());
    }

    let reserve_average = entries[reserve].average;
    let target = entries
        .iter()
        .enumerate()
        .filter(|(i, e)| {
            *i != withdrawn
                && is_active(e)
                && (1..=limit).contains(&e.rank)
                && e.sequence < reserve_sequence
                && e.average < reserve_average
        })
        .map(|(_, e)| e.sequence)
        .min();

    let new_sequence = match target {
        Some(target) => {
            for entry in entries.iter_mut() {
                if entry.sequence >= target && entry.sequence < reserve_sequence {
                    entry.sequence += 1;
                }
            }
            entries[reserve].sequence = target;
            target
        }
        None => reserve_sequence,
    };

    events.push(RankingEvent::ReservePromoted {
        athlete_id: entries[reserve].athlete_id,
        sequence: new_sequence,
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::super::{Operation, reorder};
    use super::*;

    fn rebuilt(entries: Vec<RosterEntry>, limit: i32) -> Vec<RosterEntry> {
        reorder(
            CLASS,
            entries,
            Operation::Rebuild {
                limit,
                confirm_admitted: false,
            },
        )
        .unwrap()
        .entries
    }

    #[test]
    fn test_withdrawal_promotes_first_waitlister() {
        let roster = rebuilt(
            vec![entry(1, "9.0"), entry(2, "8.0"), entry(3, "7.0"), entry(4, "6.0")],
            2,
        );
        assert_eq!(standings(&roster), vec![(1, 1), (2, 2), (3, 3), (4, 4)]);

        let result = reorder(CLASS, roster, Operation::Withdraw { athlete_id: 1, limit: 2 }).unwrap();

        assert_eq!(rank_of(&result.entries, 2), 1);
        assert_eq!(rank_of(&result.entries, 3), 2);
        assert_eq!(rank_of(&result.entries, 1), 0);
        assert_eq!(rank_of(&result.entries, 4), 3);
        // The withdrawn athlete stays in its slot, greyed out.
        assert_eq!(standings(&result.entries)[0], (1, 0));
        assert_eq!(
            result.events,
            vec![
                RankingEvent::Withdrawn { athlete_id: 1 },
                RankingEvent::ReservePromoted {
                    athlete_id: 3,
                    sequence: 3,
                },
            ]
        );
    }

    #[test]
    fn test_promoted_reserve_moves_ahead_of_lower_averages() {
        // Champion 2 holds a slot with a low average.
        let roster = rebuilt(
            vec![entry(1, "9.0"), champion(2, "5.0"), entry(3, "8.0"), entry(4, "6.0")],
            3,
        );
        assert_eq!(standings(&roster), vec![(1, 1), (3, 2), (2, 3), (4, 4)]);

        let roster = reorder(CLASS, roster, Operation::Withdraw { athlete_id: 1, limit: 3 })
            .unwrap()
            .entries;

        assert_eq!(
            standings(&roster),
            vec![(1, 0), (3, 1), (4, 2), (2, 3)]
        );
    }

    #[test]
    fn test_promoted_reserve_stays_behind_equal_average() {
        // Champion 2 ties the reserve on average but loses on the secondary one.
        let mut weak_champion = champion(2, "7.0");
        weak_champion.secondary_average = "1.0".parse().unwrap();
        let mut reserve = entry(3, "7.0");
        reserve.secondary_average = "5.0".parse().unwrap();

        let roster = rebuilt(
            vec![
                entry(1, "9.0"),
                weak_champion,
                entry(4, "8.0"),
                reserve,
                entry(5, "6.0"),
            ],
            3,
        );
        assert_eq!(
            standings(&roster),
            vec![(1, 1), (4, 2), (2, 3), (3, 4), (5, 5)]
        );

        let roster = reorder(CLASS, roster, Operation::Withdraw { athlete_id: 1, limit: 3 })
            .unwrap()
            .entries;
        assert_eq!(
            standings(&roster),
            vec![(1, 0), (4, 1), (2, 2), (3, 3), (5, 4)]
        );
    }

    #[test]
    fn test_parked_entry_does_not_block_withdrawal() {
        let mut roster = rebuilt(vec![entry(1, "9.0"), entry(2, "8.0")], 24);
        roster.push(entry(3, "8.5"));

        let roster = reorder(CLASS, roster, Operation::Withdraw { athlete_id: 1, limit: 24 })
            .unwrap()
            .entries;
        assert_eq!(standings(&roster), vec![(1, 0), (2, 1), (3, 0)]);
        assert!(roster[2].is_parked());
    }

    #[test]
    fn test_withdrawal_from_waitlist_promotes_nobody() {
        let roster = rebuilt(
            vec![entry(1, "9.0"), entry(2, "8.0"), entry(3, "7.0"), entry(4, "6.0")],
            2,
        );

        let result = reorder(CLASS, roster, Operation::Withdraw { athlete_id: 3, limit: 2 }).unwrap();
        assert_eq!(
            standings(&result.entries),
            vec![(1, 1), (2, 2), (3, 0), (4, 3)]
        );
        assert_eq!(result.events.len(), 1);
    }

    #[test]
    fn test_missing_reserve_is_skipped() {
        let roster = rebuilt(vec![entry(1, "9.0"), entry(2, "8.0")], 24);

        let result = reorder(CLASS, roster, Operation::Withdraw { athlete_id: 1, limit: 24 }).unwrap();
        assert_eq!(standings(&result.entries), vec![(1, 0), (2, 1)]);
        assert_eq!(result.events, vec![RankingEvent::Withdrawn { athlete_id: 1 }]);
    }

    #[test]
    fn test_duplicate_reserve_rank_is_an_error() {
        let mut roster = rebuilt(
            vec![entry(1, "9.0"), entry(2, "8.0"), entry(3, "7.0"), entry(4, "6.0")],
            2,
        );
        roster[3].rank = 3;

        let err = reorder(CLASS, roster, Operation::Withdraw { athlete_id: 1, limit: 2 }).unwrap_err();
        assert!(matches!(
            err,
            EngineError::DuplicateReserve {
                rank: 3,
                count: 2,
                ..
            }
        ));
    }

    #[test]
    fn test_withdrawing_twice_is_harmless() {
        let roster = rebuilt(vec![entry(1, "9.0"), entry(2, "8.0"), entry(3, "7.0")], 1);
        let once = reorder(CLASS, roster, Operation::Withdraw { athlete_id: 1, limit: 1 })
            .unwrap()
            .entries;
        let twice = reorder(CLASS, once.clone(), Operation::Withdraw { athlete_id: 1, limit: 1 })
            .unwrap();

        assert_eq!(twice.entries, once);
        assert!(twice.events.is_empty());
    }
}
