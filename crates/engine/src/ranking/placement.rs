use std::cmp::Ordering;

use storage::models::{AthleteId, ClassId, PARKING_SEQUENCE, Participation, RosterEntry};

use super::{RankingEvent, by_average_desc, is_active, position_of, renumber};
use crate::error::Result;

/// A confirmation for `athlete_id`.
///
/// A withdrawn entry is taken out of its slot and placed again at the spot its
/// average earns it. Any other entry only has its participation set to yes.
pub(super) fn readmit(
    class_id: ClassId,
    entries: &mut [RosterEntry],
    athlete_id: AthleteId,
    limit: i32,
    events: &mut Vec<RankingEvent>,
) -> Result<()> {
    let idx = position_of(class_id, entries, athlete_id)?;

    if !entries[idx].participation.is_withdrawn() {
        if entries[idx].participation != Participation::Yes {
            entries[idx].participation = Participation::Yes;
            events.push(RankingEvent::Confirmed { athlete_id });
        }
        return Ok(());
    }

    park(entries, idx);
    place(entries, idx, limit, events);
    Ok(())
}

/// Places an entry that was created parked and has no slot yet.
///
/// An entry that already holds a slot, e.g. because a rebuild ran first, is
/// left where it is.
pub(super) fn place_extra(
    class_id: ClassId,
    entries: &mut [RosterEntry],
    athlete_id: AthleteId,
    limit: i32,
    events: &mut Vec<RankingEvent>,
) -> Result<()> {
    let idx = position_of(class_id, entries, athlete_id)?;

    if !entries[idx].is_parked() {
        return Ok(());
    }

    entries[idx].rank = 0;
    place(entries, idx, limit, events);
    Ok(())
}

/// Takes an entry out of the class and closes the gap it leaves.
///
/// Used when an athlete moves to another class. Returns the removed entry,
/// parked, and the remaining entries renumbered.
pub fn remove_entry(
    class_id: ClassId,
    mut entries: Vec<RosterEntry>,
    athlete_id: AthleteId,
) -> Result<(RosterEntry, Vec<RosterEntry>)> {
    let idx = position_of(class_id, &entries, athlete_id)?;
    park(&mut entries, idx);

    let removed = entries.remove(idx);
    renumber(&mut entries);
    Ok((removed, entries))
}

fn park(entries: &mut [RosterEntry], idx: usize) {
    let old_sequence = entries[idx].sequence;
    entries[idx].sequence = PARKING_SEQUENCE;
    entries[idx].rank = 0;

    for entry in entries.iter_mut() {
        if entry.sequence > old_sequence && entry.sequence < PARKING_SEQUENCE {
            entry.sequence -= 1;
        }
    }
}

/// Inserts the parked entry at `idx` behind every active entry of its block
/// that has an equal or better average.
///
/// Ranks of the other entries must still describe the order before the move.
fn place(entries: &mut [RosterEntry], idx: usize, limit: i32, events: &mut Vec<RankingEvent>) {
    let me = entries[idx].clone();
    let at_or_above = |other: &RosterEntry| by_average_desc(other, &me) != Ordering::Greater;

    let others = || {
        entries
            .iter()
            .enumerate()
            .filter(move |(i, e)| *i != idx && !e.is_parked())
            .map(|(_, e)| e)
    };

    let admitted = others()
        .filter(|e| is_active(e) && (1..=limit).contains(&e.rank))
        .count() as i32;
    let to_waitlist = admitted >= limit;

    let sequence = if to_waitlist {
        let waitlist: Vec<&RosterEntry> = others()
            .filter(|e| is_active(e) && e.rank > limit)
            .collect();

        let anchor = waitlist
            .iter()
            .filter(|e| at_or_above(**e))
            .map(|e| e.sequence)
            .max();

        match anchor {
            Some(anchor) => anchor + 1,
            None => match waitlist.iter().map(|e| e.sequence).min() {
                Some(head) => head,
                None => others().count() as i32 + 1,
            },
        }
    } else {
        others()
            .filter(|e| is_active(e) && (1..=limit).contains(&e.rank) && at_or_above(*e))
            .map(|e| e.sequence)
            .max()
            .map_or(1, |anchor| anchor + 1)
    };

    for (i, entry) in entries.iter_mut().enumerate() {
        if i != idx && entry.sequence >= sequence && !entry.is_parked() {
            entry.sequence += 1;
        }
    }

    let entry = &mut entries[idx];
    entry.sequence = sequence;
    entry.participation = Participation::Yes;
    events.push(RankingEvent::Readmitted {
        athlete_id: entry.athlete_id,
        to_waitlist,
        sequence,
    });

    renumber(entries);
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::super::{Operation, RankingEvent, reorder};
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

    fn apply(entries: Vec<RosterEntry>, operation: Operation) -> Vec<RosterEntry> {
        reorder(CLASS, entries, operation).unwrap().entries
    }

    #[test]
    fn test_readmit_below_limit_lands_in_admitted_block() {
        let roster = rebuilt(
            vec![entry(1, "9.0"), entry(2, "8.0"), entry(3, "7.0"), entry(4, "6.0")],
            4,
        );
        let roster = apply(roster, Operation::Withdraw { athlete_id: 2, limit: 4 });
        assert_eq!(rank_of(&roster, 2), 0);

        let result = reorder(CLASS, roster, Operation::Readmit { athlete_id: 2, limit: 4 }).unwrap();
        assert_eq!(
            standings(&result.entries),
            vec![(1, 1), (2, 2), (3, 3), (4, 4)]
        );
        assert_eq!(
            result.events,
            vec![RankingEvent::Readmitted {
                athlete_id: 2,
                to_waitlist: false,
                sequence: 2,
            }]
        );
    }

    #[test]
    fn test_readmit_at_limit_lands_on_waitlist() {
        let roster = rebuilt(
            vec![
                entry(1, "9.0"),
                entry(2, "8.0"),
                entry(3, "7.0"),
                entry(4, "6.0"),
                entry(5, "5.0"),
            ],
            2,
        );
        let roster = apply(roster, Operation::Withdraw { athlete_id: 1, limit: 2 });
        // 3 took over the freed slot, so the returning athlete finds the cut full.
        assert_eq!(rank_of(&roster, 3), 2);

        let result = reorder(CLASS, roster, Operation::Readmit { athlete_id: 1, limit: 2 }).unwrap();
        assert_eq!(
            standings(&result.entries),
            vec![(2, 1), (3, 2), (1, 3), (4, 4), (5, 5)]
        );
        assert!(matches!(
            result.events[0],
            RankingEvent::Readmitted {
                to_waitlist: true,
                ..
            }
        ));
    }

    #[test]
    fn test_readmit_goes_behind_waitlisters_with_better_average() {
        let roster = rebuilt(
            vec![
                entry(1, "9.0"),
                entry(2, "8.0"),
                entry(3, "7.0"),
                entry(4, "6.0"),
                entry(5, "5.0"),
            ],
            2,
        );
        let roster = apply(roster, Operation::Withdraw { athlete_id: 5, limit: 2 });
        let roster = apply(roster, Operation::Readmit { athlete_id: 5, limit: 2 });

        assert_eq!(
            standings(&roster),
            vec![(1, 1), (2, 2), (3, 3), (4, 4), (5, 5)]
        );
    }

    #[test]
    fn test_readmit_tie_goes_after_equal_averages() {
        let roster = rebuilt(
            vec![entry(1, "9.0"), entry(2, "8.0"), entry(3, "8.0"), entry(4, "7.0")],
            24,
        );
        let roster = apply(roster, Operation::Withdraw { athlete_id: 2, limit: 24 });
        let roster = apply(roster, Operation::Readmit { athlete_id: 2, limit: 24 });

        assert_eq!(
            standings(&roster),
            vec![(1, 1), (3, 2), (2, 3), (4, 4)]
        );
    }

    #[test]
    fn test_readmit_of_unknown_only_confirms() {
        let mut roster = rebuilt(vec![entry(1, "9.0"), entry(2, "8.0")], 24);
        roster[1].participation = Participation::Unknown;
        let before = standings(&roster);

        let result = reorder(CLASS, roster, Operation::Readmit { athlete_id: 2, limit: 24 }).unwrap();
        assert_eq!(standings(&result.entries), before);
        assert_eq!(result.entries[1].participation, Participation::Yes);
        assert_eq!(result.events, vec![RankingEvent::Confirmed { athlete_id: 2 }]);
    }

    #[test]
    fn test_readmit_of_confirmed_entry_changes_nothing() {
        let roster = rebuilt(vec![entry(1, "9.0"), entry(2, "8.0")], 24);
        let result = reorder(CLASS, roster.clone(), Operation::Readmit { athlete_id: 1, limit: 24 }).unwrap();
        assert_eq!(result.entries, roster);
        assert!(result.events.is_empty());
    }

    #[test]
    fn test_extra_entry_is_placed_by_average() {
        let mut roster = rebuilt(vec![entry(1, "9.0"), entry(2, "7.0")], 24);
        roster.push(entry(3, "8.0"));
        assert!(roster[2].is_parked());

        let roster = apply(roster, Operation::PlaceExtra { athlete_id: 3, limit: 24 });
        assert_eq!(standings(&roster), vec![(1, 1), (3, 2), (2, 3)]);
    }

    #[test]
    fn test_extra_entry_into_empty_waitlist_goes_last() {
        let mut roster = rebuilt(vec![entry(1, "9.0"), entry(2, "7.0")], 2);
        roster.push(entry(3, "9.5"));

        let roster = apply(roster, Operation::PlaceExtra { athlete_id: 3, limit: 2 });
        assert_eq!(standings(&roster), vec![(1, 1), (2, 2), (3, 3)]);
    }

    #[test]
    fn test_extra_entry_with_a_slot_stays_put() {
        let roster = rebuilt(vec![entry(1, "9.0"), entry(2, "8.0")], 24);
        let result = reorder(CLASS, roster.clone(), Operation::PlaceExtra { athlete_id: 2, limit: 24 }).unwrap();
        assert_eq!(result.entries, roster);
        assert!(result.events.is_empty());
    }

    #[test]
    fn test_second_parked_entry_waits_while_first_is_placed() {
        let mut roster = rebuilt(vec![entry(1, "9.0"), entry(2, "7.0")], 24);
        roster.push(entry(3, "8.0"));
        roster.push(entry(4, "6.0"));

        let roster = apply(roster, Operation::PlaceExtra { athlete_id: 3, limit: 24 });
        assert_eq!(standings(&roster), vec![(1, 1), (3, 2), (2, 3), (4, 0)]);
        assert!(roster[3].is_parked());

        let roster = apply(roster, Operation::PlaceExtra { athlete_id: 4, limit: 24 });
        assert_eq!(standings(&roster), vec![(1, 1), (3, 2), (2, 3), (4, 4)]);
    }

    #[test]
    fn test_remove_entry_closes_the_gap() {
        let roster = rebuilt(vec![entry(1, "9.0"), entry(2, "8.0"), entry(3, "7.0")], 24);

        let (removed, rest) = remove_entry(CLASS, roster, 2).unwrap();
        assert!(removed.is_parked());
        assert_eq!(removed.rank, 0);
        assert_eq!(standings(&rest), vec![(1, 1), (3, 2)]);
        assert_eq!(rest[1].sequence, 2);
    }
}
