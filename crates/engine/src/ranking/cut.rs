use storage::models::RosterEntry;

use super::{assign_sequences, by_average_desc, is_active, renumber, take_parked};

pub(super) fn change_cut(entries: &mut Vec<RosterEntry>, old_limit: i32, new_limit: i32) {
    let mut parked = take_parked(entries);
    renumber(entries);

    let ordered = if new_limit > old_limit {
        raise(std::mem::take(entries), new_limit)
    } else {
        lower(std::mem::take(entries), old_limit, new_limit)
    };

    *entries = ordered;
    assign_sequences(entries);
    entries.append(&mut parked);
    renumber(entries);
}

/// Splits sequence-ordered entries in front of the first active entry ranked
/// beyond `limit`.
fn split_at_limit(mut entries: Vec<RosterEntry>, limit: i32) -> (Vec<RosterEntry>, Vec<RosterEntry>) {
    let boundary = entries
        .iter()
        .position(|e| is_active(e) && e.rank > limit)
        .unwrap_or(entries.len());
    let beyond = entries.split_off(boundary);
    (entries, beyond)
}

/// Everything inside the new cut, plus any champion, is ordered by average
/// again. The rest keeps its order.
fn raise(entries: Vec<RosterEntry>, new_limit: i32) -> Vec<RosterEntry> {
    let (mut block, beyond) = split_at_limit(entries, new_limit);
    let (mut champions, mut rest): (Vec<_>, Vec<_>) =
        beyond.into_iter().partition(|e| e.is_champion);

    block.append(&mut champions);
    block.sort_by(by_average_desc);
    block.append(&mut rest);
    block
}

/// Champions admitted under the old cut stay in. The remaining slots go to the
/// best averages of the old admitted block, and only then to entries from
/// beyond the old cut.
fn lower(entries: Vec<RosterEntry>, old_limit: i32, new_limit: i32) -> Vec<RosterEntry> {
    let (block, mut beyond) = split_at_limit(entries, old_limit);
    let (mut admitted, mut contenders): (Vec<_>, Vec<_>) =
        block.into_iter().partition(|e| e.is_champion);
    contenders.sort_by(by_average_desc);

    let mut active = admitted.iter().filter(|e| is_active(e)).count() as i32;
    let mut displaced = Vec::new();

    for entry in contenders {
        if active < new_limit {
            if is_active(&entry) {
                active += 1;
            }
            admitted.push(entry);
        } else {
            displaced.push(entry);
        }
    }

    if active < new_limit {
        beyond.sort_by(by_average_desc);
        let mut remaining = Vec::new();
        for entry in beyond {
            if active < new_limit {
                if is_active(&entry) {
                    active += 1;
                }
                admitted.push(entry);
            } else {
                remaining.push(entry);
            }
        }
        beyond = remaining;
    }

    admitted.sort_by(by_average_desc);
    admitted.append(&mut displaced);
    admitted.append(&mut beyond);
    admitted
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::super::{Operation, reorder};
    use storage::models::{Participation, RosterEntry};

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

    fn change_cut(entries: Vec<RosterEntry>, old_limit: i32, new_limit: i32) -> Vec<RosterEntry> {
        reorder(
            CLASS,
            entries,
            Operation::ChangeCut {
                old_limit,
                new_limit,
            },
        )
        .unwrap()
        .entries
    }

    /// 26 athletes with averages 99 down to 74, except champion 15 at 10.
    fn class_with_weak_champion() -> Vec<RosterEntry> {
        (1..=26)
            .map(|i| {
                if i == 15 {
                    champion(i, "10")
                } else {
                    entry(i, &format!("{}", 100 - i))
                }
            })
            .collect()
    }

    #[test]
    fn test_lowering_cut_keeps_admitted_champion() {
        let roster = rebuilt(class_with_weak_champion(), 24);
        assert_eq!(rank_of(&roster, 15), 24);

        let roster = change_cut(roster, 24, 20);

        assert_eq!(rank_of(&roster, 15), 20);
        assert_eq!(rank_of(&roster, 20), 19);
        // Lowest non-champion of the new top 20 is pushed onto the waitlist.
        assert_eq!(rank_of(&roster, 21), 21);
        assert_eq!(rank_of(&roster, 24), 24);
        assert_eq!(rank_of(&roster, 26), 26);
    }

    #[test]
    fn test_raising_cut_restores_average_order() {
        let roster = rebuilt(class_with_weak_champion(), 24);
        let lowered = change_cut(roster.clone(), 24, 20);
        let raised = change_cut(lowered, 20, 24);

        assert_eq!(standings(&raised), standings(&roster));
    }

    #[test]
    fn test_raising_cut_admits_waitlisters_in_average_order() {
        let roster = rebuilt(
            vec![entry(1, "9.0"), entry(2, "8.0"), entry(3, "7.0"), entry(4, "6.0")],
            2,
        );
        let roster = change_cut(roster, 2, 3);
        assert_eq!(standings(&roster), vec![(1, 1), (2, 2), (3, 3), (4, 4)]);
    }

    #[test]
    fn test_unchanged_cut_is_a_no_op() {
        let roster = rebuilt(class_with_weak_champion(), 24);
        let result = reorder(
            CLASS,
            roster.clone(),
            Operation::ChangeCut {
                old_limit: 24,
                new_limit: 24,
            },
        )
        .unwrap();

        assert_eq!(result.entries, roster);
        assert!(result.events.is_empty());
    }

    #[test]
    fn test_lowering_short_class_keeps_withdrawn_in_place() {
        let mut roster = rebuilt(
            vec![entry(1, "9.0"), entry(2, "8.0"), entry(3, "7.0")],
            24,
        );
        roster[1].participation = Participation::No;
        roster[1].rank = 0;
        roster[2].rank = 2;

        let roster = change_cut(roster, 24, 2);
        assert_eq!(standings(&roster), vec![(1, 1), (2, 0), (3, 2)]);
    }

    #[test]
    fn test_parked_entry_survives_cut_change() {
        let mut roster = rebuilt(
            vec![entry(1, "9.0"), entry(2, "8.0"), entry(3, "7.0")],
            3,
        );
        roster.push(entry(4, "8.5"));

        let roster = change_cut(roster, 3, 2);
        assert_eq!(standings(&roster), vec![(1, 1), (2, 2), (3, 3), (4, 0)]);
        assert!(roster[3].is_parked());
    }

    #[test]
    fn test_sequences_stay_contiguous_after_cut_changes() {
        let mut roster = rebuilt(class_with_weak_champion(), 24);
        for (old, new) in [(24, 18), (18, 22), (22, 12), (12, 24)] {
            roster = change_cut(roster, old, new);
            let mut sequences: Vec<_> = roster.iter().map(|e| e.sequence).collect();
            sequences.sort();
            assert_eq!(sequences, (1..=26).collect::<Vec<_>>());
        }
    }
}
