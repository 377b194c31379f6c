use storage::models::{Participation, RosterEntry};

use super::{RankingEvent, assign_sequences, by_average_desc, is_active, renumber};

/// Champions first, then the best averages until `limit` active entries are
/// admitted. The admitted block is ordered by average, everyone else follows
/// in average order. Parked entries are ordered along with everyone else.
pub(super) fn rebuild(
    entries: &mut Vec<RosterEntry>,
    limit: i32,
    confirm_admitted: bool,
    events: &mut Vec<RankingEvent>,
) {
    let (mut champions, mut others): (Vec<_>, Vec<_>) =
        entries.drain(..).partition(|e| e.is_champion);
    champions.sort_by(by_average_desc);
    others.sort_by(by_average_desc);

    let mut active = champions.iter().filter(|e| is_active(e)).count() as i32;
    let mut admitted = champions;
    let mut rest = Vec::new();

    for entry in others {
        if active < limit {
            if is_active(&entry) {
                active += 1;
            }
            admitted.push(entry);
        } else {
            rest.push(entry);
        }
    }

    admitted.sort_by(by_average_desc);

    if confirm_admitted {
        for entry in admitted.iter_mut() {
            if is_active(entry) && entry.participation != Participation::Yes {
                entry.participation = Participation::Yes;
                events.push(RankingEvent::Confirmed {
                    athlete_id: entry.athlete_id,
                });
            }
        }
    }

    admitted.append(&mut rest);
    assign_sequences(&mut admitted);
    renumber(&mut admitted);
    *entries = admitted;
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::super::{Operation, reorder};
    use storage::models::Participation;

    fn rebuild(entries: Vec<storage::models::RosterEntry>, limit: i32) -> Vec<storage::models::RosterEntry> {
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
    fn test_rebuild_orders_by_average() {
        let entries = vec![entry(1, "8.1"), entry(2, "9.5"), entry(3, "8.7")];
        let result = rebuild(entries, 24);
        assert_eq!(standings(&result), vec![(2, 1), (3, 2), (1, 3)]);
    }

    #[test]
    fn test_equal_averages_break_on_secondary_average() {
        let mut low = entry(1, "9.0");
        low.secondary_average = "8.0".parse().unwrap();
        let mut high = entry(2, "9.0");
        high.secondary_average = "8.5".parse().unwrap();

        let result = rebuild(vec![low, high], 24);
        assert_eq!(standings(&result), vec![(2, 1), (1, 2)]);
    }

    #[test]
    fn test_champion_below_the_cut_is_admitted() {
        let mut entries: Vec<_> = (1..=5).map(|i| entry(i, &format!("{}.0", 20 - i))).collect();
        entries.push(champion(6, "1.0"));

        let result = rebuild(entries, 3);
        // Two best averages plus the champion share the three slots.
        assert_eq!(
            standings(&result),
            vec![(1, 1), (2, 2), (6, 3), (3, 4), (4, 5), (5, 6)]
        );
    }

    #[test]
    fn test_withdrawn_entries_do_not_consume_slots() {
        let mut entries = vec![entry(1, "9.0"), entry(2, "8.0"), entry(3, "7.0"), entry(4, "6.0")];
        entries[0].participation = Participation::No;

        let result = rebuild(entries, 2);
        assert_eq!(standings(&result), vec![(1, 0), (2, 1), (3, 2), (4, 3)]);
    }

    #[test]
    fn test_rebuild_is_idempotent() {
        let mut entries: Vec<_> = (1..=30)
            .map(|i| entry(i, &format!("{}.{}", 9 - (i % 7), i % 10)))
            .collect();
        entries[4].is_champion = true;
        entries[11].participation = Participation::No;
        entries[20].participation = Participation::Unknown;

        let once = rebuild(entries, 24);
        let twice = rebuild(once.clone(), 24);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_confirm_admitted_sets_yes_above_the_cut_only() {
        let mut entries: Vec<_> = (1..=4).map(|i| entry(i, &format!("{}.0", 10 - i))).collect();
        for e in entries.iter_mut() {
            e.participation = Participation::Unknown;
        }
        entries[1].participation = Participation::No;

        let result = reorder(
            CLASS,
            entries,
            Operation::Rebuild {
                limit: 2,
                confirm_admitted: true,
            },
        )
        .unwrap();

        let participation = |id: i64| {
            result
                .entries
                .iter()
                .find(|e| e.athlete_id == id)
                .map(|e| e.participation)
                .unwrap()
        };
        assert_eq!(participation(1), Participation::Yes);
        assert_eq!(participation(2), Participation::No);
        assert_eq!(participation(3), Participation::Yes);
        assert_eq!(participation(4), Participation::Unknown);
        assert_eq!(result.events.len(), 2);
    }

    #[test]
    fn test_thirty_entries_fill_the_cut_in_average_order() {
        let entries: Vec<_> = (1..=30).rev().map(|i| entry(i, &format!("{}", 100 - i))).collect();
        let result = rebuild(entries, 24);

        let expected: Vec<_> = (1..=30).map(|i| (i as i64, i as i32)).collect();
        assert_eq!(standings(&result), expected);
        assert!(result.iter().all(|e| !e.is_parked()));
    }

    #[test]
    fn test_rebuild_slots_parked_entry_and_extra_placement_is_then_a_no_op() {
        let mut entries = vec![entry(1, "9.0"), entry(2, "7.0")];
        for (i, e) in entries.iter_mut().enumerate() {
            e.sequence = i as i32 + 1;
        }
        entries.push(entry(3, "8.0"));

        let result = rebuild(entries, 24);
        assert_eq!(standings(&result), vec![(1, 1), (3, 2), (2, 3)]);

        let placed = reorder(
            CLASS,
            result.clone(),
            Operation::PlaceExtra {
                athlete_id: 3,
                limit: 24,
            },
        )
        .unwrap();
        assert_eq!(placed.entries, result);
        assert!(placed.events.is_empty());
    }
}
