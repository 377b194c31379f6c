use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{AthleteId, ChampionshipId, ClassId};
use crate::error::StorageError;

/// Sequence value held by an entry while it is being relocated.
///
/// Larger than any legal sequence; never persisted after a mutation completes.
pub const PARKING_SEQUENCE: i32 = 22_222;

/// Whether an athlete has confirmed taking part in the championship.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Participation {
    Yes,
    No,
    Unknown,
}

impl Participation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Yes => "yes",
            Self::No => "no",
            Self::Unknown => "unknown",
        }
    }

    pub fn is_withdrawn(&self) -> bool {
        matches!(self, Self::No)
    }
}

impl fmt::Display for Participation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Participation {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "yes" => Ok(Self::Yes),
            "no" => Ok(Self::No),
            "unknown" => Ok(Self::Unknown),
            other => Err(StorageError::Corrupt(format!(
                "unknown participation code '{}'",
                other
            ))),
        }
    }
}

/// One athlete's standing in one class of one championship.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RosterEntry {
    pub championship_id: ChampionshipId,
    pub class_id: ClassId,
    pub athlete_id: AthleteId,
    pub average: Decimal,
    /// Only consulted when two averages are equal.
    pub secondary_average: Decimal,
    pub participation: Participation,
    /// 0 means withdrawn.
    pub rank: i32,
    pub sequence: i32,
    /// Champions are guaranteed a slot regardless of their average.
    pub is_champion: bool,
    /// Append-only audit trail, one line per event.
    pub log: String,
}

impl RosterEntry {
    pub fn new(
        championship_id: ChampionshipId,
        class_id: ClassId,
        athlete_id: AthleteId,
        average: Decimal,
    ) -> Self {
        Self {
            championship_id,
            class_id,
            athlete_id,
            average,
            secondary_average: Decimal::ZERO,
            participation: Participation::Unknown,
            rank: 0,
            sequence: PARKING_SEQUENCE,
            is_champion: false,
            log: String::new(),
        }
    }

    pub fn is_parked(&self) -> bool {
        self.sequence >= PARKING_SEQUENCE
    }

    pub fn append_log(&mut self, line: &str) {
        self.log.push_str(line);
        if !line.ends_with('\n') {
            self.log.push('\n');
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_participation_round_trips_through_text() {
        for p in [Participation::Yes, Participation::No, Participation::Unknown] {
            assert_eq!(p.as_str().parse::<Participation>().unwrap(), p);
        }
        assert!("maybe".parse::<Participation>().is_err());
    }

    #[test]
    fn test_new_entry_starts_parked() {
        let entry = RosterEntry::new(1, 2, 3, Decimal::new(915, 2));
        assert!(entry.is_parked());
        assert_eq!(entry.rank, 0);
        assert_eq!(entry.participation, Participation::Unknown);
    }

    #[test]
    fn test_append_log_terminates_lines() {
        let mut entry = RosterEntry::new(1, 2, 3, Decimal::ONE);
        entry.append_log("first");
        entry.append_log("second\n");
        assert_eq!(entry.log, "first\nsecond\n");
    }
}
