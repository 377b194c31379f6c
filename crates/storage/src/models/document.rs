use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Championship, ClassId};
use crate::error::StorageError;

/// Identifies one rendered roster document.
///
/// Field order matters: the derived ordering is the drain order of dirty marks.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DocumentKey {
    pub year: i32,
    pub discipline: i16,
    pub is_final_stage: bool,
    pub is_team: bool,
    pub zone: Option<i16>,
    pub class_id: ClassId,
}

impl DocumentKey {
    pub fn for_class(championship: &Championship, class_id: ClassId, is_team: bool) -> Self {
        Self {
            year: championship.year,
            discipline: championship.discipline,
            is_final_stage: championship.is_final_stage,
            is_team,
            zone: championship.zone,
            class_id,
        }
    }

    /// Path-safe name, e.g. `2025-18-final-indiv-z0-1101`.
    pub fn slug(&self) -> String {
        format!(
            "{}-{}-{}-{}-z{}-{}",
            self.year,
            self.discipline,
            if self.is_final_stage { "final" } else { "zonal" },
            if self.is_team { "team" } else { "indiv" },
            self.zone.unwrap_or(0),
            self.class_id
        )
    }
}

impl fmt::Display for DocumentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.slug())
    }
}

/// A document group that must be regenerated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirtyMark {
    pub key: DocumentKey,
    /// Last time the group was marked. Re-marking moves it forward.
    pub marked_at: DateTime<Utc>,
}

/// Lifecycle of a tracked external document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocState {
    Unknown,
    Stale,
    Current,
}

impl DocState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Stale => "stale",
            Self::Current => "current",
        }
    }
}

impl FromStr for DocState {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unknown" => Ok(Self::Unknown),
            "stale" => Ok(Self::Stale),
            "current" => Ok(Self::Current),
            other => Err(StorageError::Corrupt(format!(
                "unknown document state '{}'",
                other
            ))),
        }
    }
}

/// What the engine last learned about an external document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStatus {
    pub key: DocumentKey,
    pub state: DocState,
    pub external_modified_at: Option<DateTime<Utc>>,
    pub external_editor: Option<String>,
    /// Last time the document was inspected or checked for changes.
    pub inspected_at: Option<DateTime<Utc>>,
    pub rendered_at: Option<DateTime<Utc>>,
    /// Set after a transient failure; the document is skipped until then.
    pub retry_at: Option<DateTime<Utc>>,
    /// Free text progress label found in the document.
    pub phase: String,
    pub has_scores: bool,
    pub is_complete: bool,
    pub log: String,
}

impl SyncStatus {
    pub fn unknown(key: DocumentKey) -> Self {
        Self {
            key,
            state: DocState::Unknown,
            external_modified_at: None,
            external_editor: None,
            inspected_at: None,
            rendered_at: None,
            retry_at: None,
            phase: String::new(),
            has_scores: false,
            is_complete: false,
            log: String::new(),
        }
    }

    /// Modified externally since the last inspection.
    pub fn needs_reinspection(&self) -> bool {
        match (self.external_modified_at, self.inspected_at) {
            (Some(modified), Some(inspected)) => modified > inspected,
            _ => false,
        }
    }

    pub fn is_deferred(&self, now: DateTime<Utc>) -> bool {
        self.retry_at.is_some_and(|retry_at| retry_at > now)
    }
}
