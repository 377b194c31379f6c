use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use storage::models::{AthleteId, DocumentKey, Participation, RosterEntry};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Document service timed out")]
    Timeout,

    #[error("Could not resolve document service host: {0}")]
    NameResolution(String),

    #[error("Document service answered {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Document service rejected the request: {0}")]
    Api(String),

    #[error("Failed to decode document service response: {0}")]
    Decode(String),
}

impl SyncError {
    /// Whether repeating the same call may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout | Self::NameResolution(_) | Self::Transport(_) => true,
            Self::Http { status, .. } => *status == 429 || *status >= 500,
            Self::Api(_) | Self::Decode(_) => false,
        }
    }
}

/// Last modification of an external document as reported by the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalRevision {
    pub modified_at: DateTime<Utc>,
    pub editor: String,
}

/// Progress information read back from a document during inspection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentSummary {
    pub phase: String,
    pub has_scores: bool,
    pub is_complete: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotLine {
    pub athlete_id: AthleteId,
    pub rank: i32,
    pub sequence: i32,
    pub participation: Participation,
    pub average: Decimal,
    pub is_champion: bool,
}

impl From<&RosterEntry> for SnapshotLine {
    fn from(entry: &RosterEntry) -> Self {
        Self {
            athlete_id: entry.athlete_id,
            rank: entry.rank,
            sequence: entry.sequence,
            participation: entry.participation,
            average: entry.average,
            is_champion: entry.is_champion,
        }
    }
}

/// What gets written into one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RosterSnapshot {
    pub document: String,
    pub limit: i32,
    pub lines: Vec<SnapshotLine>,
    pub taken_at: DateTime<Utc>,
}

impl RosterSnapshot {
    pub fn new(key: &DocumentKey, limit: i32, entries: &[RosterEntry], taken_at: DateTime<Utc>) -> Self {
        let mut lines: Vec<SnapshotLine> = entries.iter().map(SnapshotLine::from).collect();
        lines.sort_by_key(|l| l.sequence);
        Self {
            document: key.slug(),
            limit,
            lines,
            taken_at,
        }
    }
}

/// The external document-generation service.
///
/// Implementations do not rate-limit; the scheduler accounts every call
/// against its quota window.
#[async_trait::async_trait]
pub trait DocumentSync: Send + Sync {
    /// Tells the service the document exists and should be tracked.
    async fn mark_changed(&self, key: &DocumentKey) -> Result<(), SyncError>;

    async fn get_last_modified(&self, key: &DocumentKey)
    -> Result<Option<ExternalRevision>, SyncError>;

    async fn read_summary(&self, key: &DocumentKey) -> Result<DocumentSummary, SyncError>;

    async fn render(&self, key: &DocumentKey, snapshot: &RosterSnapshot) -> Result<(), SyncError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_errors_and_throttling_are_transient() {
        let http = |status| SyncError::Http {
            status,
            message: String::new(),
        };
        assert!(http(503).is_transient());
        assert!(http(429).is_transient());
        assert!(!http(404).is_transient());
        assert!(SyncError::Timeout.is_transient());
        assert!(!SyncError::Decode("bad".to_string()).is_transient());
    }

    #[test]
    fn test_snapshot_lines_follow_sequence() {
        let key = DocumentKey {
            year: 2025,
            discipline: 18,
            is_final_stage: true,
            is_team: false,
            zone: None,
            class_id: 1100,
        };
        let mut first = RosterEntry::new(1, 1100, 7, Decimal::new(91, 1));
        first.sequence = 2;
        let mut second = RosterEntry::new(1, 1100, 8, Decimal::new(95, 1));
        second.sequence = 1;

        let snapshot = RosterSnapshot::new(&key, 24, &[first, second], Utc::now());
        assert_eq!(snapshot.document, "2025-18-final-indiv-z0-1100");
        assert_eq!(snapshot.lines[0].athlete_id, 8);
    }
}
