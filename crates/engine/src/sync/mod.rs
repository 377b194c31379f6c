//! Propagation of roster changes to the external document service.

mod backoff;
mod document;
mod http;
mod quota;
mod scheduler;

pub use backoff::Backoff;
pub use document::{
    DocumentSummary, DocumentSync, ExternalRevision, RosterSnapshot, SnapshotLine, SyncError,
};
pub use http::HttpDocumentSync;
pub use quota::{QUOTA_WINDOW, Quota};
pub use scheduler::{SyncScheduler, SyncSettings, TickOutcome};

#[cfg(test)]
pub(crate) use scheduler::fake::FakeDocumentSync;
