pub mod dirty;
pub mod error;
pub mod handlers;
pub mod mutation;
pub mod queue;
pub mod ranking;
pub mod sync;

use chrono::{DateTime, Utc};
use storage::{DirtyStore, MutationLog, RosterStore, SyncStatusStore};

pub use dirty::{DirtyDrain, DirtyTracker};
pub use error::{EngineError, Result};
pub use handlers::MutationHandler;
pub use mutation::{Mutation, MutationKind};
pub use queue::{MutationConsumer, MutationQueue, ProcessOutcome};
pub use ranking::{Operation, RankingEvent, Reordered, reorder};
pub use sync::{DocumentSync, HttpDocumentSync, SyncError, SyncScheduler, SyncSettings, TickOutcome};

/// Everything the engine persists, as one backend.
pub trait Store: RosterStore + MutationLog + DirtyStore + SyncStatusStore + 'static {}

impl<T> Store for T where T: RosterStore + MutationLog + DirtyStore + SyncStatusStore + 'static {}

/// Prefix of an audit line, e.g. `[2025-03-01 14:05]`.
pub(crate) fn log_stamp(at: DateTime<Utc>) -> String {
    at.format("[%Y-%m-%d %H:%M]").to_string()
}
