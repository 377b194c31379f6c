//! The durable mutation queue: producers append intents, a single consumer
//! applies them in order.

use std::sync::Arc;
use std::time::Duration;

use storage::models::{MutationId, MutationRecord, MutationStatus, NewMutation};
use storage::{ConsumerLease, MutationLog};
use tokio::sync::{Notify, watch};

use crate::Store;
use crate::error::{EngineError, Result};
use crate::handlers::MutationHandler;
use crate::mutation::{Mutation, MutationKind};

/// Producer side. Appending never waits for the consumer.
pub struct MutationQueue<S> {
    store: Arc<S>,
    wake: Arc<Notify>,
}

impl<S: MutationLog> MutationQueue<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            wake: Arc::new(Notify::new()),
        }
    }

    /// Shares the signal a consumer in this process waits on.
    pub fn with_wake(mut self, wake: Arc<Notify>) -> Self {
        self.wake = wake;
        self
    }

    pub fn wake_handle(&self) -> Arc<Notify> {
        Arc::clone(&self.wake)
    }

    pub async fn enqueue(&self, mutation: NewMutation) -> Result<MutationRecord> {
        let record = self.store.append(mutation).await?;
        self.wake.notify_one();

        tracing::info!(
            mutation_id = record.mutation_id,
            kind = %record.kind,
            championship_id = record.championship_id,
            requested_by = %record.requested_by,
            "Mutation enqueued"
        );
        Ok(record)
    }

    pub async fn submit(
        &self,
        mutation: Mutation,
        requested_by: impl Into<String>,
    ) -> Result<MutationRecord> {
        self.enqueue(mutation.into_new(requested_by)).await
    }

    pub async fn pending(&self) -> Result<i64> {
        Ok(self.store.pending_count().await?)
    }
}

/// What one call to [`MutationConsumer::process_next`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// The queue was empty.
    Idle,
    Applied {
        mutation_id: MutationId,
        kind: MutationKind,
    },
    Failed {
        mutation_id: MutationId,
        error: String,
    },
    /// Left in the log for an operator.
    Unrecognized {
        mutation_id: MutationId,
        kind: String,
    },
}

impl ProcessOutcome {
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }
}

/// The one consumer of the queue.
///
/// [`Self::run`] refuses to start unless it holds the consumer lease, so two
/// workers pointed at the same database never apply mutations side by side.
pub struct MutationConsumer<S> {
    store: Arc<S>,
    lease: Arc<dyn ConsumerLease>,
    handler: MutationHandler<S>,
    wake: Arc<Notify>,
    poll_interval: Duration,
}

impl<S: Store> MutationConsumer<S> {
    pub fn new(
        store: Arc<S>,
        lease: Arc<dyn ConsumerLease>,
        handler: MutationHandler<S>,
        wake: Arc<Notify>,
    ) -> Self {
        Self {
            store,
            lease,
            handler,
            wake,
            poll_interval: Duration::from_secs(3),
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Applies the oldest pending mutation and records how it went.
    ///
    /// A failing mutation is finished as failed and the error is returned in
    /// the outcome; only storage failures around the log itself are `Err`.
    /// The record is claimed before its handler runs, so a handler whose
    /// outcome could not be recorded is never applied a second time.
    pub async fn process_next(&self) -> Result<ProcessOutcome> {
        let Some(record) = self.store.next_pending().await? else {
            return Ok(ProcessOutcome::Idle);
        };
        let mutation_id = record.mutation_id;

        let mutation = match Mutation::decode(&record) {
            Ok(Some(mutation)) => mutation,
            Ok(None) => {
                tracing::warn!(mutation_id, kind = %record.kind, "Unrecognized mutation kind");
                self.store
                    .finish(
                        mutation_id,
                        MutationStatus::Unrecognized,
                        Some(format!("unknown kind '{}'", record.kind)),
                    )
                    .await?;
                return Ok(ProcessOutcome::Unrecognized {
                    mutation_id,
                    kind: record.kind,
                });
            }
            Err(e) => return self.fail(&record, e).await,
        };

        let kind = mutation.kind();
        if !self.store.claim(mutation_id).await? {
            tracing::warn!(mutation_id, %kind, "Mutation no longer pending, skipped");
            return Ok(ProcessOutcome::Idle);
        }
        tracing::debug!(mutation_id, %kind, "Applying mutation");

        match self.handler.apply(&record, mutation).await {
            Ok(()) => {
                self.store
                    .finish(mutation_id, MutationStatus::Done, None)
                    .await?;
                tracing::info!(mutation_id, %kind, "Mutation applied");
                Ok(ProcessOutcome::Applied { mutation_id, kind })
            }
            Err(e) => self.fail(&record, e).await,
        }
    }

    async fn fail(&self, record: &MutationRecord, error: EngineError) -> Result<ProcessOutcome> {
        tracing::error!(
            mutation_id = record.mutation_id,
            kind = %record.kind,
            championship_id = record.championship_id,
            contract_violation = error.is_contract_violation(),
            "Mutation failed: {}",
            error
        );

        let note = error.to_string();
        self.store
            .finish(record.mutation_id, MutationStatus::Failed, Some(note.clone()))
            .await?;
        Ok(ProcessOutcome::Failed {
            mutation_id: record.mutation_id,
            error: note,
        })
    }

    /// Consumes the queue until `shutdown` flips to true. The mutation in
    /// flight always completes before the loop exits.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        if !self.lease.try_acquire().await? {
            return Err(EngineError::LeaseHeld);
        }
        tracing::info!("Mutation consumer started");

        while !*shutdown.borrow() {
            let busy = match self.process_next().await {
                Ok(outcome) => !outcome.is_idle(),
                Err(e) => {
                    tracing::error!("Reading the mutation log failed: {}", e);
                    false
                }
            };

            if busy {
                continue;
            }

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = self.wake.notified() => {}
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }

        self.lease.release().await?;
        tracing::info!("Mutation consumer stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;
    use storage::MemoryStore;
    use storage::models::{Championship, Participation, RosterEntry};

    use super::*;
    use crate::sync::FakeDocumentSync;

    fn consumer(store: &Arc<MemoryStore>, wake: Arc<Notify>) -> MutationConsumer<MemoryStore> {
        let handler = MutationHandler::new(
            Arc::clone(store),
            Arc::new(FakeDocumentSync::default()),
            Arc::new(Notify::new()),
        );
        MutationConsumer::new(Arc::clone(store), Arc::new(store.lease()), handler, wake)
    }

    async fn seeded_store() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        store
            .add_championship(Championship {
                championship_id: 1,
                year: 2025,
                discipline: 18,
                is_final_stage: true,
                zone: None,
            })
            .await;
        let entries = (1..=3).map(|athlete_id| {
            let mut entry = RosterEntry::new(1, 1100, athlete_id, Decimal::new(900 - athlete_id, 2));
            entry.participation = Participation::Yes;
            entry
        });
        store.insert_entries(entries).await;
        store
    }

    fn mark_dirty() -> NewMutation {
        NewMutation::new("mark_dirty_documents", 1, "admin")
    }

    #[tokio::test]
    async fn test_mutations_are_applied_in_enqueue_order() {
        let store = seeded_store().await;
        let queue = MutationQueue::new(Arc::clone(&store));
        let consumer = consumer(&store, queue.wake_handle());

        let first = queue
            .submit(
                Mutation::Rebuild {
                    championship_id: 1,
                    class_id: Some(1100),
                    confirm_admitted: false,
                },
                "admin",
            )
            .await
            .unwrap();
        let second = queue.enqueue(mark_dirty()).await.unwrap();
        assert_eq!(queue.pending().await.unwrap(), 2);

        assert_eq!(
            consumer.process_next().await.unwrap(),
            ProcessOutcome::Applied {
                mutation_id: first.mutation_id,
                kind: MutationKind::Rebuild,
            }
        );
        assert_eq!(
            consumer.process_next().await.unwrap(),
            ProcessOutcome::Applied {
                mutation_id: second.mutation_id,
                kind: MutationKind::MarkDirtyDocuments,
            }
        );
        assert_eq!(consumer.process_next().await.unwrap(), ProcessOutcome::Idle);
        assert_eq!(queue.pending().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_failed_mutation_does_not_halt_queue() {
        let store = seeded_store().await;
        let queue = MutationQueue::new(Arc::clone(&store));
        let consumer = consumer(&store, queue.wake_handle());

        queue
            .enqueue(NewMutation::new("withdraw", 1, "admin").with_athlete(404))
            .await
            .unwrap();
        queue.enqueue(mark_dirty()).await.unwrap();

        assert!(matches!(
            consumer.process_next().await.unwrap(),
            ProcessOutcome::Failed { mutation_id: 1, .. }
        ));
        assert!(matches!(
            consumer.process_next().await.unwrap(),
            ProcessOutcome::Applied { mutation_id: 2, .. }
        ));

        let log = store.mutations().await;
        assert_eq!(log[0].status, MutationStatus::Failed);
        assert!(log[0].note.is_some());
        assert_eq!(log[1].status, MutationStatus::Done);
        assert!(!store.dirty_marks().await.is_empty());
    }

    #[tokio::test]
    async fn test_missing_field_fails_the_mutation() {
        let store = seeded_store().await;
        let queue = MutationQueue::new(Arc::clone(&store));
        let consumer = consumer(&store, queue.wake_handle());

        queue
            .enqueue(NewMutation::new("move_class", 1, "admin").with_athlete(2))
            .await
            .unwrap();

        let outcome = consumer.process_next().await.unwrap();
        let ProcessOutcome::Failed { error, .. } = outcome else {
            panic!("expected a failure, got {:?}", outcome);
        };
        assert!(error.contains("class_id"));
    }

    #[tokio::test]
    async fn test_unrecognized_kind_is_left_for_operator() {
        let store = seeded_store().await;
        let queue = MutationQueue::new(Arc::clone(&store));
        let consumer = consumer(&store, queue.wake_handle());

        queue
            .enqueue(NewMutation::new("reinit_test", 1, "admin"))
            .await
            .unwrap();

        assert_eq!(
            consumer.process_next().await.unwrap(),
            ProcessOutcome::Unrecognized {
                mutation_id: 1,
                kind: "reinit_test".to_string(),
            }
        );
        let log = store.mutations().await;
        assert_eq!(log[0].status, MutationStatus::Unrecognized);
        assert_eq!(consumer.process_next().await.unwrap(), ProcessOutcome::Idle);
    }

    #[tokio::test]
    async fn test_interrupted_mutation_is_not_applied_again() {
        let store = seeded_store().await;
        let queue = MutationQueue::new(Arc::clone(&store));
        let consumer = consumer(&store, queue.wake_handle());

        let record = queue.enqueue(mark_dirty()).await.unwrap();
        // A previous consumer claimed it and died before finishing.
        assert!(store.claim(record.mutation_id).await.unwrap());

        assert_eq!(consumer.process_next().await.unwrap(), ProcessOutcome::Idle);
        assert_eq!(queue.pending().await.unwrap(), 0);
        assert!(store.dirty_marks().await.is_empty());

        let log = store.mutations().await;
        assert_eq!(log[0].status, MutationStatus::Applying);
        assert!(!store.claim(record.mutation_id).await.unwrap());
    }

    #[tokio::test]
    async fn test_enqueue_rejects_anonymous_producer() {
        let store = seeded_store().await;
        let queue = MutationQueue::new(Arc::clone(&store));

        let result = queue.enqueue(NewMutation::new("rebuild", 1, "")).await;

        assert!(result.is_err());
        assert_eq!(queue.pending().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_second_consumer_is_refused() {
        let store = seeded_store().await;
        let other = store.lease();
        assert!(other.try_acquire().await.unwrap());

        let consumer = consumer(&store, Arc::new(Notify::new()));
        let (_tx, rx) = watch::channel(false);

        assert!(matches!(
            consumer.run(rx).await,
            Err(EngineError::LeaseHeld)
        ));
    }

    #[tokio::test]
    async fn test_enqueue_wakes_running_consumer() {
        let store = seeded_store().await;
        let queue = MutationQueue::new(Arc::clone(&store));
        let consumer =
            consumer(&store, queue.wake_handle()).with_poll_interval(Duration::from_secs(3600));
        let (tx, rx) = watch::channel(false);

        let running = tokio::spawn(async move { consumer.run(rx).await });
        let record = queue.enqueue(mark_dirty()).await.unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let log = store.mutations().await;
                if log[0].status == MutationStatus::Done {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(record.mutation_id, 1);

        tx.send(true).unwrap();
        running.await.unwrap().unwrap();

        assert!(store.lease().try_acquire().await.unwrap());
    }
}
