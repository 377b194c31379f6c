//! One handler per mutation kind.
//!
//! A handler loads what it needs, computes the new roster in memory and
//! writes it back in a single save before marking documents dirty. Handlers
//! never retry.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use storage::models::{
    AthleteId, ChampionshipId, ClassId, DEFAULT_LIMIT, DocumentKey, MutationRecord, RosterEntry,
};
use tokio::sync::Notify;

use crate::dirty::DirtyTracker;
use crate::error::{EngineError, Result};
use crate::mutation::Mutation;
use crate::ranking::{self, Operation, RankingEvent, Reordered};
use crate::sync::DocumentSync;
use crate::{Store, log_stamp};

/// Prefix and signature for the audit lines a mutation writes.
struct Audit {
    stamp: String,
    requested_by: String,
    signature: String,
}

impl Audit {
    fn new(record: &MutationRecord) -> Self {
        Self {
            stamp: log_stamp(Utc::now()),
            requested_by: record.requested_by.clone(),
            signature: format!("{} by {}", record.kind, record.requested_by),
        }
    }

    /// The line every mutation leaves on the entry it targets.
    fn requested(&self, entry: &mut RosterEntry) {
        entry.append_log(&format!("{} Mutation by {}", self.stamp, self.requested_by));
    }

    fn note(&self, entry: &mut RosterEntry, text: &str) {
        entry.append_log(&format!("{} {} ({})", self.stamp, text, self.signature));
    }

    fn events(&self, entries: &mut [RosterEntry], events: &[RankingEvent]) {
        for event in events {
            if let Some(entry) = entries
                .iter_mut()
                .find(|e| e.athlete_id == event.athlete_id())
            {
                self.note(entry, &event.describe());
            }
        }
    }
}

pub struct MutationHandler<S> {
    store: Arc<S>,
    tracker: DirtyTracker<S>,
    sync: Arc<dyn DocumentSync>,
    sync_wake: Arc<Notify>,
}

impl<S: Store> MutationHandler<S> {
    pub fn new(store: Arc<S>, sync: Arc<dyn DocumentSync>, sync_wake: Arc<Notify>) -> Self {
        Self {
            tracker: DirtyTracker::new(Arc::clone(&store)),
            store,
            sync,
            sync_wake,
        }
    }

    pub async fn apply(&self, record: &MutationRecord, mutation: Mutation) -> Result<()> {
        let audit = Audit::new(record);

        match mutation {
            Mutation::Rebuild {
                championship_id,
                class_id,
                confirm_admitted,
            } => {
                self.rebuild(championship_id, class_id, confirm_admitted, &audit)
                    .await
            }
            Mutation::ChangeCut {
                championship_id,
                class_id,
                old_cut,
                new_cut,
            } => {
                self.change_cut(championship_id, class_id, old_cut, new_cut, &audit)
                    .await
            }
            Mutation::Register {
                championship_id,
                athlete_id,
            } => {
                self.reorder_around(championship_id, athlete_id, &audit, |limit| {
                    Operation::Readmit { athlete_id, limit }
                })
                .await
            }
            Mutation::Withdraw {
                championship_id,
                athlete_id,
            } => {
                self.reorder_around(championship_id, athlete_id, &audit, |limit| {
                    Operation::Withdraw { athlete_id, limit }
                })
                .await
            }
            Mutation::ExtraEntry {
                championship_id,
                athlete_id,
            } => {
                self.reorder_around(championship_id, athlete_id, &audit, |limit| {
                    Operation::PlaceExtra { athlete_id, limit }
                })
                .await
            }
            Mutation::MoveClass {
                championship_id,
                athlete_id,
                to_class_id,
            } => {
                self.move_class(championship_id, athlete_id, to_class_id, &audit)
                    .await
            }
            Mutation::RenumberTeams {
                championship_id,
                class_id,
            } => self.renumber_teams(championship_id, class_id).await,
            Mutation::SyncDocuments { championship_id } => {
                self.sync_documents(championship_id).await
            }
            Mutation::MarkDirtyDocuments { championship_id } => {
                self.mark_dirty_documents(championship_id).await
            }
        }
    }

    async fn rebuild(
        &self,
        championship_id: ChampionshipId,
        class_id: Option<ClassId>,
        confirm_admitted: bool,
        audit: &Audit,
    ) -> Result<()> {
        let championship = self.store.championship(championship_id).await?;
        let class_ids = match class_id {
            Some(class_id) => vec![class_id],
            None => self.store.class_ids(championship_id).await?,
        };

        for class_id in class_ids {
            let limit = self.store.load_limit(championship_id, class_id).await?;
            let entries = self.store.load_class(championship_id, class_id).await?;

            let Reordered {
                mut entries,
                events,
            } = ranking::reorder(
                class_id,
                entries,
                Operation::Rebuild {
                    limit,
                    confirm_admitted,
                },
            )?;
            audit.events(&mut entries, &events);

            self.store.save(&entries).await?;
            self.tracker
                .mark_class(&championship, class_id, false)
                .await?;

            tracing::info!(
                championship_id,
                class_id,
                limit,
                entries = entries.len(),
                confirmed = events.len(),
                "Class rebuilt"
            );
        }

        Ok(())
    }

    async fn change_cut(
        &self,
        championship_id: ChampionshipId,
        class_id: ClassId,
        old_cut: i32,
        new_cut: i32,
        audit: &Audit,
    ) -> Result<()> {
        if old_cut == new_cut {
            tracing::debug!(championship_id, class_id, cut = new_cut, "Cut unchanged");
            return Ok(());
        }

        let championship = self.store.championship(championship_id).await?;
        let before = self.store.load_class(championship_id, class_id).await?;
        let previous: HashMap<AthleteId, i32> =
            before.iter().map(|e| (e.athlete_id, e.rank)).collect();

        let Reordered { mut entries, .. } = ranking::reorder(
            class_id,
            before,
            Operation::ChangeCut {
                old_limit: old_cut,
                new_limit: new_cut,
            },
        )?;

        for entry in entries.iter_mut() {
            if let Some(&was) = previous.get(&entry.athlete_id) {
                if was != entry.rank {
                    let text = format!(
                        "Rank {} -> {} after cut change {} -> {}",
                        was, entry.rank, old_cut, new_cut
                    );
                    audit.note(entry, &text);
                }
            }
        }

        self.store.save(&entries).await?;
        if new_cut == DEFAULT_LIMIT {
            self.store.clear_limit(championship_id, class_id).await?;
        } else {
            self.store
                .set_limit(championship_id, class_id, new_cut)
                .await?;
        }
        self.tracker
            .mark_class(&championship, class_id, false)
            .await?;

        tracing::info!(championship_id, class_id, old_cut, new_cut, "Cut changed");
        Ok(())
    }

    /// Loads the class of `athlete_id`, applies the operation built for the
    /// class limit, saves and marks the document dirty.
    async fn reorder_around(
        &self,
        championship_id: ChampionshipId,
        athlete_id: AthleteId,
        audit: &Audit,
        operation: impl FnOnce(i32) -> Operation,
    ) -> Result<()> {
        let entry = self.store.load_entry(championship_id, athlete_id).await?;
        let class_id = entry.class_id;

        let limit = self.store.load_limit(championship_id, class_id).await?;
        let entries = self.store.load_class(championship_id, class_id).await?;
        let operation = operation(limit);

        let Reordered {
            mut entries,
            events,
        } = ranking::reorder(class_id, entries, operation)?;

        let target = entries
            .iter_mut()
            .find(|e| e.athlete_id == athlete_id)
            .ok_or(EngineError::EntryNotFound {
                class_id,
                athlete_id,
            })?;
        audit.requested(target);

        if events.is_empty() {
            self.store.save(std::slice::from_ref(target)).await?;
            tracing::debug!(
                championship_id,
                class_id,
                athlete_id,
                ?operation,
                "Nothing to change"
            );
            return Ok(());
        }

        for event in &events {
            tracing::debug!(championship_id, class_id, ?event, "Roster event");
        }
        audit.events(&mut entries, &events);

        self.store.save(&entries).await?;
        let championship = self.store.championship(championship_id).await?;
        self.tracker
            .mark_class(&championship, class_id, false)
            .await?;

        tracing::info!(
            championship_id,
            class_id,
            athlete_id,
            events = events.len(),
            "Roster updated"
        );
        Ok(())
    }

    async fn move_class(
        &self,
        championship_id: ChampionshipId,
        athlete_id: AthleteId,
        to_class_id: ClassId,
        audit: &Audit,
    ) -> Result<()> {
        let entry = self.store.load_entry(championship_id, athlete_id).await?;
        let from_class_id = entry.class_id;
        if from_class_id == to_class_id {
            tracing::debug!(championship_id, athlete_id, class_id = to_class_id, "Already in class");
            return Ok(());
        }

        let source = self.store.load_class(championship_id, from_class_id).await?;
        let (mut moved, source) = ranking::remove_entry(from_class_id, source, athlete_id)?;
        moved.class_id = to_class_id;
        audit.requested(&mut moved);
        audit.note(
            &mut moved,
            &format!("Moved from class {} to class {}", from_class_id, to_class_id),
        );

        let mut destination = self.store.load_class(championship_id, to_class_id).await?;
        destination.push(moved);
        let limit = self.store.load_limit(championship_id, to_class_id).await?;
        let Reordered {
            entries: destination,
            ..
        } = ranking::reorder(
            to_class_id,
            destination,
            Operation::Rebuild {
                limit,
                confirm_admitted: false,
            },
        )?;

        let mut batch = source;
        batch.extend(destination);
        self.store.save(&batch).await?;

        let championship = self.store.championship(championship_id).await?;
        self.tracker
            .mark_class(&championship, from_class_id, false)
            .await?;
        self.tracker
            .mark_class(&championship, to_class_id, false)
            .await?;

        tracing::info!(
            championship_id,
            athlete_id,
            from_class_id,
            to_class_id,
            "Athlete moved to another class"
        );
        Ok(())
    }

    async fn renumber_teams(&self, championship_id: ChampionshipId, class_id: ClassId) -> Result<()> {
        let championship = self.store.championship(championship_id).await?;
        let teams = self.store.load_class(championship_id, class_id).await?;

        let Reordered { entries: teams, .. } =
            ranking::reorder(class_id, teams, Operation::Renumber)?;

        self.store.save(&teams).await?;
        self.tracker.mark_class(&championship, class_id, true).await?;

        tracing::info!(championship_id, class_id, teams = teams.len(), "Teams renumbered");
        Ok(())
    }

    async fn sync_documents(&self, championship_id: ChampionshipId) -> Result<()> {
        let championship = self.store.championship(championship_id).await?;

        for class_id in self.store.class_ids(championship_id).await? {
            let key = DocumentKey::for_class(&championship, class_id, false);
            self.store.register(&key).await?;
            self.sync.mark_changed(&key).await?;
        }

        self.sync_wake.notify_one();
        tracing::info!(championship_id, "Documents registered for inspection");
        Ok(())
    }

    async fn mark_dirty_documents(&self, championship_id: ChampionshipId) -> Result<()> {
        let championship = self.store.championship(championship_id).await?;
        let class_ids = self.store.class_ids(championship_id).await?;

        for class_id in &class_ids {
            self.tracker
                .mark_class(&championship, *class_id, false)
                .await?;
        }

        self.sync_wake.notify_one();
        tracing::info!(
            championship_id,
            classes = class_ids.len(),
            "All class documents marked dirty"
        );
        Ok(())
    }
}
