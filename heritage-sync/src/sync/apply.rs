//! Apply engine: execute a reconciliation plan inside one store transaction
//!
//! Entries run in plan order (deletions first, in reverse dependency order,
//! then upserts in dependency order). Reference checks happen per record and
//! only fail that record; any store error aborts the whole plan so the caller
//! can roll back.

use std::collections::HashSet;

use super::types::{Action, PlanEntry, ReconciliationPlan, RecordFailure};
use crate::error::{RecordError, SyncError};
use crate::models::{EntityKind, NaturalKey, Reference};
use crate::store::StoreTransaction;

/// An entry that was applied, or would have been in a dry run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedEntry {
    pub kind: EntityKind,
    pub key: NaturalKey,
    pub action: Action,
}

/// What happened to each plan entry so far
///
/// Kept outside the result so a caller still sees progress when a store
/// error cuts the plan short.
#[derive(Debug, Clone, Default)]
pub struct ApplyLog {
    pub applied: Vec<AppliedEntry>,
    pub failures: Vec<RecordFailure>,
}

impl ApplyLog {
    pub fn count(&self, kind: EntityKind, action: Action) -> usize {
        self.applied
            .iter()
            .filter(|e| e.kind == kind && e.action == action)
            .count()
    }
}

/// Keys this run has created or deleted, so reference checks see the run's
/// own effects even when no write reaches the store
#[derive(Debug, Default)]
struct RunEffects {
    created: HashSet<(EntityKind, NaturalKey)>,
    deleted: HashSet<(EntityKind, NaturalKey)>,
}

impl RunEffects {
    fn record(&mut self, entry: &PlanEntry) {
        let id = (entry.kind, entry.key.clone());
        match entry.action {
            Action::Create => {
                self.deleted.remove(&id);
                self.created.insert(id);
            }
            Action::Delete => {
                self.created.remove(&id);
                self.deleted.insert(id);
            }
            Action::Update | Action::Skip => {}
        }
    }
}

/// Execute `plan` through `tx`
///
/// With `dry_run` set, every check still runs but no mutating call is made.
/// Returns the first store error; the caller owns commit and rollback.
pub async fn apply_plan(
    tx: &mut dyn StoreTransaction,
    plan: &ReconciliationPlan,
    dry_run: bool,
    progress: &mut ApplyLog,
) -> Result<(), SyncError> {
    let mut effects = RunEffects::default();

    for entry in plan.ordered() {
        if let Some(missing) = first_missing_reference(tx, &effects, &entry.references).await? {
            log::warn!(
                "Cannot {} {} '{}': {} -> {} '{}' does not exist",
                entry.action.label(),
                entry.kind,
                entry.key,
                missing.field,
                missing.kind,
                missing.key
            );
            progress.failures.push(RecordFailure {
                kind: entry.kind,
                key: Some(entry.key.clone()),
                index: None,
                error: RecordError::Reference {
                    field: missing.field.clone(),
                    kind: missing.kind,
                    key: missing.key.clone(),
                },
            });
            continue;
        }

        if !dry_run {
            execute_entry(tx, entry).await?;
        }

        log::debug!(
            "{}{} {} '{}'",
            if dry_run { "[dry run] " } else { "" },
            entry.action.symbol(),
            entry.kind,
            entry.key
        );
        effects.record(entry);
        progress.applied.push(AppliedEntry {
            kind: entry.kind,
            key: entry.key.clone(),
            action: entry.action,
        });
    }

    Ok(())
}

async fn execute_entry(tx: &mut dyn StoreTransaction, entry: &PlanEntry) -> Result<(), SyncError> {
    match entry.action {
        Action::Create => {
            tx.create(entry.kind, &entry.fields).await?;
        }
        Action::Update => tx.update(entry.kind, &entry.key, &entry.fields).await?,
        Action::Delete => tx.delete(entry.kind, &entry.key).await?,
        Action::Skip => {}
    }
    Ok(())
}

async fn first_missing_reference<'r>(
    tx: &mut dyn StoreTransaction,
    effects: &RunEffects,
    references: &'r [Reference],
) -> Result<Option<&'r Reference>, SyncError> {
    for reference in references {
        let id = (reference.kind, reference.key.clone());
        if effects.created.contains(&id) {
            continue;
        }
        let visible =
            !effects.deleted.contains(&id) && tx.exists(reference.kind, &reference.key).await?;
        if !visible {
            return Ok(Some(reference));
        }
    }
    Ok(None)
}
