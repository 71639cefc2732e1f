//! Diff engine: classify seed records against persisted rows
//!
//! This module provides functions to:
//! - Collapse duplicate seed keys (last occurrence wins)
//! - Compare a seed record's fields with its stored row
//! - Produce a per-kind plan of create/update/skip/delete decisions

use std::collections::HashMap;

use super::types::{FieldChange, IgnoredDuplicate, KindPlan, PlanEntry, UnmatchedRecord};
use crate::models::{EntityKind, NaturalKey, PersistedRecord, SeedRecord};

/// Remove duplicate keys, keeping the last occurrence at its own position
///
/// Returns the surviving records in source order and the ignored earlier
/// occurrences.
pub fn dedupe_seeds(records: Vec<SeedRecord>) -> (Vec<SeedRecord>, Vec<IgnoredDuplicate>) {
    let mut last_index: HashMap<NaturalKey, usize> = HashMap::new();
    for record in &records {
        last_index.insert(record.key.clone(), record.index);
    }

    let mut kept = Vec::with_capacity(last_index.len());
    let mut duplicates = Vec::new();
    for record in records {
        let winner = last_index[&record.key];
        if record.index == winner {
            kept.push(record);
        } else {
            log::warn!(
                "Ignoring duplicate {} '{}' at #{} (superseded by #{})",
                record.kind,
                record.key,
                record.index,
                winner
            );
            duplicates.push(IgnoredDuplicate {
                kind: record.kind,
                key: record.key,
                index: record.index,
                kept_index: winner,
            });
        }
    }

    (kept, duplicates)
}

/// Compare a seed record with its stored row, listing only changed fields
///
/// Fields are compared by value; a field missing on either side counts as
/// null.
pub fn diff_fields(seed: &SeedRecord, persisted: &PersistedRecord) -> Vec<FieldChange> {
    seed.fields
        .iter()
        .filter_map(|(name, after)| {
            let before = persisted.get(name);
            (before != after).then(|| FieldChange {
                field: name.clone(),
                before: before.clone(),
                after: after.clone(),
            })
        })
        .collect()
}

/// Plan one kind
///
/// With `reset`, every persisted row gets a deletion and the seed records are
/// diffed against an empty table. Without it, persisted rows missing from the
/// seed are only reported as unmatched.
pub fn diff_kind(
    kind: EntityKind,
    seeds: Vec<SeedRecord>,
    persisted: &[PersistedRecord],
    reset: bool,
) -> KindPlan {
    let mut plan = KindPlan::new(kind);

    let (seeds, duplicates) = dedupe_seeds(seeds);
    plan.duplicates = duplicates;

    let existing: HashMap<&NaturalKey, &PersistedRecord> = if reset {
        plan.deletions = persisted.iter().map(PlanEntry::delete).collect();
        HashMap::new()
    } else {
        persisted.iter().map(|r| (&r.key, r)).collect()
    };

    if !reset {
        let seed_keys: std::collections::HashSet<&NaturalKey> =
            seeds.iter().map(|s| &s.key).collect();
        plan.unmatched = persisted
            .iter()
            .filter(|r| !seed_keys.contains(&r.key))
            .map(|r| UnmatchedRecord {
                kind,
                key: r.key.clone(),
                id: r.id,
            })
            .collect();
    }

    for seed in seeds {
        let entry = match existing.get(&seed.key) {
            None => PlanEntry::create(seed),
            Some(row) => {
                let changes = diff_fields(&seed, row);
                if changes.is_empty() {
                    PlanEntry::skip(seed)
                } else {
                    PlanEntry::update(seed, changes)
                }
            }
        };
        plan.entries.push(entry);
    }

    log::debug!(
        "{}: {} create, {} update, {} skip, {} delete, {} unmatched",
        kind,
        plan.count(super::types::Action::Create),
        plan.count(super::types::Action::Update),
        plan.count(super::types::Action::Skip),
        plan.count(super::types::Action::Delete),
        plan.unmatched.len()
    );

    plan
}
