//! Media reconciliation against an object-storage listing
//!
//! Sync only ever creates: objects without a media record get one, objects
//! with a record are left alone so metadata edited in the admin panel
//! survives. Records under the scanned prefixes whose object is gone are
//! reported as unmatched. Prune is the only path that deletes media records.

use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};

use super::types::{KindPlan, PlanEntry, RecordFailure, UnmatchedRecord};
use crate::error::RecordError;
use crate::models::seed::normalize_fields;
use crate::models::{EntityKind, FieldMap, NaturalKey, PersistedRecord, SeedRecord};
use crate::storage::{content_type, ObjectInfo};

/// Media record fields derived from a listed object
pub fn object_fields(object: &ObjectInfo, public_url: String) -> FieldMap {
    let (folder, filename) = match object.key.rsplit_once('/') {
        Some((folder, name)) => (Value::from(folder), name),
        None => (Value::Null, object.key.as_str()),
    };

    let mut fields = FieldMap::new();
    fields.insert("filename".into(), json!(filename));
    fields.insert("original_filename".into(), json!(filename));
    fields.insert("s3_key".into(), json!(object.key));
    fields.insert("public_url".into(), json!(public_url));
    fields.insert("content_type".into(), json!(object.content_type));
    fields.insert(
        "category".into(),
        json!(content_type::category(&object.content_type)),
    );
    fields.insert("file_size".into(), json!(object.size));
    fields.insert("folder".into(), folder);
    fields
}

/// Plan media records for the listed objects
///
/// `prefixes` are the prefixes that were scanned; an empty slice means the
/// whole bucket. `public_url` maps an object key to its public URL.
pub fn plan_media_sync(
    objects: &[ObjectInfo],
    persisted: &[PersistedRecord],
    prefixes: &[String],
    public_url: impl Fn(&str) -> String,
    failures: &mut Vec<RecordFailure>,
) -> KindPlan {
    let mut plan = KindPlan::new(EntityKind::Media);
    let existing: HashMap<&str, &PersistedRecord> =
        persisted.iter().map(|r| (r.key.as_str(), r)).collect();

    // Overlapping prefixes list the same object more than once
    let mut seen: HashSet<&str> = HashSet::new();

    for (index, object) in objects.iter().enumerate() {
        if object.is_folder_marker() || !seen.insert(object.key.as_str()) {
            continue;
        }

        let key = NaturalKey::new(object.key.as_str());
        let fields = match normalize_fields(EntityKind::Media, object_fields(object, public_url(&object.key))) {
            Ok(fields) => fields,
            Err(message) => {
                failures.push(RecordFailure {
                    kind: EntityKind::Media,
                    key: Some(key),
                    index: Some(index),
                    error: RecordError::input(message),
                });
                continue;
            }
        };

        let record = SeedRecord {
            kind: EntityKind::Media,
            key,
            index,
            fields,
            references: Vec::new(),
        };
        let entry = if existing.contains_key(object.key.as_str()) {
            PlanEntry::skip(record)
        } else {
            PlanEntry::create(record)
        };
        plan.entries.push(entry);
    }

    let scanned = |key: &str| prefixes.is_empty() || prefixes.iter().any(|p| key.starts_with(p.as_str()));
    plan.unmatched = persisted
        .iter()
        .filter(|r| scanned(r.key.as_str()) && !seen.contains(r.key.as_str()))
        .map(|r| UnmatchedRecord {
            kind: EntityKind::Media,
            key: r.key.clone(),
            id: r.id,
        })
        .collect();

    plan
}

/// Normalize a kept prefix so it matches whole path segments
pub fn folder_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim().trim_end_matches('/');
    format!("{trimmed}/")
}

/// Plan deletion of every media record whose key is outside `keep_prefix`
pub fn plan_media_prune(persisted: &[PersistedRecord], keep_prefix: &str) -> KindPlan {
    let keep = folder_prefix(keep_prefix);
    let mut plan = KindPlan::new(EntityKind::Media);
    plan.deletions = persisted
        .iter()
        .filter(|r| !r.key.as_str().starts_with(&keep))
        .map(PlanEntry::delete)
        .collect();
    plan
}
