//! Core data types for reconciliation runs
//!
//! These types describe what a run decided for every record: the per-kind
//! plans produced by the diff engine, the failures collected along the way,
//! and the state a run moves through.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::RecordError;
use crate::models::{EntityKind, FieldMap, NaturalKey, PersistedRecord, Reference, SeedRecord};

/// Decision taken for a single record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Create,
    Update,
    Skip,
    Delete,
}

impl Action {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Skip => "skip",
            Self::Delete => "delete",
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Create => "+",
            Self::Update => "~",
            Self::Skip => "=",
            Self::Delete => "-",
        }
    }

    /// Whether applying this action writes to the store
    pub fn is_mutating(&self) -> bool {
        !matches!(self, Self::Skip)
    }
}

/// One changed field of an update
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
    pub field: String,
    /// Value currently stored
    pub before: Value,
    /// Value from the source of truth
    pub after: Value,
}

/// A per-record decision within a plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanEntry {
    pub kind: EntityKind,
    pub key: NaturalKey,
    pub action: Action,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub field_diff: Vec<FieldChange>,
    /// Fields to write: the full record for creates, the changed subset for updates
    #[serde(skip)]
    pub fields: FieldMap,
    #[serde(skip)]
    pub references: Vec<Reference>,
}

impl PlanEntry {
    pub fn create(record: SeedRecord) -> Self {
        Self {
            kind: record.kind,
            key: record.key,
            action: Action::Create,
            field_diff: Vec::new(),
            fields: record.fields,
            references: record.references,
        }
    }

    pub fn update(record: SeedRecord, changes: Vec<FieldChange>) -> Self {
        let fields = changes
            .iter()
            .map(|c| (c.field.clone(), c.after.clone()))
            .collect();
        // Only references whose field actually changes need re-validation
        let references = record
            .references
            .into_iter()
            .filter(|r| changes.iter().any(|c| c.field == r.field))
            .collect();

        Self {
            kind: record.kind,
            key: record.key,
            action: Action::Update,
            field_diff: changes,
            fields,
            references,
        }
    }

    pub fn skip(record: SeedRecord) -> Self {
        Self {
            kind: record.kind,
            key: record.key,
            action: Action::Skip,
            field_diff: Vec::new(),
            fields: FieldMap::new(),
            references: Vec::new(),
        }
    }

    pub fn delete(record: &PersistedRecord) -> Self {
        Self {
            kind: record.kind,
            key: record.key.clone(),
            action: Action::Delete,
            field_diff: Vec::new(),
            fields: FieldMap::new(),
            references: Vec::new(),
        }
    }

    /// Names of the fields an update changes
    pub fn changed_fields(&self) -> Vec<&str> {
        self.field_diff.iter().map(|c| c.field.as_str()).collect()
    }
}

/// An earlier seed entry overridden by a later one with the same key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IgnoredDuplicate {
    pub kind: EntityKind,
    pub key: NaturalKey,
    /// Position of the ignored entry in its seed list
    pub index: usize,
    /// Position of the entry that won
    pub kept_index: usize,
}

/// A persisted row with no counterpart in the source of truth
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnmatchedRecord {
    pub kind: EntityKind,
    pub key: NaturalKey,
    pub id: i64,
}

/// A record that could not be processed, with the reason
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordFailure {
    pub kind: EntityKind,
    /// Absent when the key itself could not be resolved
    pub key: Option<NaturalKey>,
    /// Position in the seed list, when the record came from one
    pub index: Option<usize>,
    pub error: RecordError,
}

impl RecordFailure {
    /// Human-readable record reference, e.g. `sites 'villa'` or `sites #3`
    pub fn describe(&self) -> String {
        match (&self.key, self.index) {
            (Some(key), _) => format!("{} '{}'", self.kind, key),
            (None, Some(index)) => format!("{} #{}", self.kind, index),
            (None, None) => self.kind.to_string(),
        }
    }
}

/// Plan for a single kind
///
/// Deletions form their own phase, run before any create or update, so a
/// reset may delete and recreate the same key. Within `entries` every key
/// appears at most once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KindPlan {
    pub kind: EntityKind,
    pub deletions: Vec<PlanEntry>,
    pub entries: Vec<PlanEntry>,
    pub unmatched: Vec<UnmatchedRecord>,
    pub duplicates: Vec<IgnoredDuplicate>,
}

impl KindPlan {
    pub fn new(kind: EntityKind) -> Self {
        Self {
            kind,
            deletions: Vec::new(),
            entries: Vec::new(),
            unmatched: Vec::new(),
            duplicates: Vec::new(),
        }
    }

    pub fn count(&self, action: Action) -> usize {
        self.deletions
            .iter()
            .chain(&self.entries)
            .filter(|e| e.action == action)
            .count()
    }
}

/// Ordered per-record decisions for a whole run
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ReconciliationPlan {
    /// Kind plans in dependency order
    pub kinds: Vec<KindPlan>,
}

impl ReconciliationPlan {
    /// Entries in apply order: deletions in reverse dependency order, then
    /// creates, updates and skips in dependency order
    pub fn ordered(&self) -> Vec<&PlanEntry> {
        let deletions = self.kinds.iter().rev().flat_map(|k| k.deletions.iter());
        let upserts = self.kinds.iter().flat_map(|k| k.entries.iter());
        deletions.chain(upserts).collect()
    }

    pub fn count(&self, action: Action) -> usize {
        self.kinds.iter().map(|k| k.count(action)).sum()
    }

    /// True when applying the plan would not write anything
    pub fn is_noop(&self) -> bool {
        self.ordered().iter().all(|e| !e.action.is_mutating())
    }
}

/// States of a reconciliation run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Loading,
    Diffing,
    Applying,
    Committed,
    RolledBack,
    DryRunReport,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Committed | Self::RolledBack | Self::DryRunReport)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Loading => "loading",
            Self::Diffing => "diffing",
            Self::Applying => "applying",
            Self::Committed => "committed",
            Self::RolledBack => "rolled back",
            Self::DryRunReport => "dry run",
        }
    }
}
