//! Seed-side and store-side record types

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

use super::kind::EntityKind;

/// Field name to value, ordered by name so diffs and reports are stable
pub type FieldMap = BTreeMap<String, Value>;

/// Normalized identifier of a record within its kind (slug, name, s3 key, ...)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NaturalKey(String);

impl NaturalKey {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NaturalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NaturalKey {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// A foreign reference made by a record, checked before the record is applied
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    /// Field on the referencing record
    pub field: String,
    pub kind: EntityKind,
    pub key: NaturalKey,
}

/// One validated entry of the seed source
#[derive(Debug, Clone, PartialEq)]
pub struct SeedRecord {
    pub kind: EntityKind,
    pub key: NaturalKey,
    /// Position in the seed list, used for duplicate reporting
    pub index: usize,
    pub fields: FieldMap,
    pub references: Vec<Reference>,
}

/// A row as it currently exists in the store
#[derive(Debug, Clone, PartialEq)]
pub struct PersistedRecord {
    pub id: i64,
    pub kind: EntityKind,
    pub key: NaturalKey,
    pub fields: FieldMap,
    pub created_at: Option<NaiveDateTime>,
    pub updated_at: Option<NaiveDateTime>,
}

impl PersistedRecord {
    /// Value of a field, treating absent fields as null
    pub fn get(&self, field: &str) -> &Value {
        self.fields.get(field).unwrap_or(&NULL)
    }
}

static NULL: Value = Value::Null;
