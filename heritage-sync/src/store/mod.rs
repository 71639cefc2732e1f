//! Persistence interface consumed by the reconciler
//!
//! A run opens exactly one [`StoreTransaction`] and issues every read and
//! write through it, so the whole run commits or rolls back as a unit.

pub mod sqlite;
#[cfg(test)]
pub mod memory;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{EntityKind, FieldMap, NaturalKey, PersistedRecord};

pub use sqlite::SqliteStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("database schema has {pending} pending migration(s); run `heritage-sync migrate` first")]
    SchemaOutdated { pending: usize },
    #[error("{kind} row {id} has an invalid natural key: {reason}")]
    InvalidRow {
        kind: EntityKind,
        id: i64,
        reason: String,
    },
    #[error("{kind} '{key}' not found")]
    NotFound { kind: EntityKind, key: NaturalKey },
    #[error("invalid key '{key}' for {kind}: {reason}")]
    InvalidKey {
        kind: EntityKind,
        key: NaturalKey,
        reason: String,
    },
}

/// Opens transactions against a content database
#[async_trait]
pub trait Store: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError>;
}

/// Transaction-scoped access to the content tables
///
/// Dropping a transaction without calling [`StoreTransaction::commit`]
/// discards its writes.
#[async_trait]
pub trait StoreTransaction: Send {
    /// All rows of a kind, ordered by surrogate id
    async fn list(&mut self, kind: EntityKind) -> Result<Vec<PersistedRecord>, StoreError>;

    /// Insert a row and return its surrogate id
    async fn create(&mut self, kind: EntityKind, fields: &FieldMap) -> Result<i64, StoreError>;

    /// Overwrite the given fields of the row identified by `key`
    async fn update(
        &mut self,
        kind: EntityKind,
        key: &NaturalKey,
        fields: &FieldMap,
    ) -> Result<(), StoreError>;

    async fn delete(&mut self, kind: EntityKind, key: &NaturalKey) -> Result<(), StoreError>;

    async fn exists(&mut self, kind: EntityKind, key: &NaturalKey) -> Result<bool, StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}
