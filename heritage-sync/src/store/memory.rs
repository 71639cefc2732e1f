//! In-memory store for reconciler tests
//!
//! Transactions work on a copy of the state and publish it on commit. A
//! failure can be injected on the n-th mutating call to exercise rollback.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use super::{Store, StoreError, StoreTransaction};
use crate::models::{EntityKind, FieldMap, NaturalKey, PersistedRecord};
use crate::sync::resolver;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoryState {
    pub tables: BTreeMap<EntityKind, Vec<PersistedRecord>>,
    next_id: i64,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
    fail_on_write: Option<usize>,
    /// Mutating calls issued across all transactions
    writes: Arc<Mutex<usize>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the `n`-th mutating call (1-based) with a store error
    pub fn failing_on_write(mut self, n: usize) -> Self {
        self.fail_on_write = Some(n);
        self
    }

    pub fn snapshot(&self) -> MemoryState {
        self.state.lock().unwrap().clone()
    }

    pub fn write_count(&self) -> usize {
        *self.writes.lock().unwrap()
    }

    pub fn rows(&self, kind: EntityKind) -> Vec<PersistedRecord> {
        self.snapshot().tables.get(&kind).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError> {
        Ok(Box::new(MemoryTransaction {
            working: self.snapshot(),
            store: self.clone(),
        }))
    }
}

struct MemoryTransaction {
    working: MemoryState,
    store: MemoryStore,
}

impl MemoryTransaction {
    fn record_write(&self) -> Result<(), StoreError> {
        let mut writes = self.store.writes.lock().unwrap();
        *writes += 1;
        if self.store.fail_on_write == Some(*writes) {
            return Err(StoreError::Database(sqlx::Error::Protocol(format!(
                "injected failure on write {}",
                *writes
            ))));
        }
        Ok(())
    }

    fn position(&self, kind: EntityKind, key: &NaturalKey) -> Option<usize> {
        self.working
            .tables
            .get(&kind)
            .and_then(|rows| rows.iter().position(|r| &r.key == key))
    }
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    async fn list(&mut self, kind: EntityKind) -> Result<Vec<PersistedRecord>, StoreError> {
        Ok(self.working.tables.get(&kind).cloned().unwrap_or_default())
    }

    async fn create(&mut self, kind: EntityKind, fields: &FieldMap) -> Result<i64, StoreError> {
        self.record_write()?;
        let mut fields = fields.clone();
        let key = resolver::resolve_key(kind, &mut fields).map_err(|e| StoreError::InvalidRow {
            kind,
            id: 0,
            reason: e.to_string(),
        })?;
        if self.position(kind, &key).is_some() {
            return Err(StoreError::Database(sqlx::Error::Protocol(format!(
                "UNIQUE constraint failed: {} '{}'",
                kind, key
            ))));
        }

        self.working.next_id += 1;
        let id = self.working.next_id;
        let now = chrono::Utc::now().naive_utc();
        self.working.tables.entry(kind).or_default().push(PersistedRecord {
            id,
            kind,
            key,
            fields,
            created_at: Some(now),
            updated_at: Some(now),
        });
        Ok(id)
    }

    async fn update(
        &mut self,
        kind: EntityKind,
        key: &NaturalKey,
        fields: &FieldMap,
    ) -> Result<(), StoreError> {
        self.record_write()?;
        let idx = self.position(kind, key).ok_or_else(|| StoreError::NotFound {
            kind,
            key: key.clone(),
        })?;
        if let Some(row) = self.working.tables.get_mut(&kind).map(|rows| &mut rows[idx]) {
            for (name, value) in fields {
                row.fields.insert(name.clone(), value.clone());
            }
            row.updated_at = Some(chrono::Utc::now().naive_utc());
        }
        Ok(())
    }

    async fn delete(&mut self, kind: EntityKind, key: &NaturalKey) -> Result<(), StoreError> {
        self.record_write()?;
        let idx = self.position(kind, key).ok_or_else(|| StoreError::NotFound {
            kind,
            key: key.clone(),
        })?;
        if let Some(rows) = self.working.tables.get_mut(&kind) {
            rows.remove(idx);
        }
        Ok(())
    }

    async fn exists(&mut self, kind: EntityKind, key: &NaturalKey) -> Result<bool, StoreError> {
        Ok(self.position(kind, key).is_some())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let MemoryTransaction { working, store } = *self;
        *store.state.lock().unwrap() = working;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        Ok(())
    }
}
