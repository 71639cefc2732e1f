//! SQLite-backed content store

use async_trait::async_trait;
use chrono::NaiveDateTime;
use serde_json::Value;
use sqlx::sqlite::{SqliteArguments, SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use std::str::FromStr;
use std::time::Duration;

use super::{Store, StoreError, StoreTransaction};
use crate::models::{EntityKind, FieldMap, FieldSpec, FieldType, NaturalKey, PersistedRecord};
use crate::sync::resolver;

type SqliteQuery<'q> = sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>;

/// Reference fields are stored as foreign-key columns holding the target's id
const REFERENCE_COLUMNS: &[(EntityKind, &str, &str)] =
    &[(EntityKind::Sites, "category_name", "category_id")];

/// Content store over a SQLite pool
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Connect to `url`
    ///
    /// A read-write connection creates the database file if needed. A
    /// read-only connection never creates or writes anything, so a missing
    /// file is a connection error. A single connection is used: runs are
    /// sequential and in-memory databases are per-connection.
    pub async fn connect(
        url: &str,
        acquire_timeout: Duration,
        read_only: bool,
    ) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(!read_only)
            .read_only(read_only)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .acquire_timeout(acquire_timeout)
            .connect_with(options)
            .await?;

        log::debug!("Connected to {} (read-only: {})", url, read_only);
        Ok(Self { pool })
    }

    /// Connect to a fresh in-memory database with the schema applied
    #[cfg(test)]
    pub async fn in_memory() -> Self {
        let store = Self::connect("sqlite::memory:", Duration::from_secs(5), false)
            .await
            .unwrap();
        store.migrate().await.unwrap();
        store
    }

    /// Run a raw statement outside any transaction
    #[cfg(test)]
    pub async fn execute_raw(&self, sql: &str) {
        sqlx::query(sql).execute(&self.pool).await.unwrap();
    }

    /// Apply pending schema migrations
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Fail unless every migration has already been applied
    pub async fn check_schema(&self) -> Result<(), StoreError> {
        let applied: Vec<i64> =
            match sqlx::query_scalar("SELECT version FROM _sqlx_migrations WHERE success = 1")
                .fetch_all(&self.pool)
                .await
            {
                Ok(versions) => versions,
                // No migrations table: the schema was never applied
                Err(sqlx::Error::Database(_)) => Vec::new(),
                Err(e) => return Err(e.into()),
            };

        let pending = sqlx::migrate!("./migrations")
            .iter()
            .filter(|m| !m.migration_type.is_down_migration())
            .filter(|m| !applied.contains(&m.version))
            .count();
        if pending > 0 {
            return Err(StoreError::SchemaOutdated { pending });
        }
        Ok(())
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(SqliteTransaction { tx }))
    }
}

/// An open SQLite transaction; rolled back on drop unless committed
pub struct SqliteTransaction {
    tx: Transaction<'static, Sqlite>,
}

#[async_trait]
impl StoreTransaction for SqliteTransaction {
    async fn list(&mut self, kind: EntityKind) -> Result<Vec<PersistedRecord>, StoreError> {
        let columns: Vec<String> = kind.fields().iter().map(|f| select_expr(kind, f)).collect();
        let sql = format!(
            "SELECT t.id, {}, t.created_at, t.updated_at FROM {} t ORDER BY t.id",
            columns.join(", "),
            kind.table_name()
        );

        let rows = sqlx::query(&sql).fetch_all(&mut *self.tx).await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let id: i64 = row.try_get("id")?;
            let mut fields = FieldMap::new();
            for spec in kind.fields() {
                fields.insert(spec.name.to_string(), decode_column(&row, spec)?);
            }

            let key = resolver::resolve_key(kind, &mut fields).map_err(|e| StoreError::InvalidRow {
                kind,
                id,
                reason: e.to_string(),
            })?;

            records.push(PersistedRecord {
                id,
                kind,
                key,
                fields,
                created_at: row.try_get::<Option<NaiveDateTime>, _>("created_at")?,
                updated_at: row.try_get::<Option<NaiveDateTime>, _>("updated_at")?,
            });
        }

        log::debug!("Loaded {} {} rows", records.len(), kind);
        Ok(records)
    }

    async fn create(&mut self, kind: EntityKind, fields: &FieldMap) -> Result<i64, StoreError> {
        let specs = kind.fields();
        let columns: Vec<&str> = specs.iter().map(|f| column_name(kind, f)).collect();
        let values: Vec<String> = specs.iter().map(|f| value_expr(kind, f)).collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            kind.table_name(),
            columns.join(", "),
            values.join(", ")
        );

        let mut query = sqlx::query(&sql);
        for spec in specs {
            query = bind_value(query, fields.get(spec.name).unwrap_or(&Value::Null));
        }

        let result = query.execute(&mut *self.tx).await?;
        Ok(result.last_insert_rowid())
    }

    async fn update(
        &mut self,
        kind: EntityKind,
        key: &NaturalKey,
        fields: &FieldMap,
    ) -> Result<(), StoreError> {
        let mut assignments = Vec::new();
        let mut values = Vec::new();
        for (name, value) in fields {
            match kind.field(name) {
                Some(spec) => {
                    assignments.push(format!("{} = {}", column_name(kind, spec), value_expr(kind, spec)));
                    values.push(value);
                }
                None => log::warn!("Ignoring unknown {} field '{}' on update", kind, name),
            }
        }
        assignments.push("updated_at = CURRENT_TIMESTAMP".to_string());

        let (predicate, key_values) = key_predicate(kind, key)?;
        let sql = format!(
            "UPDATE {} SET {} WHERE {}",
            kind.table_name(),
            assignments.join(", "),
            predicate
        );

        let mut query = sqlx::query(&sql);
        for value in values {
            query = bind_value(query, value);
        }
        for value in &key_values {
            query = bind_value(query, value);
        }

        let result = query.execute(&mut *self.tx).await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                kind,
                key: key.clone(),
            });
        }
        Ok(())
    }

    async fn delete(&mut self, kind: EntityKind, key: &NaturalKey) -> Result<(), StoreError> {
        let (predicate, key_values) = key_predicate(kind, key)?;
        let sql = format!("DELETE FROM {} WHERE {}", kind.table_name(), predicate);

        let mut query = sqlx::query(&sql);
        for value in &key_values {
            query = bind_value(query, value);
        }

        let result = query.execute(&mut *self.tx).await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                kind,
                key: key.clone(),
            });
        }
        Ok(())
    }

    async fn exists(&mut self, kind: EntityKind, key: &NaturalKey) -> Result<bool, StoreError> {
        let (predicate, key_values) = key_predicate(kind, key)?;
        let sql = format!("SELECT 1 FROM {} WHERE {} LIMIT 1", kind.table_name(), predicate);

        let mut query = sqlx::query(&sql);
        for value in &key_values {
            query = bind_value(query, value);
        }

        Ok(query.fetch_optional(&mut *self.tx).await?.is_some())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.rollback().await?;
        Ok(())
    }
}

fn reference_column(kind: EntityKind, field: &str) -> Option<&'static str> {
    REFERENCE_COLUMNS
        .iter()
        .find(|(k, f, _)| *k == kind && *f == field)
        .map(|(_, _, column)| *column)
}

fn column_name(kind: EntityKind, spec: &FieldSpec) -> &'static str {
    reference_column(kind, spec.name).unwrap_or(spec.name)
}

/// Column expression yielding the field value, resolving references to keys
fn select_expr(kind: EntityKind, spec: &FieldSpec) -> String {
    match (spec.references, reference_column(kind, spec.name)) {
        (Some(target), Some(column)) => format!(
            "(SELECT r.{key} FROM {table} r WHERE r.id = t.{column}) AS {field}",
            key = target.key_fields()[0],
            table = target.table_name(),
            column = column,
            field = spec.name
        ),
        _ => format!("t.{}", spec.name),
    }
}

/// Placeholder expression for writing the field, resolving keys to ids
fn value_expr(kind: EntityKind, spec: &FieldSpec) -> String {
    match (spec.references, reference_column(kind, spec.name)) {
        (Some(target), Some(_)) => format!(
            "(SELECT id FROM {} WHERE TRIM({}) = ?)",
            target.table_name(),
            target.key_fields()[0]
        ),
        _ => "?".to_string(),
    }
}

fn key_predicate(kind: EntityKind, key: &NaturalKey) -> Result<(String, Vec<Value>), StoreError> {
    let bindings = resolver::key_bindings(kind, key).map_err(|e| StoreError::InvalidKey {
        kind,
        key: key.clone(),
        reason: e.to_string(),
    })?;

    // Rows written outside this tool may carry untrimmed keys
    let predicate = bindings
        .iter()
        .map(|(name, value)| match value {
            Value::String(_) => format!("TRIM({}) = ?", name),
            _ => format!("{} = ?", name),
        })
        .collect::<Vec<_>>()
        .join(" AND ");
    let values = bindings.into_iter().map(|(_, v)| v).collect();

    Ok((predicate, values))
}

fn decode_column(row: &SqliteRow, spec: &FieldSpec) -> Result<Value, sqlx::Error> {
    let value = match spec.field_type {
        FieldType::Text | FieldType::Timestamp | FieldType::Json => row
            .try_get::<Option<String>, _>(spec.name)?
            .map(Value::String),
        FieldType::Integer => row.try_get::<Option<i64>, _>(spec.name)?.map(Value::from),
        FieldType::Real => row.try_get::<Option<f64>, _>(spec.name)?.map(Value::from),
        FieldType::Boolean => row.try_get::<Option<bool>, _>(spec.name)?.map(Value::Bool),
    };
    Ok(value.unwrap_or(Value::Null))
}

fn bind_value<'q>(query: SqliteQuery<'q>, value: &Value) -> SqliteQuery<'q> {
    match value {
        Value::Null => query.bind(None::<String>),
        Value::Bool(b) => query.bind(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => query.bind(i),
            None => query.bind(n.as_f64()),
        },
        Value::String(s) => query.bind(s.clone()),
        other => query.bind(other.to_string()),
    }
}
