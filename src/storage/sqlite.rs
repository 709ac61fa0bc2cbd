//! SQLite storage implementation.
//!
//! Provides persistent storage using SQLite database. Records live in one
//! `jobs` table partitioned by namespace. The lock counter has its own
//! column so it can be incremented atomically; every other field is kept
//! in the JSON document.

use async_trait::async_trait;
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;

use super::{CounterField, Filter, JobStore, StoreError};
use crate::core::record::JobRecord;
use crate::core::types::JobId;

/// SQLite storage backend.
///
/// Provides persistent storage with automatic schema migration.
pub struct SqliteStore {
    pool: SqlitePool,
    namespace: String,
}

/// A bound parameter for a dynamically built filter clause.
enum SqlValue {
    Text(String),
    Int(i64),
    Real(f64),
}

impl SqliteStore {
    /// Open (or create) the database at `path` and use `namespace`.
    ///
    /// Creates the database file if it doesn't exist and runs migrations.
    pub async fn new(path: impl AsRef<Path>, namespace: impl Into<String>) -> Result<Self, StoreError> {
        let path_str = path.as_ref().to_string_lossy();
        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path_str))
            .map_err(|e| StoreError::Other(e.to_string()))?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Other(e.to_string()))?;

        let store = Self {
            pool,
            namespace: namespace.into(),
        };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Create an in-memory SQLite database (useful for testing).
    pub async fn in_memory(namespace: impl Into<String>) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| StoreError::Other(e.to_string()))?;

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Other(e.to_string()))?;

        let store = Self {
            pool,
            namespace: namespace.into(),
        };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Run database migrations.
    async fn run_migrations(&self) -> Result<(), StoreError> {
        let schema = include_str!("../../migrations/001_initial_schema.sql");
        sqlx::raw_sql(schema)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Other(format!("migration failed: {}", e)))?;
        Ok(())
    }

    /// Translate a filter into a WHERE fragment and its parameters.
    ///
    /// Fields with their own column are compared directly, anything else
    /// goes through `json_extract` on the document.
    fn filter_clause(filter: &Filter) -> Result<(String, Vec<SqlValue>), StoreError> {
        let Filter::Eq { field, value } = filter else {
            return Ok((String::new(), Vec::new()));
        };

        let (target, mut params) = match field.as_str() {
            "id" => ("id".to_string(), Vec::new()),
            "jobName" => ("job_name".to_string(), Vec::new()),
            "locks" => ("locks".to_string(), Vec::new()),
            other => (
                "json_extract(document, ?)".to_string(),
                vec![SqlValue::Text(format!("$.{}", other))],
            ),
        };

        let clause = match value {
            Value::Null => format!(" AND {} IS NULL", target),
            Value::String(s) => {
                params.push(SqlValue::Text(s.clone()));
                format!(" AND {} = ?", target)
            }
            Value::Bool(b) => {
                params.push(SqlValue::Int(i64::from(*b)));
                format!(" AND {} = ?", target)
            }
            Value::Number(n) => {
                match n.as_i64() {
                    Some(i) => params.push(SqlValue::Int(i)),
                    None => params.push(SqlValue::Real(n.as_f64().unwrap_or(f64::NAN))),
                }
                format!(" AND {} = ?", target)
            }
            Value::Array(_) | Value::Object(_) => {
                return Err(StoreError::Other(format!(
                    "unsupported filter value for field '{}'",
                    field
                )));
            }
        };

        Ok((clause, params))
    }

    async fn fetch_rows(&self, filter: &Filter) -> Result<Vec<(String, i64, String)>, StoreError> {
        let (clause, params) = Self::filter_clause(filter)?;
        let sql = format!(
            "SELECT id, locks, document FROM jobs WHERE namespace = ?{} ORDER BY created_at, id",
            clause
        );

        let mut query = sqlx::query_as::<_, (String, i64, String)>(&sql).bind(&self.namespace);
        for param in params {
            query = match param {
                SqlValue::Text(s) => query.bind(s),
                SqlValue::Int(i) => query.bind(i),
                SqlValue::Real(f) => query.bind(f),
            };
        }

        query
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::Other(e.to_string()))
    }
}

/// Rebuild a record from its document and authoritative lock column.
fn row_to_record(locks: i64, document: &str) -> Result<JobRecord, StoreError> {
    let mut record: JobRecord = serde_json::from_str(document)?;
    record.locks = u32::try_from(locks.max(0)).unwrap_or(u32::MAX);
    Ok(record)
}

#[async_trait]
impl JobStore for SqliteStore {
    async fn insert(&self, record: JobRecord) -> Result<(), StoreError> {
        let document = serde_json::to_string(&record)?;
        let result = sqlx::query(
            r#"
            INSERT INTO jobs (namespace, id, job_name, start_time, created_at, locks, document)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&self.namespace)
        .bind(record.id.as_str())
        .bind(&record.job_name)
        .bind(record.start_time)
        .bind(record.created_at)
        .bind(i64::from(record.locks))
        .bind(document)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(StoreError::DuplicateKey(format!("job: {}", record.id)))
            }
            Err(e) => Err(StoreError::Other(e.to_string())),
        }
    }

    /// Rows whose document no longer deserializes are logged and skipped.
    async fn find_all(&self, filter: &Filter) -> Result<Vec<JobRecord>, StoreError> {
        let rows = self.fetch_rows(filter).await?;
        let mut records = Vec::with_capacity(rows.len());
        for (id, locks, document) in rows {
            match row_to_record(locks, &document) {
                Ok(record) => records.push(record),
                Err(e) => {
                    tracing::warn!(
                        record_id = %id,
                        namespace = %self.namespace,
                        error = %e,
                        "Skipping unreadable record"
                    );
                }
            }
        }
        Ok(records)
    }

    async fn find_by_id(&self, id: &JobId) -> Result<Option<JobRecord>, StoreError> {
        let row: Option<(i64, String)> =
            sqlx::query_as("SELECT locks, document FROM jobs WHERE namespace = ? AND id = ?")
                .bind(&self.namespace)
                .bind(id.as_str())
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| StoreError::Other(e.to_string()))?;

        row.map(|(locks, document)| row_to_record(locks, &document))
            .transpose()
    }

    async fn delete_by_id(&self, id: &JobId) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM jobs WHERE namespace = ? AND id = ?")
            .bind(&self.namespace)
            .bind(id.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Other(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_all(&self, filter: &Filter) -> Result<u64, StoreError> {
        let (clause, params) = Self::filter_clause(filter)?;
        let sql = format!("DELETE FROM jobs WHERE namespace = ?{}", clause);

        let mut query = sqlx::query(&sql).bind(&self.namespace);
        for param in params {
            query = match param {
                SqlValue::Text(s) => query.bind(s),
                SqlValue::Int(i) => query.bind(i),
                SqlValue::Real(f) => query.bind(f),
            };
        }

        let result = query
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Other(e.to_string()))?;
        Ok(result.rows_affected())
    }

    async fn atomic_increment(
        &self,
        id: &JobId,
        field: CounterField,
        delta: i64,
    ) -> Result<Option<JobRecord>, StoreError> {
        let sql = match field {
            CounterField::Locks => {
                "UPDATE jobs SET locks = MAX(locks + ?, 0) WHERE namespace = ? AND id = ? RETURNING locks, document"
            }
        };

        let row: Option<(i64, String)> = sqlx::query_as(sql)
            .bind(delta)
            .bind(&self.namespace)
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Other(e.to_string()))?;

        row.map(|(locks, document)| row_to_record(locks, &document))
            .transpose()
    }

    fn namespace(&self) -> Option<&str> {
        Some(&self.namespace)
    }
}
