//! The SQLite store and the row helpers shared by its port implementations.
//!
//! One `SqliteWorkflowStore` implements every repository port
//! (`WorkflowRepository`, `ExecutionRepository`, `CheckpointStore`), so the
//! engine can use it anywhere a `WorkflowStore` is required. The impls live
//! in `workflow.rs`, `execution.rs` and `checkpoint.rs`.

use std::str::FromStr;

use agentflow_types::error::RepositoryError;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use uuid::Uuid;

use super::pool::DatabasePool;

/// SQLite-backed implementation of every repository port.
#[derive(Clone)]
pub struct SqliteWorkflowStore {
    pub(crate) pool: DatabasePool,
}

impl SqliteWorkflowStore {
    /// Create a new store backed by the given database pool.
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Map a sqlx error onto the repository taxonomy.
///
/// Unique-key violations are conflicts; pool and I/O failures mean the
/// database could not be reached.
pub(crate) fn db_error(e: sqlx::Error) -> RepositoryError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            RepositoryError::Conflict(db.message().to_string())
        }
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            RepositoryError::Connection(e.to_string())
        }
        _ => RepositoryError::Query(e.to_string()),
    }
}

pub(crate) fn parse_uuid(s: &str) -> Result<Uuid, RepositoryError> {
    s.parse::<Uuid>()
        .map_err(|e| RepositoryError::Query(format!("invalid UUID: {e}")))
}

pub(crate) fn parse_datetime(s: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Query(format!("invalid datetime: {e}")))
}

pub(crate) fn parse_opt_datetime(s: Option<&str>) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    s.map(parse_datetime).transpose()
}

/// Fixed-width RFC 3339 so text ordering in SQL matches time ordering.
pub(crate) fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a status column through the type's `FromStr`.
pub(crate) fn parse_status<T>(s: &str) -> Result<T, RepositoryError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    s.parse::<T>()
        .map_err(|e| RepositoryError::Query(format!("invalid status column: {e}")))
}

pub(crate) fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<String, RepositoryError> {
    serde_json::to_string(value)
        .map_err(|e| RepositoryError::Query(format!("serialize column: {e}")))
}

pub(crate) fn from_json<T: DeserializeOwned>(column: &str, s: &str) -> Result<T, RepositoryError> {
    serde_json::from_str(s)
        .map_err(|e| RepositoryError::Query(format!("invalid {column} JSON: {e}")))
}

pub(crate) fn from_opt_json<T: DeserializeOwned>(
    column: &str,
    s: Option<&str>,
) -> Result<Option<T>, RepositoryError> {
    s.map(|s| from_json(column, s)).transpose()
}

#[cfg(test)]
pub(crate) async fn test_store() -> (SqliteWorkflowStore, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("test.db");
    let url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = DatabasePool::new(&url).await.unwrap();
    (SqliteWorkflowStore::new(pool), dir)
}
