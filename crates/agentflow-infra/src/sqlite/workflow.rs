//! SQLite workflow definition repository.
//!
//! Definitions are stored as JSON blobs keyed by `(id, version)`. Status and
//! timestamps live in their own columns and win over the blob on read, so a
//! lifecycle change is a single-column update.

use agentflow_core::repository::WorkflowRepository;
use agentflow_types::error::RepositoryError;
use agentflow_types::workflow::{WorkflowDefinition, WorkflowStatus};
use chrono::Utc;
use sqlx::Row;
use uuid::Uuid;

use super::store::{
    SqliteWorkflowStore, db_error, format_datetime, from_json, parse_datetime, parse_status,
    to_json,
};

// ---------------------------------------------------------------------------
// Internal row types
// ---------------------------------------------------------------------------

struct DefinitionRow {
    definition: String,
    status: String,
    created_at: String,
    updated_at: String,
}

impl DefinitionRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            definition: row.try_get("definition")?,
            status: row.try_get("status")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn into_definition(self) -> Result<WorkflowDefinition, RepositoryError> {
        let mut def: WorkflowDefinition = from_json("definition", &self.definition)?;
        def.status = parse_status(&self.status)?;
        def.created_at = parse_datetime(&self.created_at)?;
        def.updated_at = parse_datetime(&self.updated_at)?;
        Ok(def)
    }
}

fn collect(rows: &[sqlx::sqlite::SqliteRow]) -> Result<Vec<WorkflowDefinition>, RepositoryError> {
    let mut defs = Vec::with_capacity(rows.len());
    for row in rows {
        let r = DefinitionRow::from_row(row).map_err(db_error)?;
        defs.push(r.into_definition()?);
    }
    Ok(defs)
}

const LATEST_VERSIONS: &str = r#"SELECT d.definition, d.status, d.created_at, d.updated_at
    FROM workflow_definitions d
    WHERE d.version = (SELECT MAX(version) FROM workflow_definitions WHERE id = d.id)"#;

// ---------------------------------------------------------------------------
// WorkflowRepository impl
// ---------------------------------------------------------------------------

impl WorkflowRepository for SqliteWorkflowStore {
    async fn insert_definition(&self, def: &WorkflowDefinition) -> Result<(), RepositoryError> {
        let definition_json = to_json(def)?;

        sqlx::query(
            r#"INSERT INTO workflow_definitions
               (id, version, name, status, definition, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(def.id.to_string())
        .bind(def.version as i64)
        .bind(&def.name)
        .bind(def.status.to_string())
        .bind(&definition_json)
        .bind(format_datetime(&def.created_at))
        .bind(format_datetime(&def.updated_at))
        .execute(&self.pool.writer)
        .await
        .map_err(db_error)?;

        Ok(())
    }

    async fn set_definition_status(
        &self,
        id: &Uuid,
        version: u32,
        status: WorkflowStatus,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            "UPDATE workflow_definitions SET status = ?, updated_at = ? WHERE id = ? AND version = ?",
        )
        .bind(status.to_string())
        .bind(format_datetime(&Utc::now()))
        .bind(id.to_string())
        .bind(version as i64)
        .execute(&self.pool.writer)
        .await
        .map_err(db_error)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn get_definition(
        &self,
        id: &Uuid,
        version: Option<u32>,
    ) -> Result<Option<WorkflowDefinition>, RepositoryError> {
        let row = match version {
            Some(v) => {
                sqlx::query(
                    "SELECT definition, status, created_at, updated_at FROM workflow_definitions WHERE id = ? AND version = ?",
                )
                .bind(id.to_string())
                .bind(v as i64)
                .fetch_optional(&self.pool.reader)
                .await
            }
            None => {
                sqlx::query(
                    "SELECT definition, status, created_at, updated_at FROM workflow_definitions WHERE id = ? ORDER BY version DESC LIMIT 1",
                )
                .bind(id.to_string())
                .fetch_optional(&self.pool.reader)
                .await
            }
        }
        .map_err(db_error)?;

        match row {
            Some(row) => {
                let r = DefinitionRow::from_row(&row).map_err(db_error)?;
                Ok(Some(r.into_definition()?))
            }
            None => Ok(None),
        }
    }

    async fn list_definitions(
        &self,
        status: Option<WorkflowStatus>,
    ) -> Result<Vec<WorkflowDefinition>, RepositoryError> {
        let sql = match status {
            Some(_) => format!("{LATEST_VERSIONS} AND d.status = ? ORDER BY d.updated_at DESC"),
            None => format!("{LATEST_VERSIONS} ORDER BY d.updated_at DESC"),
        };
        let mut query = sqlx::query(&sql);
        if let Some(s) = status {
            query = query.bind(s.to_string());
        }
        let rows = query
            .fetch_all(&self.pool.reader)
            .await
            .map_err(db_error)?;

        collect(&rows)
    }

    async fn delete_definition(&self, id: &Uuid) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM workflow_definitions WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool.writer)
            .await
            .map_err(db_error)?;

        Ok(result.rows_affected() > 0)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
