//! SQLite execution repository: executions, interactions and node runs.
//!
//! Execution state, input and output are JSON text columns. The one-pending
//! interaction rule is enforced by a partial unique index, and responding is
//! a compare-and-set `UPDATE ... WHERE status = 'pending'`.

use agentflow_core::repository::ExecutionRepository;
use agentflow_types::error::RepositoryError;
use agentflow_types::execution::{
    Execution, ExecutionFilter, ExecutionStatus, Interaction, InteractionStatus, NodeRun,
};
use chrono::{DateTime, Utc};
use sqlx::Row;
use uuid::Uuid;

use super::store::{
    SqliteWorkflowStore, db_error, format_datetime, from_json, from_opt_json, parse_datetime,
    parse_opt_datetime, parse_status, parse_uuid, to_json,
};

// ---------------------------------------------------------------------------
// Internal row types
// ---------------------------------------------------------------------------

struct ExecutionRow {
    id: String,
    workflow_id: String,
    workflow_version: i64,
    status: String,
    current_node: Option<String>,
    state: String,
    input: String,
    output: Option<String>,
    error: Option<String>,
    created_by: Option<String>,
    created_at: String,
    updated_at: String,
    started_at: Option<String>,
    finished_at: Option<String>,
}

impl ExecutionRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            workflow_id: row.try_get("workflow_id")?,
            workflow_version: row.try_get("workflow_version")?,
            status: row.try_get("status")?,
            current_node: row.try_get("current_node")?,
            state: row.try_get("state")?,
            input: row.try_get("input")?,
            output: row.try_get("output")?,
            error: row.try_get("error")?,
            created_by: row.try_get("created_by")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            started_at: row.try_get("started_at")?,
            finished_at: row.try_get("finished_at")?,
        })
    }

    fn into_execution(self) -> Result<Execution, RepositoryError> {
        Ok(Execution {
            id: parse_uuid(&self.id)?,
            workflow_id: parse_uuid(&self.workflow_id)?,
            workflow_version: self.workflow_version as u32,
            status: parse_status(&self.status)?,
            current_node: self.current_node,
            state: from_json("state", &self.state)?,
            input: from_json("input", &self.input)?,
            output: from_opt_json("output", self.output.as_deref())?,
            error: self.error,
            created_by: self.created_by,
            created_at: parse_datetime(&self.created_at)?,
            updated_at: parse_datetime(&self.updated_at)?,
            started_at: parse_opt_datetime(self.started_at.as_deref())?,
            finished_at: parse_opt_datetime(self.finished_at.as_deref())?,
        })
    }
}

struct InteractionRow {
    id: String,
    execution_id: String,
    node_id: String,
    prompt: String,
    input_schema: Option<String>,
    status: String,
    response: Option<String>,
    created_at: String,
    responded_at: Option<String>,
    timeout_at: Option<String>,
}

impl InteractionRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            execution_id: row.try_get("execution_id")?,
            node_id: row.try_get("node_id")?,
            prompt: row.try_get("prompt")?,
            input_schema: row.try_get("input_schema")?,
            status: row.try_get("status")?,
            response: row.try_get("response")?,
            created_at: row.try_get("created_at")?,
            responded_at: row.try_get("responded_at")?,
            timeout_at: row.try_get("timeout_at")?,
        })
    }

    fn into_interaction(self) -> Result<Interaction, RepositoryError> {
        Ok(Interaction {
            id: parse_uuid(&self.id)?,
            execution_id: parse_uuid(&self.execution_id)?,
            node_id: self.node_id,
            prompt: self.prompt,
            input_schema: from_opt_json("input_schema", self.input_schema.as_deref())?,
            status: parse_status(&self.status)?,
            response: from_opt_json("response", self.response.as_deref())?,
            created_at: parse_datetime(&self.created_at)?,
            responded_at: parse_opt_datetime(self.responded_at.as_deref())?,
            timeout_at: parse_opt_datetime(self.timeout_at.as_deref())?,
        })
    }
}

struct NodeRunRow {
    id: String,
    execution_id: String,
    node_id: String,
    attempt: i64,
    status: String,
    error: Option<String>,
    started_at: String,
    finished_at: Option<String>,
    duration_ms: Option<i64>,
}

impl NodeRunRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            execution_id: row.try_get("execution_id")?,
            node_id: row.try_get("node_id")?,
            attempt: row.try_get("attempt")?,
            status: row.try_get("status")?,
            error: row.try_get("error")?,
            started_at: row.try_get("started_at")?,
            finished_at: row.try_get("finished_at")?,
            duration_ms: row.try_get("duration_ms")?,
        })
    }

    fn into_node_run(self) -> Result<NodeRun, RepositoryError> {
        Ok(NodeRun {
            id: parse_uuid(&self.id)?,
            execution_id: parse_uuid(&self.execution_id)?,
            node_id: self.node_id,
            attempt: self.attempt as u32,
            status: parse_status(&self.status)?,
            error: self.error,
            started_at: parse_datetime(&self.started_at)?,
            finished_at: parse_opt_datetime(self.finished_at.as_deref())?,
            duration_ms: self.duration_ms.map(|ms| ms as u64),
        })
    }
}

fn collect_interactions(
    rows: &[sqlx::sqlite::SqliteRow],
) -> Result<Vec<Interaction>, RepositoryError> {
    let mut interactions = Vec::with_capacity(rows.len());
    for row in rows {
        let r = InteractionRow::from_row(row).map_err(db_error)?;
        interactions.push(r.into_interaction()?);
    }
    Ok(interactions)
}

const TERMINAL: [ExecutionStatus; 3] = [
    ExecutionStatus::Completed,
    ExecutionStatus::Failed,
    ExecutionStatus::Cancelled,
];

// ---------------------------------------------------------------------------
// ExecutionRepository impl
// ---------------------------------------------------------------------------

impl ExecutionRepository for SqliteWorkflowStore {
    async fn create_execution(&self, execution: &Execution) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"INSERT INTO executions
               (id, workflow_id, workflow_version, status, current_node, state, input,
                output, error, created_by, created_at, updated_at, started_at, finished_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(execution.id.to_string())
        .bind(execution.workflow_id.to_string())
        .bind(execution.workflow_version as i64)
        .bind(execution.status.to_string())
        .bind(&execution.current_node)
        .bind(to_json(&execution.state)?)
        .bind(to_json(&execution.input)?)
        .bind(execution.output.as_ref().map(to_json).transpose()?)
        .bind(&execution.error)
        .bind(&execution.created_by)
        .bind(format_datetime(&execution.created_at))
        .bind(format_datetime(&execution.updated_at))
        .bind(execution.started_at.as_ref().map(format_datetime))
        .bind(execution.finished_at.as_ref().map(format_datetime))
        .execute(&self.pool.writer)
        .await
        .map_err(db_error)?;

        Ok(())
    }

    async fn update_execution(&self, execution: &Execution) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            r#"UPDATE executions SET
                 status = ?, current_node = ?, state = ?, output = ?, error = ?,
                 updated_at = ?, started_at = ?, finished_at = ?
               WHERE id = ?"#,
        )
        .bind(execution.status.to_string())
        .bind(&execution.current_node)
        .bind(to_json(&execution.state)?)
        .bind(execution.output.as_ref().map(to_json).transpose()?)
        .bind(&execution.error)
        .bind(format_datetime(&execution.updated_at))
        .bind(execution.started_at.as_ref().map(format_datetime))
        .bind(execution.finished_at.as_ref().map(format_datetime))
        .bind(execution.id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(db_error)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn get_execution(&self, id: &Uuid) -> Result<Option<Execution>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM executions WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(db_error)?;

        match row {
            Some(row) => {
                let r = ExecutionRow::from_row(&row).map_err(db_error)?;
                Ok(Some(r.into_execution()?))
            }
            None => Ok(None),
        }
    }

    async fn list_executions(
        &self,
        filter: &ExecutionFilter,
    ) -> Result<Vec<Execution>, RepositoryError> {
        let mut sql = String::from("SELECT * FROM executions WHERE 1 = 1");
        if filter.workflow_id.is_some() {
            sql.push_str(" AND workflow_id = ?");
        }
        if filter.status.is_some() {
            sql.push_str(" AND status = ?");
        }
        sql.push_str(" ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?");

        let mut query = sqlx::query(&sql);
        if let Some(workflow_id) = filter.workflow_id {
            query = query.bind(workflow_id.to_string());
        }
        if let Some(status) = filter.status {
            query = query.bind(status.to_string());
        }
        let rows = query
            .bind(filter.limit as i64)
            .bind(filter.skip as i64)
            .fetch_all(&self.pool.reader)
            .await
            .map_err(db_error)?;

        let mut executions = Vec::with_capacity(rows.len());
        for row in &rows {
            let r = ExecutionRow::from_row(row).map_err(db_error)?;
            executions.push(r.into_execution()?);
        }
        Ok(executions)
    }

    async fn count_unfinished_executions(&self, workflow_id: &Uuid) -> Result<u64, RepositoryError> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM executions WHERE workflow_id = ? AND status NOT IN (?, ?, ?)",
        )
        .bind(workflow_id.to_string())
        .bind(TERMINAL[0].to_string())
        .bind(TERMINAL[1].to_string())
        .bind(TERMINAL[2].to_string())
        .fetch_one(&self.pool.reader)
        .await
        .map_err(db_error)?;

        let n: i64 = row.try_get("n").map_err(db_error)?;
        Ok(n as u64)
    }

    // -- Interactions --

    async fn create_interaction(&self, interaction: &Interaction) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"INSERT INTO interactions
               (id, execution_id, node_id, prompt, input_schema, status, response,
                created_at, responded_at, timeout_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(interaction.id.to_string())
        .bind(interaction.execution_id.to_string())
        .bind(&interaction.node_id)
        .bind(&interaction.prompt)
        .bind(interaction.input_schema.as_ref().map(to_json).transpose()?)
        .bind(interaction.status.to_string())
        .bind(interaction.response.as_ref().map(to_json).transpose()?)
        .bind(format_datetime(&interaction.created_at))
        .bind(interaction.responded_at.as_ref().map(format_datetime))
        .bind(interaction.timeout_at.as_ref().map(format_datetime))
        .execute(&self.pool.writer)
        .await
        .map_err(db_error)?;

        Ok(())
    }

    async fn get_interaction(&self, id: &Uuid) -> Result<Option<Interaction>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM interactions WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(db_error)?;

        match row {
            Some(row) => {
                let r = InteractionRow::from_row(&row).map_err(db_error)?;
                Ok(Some(r.into_interaction()?))
            }
            None => Ok(None),
        }
    }

    async fn list_interactions(
        &self,
        execution_id: &Uuid,
    ) -> Result<Vec<Interaction>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT * FROM interactions WHERE execution_id = ? ORDER BY created_at ASC, id ASC",
        )
        .bind(execution_id.to_string())
        .fetch_all(&self.pool.reader)
        .await
        .map_err(db_error)?;

        collect_interactions(&rows)
    }

    async fn list_pending_interactions(
        &self,
        execution_id: Option<&Uuid>,
    ) -> Result<Vec<Interaction>, RepositoryError> {
        let rows = match execution_id {
            Some(id) => {
                sqlx::query(
                    "SELECT * FROM interactions WHERE status = 'pending' AND execution_id = ? ORDER BY created_at ASC, id ASC",
                )
                .bind(id.to_string())
                .fetch_all(&self.pool.reader)
                .await
            }
            None => {
                sqlx::query(
                    "SELECT * FROM interactions WHERE status = 'pending' ORDER BY created_at ASC, id ASC",
                )
                .fetch_all(&self.pool.reader)
                .await
            }
        }
        .map_err(db_error)?;

        collect_interactions(&rows)
    }

    async fn respond_interaction(
        &self,
        id: &Uuid,
        response: &serde_json::Value,
        responded_at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "UPDATE interactions SET status = ?, response = ?, responded_at = ? WHERE id = ? AND status = 'pending'",
        )
        .bind(InteractionStatus::Responded.to_string())
        .bind(to_json(response)?)
        .bind(format_datetime(&responded_at))
        .bind(id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(db_error)?;

        Ok(result.rows_affected() > 0)
    }

    async fn close_interaction(
        &self,
        id: &Uuid,
        status: InteractionStatus,
    ) -> Result<bool, RepositoryError> {
        let result =
            sqlx::query("UPDATE interactions SET status = ? WHERE id = ? AND status = 'pending'")
                .bind(status.to_string())
                .bind(id.to_string())
                .execute(&self.pool.writer)
                .await
                .map_err(db_error)?;

        Ok(result.rows_affected() > 0)
    }

    // -- Node runs --

    async fn save_node_run(&self, run: &NodeRun) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"INSERT INTO node_runs
               (id, execution_id, node_id, attempt, status, error, started_at, finished_at, duration_ms)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(id) DO UPDATE SET
                 status = excluded.status,
                 error = excluded.error,
                 finished_at = excluded.finished_at,
                 duration_ms = excluded.duration_ms"#,
        )
        .bind(run.id.to_string())
        .bind(run.execution_id.to_string())
        .bind(&run.node_id)
        .bind(run.attempt as i64)
        .bind(run.status.to_string())
        .bind(&run.error)
        .bind(format_datetime(&run.started_at))
        .bind(run.finished_at.as_ref().map(format_datetime))
        .bind(run.duration_ms.map(|ms| ms as i64))
        .execute(&self.pool.writer)
        .await
        .map_err(db_error)?;

        Ok(())
    }

    async fn list_node_runs(&self, execution_id: &Uuid) -> Result<Vec<NodeRun>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT * FROM node_runs WHERE execution_id = ? ORDER BY started_at ASC, id ASC",
        )
        .bind(execution_id.to_string())
        .fetch_all(&self.pool.reader)
        .await
        .map_err(db_error)?;

        let mut runs = Vec::with_capacity(rows.len());
        for row in &rows {
            let r = NodeRunRow::from_row(row).map_err(db_error)?;
            runs.push(r.into_node_run()?);
        }
        Ok(runs)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::store::test_store;
    use agentflow_types::execution::{ExecutionState, NodeRunStatus};
    use serde_json::json;

    fn sample_execution(workflow_id: Uuid) -> Execution {
        let now = Utc::now();
        Execution {
            id: Uuid::now_v7(),
            workflow_id,
            workflow_version: 1,
            status: ExecutionStatus::Pending,
            current_node: Some("start".to_string()),
            state: json!({ "ticket": "printer on fire" }).as_object().cloned().unwrap(),
            input: json!({ "ticket": "printer on fire" }).as_object().cloned().unwrap(),
            output: None,
            error: None,
            created_by: Some("cli".to_string()),
            created_at: now,
            updated_at: now,
            started_at: None,
            finished_at: None,
        }
    }

    fn sample_interaction(execution_id: Uuid) -> Interaction {
        Interaction {
            id: Uuid::now_v7(),
            execution_id,
            node_id: "review".to_string(),
            prompt: "Approve?".to_string(),
            input_schema: Some(json!({ "type": "object" })),
            status: InteractionStatus::Pending,
            response: None,
            created_at: Utc::now(),
            responded_at: None,
            timeout_at: None,
        }
    }

    #[tokio::test]
    async fn test_create_get_update_execution() {
        let (store, _dir) = test_store().await;
        let mut exec = sample_execution(Uuid::now_v7());
        store.create_execution(&exec).await.unwrap();

        let loaded = store.get_execution(&exec.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, ExecutionStatus::Pending);
        assert_eq!(loaded.state["ticket"], "printer on fire");
        assert_eq!(loaded.created_by.as_deref(), Some("cli"));

        exec.status = ExecutionStatus::Completed;
        exec.current_node = None;
        exec.output = Some(ExecutionState::from_iter([("done".to_string(), json!(true))]));
        exec.finished_at = Some(Utc::now());
        store.update_execution(&exec).await.unwrap();

        let loaded = store.get_execution(&exec.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, ExecutionStatus::Completed);
        assert!(loaded.current_node.is_none());
        assert_eq!(loaded.output.unwrap()["done"], true);
        assert!(loaded.finished_at.is_some());
    }

    #[tokio::test]
    async fn test_update_missing_execution() {
        let (store, _dir) = test_store().await;
        let err = store
            .update_execution(&sample_execution(Uuid::now_v7()))
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound));
    }

    #[tokio::test]
    async fn test_list_and_count_executions() {
        let (store, _dir) = test_store().await;
        let workflow_id = Uuid::now_v7();
        let mut ids = Vec::new();
        for status in [
            ExecutionStatus::Pending,
            ExecutionStatus::Paused,
            ExecutionStatus::Completed,
        ] {
            let mut exec = sample_execution(workflow_id);
            exec.status = status;
            store.create_execution(&exec).await.unwrap();
            ids.push(exec.id);
        }
        store
            .create_execution(&sample_execution(Uuid::now_v7()))
            .await
            .unwrap();

        let filter = ExecutionFilter {
            workflow_id: Some(workflow_id),
            ..Default::default()
        };
        let listed = store.list_executions(&filter).await.unwrap();
        assert_eq!(listed.len(), 3);
        // Newest first.
        assert_eq!(listed[0].id, ids[2]);

        let paused = store
            .list_executions(&ExecutionFilter {
                status: Some(ExecutionStatus::Paused),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(paused.len(), 1);
        assert_eq!(paused[0].id, ids[1]);

        let page = store
            .list_executions(&ExecutionFilter {
                skip: 1,
                limit: 2,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(page.len(), 2);

        assert_eq!(store.count_unfinished_executions(&workflow_id).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_one_pending_interaction_per_execution() {
        let (store, _dir) = test_store().await;
        let exec_id = Uuid::now_v7();
        let first = sample_interaction(exec_id);
        store.create_interaction(&first).await.unwrap();

        let err = store
            .create_interaction(&sample_interaction(exec_id))
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict(_)), "got {err:?}");

        // Once answered, a new one may be opened.
        assert!(store
            .respond_interaction(&first.id, &json!({ "approved": true }), Utc::now())
            .await
            .unwrap());
        store
            .create_interaction(&sample_interaction(exec_id))
            .await
            .unwrap();
        assert_eq!(store.list_interactions(&exec_id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_respond_is_compare_and_set() {
        let (store, _dir) = test_store().await;
        let interaction = sample_interaction(Uuid::now_v7());
        store.create_interaction(&interaction).await.unwrap();

        assert!(store
            .respond_interaction(&interaction.id, &json!({ "approved": true }), Utc::now())
            .await
            .unwrap());
        assert!(!store
            .respond_interaction(&interaction.id, &json!({ "approved": false }), Utc::now())
            .await
            .unwrap());

        let loaded = store.get_interaction(&interaction.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, InteractionStatus::Responded);
        assert_eq!(loaded.response, Some(json!({ "approved": true })));
        assert!(loaded.responded_at.is_some());
        assert_eq!(loaded.input_schema, Some(json!({ "type": "object" })));

        assert!(!store
            .close_interaction(&interaction.id, InteractionStatus::TimedOut)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_pending_interactions_filter() {
        let (store, _dir) = test_store().await;
        let (a, b) = (Uuid::now_v7(), Uuid::now_v7());
        let ia = sample_interaction(a);
        store.create_interaction(&ia).await.unwrap();
        store.create_interaction(&sample_interaction(b)).await.unwrap();

        assert_eq!(store.list_pending_interactions(None).await.unwrap().len(), 2);
        assert_eq!(store.list_pending_interactions(Some(&a)).await.unwrap().len(), 1);

        assert!(store
            .close_interaction(&ia.id, InteractionStatus::Cancelled)
            .await
            .unwrap());
        assert!(store.list_pending_interactions(Some(&a)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_node_run_upsert() {
        let (store, _dir) = test_store().await;
        let exec_id = Uuid::now_v7();
        let mut run = NodeRun {
            id: Uuid::now_v7(),
            execution_id: exec_id,
            node_id: "fetch".to_string(),
            attempt: 1,
            status: NodeRunStatus::Running,
            error: None,
            started_at: Utc::now(),
            finished_at: None,
            duration_ms: None,
        };
        store.save_node_run(&run).await.unwrap();

        run.status = NodeRunStatus::Failed;
        run.error = Some("tool 'fetch' timed out after 30s".to_string());
        run.finished_at = Some(Utc::now());
        run.duration_ms = Some(30_000);
        store.save_node_run(&run).await.unwrap();

        let runs = store.list_node_runs(&exec_id).await.unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].status, NodeRunStatus::Failed);
        assert_eq!(runs[0].duration_ms, Some(30_000));
        assert!(runs[0].error.as_deref().unwrap().contains("timed out"));
    }
}
