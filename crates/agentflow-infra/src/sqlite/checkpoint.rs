//! SQLite checkpoint store.
//!
//! Each append is one INSERT inside a writer transaction, so readers see a
//! whole checkpoint or nothing. The `(execution_id, sequence)` primary key
//! rejects a second writer racing for the same sequence.

use agentflow_core::repository::CheckpointStore;
use agentflow_types::error::RepositoryError;
use agentflow_types::execution::Checkpoint;
use sqlx::Row;
use uuid::Uuid;

use super::store::{
    SqliteWorkflowStore, db_error, format_datetime, from_json, from_opt_json, parse_datetime,
    parse_uuid, to_json,
};

struct CheckpointRow {
    execution_id: String,
    sequence: i64,
    node_id: String,
    next_node_id: Option<String>,
    interrupt: Option<String>,
    state: String,
    created_at: String,
}

impl CheckpointRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            execution_id: row.try_get("execution_id")?,
            sequence: row.try_get("sequence")?,
            node_id: row.try_get("node_id")?,
            next_node_id: row.try_get("next_node_id")?,
            interrupt: row.try_get("interrupt")?,
            state: row.try_get("state")?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn into_checkpoint(self) -> Result<Checkpoint, RepositoryError> {
        Ok(Checkpoint {
            execution_id: parse_uuid(&self.execution_id)?,
            sequence: self.sequence as u64,
            node_id: self.node_id,
            next_node_id: self.next_node_id,
            interrupt: from_opt_json("interrupt", self.interrupt.as_deref())?,
            state: from_json("state", &self.state)?,
            created_at: parse_datetime(&self.created_at)?,
        })
    }
}

impl CheckpointStore for SqliteWorkflowStore {
    async fn append_checkpoint(&self, checkpoint: &Checkpoint) -> Result<(), RepositoryError> {
        let mut tx = self.pool.writer.begin().await.map_err(db_error)?;

        let row = sqlx::query(
            "SELECT COALESCE(MAX(sequence), 0) AS latest FROM checkpoints WHERE execution_id = ?",
        )
        .bind(checkpoint.execution_id.to_string())
        .fetch_one(&mut *tx)
        .await
        .map_err(db_error)?;
        let latest: i64 = row.try_get("latest").map_err(db_error)?;

        let expected = latest as u64 + 1;
        if checkpoint.sequence != expected {
            return Err(RepositoryError::Conflict(format!(
                "checkpoint sequence {} for execution {}, expected {expected}",
                checkpoint.sequence, checkpoint.execution_id
            )));
        }

        sqlx::query(
            r#"INSERT INTO checkpoints
               (execution_id, sequence, node_id, next_node_id, interrupt, state, created_at)
               VALUES (?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(checkpoint.execution_id.to_string())
        .bind(checkpoint.sequence as i64)
        .bind(&checkpoint.node_id)
        .bind(&checkpoint.next_node_id)
        .bind(checkpoint.interrupt.as_ref().map(to_json).transpose()?)
        .bind(to_json(&checkpoint.state)?)
        .bind(format_datetime(&checkpoint.created_at))
        .execute(&mut *tx)
        .await
        .map_err(db_error)?;

        tx.commit().await.map_err(db_error)?;
        Ok(())
    }

    async fn latest_checkpoint(
        &self,
        execution_id: &Uuid,
    ) -> Result<Option<Checkpoint>, RepositoryError> {
        let row = sqlx::query(
            "SELECT * FROM checkpoints WHERE execution_id = ? ORDER BY sequence DESC LIMIT 1",
        )
        .bind(execution_id.to_string())
        .fetch_optional(&self.pool.reader)
        .await
        .map_err(db_error)?;

        match row {
            Some(row) => {
                let r = CheckpointRow::from_row(&row).map_err(db_error)?;
                Ok(Some(r.into_checkpoint()?))
            }
            None => Ok(None),
        }
    }

    async fn list_checkpoints(
        &self,
        execution_id: &Uuid,
    ) -> Result<Vec<Checkpoint>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT * FROM checkpoints WHERE execution_id = ? ORDER BY sequence ASC",
        )
        .bind(execution_id.to_string())
        .fetch_all(&self.pool.reader)
        .await
        .map_err(db_error)?;

        let mut checkpoints = Vec::with_capacity(rows.len());
        for row in &rows {
            let r = CheckpointRow::from_row(row).map_err(db_error)?;
            checkpoints.push(r.into_checkpoint()?);
        }
        Ok(checkpoints)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::store::test_store;
    use agentflow_types::execution::{ExecutionState, InterruptRequest};
    use chrono::Utc;
    use serde_json::json;

    fn checkpoint(execution_id: Uuid, sequence: u64, node_id: &str) -> Checkpoint {
        Checkpoint {
            execution_id,
            sequence,
            node_id: node_id.to_string(),
            next_node_id: Some("next".to_string()),
            interrupt: None,
            state: json!({ "step": sequence }).as_object().cloned().unwrap(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_append_and_read_back() {
        let (store, _dir) = test_store().await;
        let id = Uuid::now_v7();
        assert!(store.latest_checkpoint(&id).await.unwrap().is_none());

        store.append_checkpoint(&checkpoint(id, 1, "start")).await.unwrap();
        let mut paused = checkpoint(id, 2, "review");
        paused.interrupt = Some(InterruptRequest {
            prompt: "Approve?".to_string(),
            input_schema: None,
            timeout_secs: Some(3600),
        });
        store.append_checkpoint(&paused).await.unwrap();

        let latest = store.latest_checkpoint(&id).await.unwrap().unwrap();
        assert_eq!(latest.sequence, 2);
        assert_eq!(latest.node_id, "review");
        assert_eq!(latest.state["step"], 2);
        assert_eq!(latest.interrupt.unwrap().timeout_secs, Some(3600));

        let all = store.list_checkpoints(&id).await.unwrap();
        assert_eq!(all.iter().map(|c| c.sequence).collect::<Vec<_>>(), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_sequence_gap_or_duplicate_conflicts() {
        let (store, _dir) = test_store().await;
        let id = Uuid::now_v7();
        store.append_checkpoint(&checkpoint(id, 1, "start")).await.unwrap();

        let dup = store.append_checkpoint(&checkpoint(id, 1, "start")).await.unwrap_err();
        assert!(matches!(dup, RepositoryError::Conflict(_)));

        let gap = store.append_checkpoint(&checkpoint(id, 3, "end")).await.unwrap_err();
        assert!(matches!(gap, RepositoryError::Conflict(_)));

        // The failed appends left nothing behind.
        assert_eq!(store.list_checkpoints(&id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_state_round_trips() {
        let (store, _dir) = test_store().await;
        let id = Uuid::now_v7();
        let mut cp = checkpoint(id, 1, "start");
        cp.state = ExecutionState::new();
        cp.next_node_id = None;
        store.append_checkpoint(&cp).await.unwrap();

        let latest = store.latest_checkpoint(&id).await.unwrap().unwrap();
        assert!(latest.state.is_empty());
        assert!(latest.next_node_id.is_none());
    }
}
