//! Durable checkpoint manager for workflow executions.
//!
//! Wraps the store ports to provide the two writes every step makes: the
//! node-run log entry for each handler attempt, and the append-only
//! checkpoint that commits the step. The engine only changes execution
//! status after the checkpoint for a step has been appended.

use std::sync::Arc;

use agentflow_types::error::RepositoryError;
use agentflow_types::execution::{
    Checkpoint, ExecutionState, InterruptRequest, NodeRun, NodeRunStatus,
};
use chrono::Utc;
use uuid::Uuid;

use crate::error::{EngineError, StoreUnavailableError};
use crate::repository::WorkflowStore;

// ---------------------------------------------------------------------------
// CheckpointManager
// ---------------------------------------------------------------------------

/// Records step commits and node-run logs for executions.
///
/// Generic over `S: WorkflowStore` so it works with any storage backend
/// (SQLite, in-memory, etc.).
pub struct CheckpointManager<S: WorkflowStore> {
    store: Arc<S>,
}

impl<S: WorkflowStore> CheckpointManager<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    // -----------------------------------------------------------------------
    // Step commits
    // -----------------------------------------------------------------------

    /// Append the checkpoint committing a step of `node_id`.
    ///
    /// The sequence is one past the latest committed checkpoint. A sequence
    /// conflict means another writer committed concurrently; it surfaces as
    /// `ExecutionBusy` and nothing is written.
    pub async fn commit(
        &self,
        execution_id: Uuid,
        node_id: &str,
        next_node_id: Option<String>,
        interrupt: Option<InterruptRequest>,
        state: &ExecutionState,
    ) -> Result<Checkpoint, EngineError> {
        let sequence = self
            .store
            .latest_checkpoint(&execution_id)
            .await
            .map_err(store_error)?
            .map_or(1, |cp| cp.sequence + 1);

        let checkpoint = Checkpoint {
            execution_id,
            sequence,
            node_id: node_id.to_string(),
            next_node_id,
            interrupt,
            state: state.clone(),
            created_at: Utc::now(),
        };

        match self.store.append_checkpoint(&checkpoint).await {
            Ok(()) => {}
            Err(RepositoryError::Conflict(reason)) => {
                tracing::warn!(execution_id = %execution_id, sequence, reason, "checkpoint sequence conflict");
                return Err(EngineError::ExecutionBusy(execution_id));
            }
            Err(e) => return Err(store_error(e)),
        }

        tracing::debug!(
            execution_id = %execution_id,
            node_id,
            sequence,
            next = ?checkpoint.next_node_id,
            "committed checkpoint"
        );
        Ok(checkpoint)
    }

    /// The authoritative resume point of an execution.
    pub async fn latest(&self, execution_id: Uuid) -> Result<Option<Checkpoint>, EngineError> {
        self.store
            .latest_checkpoint(&execution_id)
            .await
            .map_err(store_error)
    }

    pub async fn list(&self, execution_id: Uuid) -> Result<Vec<Checkpoint>, EngineError> {
        Ok(self.store.list_checkpoints(&execution_id).await?)
    }

    // -----------------------------------------------------------------------
    // Node-run log
    // -----------------------------------------------------------------------

    /// Log the start of a handler attempt.
    pub async fn node_started(
        &self,
        execution_id: Uuid,
        node_id: &str,
        attempt: u32,
    ) -> Result<NodeRun, EngineError> {
        let run = NodeRun {
            id: Uuid::now_v7(),
            execution_id,
            node_id: node_id.to_string(),
            attempt,
            status: NodeRunStatus::Running,
            error: None,
            started_at: Utc::now(),
            finished_at: None,
            duration_ms: None,
        };
        self.store.save_node_run(&run).await.map_err(store_error)?;
        Ok(run)
    }

    /// Close a handler attempt with its outcome.
    pub async fn node_finished(
        &self,
        mut run: NodeRun,
        error: Option<String>,
    ) -> Result<NodeRun, EngineError> {
        let finished = Utc::now();
        run.status = if error.is_some() {
            NodeRunStatus::Failed
        } else {
            NodeRunStatus::Completed
        };
        run.error = error;
        run.duration_ms = Some((finished - run.started_at).num_milliseconds().max(0) as u64);
        run.finished_at = Some(finished);
        self.store.save_node_run(&run).await.map_err(store_error)?;
        Ok(run)
    }
}

/// Every failed write on the commit path is a store outage for the caller.
fn store_error(e: RepositoryError) -> EngineError {
    EngineError::StoreUnavailable(StoreUnavailableError(e.to_string()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
