//! Execution, interaction and node-run repository trait.

use agentflow_types::error::RepositoryError;
use agentflow_types::execution::{
    Execution, ExecutionFilter, Interaction, InteractionStatus, NodeRun,
};
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Storage for execution records and everything they own.
pub trait ExecutionRepository: Send + Sync {
    // -----------------------------------------------------------------------
    // Executions
    // -----------------------------------------------------------------------

    fn create_execution(
        &self,
        execution: &Execution,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Overwrite the mutable columns of an execution.
    fn update_execution(
        &self,
        execution: &Execution,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    fn get_execution(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<Execution>, RepositoryError>> + Send;

    /// Executions matching `filter`, newest first.
    fn list_executions(
        &self,
        filter: &ExecutionFilter,
    ) -> impl std::future::Future<Output = Result<Vec<Execution>, RepositoryError>> + Send;

    /// Count executions of a workflow that have not reached a terminal status.
    fn count_unfinished_executions(
        &self,
        workflow_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<u64, RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Interactions
    // -----------------------------------------------------------------------

    /// Record a new pending interaction. Fails with `Conflict` if the
    /// execution already has one pending.
    fn create_interaction(
        &self,
        interaction: &Interaction,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    fn get_interaction(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<Interaction>, RepositoryError>> + Send;

    /// All interactions of an execution, oldest first.
    fn list_interactions(
        &self,
        execution_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Vec<Interaction>, RepositoryError>> + Send;

    /// Pending interactions, for one execution or all, oldest first.
    fn list_pending_interactions(
        &self,
        execution_id: Option<&Uuid>,
    ) -> impl std::future::Future<Output = Result<Vec<Interaction>, RepositoryError>> + Send;

    /// Compare-and-set from `pending` to `responded`.
    ///
    /// Returns `false` (and changes nothing) if the interaction was no longer
    /// pending.
    fn respond_interaction(
        &self,
        id: &Uuid,
        response: &serde_json::Value,
        responded_at: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    /// Compare-and-set from `pending` to `status` (timed out or cancelled).
    fn close_interaction(
        &self,
        id: &Uuid,
        status: InteractionStatus,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Node runs
    // -----------------------------------------------------------------------

    /// Insert or update a node-run log entry.
    fn save_node_run(
        &self,
        run: &NodeRun,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Node runs of an execution, in start order.
    fn list_node_runs(
        &self,
        execution_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Vec<NodeRun>, RepositoryError>> + Send;
}
