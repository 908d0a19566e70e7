//! Checkpoint store trait.

use agentflow_types::error::RepositoryError;
use agentflow_types::execution::Checkpoint;
use uuid::Uuid;

/// Append-only per-execution checkpoint log.
///
/// `append` is atomic: a reader sees either the whole checkpoint or none of
/// it. A checkpoint whose sequence is not exactly one past the latest one
/// (or 1 for an empty log) is rejected with `RepositoryError::Conflict`.
pub trait CheckpointStore: Send + Sync {
    fn append_checkpoint(
        &self,
        checkpoint: &Checkpoint,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Highest-sequence checkpoint: the authoritative resume point.
    fn latest_checkpoint(
        &self,
        execution_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<Checkpoint>, RepositoryError>> + Send;

    /// Every checkpoint of an execution, in sequence order.
    fn list_checkpoints(
        &self,
        execution_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Vec<Checkpoint>, RepositoryError>> + Send;
}
