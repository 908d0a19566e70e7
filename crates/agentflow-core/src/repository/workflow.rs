//! Workflow definition repository trait.

use agentflow_types::error::RepositoryError;
use agentflow_types::workflow::{WorkflowDefinition, WorkflowStatus};
use uuid::Uuid;

/// Storage for versioned workflow definitions.
///
/// A definition is keyed by `(id, version)`. Versions are never rewritten
/// once an execution references them; only the lifecycle status of a stored
/// version changes.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait WorkflowRepository: Send + Sync {
    /// Insert a new `(id, version)` row. Fails with `Conflict` if it exists.
    fn insert_definition(
        &self,
        def: &WorkflowDefinition,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Update the lifecycle status of one version.
    fn set_definition_status(
        &self,
        id: &Uuid,
        version: u32,
        status: WorkflowStatus,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Get a definition by id; `None` version means the latest.
    fn get_definition(
        &self,
        id: &Uuid,
        version: Option<u32>,
    ) -> impl std::future::Future<Output = Result<Option<WorkflowDefinition>, RepositoryError>> + Send;

    /// Latest version of every definition, optionally filtered by status,
    /// newest first.
    fn list_definitions(
        &self,
        status: Option<WorkflowStatus>,
    ) -> impl std::future::Future<Output = Result<Vec<WorkflowDefinition>, RepositoryError>> + Send;

    /// Delete all versions of a definition. Returns `true` if any existed.
    fn delete_definition(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;
}
