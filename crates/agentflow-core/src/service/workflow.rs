//! Workflow definition management service.
//!
//! Definitions are validated before they are stored, stored as drafts, and
//! moved through `draft -> active <-> paused -> archived`. Editing a
//! definition publishes a new version under the same id; stored versions are
//! never rewritten.

use std::sync::Arc;

use agentflow_types::workflow::{WorkflowDefinition, WorkflowStatus};
use chrono::Utc;
use uuid::Uuid;

use crate::error::{EngineError, ValidationError, Violation};
use crate::repository::WorkflowStore;
use crate::workflow::dag::compile;
use crate::workflow::definition::validate_definition;

/// Service orchestrating the workflow definition lifecycle.
///
/// Generic over the store port so agentflow-core never depends on
/// agentflow-infra.
pub struct WorkflowService<S: WorkflowStore> {
    store: Arc<S>,
}

impl<S: WorkflowStore> WorkflowService<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Validate without storing. Reports every violation.
    pub fn validate(&self, def: &WorkflowDefinition) -> Result<(), ValidationError> {
        validate_definition(def)
    }

    /// Store a new definition as version 1 in `draft` status.
    pub async fn create(&self, mut def: WorkflowDefinition) -> Result<WorkflowDefinition, EngineError> {
        def.name = def.name.trim().to_string();
        validate_definition(&def)?;

        let now = Utc::now();
        def.version = 1;
        def.status = WorkflowStatus::Draft;
        def.created_at = now;
        def.updated_at = now;
        self.store.insert_definition(&def).await?;

        tracing::info!(workflow_id = %def.id, name = %def.name, "workflow created");
        Ok(def)
    }

    /// A definition by id; `None` version means the latest.
    pub async fn get(&self, id: Uuid, version: Option<u32>) -> Result<WorkflowDefinition, EngineError> {
        self.store
            .get_definition(&id, version)
            .await?
            .ok_or(EngineError::WorkflowNotFound(id))
    }

    /// Latest version of every definition, newest first.
    pub async fn list(&self, status: Option<WorkflowStatus>) -> Result<Vec<WorkflowDefinition>, EngineError> {
        Ok(self.store.list_definitions(status).await?)
    }

    /// Publish `def` as the next version of `id`, in `draft` status.
    ///
    /// Executions keep running against the version they were created with.
    pub async fn publish_version(
        &self,
        id: Uuid,
        mut def: WorkflowDefinition,
    ) -> Result<WorkflowDefinition, EngineError> {
        let current = self.get(id, None).await?;
        if current.status == WorkflowStatus::Archived {
            return Err(EngineError::InvalidWorkflowTransition {
                id,
                from: current.status,
                to: WorkflowStatus::Draft,
            });
        }

        def.name = def.name.trim().to_string();
        validate_definition(&def)?;

        def.id = id;
        def.version = current.version + 1;
        def.status = WorkflowStatus::Draft;
        def.created_at = current.created_at;
        def.updated_at = Utc::now();
        self.store.insert_definition(&def).await?;

        tracing::info!(workflow_id = %id, version = def.version, "workflow version published");
        Ok(def)
    }

    /// Make the latest version executable. It must still compile and every
    /// agent it names must exist.
    pub async fn activate(&self, id: Uuid) -> Result<WorkflowDefinition, EngineError> {
        let def = self.get(id, None).await?;
        let compiled = compile(&def)?;

        let mut violations = Vec::new();
        for (node_id, agent_id) in compiled.agent_references() {
            if self.store.get_agent(&agent_id).await?.is_none() {
                violations.push(Violation::new(
                    format!("nodes.{node_id}.config.agent_id"),
                    format!("agent {agent_id} does not exist"),
                ));
            }
        }
        ValidationError::from_violations(violations)?;

        self.set_status(def, WorkflowStatus::Active).await
    }

    /// Stop new executions of the latest version.
    pub async fn pause(&self, id: Uuid) -> Result<WorkflowDefinition, EngineError> {
        let def = self.get(id, None).await?;
        self.set_status(def, WorkflowStatus::Paused).await
    }

    pub async fn archive(&self, id: Uuid) -> Result<WorkflowDefinition, EngineError> {
        let def = self.get(id, None).await?;
        self.set_status(def, WorkflowStatus::Archived).await
    }

    /// Copy the latest version into a new draft workflow.
    pub async fn duplicate(
        &self,
        id: Uuid,
        name: Option<String>,
    ) -> Result<WorkflowDefinition, EngineError> {
        let source = self.get(id, None).await?;
        let copy = WorkflowDefinition {
            id: Uuid::now_v7(),
            name: name.unwrap_or_else(|| format!("{} (copy)", source.name)),
            ..source
        };
        self.create(copy).await
    }

    /// Delete every version. Refused while unfinished executions reference it.
    pub async fn delete(&self, id: Uuid) -> Result<(), EngineError> {
        let count = self.store.count_unfinished_executions(&id).await?;
        if count > 0 {
            return Err(EngineError::WorkflowInUse { id, count });
        }
        if !self.store.delete_definition(&id).await? {
            return Err(EngineError::WorkflowNotFound(id));
        }
        tracing::info!(workflow_id = %id, "workflow deleted");
        Ok(())
    }

    async fn set_status(
        &self,
        mut def: WorkflowDefinition,
        to: WorkflowStatus,
    ) -> Result<WorkflowDefinition, EngineError> {
        if !status_allows(def.status, to) {
            return Err(EngineError::InvalidWorkflowTransition {
                id: def.id,
                from: def.status,
                to,
            });
        }
        self.store
            .set_definition_status(&def.id, def.version, to)
            .await?;

        tracing::info!(workflow_id = %def.id, version = def.version, from = %def.status, to = %to, "workflow status changed");
        def.status = to;
        def.updated_at = Utc::now();
        Ok(def)
    }
}

fn status_allows(from: WorkflowStatus, to: WorkflowStatus) -> bool {
    use WorkflowStatus::*;
    matches!(
        (from, to),
        (Draft, Active) | (Paused, Active) | (Active, Paused) | (Draft | Active | Paused, Archived)
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
