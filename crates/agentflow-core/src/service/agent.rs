//! Agent profile management service.
//!
//! Agents are plain records: create, replace, fetch, list and delete. An
//! agent cannot be deleted while an active or paused workflow still names it.

use std::sync::Arc;

use agentflow_types::agent::{Agent, AgentSpec};
use agentflow_types::workflow::WorkflowStatus;
use chrono::Utc;
use uuid::Uuid;

use crate::error::{EngineError, ValidationError, Violation};
use crate::repository::WorkflowStore;
use crate::workflow::dag::compile;

pub struct AgentService<S: WorkflowStore> {
    store: Arc<S>,
}

impl<S: WorkflowStore> AgentService<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub async fn create(&self, spec: AgentSpec) -> Result<Agent, EngineError> {
        check_spec(&spec)?;
        let agent = Agent::from_spec(spec, Utc::now());
        self.store.insert_agent(&agent).await?;

        tracing::info!(agent_id = %agent.id, name = %agent.name, "agent created");
        Ok(agent)
    }

    /// Replace every editable field of `id`.
    pub async fn update(&self, id: Uuid, spec: AgentSpec) -> Result<Agent, EngineError> {
        check_spec(&spec)?;
        let mut agent = self.get(id).await?;
        agent.apply(spec, Utc::now());
        self.store.update_agent(&agent).await?;

        tracing::info!(agent_id = %id, "agent updated");
        Ok(agent)
    }

    pub async fn get(&self, id: Uuid) -> Result<Agent, EngineError> {
        self.store
            .get_agent(&id)
            .await?
            .ok_or(EngineError::AgentNotFound(id))
    }

    /// Every agent, ordered by name.
    pub async fn list(&self) -> Result<Vec<Agent>, EngineError> {
        Ok(self.store.list_agents().await?)
    }

    pub async fn delete(&self, id: Uuid) -> Result<(), EngineError> {
        for status in [WorkflowStatus::Active, WorkflowStatus::Paused] {
            for def in self.store.list_definitions(Some(status)).await? {
                let Ok(compiled) = compile(&def) else {
                    continue;
                };
                if compiled.agent_references().iter().any(|(_, a)| *a == id) {
                    return Err(EngineError::AgentInUse {
                        id,
                        workflow_id: def.id,
                    });
                }
            }
        }
        if !self.store.delete_agent(&id).await? {
            return Err(EngineError::AgentNotFound(id));
        }
        tracing::info!(agent_id = %id, "agent deleted");
        Ok(())
    }
}

fn check_spec(spec: &AgentSpec) -> Result<(), ValidationError> {
    let mut violations = Vec::new();
    if spec.name.trim().is_empty() {
        violations.push(Violation::new("name", "must not be empty"));
    }
    if let Some(t) = spec.temperature {
        if !(0.0..=2.0).contains(&t) {
            violations.push(Violation::new("temperature", "must be between 0 and 2"));
        }
    }
    if spec.max_iterations == Some(0) {
        violations.push(Violation::new("max_iterations", "must be at least 1"));
    }
    if spec.max_tokens == Some(0) {
        violations.push(Violation::new("max_tokens", "must be at least 1"));
    }
    ValidationError::from_violations(violations)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use agentflow_types::error::RepositoryError;
    use serde_json::json;

    use crate::repository::InMemoryStore;
    use crate::service::WorkflowService;

    fn services() -> (AgentService<InMemoryStore>, WorkflowService<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::new());
        (AgentService::new(store.clone()), WorkflowService::new(store))
    }

    fn spec(name: &str) -> AgentSpec {
        AgentSpec {
            name: name.into(),
            model: Some("llama3".into()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_create_update_get() {
        let (agents, _) = services();
        let created = agents.create(spec(" support ")).await.unwrap();
        assert_eq!(created.name, "support");

        let updated = agents
            .update(
                created.id,
                AgentSpec {
                    temperature: Some(0.2),
                    ..spec("support")
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.temperature, Some(0.2));
        assert_eq!(updated.created_at, created.created_at);

        let fetched = agents.get(created.id).await.unwrap();
        assert_eq!(fetched, updated);
        assert_eq!(agents.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_spec_reports_every_field() {
        let (agents, _) = services();
        let err = agents
            .create(AgentSpec {
                name: "  ".into(),
                temperature: Some(3.5),
                max_iterations: Some(0),
                ..Default::default()
            })
            .await
            .unwrap_err();
        let EngineError::Validation(validation) = err else {
            panic!("expected validation error, got {err}");
        };
        let fields: Vec<&str> = validation
            .violations
            .iter()
            .map(|v| v.location.as_str())
            .collect();
        assert_eq!(fields, vec!["name", "temperature", "max_iterations"]);
        assert!(agents.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_name_conflicts() {
        let (agents, _) = services();
        agents.create(spec("support")).await.unwrap();
        let err = agents.create(spec("support")).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::Repository(RepositoryError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_unknown_agent_not_found() {
        let (agents, _) = services();
        let id = Uuid::now_v7();
        assert!(matches!(
            agents.get(id).await.unwrap_err(),
            EngineError::AgentNotFound(missing) if missing == id
        ));
        assert!(matches!(
            agents.update(id, spec("x")).await.unwrap_err(),
            EngineError::AgentNotFound(_)
        ));
        assert!(matches!(
            agents.delete(id).await.unwrap_err(),
            EngineError::AgentNotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_delete_refused_while_active_workflow_uses_agent() {
        let (agents, workflows) = services();
        let agent = agents.create(spec("writer")).await.unwrap();
        let def = serde_json::from_value(json!({
            "name": "drafting",
            "nodes": [
                { "id": "start", "type": "start" },
                { "id": "draft", "type": "agent", "config": { "prompt": "Write", "agent_id": agent.id } },
                { "id": "end", "type": "end" }
            ],
            "edges": [
                { "source": "start", "target": "draft" },
                { "source": "draft", "target": "end" }
            ]
        }))
        .unwrap();
        let wf = workflows.create(def).await.unwrap();
        workflows.activate(wf.id).await.unwrap();

        let err = agents.delete(agent.id).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::AgentInUse { id, workflow_id } if id == agent.id && workflow_id == wf.id
        ));

        workflows.archive(wf.id).await.unwrap();
        agents.delete(agent.id).await.unwrap();
        assert!(agents.list().await.unwrap().is_empty());
    }
}
