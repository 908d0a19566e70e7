//! In-memory implementation of every repository port.
//!
//! Used by the ephemeral `aflow run` command and by engine tests. All data
//! sits behind one async mutex, which makes each operation atomic and gives
//! the same read-after-write guarantees as the SQLite store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use agentflow_types::agent::Agent;
use agentflow_types::error::RepositoryError;
use agentflow_types::execution::{
    Checkpoint, Execution, ExecutionFilter, Interaction, InteractionStatus, NodeRun,
};
use agentflow_types::workflow::{WorkflowDefinition, WorkflowStatus};
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::agent::AgentRepository;
use super::checkpoint::CheckpointStore;
use super::execution::ExecutionRepository;
use super::workflow::WorkflowRepository;

#[derive(Default)]
struct Inner {
    definitions: HashMap<(Uuid, u32), WorkflowDefinition>,
    agents: HashMap<Uuid, Agent>,
    executions: HashMap<Uuid, Execution>,
    checkpoints: HashMap<Uuid, Vec<Checkpoint>>,
    interactions: Vec<Interaction>,
    node_runs: Vec<NodeRun>,
}

/// Process-local store.
#[derive(Default)]
pub struct InMemoryStore {
    inner: Mutex<Inner>,
    unavailable: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every write fail with a connection error until cleared.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), RepositoryError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(RepositoryError::Connection("store is unavailable".to_string()))
        } else {
            Ok(())
        }
    }
}

// ---------------------------------------------------------------------------
// Definitions
// ---------------------------------------------------------------------------

impl WorkflowRepository for InMemoryStore {
    async fn insert_definition(&self, def: &WorkflowDefinition) -> Result<(), RepositoryError> {
        self.check_available()?;
        let mut inner = self.inner.lock().await;
        let key = (def.id, def.version);
        if inner.definitions.contains_key(&key) {
            return Err(RepositoryError::Conflict(format!(
                "workflow {} version {} already exists",
                def.id, def.version
            )));
        }
        inner.definitions.insert(key, def.clone());
        Ok(())
    }

    async fn set_definition_status(
        &self,
        id: &Uuid,
        version: u32,
        status: WorkflowStatus,
    ) -> Result<(), RepositoryError> {
        self.check_available()?;
        let mut inner = self.inner.lock().await;
        let def = inner
            .definitions
            .get_mut(&(*id, version))
            .ok_or(RepositoryError::NotFound)?;
        def.status = status;
        def.updated_at = Utc::now();
        Ok(())
    }

    async fn get_definition(
        &self,
        id: &Uuid,
        version: Option<u32>,
    ) -> Result<Option<WorkflowDefinition>, RepositoryError> {
        let inner = self.inner.lock().await;
        Ok(match version {
            Some(v) => inner.definitions.get(&(*id, v)).cloned(),
            None => inner
                .definitions
                .values()
                .filter(|d| d.id == *id)
                .max_by_key(|d| d.version)
                .cloned(),
        })
    }

    async fn list_definitions(
        &self,
        status: Option<WorkflowStatus>,
    ) -> Result<Vec<WorkflowDefinition>, RepositoryError> {
        let inner = self.inner.lock().await;
        let mut latest: HashMap<Uuid, &WorkflowDefinition> = HashMap::new();
        for def in inner.definitions.values() {
            let entry = latest.entry(def.id).or_insert(def);
            if def.version > entry.version {
                *entry = def;
            }
        }
        let mut defs: Vec<WorkflowDefinition> = latest
            .into_values()
            .filter(|d| status.is_none_or(|s| d.status == s))
            .cloned()
            .collect();
        defs.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(defs)
    }

    async fn delete_definition(&self, id: &Uuid) -> Result<bool, RepositoryError> {
        self.check_available()?;
        let mut inner = self.inner.lock().await;
        let before = inner.definitions.len();
        inner.definitions.retain(|(def_id, _), _| def_id != id);
        Ok(inner.definitions.len() != before)
    }
}

// ---------------------------------------------------------------------------
// Agents
// ---------------------------------------------------------------------------

fn name_taken(inner: &Inner, agent: &Agent) -> bool {
    inner
        .agents
        .values()
        .any(|a| a.id != agent.id && a.name == agent.name)
}

impl AgentRepository for InMemoryStore {
    async fn insert_agent(&self, agent: &Agent) -> Result<(), RepositoryError> {
        self.check_available()?;
        let mut inner = self.inner.lock().await;
        if inner.agents.contains_key(&agent.id) || name_taken(&inner, agent) {
            return Err(RepositoryError::Conflict(format!(
                "agent '{}' already exists",
                agent.name
            )));
        }
        inner.agents.insert(agent.id, agent.clone());
        Ok(())
    }

    async fn update_agent(&self, agent: &Agent) -> Result<(), RepositoryError> {
        self.check_available()?;
        let mut inner = self.inner.lock().await;
        if !inner.agents.contains_key(&agent.id) {
            return Err(RepositoryError::NotFound);
        }
        if name_taken(&inner, agent) {
            return Err(RepositoryError::Conflict(format!(
                "agent '{}' already exists",
                agent.name
            )));
        }
        inner.agents.insert(agent.id, agent.clone());
        Ok(())
    }

    async fn get_agent(&self, id: &Uuid) -> Result<Option<Agent>, RepositoryError> {
        let inner = self.inner.lock().await;
        Ok(inner.agents.get(id).cloned())
    }

    async fn list_agents(&self) -> Result<Vec<Agent>, RepositoryError> {
        let inner = self.inner.lock().await;
        let mut agents: Vec<Agent> = inner.agents.values().cloned().collect();
        agents.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(agents)
    }

    async fn delete_agent(&self, id: &Uuid) -> Result<bool, RepositoryError> {
        self.check_available()?;
        let mut inner = self.inner.lock().await;
        Ok(inner.agents.remove(id).is_some())
    }
}

// ---------------------------------------------------------------------------
// Executions, interactions, node runs
// ---------------------------------------------------------------------------

impl ExecutionRepository for InMemoryStore {
    async fn create_execution(&self, execution: &Execution) -> Result<(), RepositoryError> {
        self.check_available()?;
        let mut inner = self.inner.lock().await;
        if inner.executions.contains_key(&execution.id) {
            return Err(RepositoryError::Conflict(format!(
                "execution {} already exists",
                execution.id
            )));
        }
        inner.executions.insert(execution.id, execution.clone());
        Ok(())
    }

    async fn update_execution(&self, execution: &Execution) -> Result<(), RepositoryError> {
        self.check_available()?;
        let mut inner = self.inner.lock().await;
        let slot = inner
            .executions
            .get_mut(&execution.id)
            .ok_or(RepositoryError::NotFound)?;
        *slot = execution.clone();
        Ok(())
    }

    async fn get_execution(&self, id: &Uuid) -> Result<Option<Execution>, RepositoryError> {
        Ok(self.inner.lock().await.executions.get(id).cloned())
    }

    async fn list_executions(
        &self,
        filter: &ExecutionFilter,
    ) -> Result<Vec<Execution>, RepositoryError> {
        let inner = self.inner.lock().await;
        let mut executions: Vec<Execution> = inner
            .executions
            .values()
            .filter(|e| filter.workflow_id.is_none_or(|w| e.workflow_id == w))
            .filter(|e| filter.status.is_none_or(|s| e.status == s))
            .cloned()
            .collect();
        executions.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(executions
            .into_iter()
            .skip(filter.skip as usize)
            .take(filter.limit as usize)
            .collect())
    }

    async fn count_unfinished_executions(&self, workflow_id: &Uuid) -> Result<u64, RepositoryError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .executions
            .values()
            .filter(|e| e.workflow_id == *workflow_id && !e.status.is_terminal())
            .count() as u64)
    }

    async fn create_interaction(&self, interaction: &Interaction) -> Result<(), RepositoryError> {
        self.check_available()?;
        let mut inner = self.inner.lock().await;
        let already_pending = inner.interactions.iter().any(|i| {
            i.execution_id == interaction.execution_id && i.status == InteractionStatus::Pending
        });
        if already_pending {
            return Err(RepositoryError::Conflict(format!(
                "execution {} already has a pending interaction",
                interaction.execution_id
            )));
        }
        inner.interactions.push(interaction.clone());
        Ok(())
    }

    async fn get_interaction(&self, id: &Uuid) -> Result<Option<Interaction>, RepositoryError> {
        let inner = self.inner.lock().await;
        Ok(inner.interactions.iter().find(|i| i.id == *id).cloned())
    }

    async fn list_interactions(
        &self,
        execution_id: &Uuid,
    ) -> Result<Vec<Interaction>, RepositoryError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .interactions
            .iter()
            .filter(|i| i.execution_id == *execution_id)
            .cloned()
            .collect())
    }

    async fn list_pending_interactions(
        &self,
        execution_id: Option<&Uuid>,
    ) -> Result<Vec<Interaction>, RepositoryError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .interactions
            .iter()
            .filter(|i| i.status == InteractionStatus::Pending)
            .filter(|i| execution_id.is_none_or(|e| i.execution_id == *e))
            .cloned()
            .collect())
    }

    async fn respond_interaction(
        &self,
        id: &Uuid,
        response: &serde_json::Value,
        responded_at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        self.check_available()?;
        let mut inner = self.inner.lock().await;
        match inner
            .interactions
            .iter_mut()
            .find(|i| i.id == *id && i.status == InteractionStatus::Pending)
        {
            Some(interaction) => {
                interaction.status = InteractionStatus::Responded;
                interaction.response = Some(response.clone());
                interaction.responded_at = Some(responded_at);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn close_interaction(
        &self,
        id: &Uuid,
        status: InteractionStatus,
    ) -> Result<bool, RepositoryError> {
        self.check_available()?;
        let mut inner = self.inner.lock().await;
        match inner
            .interactions
            .iter_mut()
            .find(|i| i.id == *id && i.status == InteractionStatus::Pending)
        {
            Some(interaction) => {
                interaction.status = status;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn save_node_run(&self, run: &NodeRun) -> Result<(), RepositoryError> {
        self.check_available()?;
        let mut inner = self.inner.lock().await;
        match inner.node_runs.iter_mut().find(|r| r.id == run.id) {
            Some(existing) => *existing = run.clone(),
            None => inner.node_runs.push(run.clone()),
        }
        Ok(())
    }

    async fn list_node_runs(&self, execution_id: &Uuid) -> Result<Vec<NodeRun>, RepositoryError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .node_runs
            .iter()
            .filter(|r| r.execution_id == *execution_id)
            .cloned()
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Checkpoints
// ---------------------------------------------------------------------------

impl CheckpointStore for InMemoryStore {
    async fn append_checkpoint(&self, checkpoint: &Checkpoint) -> Result<(), RepositoryError> {
        self.check_available()?;
        let mut inner = self.inner.lock().await;
        let log = inner.checkpoints.entry(checkpoint.execution_id).or_default();
        let expected = log.last().map_or(1, |c| c.sequence + 1);
        if checkpoint.sequence != expected {
            return Err(RepositoryError::Conflict(format!(
                "checkpoint sequence {} for execution {}, expected {expected}",
                checkpoint.sequence, checkpoint.execution_id
            )));
        }
        log.push(checkpoint.clone());
        Ok(())
    }

    async fn latest_checkpoint(
        &self,
        execution_id: &Uuid,
    ) -> Result<Option<Checkpoint>, RepositoryError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .checkpoints
            .get(execution_id)
            .and_then(|log| log.last())
            .cloned())
    }

    async fn list_checkpoints(&self, execution_id: &Uuid) -> Result<Vec<Checkpoint>, RepositoryError> {
        let inner = self.inner.lock().await;
        Ok(inner.checkpoints.get(execution_id).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentflow_types::execution::ExecutionStatus;
    use serde_json::json;

    fn checkpoint(execution_id: Uuid, sequence: u64) -> Checkpoint {
        Checkpoint {
            execution_id,
            sequence,
            node_id: "n".into(),
            next_node_id: None,
            interrupt: None,
            state: serde_json::Map::new(),
            created_at: Utc::now(),
        }
    }

    fn interaction(execution_id: Uuid) -> Interaction {
        Interaction {
            id: Uuid::now_v7(),
            execution_id,
            node_id: "review".into(),
            prompt: "ok?".into(),
            input_schema: None,
            status: InteractionStatus::Pending,
            response: None,
            created_at: Utc::now(),
            responded_at: None,
            timeout_at: None,
        }
    }

    fn execution(workflow_id: Uuid, status: ExecutionStatus) -> Execution {
        let now = Utc::now();
        Execution {
            id: Uuid::now_v7(),
            workflow_id,
            workflow_version: 1,
            status,
            current_node: None,
            state: serde_json::Map::new(),
            input: serde_json::Map::new(),
            output: None,
            error: None,
            created_by: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            finished_at: None,
        }
    }

    #[tokio::test]
    async fn test_agent_names_are_unique() {
        use agentflow_types::agent::AgentSpec;

        let store = InMemoryStore::new();
        let spec = |name: &str| AgentSpec {
            name: name.into(),
            ..Default::default()
        };
        let first = Agent::from_spec(spec("triage"), Utc::now());
        let mut second = Agent::from_spec(spec("writer"), Utc::now());
        store.insert_agent(&first).await.unwrap();
        store.insert_agent(&second).await.unwrap();

        let dup = Agent::from_spec(spec("triage"), Utc::now());
        let err = store.insert_agent(&dup).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict(_)));

        second.name = "triage".into();
        let err = store.update_agent(&second).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict(_)));

        let names: Vec<String> = store
            .list_agents()
            .await
            .unwrap()
            .into_iter()
            .map(|a| a.name)
            .collect();
        assert_eq!(names, vec!["triage", "writer"]);
        assert!(store.delete_agent(&first.id).await.unwrap());
        assert!(!store.delete_agent(&first.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_checkpoint_sequence_must_be_contiguous() {
        let store = InMemoryStore::new();
        let id = Uuid::now_v7();

        store.append_checkpoint(&checkpoint(id, 1)).await.unwrap();
        store.append_checkpoint(&checkpoint(id, 2)).await.unwrap();

        let dup = store.append_checkpoint(&checkpoint(id, 2)).await.unwrap_err();
        assert!(matches!(dup, RepositoryError::Conflict(_)));
        let gap = store.append_checkpoint(&checkpoint(id, 4)).await.unwrap_err();
        assert!(matches!(gap, RepositoryError::Conflict(_)));

        let latest = store.latest_checkpoint(&id).await.unwrap().unwrap();
        assert_eq!(latest.sequence, 2);
        assert_eq!(store.list_checkpoints(&id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_single_pending_interaction_per_execution() {
        let store = InMemoryStore::new();
        let exec_id = Uuid::now_v7();

        let first = interaction(exec_id);
        store.create_interaction(&first).await.unwrap();
        let err = store.create_interaction(&interaction(exec_id)).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict(_)));

        // Another execution is unaffected.
        store.create_interaction(&interaction(Uuid::now_v7())).await.unwrap();
        assert_eq!(store.list_pending_interactions(None).await.unwrap().len(), 2);
        assert_eq!(
            store.list_pending_interactions(Some(&exec_id)).await.unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn test_respond_is_compare_and_set() {
        let store = InMemoryStore::new();
        let pending = interaction(Uuid::now_v7());
        store.create_interaction(&pending).await.unwrap();

        assert!(store
            .respond_interaction(&pending.id, &json!({"approved": true}), Utc::now())
            .await
            .unwrap());
        assert!(!store
            .respond_interaction(&pending.id, &json!({"approved": false}), Utc::now())
            .await
            .unwrap());

        let stored = store.get_interaction(&pending.id).await.unwrap().unwrap();
        assert_eq!(stored.status, InteractionStatus::Responded);
        assert_eq!(stored.response, Some(json!({"approved": true})));
    }

    #[tokio::test]
    async fn test_definition_versions_and_latest() {
        let store = InMemoryStore::new();
        let mut def: WorkflowDefinition = serde_json::from_value(json!({
            "name": "wf",
            "nodes": [{ "id": "start", "type": "start" }]
        }))
        .unwrap();
        store.insert_definition(&def).await.unwrap();
        assert!(store.insert_definition(&def).await.is_err());

        def.version = 2;
        store.insert_definition(&def).await.unwrap();

        let latest = store.get_definition(&def.id, None).await.unwrap().unwrap();
        assert_eq!(latest.version, 2);
        assert_eq!(store.list_definitions(None).await.unwrap().len(), 1);

        store
            .set_definition_status(&def.id, 2, WorkflowStatus::Active)
            .await
            .unwrap();
        assert_eq!(
            store
                .list_definitions(Some(WorkflowStatus::Active))
                .await
                .unwrap()
                .len(),
            1
        );

        assert!(store.delete_definition(&def.id).await.unwrap());
        assert!(store.get_definition(&def.id, Some(1)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_executions_filters_and_pages() {
        let store = InMemoryStore::new();
        let wf = Uuid::now_v7();
        for status in [
            ExecutionStatus::Pending,
            ExecutionStatus::Running,
            ExecutionStatus::Completed,
        ] {
            store.create_execution(&execution(wf, status)).await.unwrap();
        }
        store
            .create_execution(&execution(Uuid::now_v7(), ExecutionStatus::Pending))
            .await
            .unwrap();

        let by_workflow = ExecutionFilter {
            workflow_id: Some(wf),
            ..Default::default()
        };
        assert_eq!(store.list_executions(&by_workflow).await.unwrap().len(), 3);

        let paged = ExecutionFilter {
            workflow_id: Some(wf),
            skip: 1,
            limit: 1,
            ..Default::default()
        };
        assert_eq!(store.list_executions(&paged).await.unwrap().len(), 1);

        assert_eq!(store.count_unfinished_executions(&wf).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_unavailable_store_rejects_writes() {
        let store = InMemoryStore::new();
        store.set_unavailable(true);
        let err = store
            .append_checkpoint(&checkpoint(Uuid::now_v7(), 1))
            .await
            .unwrap_err();
        assert!(err.is_unavailable());

        store.set_unavailable(false);
        store
            .append_checkpoint(&checkpoint(Uuid::now_v7(), 1))
            .await
            .unwrap();
    }
}
