//! Application state wiring all services together.
//!
//! AppState holds the concrete service instances used by both CLI and REST
//! API. The engine, the definition service and the agent service are generic over the store
//! port; AppState pins them to the SQLite store. `build_engine` is shared
//! with the ephemeral `aflow run`, which pins the engine to the in-memory
//! store instead.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;

use agentflow_core::event::EventBus;
use agentflow_core::repository::WorkflowStore;
use agentflow_core::service::{AgentService, WorkflowService};
use agentflow_core::tool::{BoxToolTransport, ToolInvoker, ToolRegistry};
use agentflow_core::workflow::ExecutionEngine;
use agentflow_infra::config::{data_dir, load_config};
use agentflow_infra::llm::build_provider_registry;
use agentflow_infra::sqlite::pool::database_url;
use agentflow_infra::sqlite::{DatabasePool, SqliteWorkflowStore};
use agentflow_infra::tool::HttpToolTransport;
use agentflow_types::config::AppConfig;

/// Concrete type aliases for the service generics pinned to infra implementations.
pub type ConcreteEngine = ExecutionEngine<SqliteWorkflowStore>;
pub type ConcreteWorkflowService = WorkflowService<SqliteWorkflowStore>;
pub type ConcreteAgentService = AgentService<SqliteWorkflowStore>;

/// Shared application state holding all services.
///
/// Used by both CLI commands and REST API handlers.
#[derive(Clone)]
pub struct AppState {
    pub workflows: Arc<ConcreteWorkflowService>,
    pub agents: Arc<ConcreteAgentService>,
    pub engine: Arc<ConcreteEngine>,
    pub event_bus: EventBus,
    pub config: Arc<AppConfig>,
    pub data_dir: PathBuf,
}

impl AppState {
    /// Initialize the application state: load config, connect to DB, wire services.
    pub async fn init() -> anyhow::Result<Self> {
        let data_dir = data_dir();

        // Ensure data directory exists
        tokio::fs::create_dir_all(&data_dir)
            .await
            .with_context(|| format!("failed to create data directory {}", data_dir.display()))?;

        let config = load_config(&data_dir).await;

        let db_url = format!("{}?mode=rwc", database_url(&data_dir));
        let db_pool = DatabasePool::new(&db_url)
            .await
            .with_context(|| format!("failed to open database at {db_url}"))?;
        let store = Arc::new(SqliteWorkflowStore::new(db_pool));

        Ok(Self::from_store(store, config, data_dir))
    }

    /// Wire services on top of an already opened store.
    pub fn from_store(store: Arc<SqliteWorkflowStore>, config: AppConfig, data_dir: PathBuf) -> Self {
        let event_bus = EventBus::default();
        let engine = build_engine(store.clone(), &config).with_event_bus(event_bus.clone());

        Self {
            workflows: Arc::new(WorkflowService::new(store.clone())),
            agents: Arc::new(AgentService::new(store)),
            engine: Arc::new(engine),
            event_bus,
            config: Arc::new(config),
            data_dir,
        }
    }
}

/// Build the tool registry: built-in tools plus every external tool in config.
pub fn build_tool_registry(config: &AppConfig) -> ToolRegistry {
    let mut registry = ToolRegistry::with_builtins();
    for tool in &config.tools.external {
        registry.register_external(tool);
    }
    registry
}

/// Build an execution engine over `store` with providers and tools from config.
pub fn build_engine<S: WorkflowStore>(store: Arc<S>, config: &AppConfig) -> ExecutionEngine<S> {
    let providers = build_provider_registry(&config.providers);

    let tools = ToolInvoker::new(
        Arc::new(build_tool_registry(config)),
        Duration::from_secs(config.engine.tool_timeout_secs),
    )
    .with_transport(BoxToolTransport::new(HttpToolTransport::new()))
    .with_external_retries(config.engine.external_tool_retries);

    ExecutionEngine::new(store, providers, tools, config.engine.clone())
}
