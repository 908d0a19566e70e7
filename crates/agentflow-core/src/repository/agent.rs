//! Agent profile repository trait.

use agentflow_types::agent::Agent;
use agentflow_types::error::RepositoryError;
use uuid::Uuid;

/// Storage for agent profiles. Names are unique.
pub trait AgentRepository: Send + Sync {
    /// Insert a new agent. Fails with `Conflict` if the id or name is taken.
    fn insert_agent(
        &self,
        agent: &Agent,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Replace a stored agent. Fails with `NotFound` if it does not exist.
    fn update_agent(
        &self,
        agent: &Agent,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    fn get_agent(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<Agent>, RepositoryError>> + Send;

    /// Every agent, ordered by name.
    fn list_agents(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<Agent>, RepositoryError>> + Send;

    /// Returns `true` if the agent existed.
    fn delete_agent(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;
}
