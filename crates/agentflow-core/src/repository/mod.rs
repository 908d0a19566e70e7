//! Repository trait definitions (ports).
//!
//! These traits define the storage interface that the infrastructure layer
//! (agentflow-infra) implements. The core crate never depends on any
//! specific storage technology; `memory` provides an in-process
//! implementation of every port.

pub mod agent;
pub mod checkpoint;
pub mod execution;
pub mod memory;
pub mod workflow;

pub use agent::AgentRepository;
pub use checkpoint::CheckpointStore;
pub use execution::ExecutionRepository;
pub use memory::InMemoryStore;
pub use workflow::WorkflowRepository;

/// Every port the engine needs, implemented by one store.
pub trait WorkflowStore:
    WorkflowRepository + AgentRepository + ExecutionRepository + CheckpointStore
{
}

impl<T> WorkflowStore for T where
    T: WorkflowRepository + AgentRepository + ExecutionRepository + CheckpointStore
{
}
