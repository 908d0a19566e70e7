//! Shared domain types for AgentFlow.
//!
//! Workflow definitions, agent profiles, executions, checkpoints, interactions, LLM and tool
//! shapes, configuration, and the repository error type.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod agent;
pub mod config;
pub mod error;
pub mod event;
pub mod execution;
pub mod llm;
pub mod tool;
pub mod workflow;
