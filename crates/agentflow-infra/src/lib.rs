//! Infrastructure layer for AgentFlow.
//!
//! Contains implementations of the ports defined in `agentflow-core`: the
//! SQLite store, the HTTP transport for external tools, and the model
//! providers. Also loads `config.toml`.

pub mod config;
pub mod llm;
pub mod sqlite;
pub mod tool;
