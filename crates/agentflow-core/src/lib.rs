//! Workflow engine and repository trait definitions for AgentFlow.
//!
//! This crate defines the "ports" (repository, provider and tool transport
//! traits) that the infrastructure layer implements. It depends only on
//! `agentflow-types` -- never on `agentflow-infra` or any database/IO crate.

pub mod error;
pub mod event;
pub mod llm;
pub mod repository;
pub mod schema;
pub mod service;
pub mod tool;
pub mod workflow;
