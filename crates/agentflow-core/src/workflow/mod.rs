//! Workflow engine core: definitions, graph compilation, node handlers and
//! durable execution.
//!
//! - `definition` -- JSON loading, validation, filesystem load/save
//! - `dag` -- graph compiler: reachability, cycle checks, route tables
//! - `context` -- execution state merging and `{{ path }}` templates
//! - `expression` -- JEXL guards for conditional routing
//! - `handler` -- one handler per node type
//! - `retry` -- retry policy and exponential backoff
//! - `checkpoint` -- append-only step commits and the node-run log
//! - `interaction` -- human-in-the-loop pauses
//! - `engine` -- execution state machine, leases, cancel and recovery

pub mod checkpoint;
pub mod context;
pub mod dag;
pub mod definition;
pub mod engine;
pub mod expression;
pub mod handler;
pub mod interaction;
pub mod retry;

pub use dag::{CompiledWorkflow, compile};
pub use definition::{load_definition, validate_definition};
pub use engine::ExecutionEngine;
