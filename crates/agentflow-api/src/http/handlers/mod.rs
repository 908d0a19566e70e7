//! HTTP request handlers, one module per resource.

pub mod agent;
pub mod execution;
pub mod tool;
pub mod workflow;
pub mod ws;
