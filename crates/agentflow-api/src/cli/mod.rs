//! CLI command definitions and dispatch for the `aflow` binary.
//!
//! Uses clap derive macros for argument parsing. Resource commands follow a
//! noun-verb pattern (e.g., `aflow workflow list`, `aflow exec start <id>`).

pub mod agent;
pub mod exec;
pub mod providers;
pub mod run;
pub mod tools;
pub mod workflow;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use clap_complete::Shell;
use comfy_table::Color;
use uuid::Uuid;

use agentflow_types::execution::{ExecutionState, ExecutionStatus};

/// Define, run and inspect durable agent workflows.
#[derive(Parser)]
#[command(name = "aflow", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for verbose, -vv for debug/trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Export spans through OpenTelemetry (stdout exporter).
    #[arg(long, global = true)]
    pub otel: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the REST API server.
    Serve {
        /// Port to listen on (overrides config).
        #[arg(short, long)]
        port: Option<u16>,

        /// Host to bind to (overrides config).
        #[arg(long)]
        host: Option<String>,
    },

    /// Validate a workflow definition file and print every violation.
    Validate {
        /// Path to the workflow JSON file.
        file: PathBuf,
    },

    /// Run a workflow file once, in memory, answering interactions here.
    Run {
        /// Path to the workflow JSON file.
        file: PathBuf,

        /// Execution input as a JSON object.
        #[arg(long)]
        input: Option<String>,
    },

    /// Manage stored workflow definitions.
    #[command(alias = "wf")]
    Workflow {
        #[command(subcommand)]
        action: workflow::WorkflowCommand,
    },

    /// Manage stored agent profiles.
    Agent {
        #[command(subcommand)]
        action: agent::AgentCommand,
    },

    /// Manage executions and their interactions.
    Exec {
        #[command(subcommand)]
        action: exec::ExecCommand,
    },

    /// Inspect registered tools.
    Tools {
        #[command(subcommand)]
        action: tools::ToolsCommand,
    },

    /// Inspect and test model providers.
    Providers {
        #[command(subcommand)]
        action: providers::ProvidersCommand,
    },

    /// Generate shell completions.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

/// Parse a UUID argument.
pub fn parse_id(raw: &str) -> Result<Uuid> {
    raw.parse::<Uuid>()
        .with_context(|| format!("'{raw}' is not a valid UUID"))
}

/// Parse an optional `--input` argument into an execution input object.
pub fn parse_input(raw: Option<&str>) -> Result<ExecutionState> {
    let Some(raw) = raw else {
        return Ok(ExecutionState::new());
    };
    let value: serde_json::Value = serde_json::from_str(raw).context("invalid JSON input")?;
    match value {
        serde_json::Value::Object(map) => Ok(map),
        other => anyhow::bail!("input must be a JSON object, got {other}"),
    }
}

/// Table color for an execution status.
pub fn status_color(status: ExecutionStatus) -> Color {
    match status {
        ExecutionStatus::Pending => Color::Grey,
        ExecutionStatus::Running => Color::Blue,
        ExecutionStatus::Paused => Color::Yellow,
        ExecutionStatus::Completed => Color::Green,
        ExecutionStatus::Failed => Color::Red,
        ExecutionStatus::Cancelled => Color::DarkGrey,
    }
}
