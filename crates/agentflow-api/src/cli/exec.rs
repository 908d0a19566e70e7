//! CLI execution subcommands.
//!
//! `start` and `respond` drive the execution in the foreground until it
//! pauses on a human node or finishes.

use anyhow::{Context, Result};
use clap::Subcommand;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;

use agentflow_types::execution::{
    Execution, ExecutionFilter, ExecutionHistory, ExecutionStatus, Interaction,
};

use super::{parse_id, parse_input, status_color};
use crate::state::AppState;

/// Execution management subcommands.
#[derive(Subcommand)]
pub enum ExecCommand {
    /// Create a pending execution of an active workflow.
    Create {
        /// Workflow UUID.
        workflow_id: String,

        /// Pin a definition version (default: latest).
        #[arg(long)]
        version: Option<u32>,

        /// Execution input as a JSON object.
        #[arg(long)]
        input: Option<String>,

        /// Start right away and wait until it pauses or finishes.
        #[arg(long)]
        start: bool,
    },

    /// Start a pending execution and wait until it pauses or finishes.
    Start { id: String },

    /// List executions, newest first.
    #[command(alias = "ls")]
    List {
        /// Filter by workflow UUID.
        #[arg(long)]
        workflow: Option<String>,

        /// Filter by status.
        #[arg(long)]
        status: Option<String>,

        /// Maximum number of executions to display.
        #[arg(long, default_value = "20")]
        limit: u32,
    },

    /// Show the status and state of an execution.
    Show { id: String },

    /// Cancel a running or paused execution.
    Cancel {
        id: String,

        #[arg(long, default_value = "cancelled by user")]
        reason: String,
    },

    /// Answer the pending interaction of a paused execution.
    Respond {
        /// Execution UUID.
        id: String,

        /// Interaction UUID.
        interaction_id: String,

        /// Response payload. Parsed as JSON, or taken as a plain string.
        response: String,
    },

    /// Show checkpoints, node runs and interactions of an execution.
    History { id: String },

    /// List pending interactions.
    Pending {
        /// Only this execution.
        #[arg(long)]
        execution: Option<String>,
    },
}

/// Handle an exec subcommand.
pub async fn handle_exec_command(cmd: ExecCommand, state: &AppState, json: bool) -> Result<()> {
    match cmd {
        ExecCommand::Create {
            workflow_id,
            version,
            input,
            start,
        } => {
            let input = parse_input(input.as_deref())?;
            let mut execution = state
                .engine
                .create_execution(parse_id(&workflow_id)?, version, input, whoami())
                .await?;
            if start {
                execution = state.engine.start_execution(execution.id).await?;
            }
            print_execution(&execution, json)
        }
        ExecCommand::Start { id } => {
            let execution = state.engine.start_execution(parse_id(&id)?).await?;
            print_execution(&execution, json)
        }
        ExecCommand::List {
            workflow,
            status,
            limit,
        } => {
            let filter = ExecutionFilter {
                workflow_id: workflow.as_deref().map(parse_id).transpose()?,
                status: status
                    .map(|s| s.parse::<ExecutionStatus>())
                    .transpose()
                    .map_err(|e| anyhow::anyhow!("invalid status: {e}"))?,
                skip: 0,
                limit,
            };
            let executions = state.engine.list_executions(&filter).await?;
            print_execution_list(&executions, json)
        }
        ExecCommand::Show { id } => {
            let execution = state.engine.get_execution(parse_id(&id)?).await?;
            print_execution(&execution, json)
        }
        ExecCommand::Cancel { id, reason } => {
            let execution = state
                .engine
                .cancel_execution(parse_id(&id)?, &reason)
                .await?;
            print_execution(&execution, json)
        }
        ExecCommand::Respond {
            id,
            interaction_id,
            response,
        } => {
            let execution = state
                .engine
                .respond(
                    parse_id(&id)?,
                    parse_id(&interaction_id)?,
                    parse_response(&response),
                )
                .await?;
            print_execution(&execution, json)
        }
        ExecCommand::History { id } => {
            let history = state.engine.history(parse_id(&id)?).await?;
            print_history(&history, json)
        }
        ExecCommand::Pending { execution } => {
            let execution = execution.as_deref().map(parse_id).transpose()?;
            let interactions = state.engine.list_pending_interactions(execution).await?;
            print_interactions(&interactions, json)
        }
    }
}

/// Interpret a typed response: JSON when it parses, a plain string otherwise.
pub(crate) fn parse_response(raw: &str) -> serde_json::Value {
    serde_json::from_str(raw).unwrap_or_else(|_| serde_json::Value::String(raw.to_string()))
}

fn whoami() -> Option<String> {
    std::env::var("USER").ok().filter(|u| !u.is_empty())
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

pub(crate) fn print_execution(execution: &Execution, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(execution)?);
        return Ok(());
    }

    println!();
    println!(
        "  Execution {} {}",
        style(execution.id).cyan(),
        style(execution.status).bold()
    );
    println!(
        "  Workflow: {} (v{})",
        execution.workflow_id, execution.workflow_version
    );
    if let Some(node) = &execution.current_node {
        println!("  Current node: {node}");
    }
    if let Some(ms) = execution.duration_ms() {
        println!("  Duration: {ms} ms");
    }
    if let Some(err) = &execution.error {
        println!("  Error: {}", style(err).red());
    }

    let state = serde_json::to_string_pretty(&execution.state).context("failed to render state")?;
    println!();
    println!("  {}", style("State").bold());
    for line in state.lines() {
        println!("    {line}");
    }
    if execution.status == ExecutionStatus::Paused {
        println!();
        println!(
            "  Waiting for input: {}",
            style(format!("aflow exec pending --execution {}", execution.id)).dim()
        );
    }
    println!();

    Ok(())
}

fn print_execution_list(executions: &[Execution], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(executions)?);
        return Ok(());
    }

    if executions.is_empty() {
        println!();
        println!("  No executions.");
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("ID").fg(Color::Cyan),
            Cell::new("Workflow"),
            Cell::new("Version"),
            Cell::new("Status"),
            Cell::new("Node"),
            Cell::new("Created"),
        ]);

    for e in executions {
        table.add_row(vec![
            Cell::new(e.id),
            Cell::new(e.workflow_id),
            Cell::new(e.workflow_version),
            Cell::new(e.status).fg(status_color(e.status)),
            Cell::new(e.current_node.as_deref().unwrap_or("-")),
            Cell::new(e.created_at.format("%Y-%m-%d %H:%M:%S")),
        ]);
    }

    println!();
    println!("{table}");
    println!();

    Ok(())
}

fn print_history(history: &ExecutionHistory, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(history)?);
        return Ok(());
    }

    println!();
    println!(
        "  Execution {} {}",
        style(history.execution.id).cyan(),
        style(history.execution.status).bold()
    );
    println!();

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Node").fg(Color::Cyan),
            Cell::new("Attempt"),
            Cell::new("Status"),
            Cell::new("Duration"),
            Cell::new("Error"),
        ]);
    for run in &history.node_runs {
        table.add_row(vec![
            Cell::new(&run.node_id),
            Cell::new(run.attempt),
            Cell::new(run.status),
            Cell::new(
                run.duration_ms
                    .map(|ms| format!("{ms} ms"))
                    .unwrap_or_else(|| "-".to_string()),
            ),
            Cell::new(run.error.as_deref().unwrap_or("")),
        ]);
    }
    println!("{table}");

    println!();
    println!("  {}", style("Checkpoints").bold());
    for cp in &history.checkpoints {
        let next = match (&cp.interrupt, &cp.next_node_id) {
            (Some(_), _) => "paused".to_string(),
            (None, Some(next)) => format!("-> {next}"),
            (None, None) => "end".to_string(),
        };
        println!(
            "    #{:<4} {:<20} {}",
            cp.sequence,
            cp.node_id,
            style(next).dim()
        );
    }

    if !history.interactions.is_empty() {
        println!();
        println!("  {}", style("Interactions").bold());
        for i in &history.interactions {
            println!("    {} {} [{}] {}", i.id, i.node_id, i.status, i.prompt);
        }
    }
    println!();

    Ok(())
}

fn print_interactions(interactions: &[Interaction], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(interactions)?);
        return Ok(());
    }

    if interactions.is_empty() {
        println!();
        println!("  No pending interactions.");
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Interaction").fg(Color::Cyan),
            Cell::new("Execution"),
            Cell::new("Node"),
            Cell::new("Prompt"),
            Cell::new("Expires"),
        ]);
    for i in interactions {
        table.add_row(vec![
            Cell::new(i.id),
            Cell::new(i.execution_id),
            Cell::new(&i.node_id),
            Cell::new(&i.prompt),
            Cell::new(
                i.timeout_at
                    .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                    .unwrap_or_else(|| "-".to_string()),
            ),
        ]);
    }

    println!();
    println!("{table}");
    println!();
    println!(
        "  Answer with: {}",
        style("aflow exec respond <execution> <interaction> '<json>'").dim()
    );
    println!();

    Ok(())
}
