//! CLI workflow definition subcommands.
//!
//! Create, list, show and lifecycle operations over stored definitions.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Subcommand;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;

use agentflow_core::workflow::definition::{
    DefinitionFileError, load_definition_file, save_definition_file,
};
use agentflow_types::workflow::{WorkflowDefinition, WorkflowStatus, WorkflowSummary};

use super::parse_id;
use crate::state::AppState;

/// Workflow management subcommands.
#[derive(Subcommand)]
pub enum WorkflowCommand {
    /// Store a workflow definition from a JSON file as a draft.
    Create {
        /// Path to the workflow JSON file.
        file: PathBuf,

        /// Activate right after creating.
        #[arg(long)]
        activate: bool,
    },

    /// List workflows (latest version of each).
    #[command(alias = "ls")]
    List {
        /// Filter by status (draft, active, paused, archived).
        #[arg(long)]
        status: Option<String>,
    },

    /// Show a workflow definition.
    Show {
        /// Workflow UUID.
        id: String,

        /// Specific version (default: latest).
        #[arg(long)]
        version: Option<u32>,
    },

    /// Write a stored definition to a JSON file.
    Export {
        /// Workflow UUID.
        id: String,

        /// Destination file.
        file: PathBuf,

        /// Specific version (default: latest).
        #[arg(long)]
        version: Option<u32>,
    },

    /// Activate a draft or paused workflow.
    Activate { id: String },

    /// Pause an active workflow.
    Pause { id: String },

    /// Archive a workflow. Archived workflows cannot be reactivated.
    Archive { id: String },

    /// Delete every version of a workflow.
    #[command(alias = "rm")]
    Delete {
        /// Workflow UUID.
        id: String,

        /// Skip confirmation prompt.
        #[arg(long)]
        force: bool,
    },

    /// Copy the latest version as a new draft workflow.
    Duplicate {
        /// Workflow UUID.
        id: String,

        /// Name of the copy (default: "<name> (copy)").
        #[arg(long)]
        name: Option<String>,
    },
}

/// Handle a workflow subcommand.
pub async fn handle_workflow_command(
    cmd: WorkflowCommand,
    state: &AppState,
    json: bool,
) -> Result<()> {
    match cmd {
        WorkflowCommand::Create { file, activate } => {
            handle_create(&file, activate, state, json).await
        }
        WorkflowCommand::List { status } => handle_list(status.as_deref(), state, json).await,
        WorkflowCommand::Show { id, version } => handle_show(&id, version, state, json).await,
        WorkflowCommand::Export { id, file, version } => {
            let def = state.workflows.get(parse_id(&id)?, version).await?;
            save_definition_file(&file, &def)
                .with_context(|| format!("failed to write {}", file.display()))?;
            if !json {
                println!(
                    "  {} Exported '{}' v{} to {}",
                    style("*").green().bold(),
                    style(&def.name).cyan(),
                    def.version,
                    file.display()
                );
            }
            Ok(())
        }
        WorkflowCommand::Activate { id } => {
            let def = state.workflows.activate(parse_id(&id)?).await?;
            print_transition(&def, "Activated", json)
        }
        WorkflowCommand::Pause { id } => {
            let def = state.workflows.pause(parse_id(&id)?).await?;
            print_transition(&def, "Paused", json)
        }
        WorkflowCommand::Archive { id } => {
            let def = state.workflows.archive(parse_id(&id)?).await?;
            print_transition(&def, "Archived", json)
        }
        WorkflowCommand::Delete { id, force } => handle_delete(&id, force, state, json).await,
        WorkflowCommand::Duplicate { id, name } => {
            let def = state.workflows.duplicate(parse_id(&id)?, name).await?;
            print_transition(&def, "Created copy", json)
        }
    }
}

/// Load a definition file, turning validation failures into a readable list.
pub(crate) fn load_file(file: &Path) -> Result<WorkflowDefinition> {
    load_definition_file(file).map_err(|e| match e {
        DefinitionFileError::Invalid(v) => {
            let lines: Vec<String> = v.violations.iter().map(|v| format!("  - {v}")).collect();
            anyhow::anyhow!(
                "{} is not a valid workflow:\n{}",
                file.display(),
                lines.join("\n")
            )
        }
        other => anyhow::anyhow!("failed to load {}: {other}", file.display()),
    })
}

// ---------------------------------------------------------------------------
// Create
// ---------------------------------------------------------------------------

async fn handle_create(file: &Path, activate: bool, state: &AppState, json: bool) -> Result<()> {
    let def = load_file(file)?;
    let mut def = state
        .workflows
        .create(def)
        .await
        .context("failed to store workflow")?;
    if activate {
        def = state.workflows.activate(def.id).await?;
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&WorkflowSummary::from(&def))?);
    } else {
        println!();
        println!(
            "  {} Created workflow '{}'",
            style("*").green().bold(),
            style(&def.name).cyan()
        );
        println!("  ID: {}", def.id);
        println!("  Version: {}", def.version);
        println!("  Nodes: {}", def.nodes.len());
        println!("  Status: {}", def.status);
        if def.status == WorkflowStatus::Draft {
            println!();
            println!(
                "  Activate with: {}",
                style(format!("aflow workflow activate {}", def.id)).dim()
            );
        }
        println!();
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// List / Show
// ---------------------------------------------------------------------------

async fn handle_list(status: Option<&str>, state: &AppState, json: bool) -> Result<()> {
    let status = status
        .map(|s| s.parse::<WorkflowStatus>())
        .transpose()
        .map_err(|e| anyhow::anyhow!("invalid status: {e}"))?;
    let defs = state.workflows.list(status).await?;
    let summaries: Vec<WorkflowSummary> = defs.iter().map(WorkflowSummary::from).collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&summaries)?);
        return Ok(());
    }

    if summaries.is_empty() {
        println!();
        println!("  No workflows stored.");
        println!(
            "  Create one with: {}",
            style("aflow workflow create <file.json>").dim()
        );
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("ID"),
            Cell::new("Name").fg(Color::Cyan),
            Cell::new("Version"),
            Cell::new("Status"),
            Cell::new("Nodes"),
            Cell::new("Updated"),
        ]);

    for s in &summaries {
        table.add_row(vec![
            Cell::new(s.id),
            Cell::new(&s.name),
            Cell::new(s.version),
            Cell::new(s.status).fg(workflow_status_color(s.status)),
            Cell::new(s.node_count),
            Cell::new(s.updated_at.format("%Y-%m-%d %H:%M")),
        ]);
    }

    println!();
    println!("{table}");
    println!();

    Ok(())
}

async fn handle_show(id: &str, version: Option<u32>, state: &AppState, json: bool) -> Result<()> {
    let def = state.workflows.get(parse_id(id)?, version).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&def)?);
        return Ok(());
    }

    println!();
    println!(
        "  {} (v{}, {})",
        style(&def.name).cyan().bold(),
        def.version,
        def.status
    );
    if let Some(desc) = &def.description {
        println!("  {}", style(desc).dim());
    }
    println!("  ID: {}", def.id);
    println!();

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Node").fg(Color::Cyan),
            Cell::new("Type"),
            Cell::new("Next"),
        ]);

    for node in &def.nodes {
        let next: Vec<String> = def
            .edges
            .iter()
            .filter(|e| e.source == node.id)
            .map(|e| match &e.guard {
                Some(guard) => format!("{} [{guard}]", e.target),
                None => e.target.clone(),
            })
            .collect();
        table.add_row(vec![
            Cell::new(&node.id),
            Cell::new(node.node_type),
            Cell::new(next.join(", ")),
        ]);
    }

    println!("{table}");
    println!();

    Ok(())
}

// ---------------------------------------------------------------------------
// Delete
// ---------------------------------------------------------------------------

async fn handle_delete(id: &str, force: bool, state: &AppState, json: bool) -> Result<()> {
    let id = parse_id(id)?;
    let def = state.workflows.get(id, None).await?;

    if !force && !json {
        let confirmed = dialoguer::Confirm::new()
            .with_prompt(format!("Delete workflow '{}' and all its versions?", def.name))
            .default(false)
            .interact()?;
        if !confirmed {
            println!("  Cancelled.");
            return Ok(());
        }
    }

    state.workflows.delete(id).await?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({ "deleted": true, "id": id }))?
        );
    } else {
        println!(
            "  {} Deleted workflow '{}'",
            style("*").green().bold(),
            style(&def.name).cyan()
        );
    }

    Ok(())
}

fn print_transition(def: &WorkflowDefinition, verb: &str, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(&WorkflowSummary::from(def))?);
    } else {
        println!(
            "  {} {verb} workflow '{}' ({}, now {})",
            style("*").green().bold(),
            style(&def.name).cyan(),
            def.id,
            def.status
        );
    }
    Ok(())
}

fn workflow_status_color(status: WorkflowStatus) -> Color {
    match status {
        WorkflowStatus::Draft => Color::Grey,
        WorkflowStatus::Active => Color::Green,
        WorkflowStatus::Paused => Color::Yellow,
        WorkflowStatus::Archived => Color::DarkGrey,
    }
}
