//! `aflow validate` and the ephemeral `aflow run`.
//!
//! Neither touches the database. `run` stores the definition in an
//! in-memory store, drives one execution to the end and answers human
//! interactions at the terminal.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use console::style;
use serde_json::json;

use agentflow_core::repository::InMemoryStore;
use agentflow_core::service::WorkflowService;
use agentflow_core::workflow::{compile, load_definition};
use agentflow_types::config::AppConfig;
use agentflow_types::execution::{ExecutionState, ExecutionStatus, Interaction};

use super::exec::{parse_response, print_execution};
use super::workflow::load_file;
use crate::state::build_engine;

/// Validate a definition file, printing every violation.
///
/// Fails (non-zero exit) when the definition is invalid.
pub async fn handle_validate(file: &Path, json: bool) -> Result<()> {
    let content = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("failed to read {}", file.display()))?;

    let result = load_definition(&content).and_then(|def| compile(&def));

    match result {
        Ok(compiled) => {
            if json {
                let report = json!({
                    "valid": true,
                    "name": compiled.name,
                    "entry": compiled.entry(),
                    "terminals": compiled.terminals(),
                });
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!(
                    "  {} '{}' is valid (entry: {}, terminals: {})",
                    style("✓").green(),
                    style(&compiled.name).cyan(),
                    compiled.entry(),
                    compiled.terminals().join(", ")
                );
            }
            Ok(())
        }
        Err(e) => {
            if json {
                let report = json!({ "valid": false, "violations": e.violations });
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!(
                    "  {} {} is invalid:",
                    style("✗").red(),
                    style(file.display()).cyan()
                );
                for v in &e.violations {
                    println!("    - {}: {}", style(&v.location).yellow(), v.message);
                }
            }
            bail!("{} violation(s)", e.violations.len())
        }
    }
}

/// Run a definition file once against an in-memory store.
pub async fn handle_run(
    file: &Path,
    input: ExecutionState,
    config: &AppConfig,
    json: bool,
    quiet: bool,
) -> Result<()> {
    let def = load_file(file)?;

    let store = Arc::new(InMemoryStore::new());
    let workflows = WorkflowService::new(store.clone());
    let def = workflows.create(def).await?;
    workflows.activate(def.id).await?;

    let engine = build_engine(store, config);
    let execution = engine
        .create_execution(def.id, None, input, None)
        .await?;

    if !quiet && !json {
        println!(
            "  {} Running '{}' ({})",
            style("▶").green(),
            style(&def.name).cyan(),
            execution.id
        );
    }

    let mut execution = engine.start_execution(execution.id).await?;
    while execution.status == ExecutionStatus::Paused {
        let pending = engine
            .list_pending_interactions(Some(execution.id))
            .await?;
        let Some(interaction) = pending.into_iter().next() else {
            bail!("execution {} is paused without a pending interaction", execution.id);
        };
        let answer = prompt_interaction(&interaction)?;
        execution = engine
            .respond(execution.id, interaction.id, answer)
            .await?;
    }

    if !quiet || json {
        print_execution(&execution, json)?;
    }
    if execution.status == ExecutionStatus::Failed {
        bail!(
            "execution failed: {}",
            execution.error.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(())
}

/// Ask the operator for a response on the terminal.
fn prompt_interaction(interaction: &Interaction) -> Result<serde_json::Value> {
    eprintln!();
    eprintln!(
        "  {} {} asks:",
        style("?").yellow().bold(),
        style(&interaction.node_id).cyan()
    );
    eprintln!("  {}", interaction.prompt);
    if let Some(schema) = &interaction.input_schema {
        eprintln!("  {}", style(format!("expected: {schema}")).dim());
    }

    let raw: String = dialoguer::Input::new()
        .with_prompt("Response")
        .interact_text()?;
    Ok(parse_response(&raw))
}
