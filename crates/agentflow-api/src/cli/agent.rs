//! CLI agent profile subcommands.

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;

use agentflow_types::agent::{Agent, AgentSpec};
use agentflow_types::llm::ProviderKind;

use super::parse_id;
use crate::state::AppState;

#[derive(Subcommand)]
pub enum AgentCommand {
    /// Store a new agent profile.
    Create {
        /// Unique agent name.
        #[arg(long)]
        name: String,

        #[command(flatten)]
        fields: AgentFields,
    },

    /// List agents by name.
    #[command(alias = "ls")]
    List,

    /// Show one agent.
    Show {
        /// Agent UUID.
        id: String,
    },

    /// Change an agent. Fields not given keep their value.
    Update {
        /// Agent UUID.
        id: String,

        /// New name.
        #[arg(long)]
        name: Option<String>,

        #[command(flatten)]
        fields: AgentFields,
    },

    /// Delete an agent no active workflow uses.
    #[command(alias = "rm")]
    Delete {
        /// Agent UUID.
        id: String,

        /// Skip confirmation prompt.
        #[arg(long)]
        force: bool,
    },

    /// Run an agent once on an input message.
    Test {
        /// Agent UUID.
        id: String,

        /// User message sent to the agent.
        input: String,
    },
}

/// Optional agent fields shared by `create` and `update`.
#[derive(Args, Default)]
pub struct AgentFields {
    #[arg(long)]
    pub description: Option<String>,

    /// Provider (ollama, openai, gemini, anthropic).
    #[arg(long)]
    pub provider: Option<String>,

    #[arg(long)]
    pub model: Option<String>,

    #[arg(long)]
    pub system_prompt: Option<String>,

    /// Tool names, comma separated.
    #[arg(long, value_delimiter = ',')]
    pub tools: Option<Vec<String>>,

    #[arg(long)]
    pub temperature: Option<f64>,

    #[arg(long)]
    pub max_tokens: Option<u32>,

    #[arg(long)]
    pub max_iterations: Option<u32>,

    /// Tags, comma separated.
    #[arg(long, value_delimiter = ',')]
    pub tags: Option<Vec<String>>,
}

impl AgentFields {
    /// Overlay the given fields on `spec`.
    fn apply(self, spec: &mut AgentSpec) -> Result<()> {
        if let Some(provider) = self.provider {
            spec.provider = Some(
                provider
                    .parse::<ProviderKind>()
                    .map_err(|e| anyhow::anyhow!(e))?,
            );
        }
        if self.description.is_some() {
            spec.description = self.description;
        }
        if self.model.is_some() {
            spec.model = self.model;
        }
        if self.system_prompt.is_some() {
            spec.system_prompt = self.system_prompt;
        }
        if let Some(tools) = self.tools {
            spec.tools = tools;
        }
        if self.temperature.is_some() {
            spec.temperature = self.temperature;
        }
        if self.max_tokens.is_some() {
            spec.max_tokens = self.max_tokens;
        }
        if self.max_iterations.is_some() {
            spec.max_iterations = self.max_iterations;
        }
        if let Some(tags) = self.tags {
            spec.tags = tags;
        }
        Ok(())
    }
}

fn spec_of(agent: &Agent) -> AgentSpec {
    AgentSpec {
        name: agent.name.clone(),
        description: agent.description.clone(),
        provider: agent.provider,
        model: agent.model.clone(),
        system_prompt: agent.system_prompt.clone(),
        tools: agent.tools.clone(),
        temperature: agent.temperature,
        max_tokens: agent.max_tokens,
        max_iterations: agent.max_iterations,
        tags: agent.tags.clone(),
    }
}

/// Handle an agent subcommand.
pub async fn handle_agent_command(cmd: AgentCommand, state: &AppState, json: bool) -> Result<()> {
    match cmd {
        AgentCommand::Create { name, fields } => {
            let mut spec = AgentSpec {
                name,
                ..Default::default()
            };
            fields.apply(&mut spec)?;
            let agent = state
                .agents
                .create(spec)
                .await
                .context("failed to store agent")?;
            print_agent(&agent, "Created", json)
        }
        AgentCommand::List => handle_list(state, json).await,
        AgentCommand::Show { id } => {
            let agent = state.agents.get(parse_id(&id)?).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&agent)?);
            } else {
                show(&agent);
            }
            Ok(())
        }
        AgentCommand::Update { id, name, fields } => {
            let id = parse_id(&id)?;
            let current = state.agents.get(id).await?;
            let mut spec = spec_of(&current);
            if let Some(name) = name {
                spec.name = name;
            }
            fields.apply(&mut spec)?;
            let agent = state.agents.update(id, spec).await?;
            print_agent(&agent, "Updated", json)
        }
        AgentCommand::Delete { id, force } => handle_delete(&id, force, state, json).await,
        AgentCommand::Test { id, input } => {
            let result = state.engine.test_agent(parse_id(&id)?, &input).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
                return Ok(());
            }
            let model = result.model.as_deref().unwrap_or("default");
            println!();
            match (&result.output, &result.error) {
                (Some(output), _) => {
                    println!(
                        "  {} {}/{} in {}ms",
                        style("✓").green(),
                        result.provider,
                        model,
                        result.duration_ms
                    );
                    println!();
                    println!("{output}");
                }
                (None, error) => {
                    println!(
                        "  {} {}/{}: {}",
                        style("✗").red(),
                        result.provider,
                        model,
                        error.as_deref().unwrap_or("no output")
                    );
                }
            }
            println!();
            Ok(())
        }
    }
}

async fn handle_list(state: &AppState, json: bool) -> Result<()> {
    let agents = state.agents.list().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&agents)?);
        return Ok(());
    }

    if agents.is_empty() {
        println!();
        println!("  No agents stored.");
        println!(
            "  Create one with: {}",
            style("aflow agent create --name <name>").dim()
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
            Cell::new("Provider"),
            Cell::new("Model"),
            Cell::new("Tools"),
        ]);
    for a in &agents {
        table.add_row(vec![
            Cell::new(a.id),
            Cell::new(&a.name),
            Cell::new(a.provider.map_or("default", |p| p.as_str())),
            Cell::new(a.model.as_deref().unwrap_or("default")),
            Cell::new(a.tools.join(", ")),
        ]);
    }

    println!();
    println!("{table}");
    println!();
    Ok(())
}

fn show(agent: &Agent) {
    println!();
    println!("  {}", style(&agent.name).cyan().bold());
    if let Some(desc) = &agent.description {
        println!("  {}", style(desc).dim());
    }
    println!("  ID: {}", agent.id);
    println!(
        "  Provider: {}",
        agent.provider.map_or("default", |p| p.as_str())
    );
    println!("  Model: {}", agent.model.as_deref().unwrap_or("default"));
    if let Some(t) = agent.temperature {
        println!("  Temperature: {t}");
    }
    if let Some(n) = agent.max_iterations {
        println!("  Max iterations: {n}");
    }
    if !agent.tools.is_empty() {
        println!("  Tools: {}", agent.tools.join(", "));
    }
    if let Some(prompt) = &agent.system_prompt {
        println!();
        println!("  {}", style("System prompt").bold());
        for line in prompt.lines() {
            println!("    {line}");
        }
    }
    println!();
}

async fn handle_delete(id: &str, force: bool, state: &AppState, json: bool) -> Result<()> {
    let id = parse_id(id)?;
    let agent = state.agents.get(id).await?;

    if !force && !json {
        let confirmed = dialoguer::Confirm::new()
            .with_prompt(format!("Delete agent '{}'?", agent.name))
            .default(false)
            .interact()?;
        if !confirmed {
            println!("  Cancelled.");
            return Ok(());
        }
    }

    state.agents.delete(id).await?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({ "deleted": true, "id": id }))?
        );
    } else {
        println!(
            "  {} Deleted agent '{}'",
            style("*").green().bold(),
            style(&agent.name).cyan()
        );
    }
    Ok(())
}

fn print_agent(agent: &Agent, verb: &str, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(agent)?);
    } else {
        println!(
            "  {} {verb} agent '{}' ({})",
            style("*").green().bold(),
            style(&agent.name).cyan(),
            agent.id
        );
    }
    Ok(())
}
