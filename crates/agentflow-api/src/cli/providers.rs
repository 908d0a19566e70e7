//! CLI model provider subcommands.

use anyhow::Result;
use clap::Subcommand;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;

use agentflow_infra::llm::{build_provider_registry, test_provider_connection};
use agentflow_types::config::AppConfig;
use agentflow_types::llm::ProviderKind;

#[derive(Subcommand)]
pub enum ProvidersCommand {
    /// List providers usable with the current config and environment.
    #[command(alias = "ls")]
    List,

    /// List the models a provider serves.
    Models {
        /// Provider (ollama, openai, gemini, anthropic).
        provider: String,
    },

    /// Send a one-token completion to check connectivity.
    Test {
        /// Provider (ollama, openai, gemini, anthropic). Default: configured default.
        provider: Option<String>,
    },
}

/// Handle a providers subcommand. Only needs the config, not the database.
pub async fn handle_providers_command(
    cmd: ProvidersCommand,
    config: &AppConfig,
    json: bool,
) -> Result<()> {
    let registry = build_provider_registry(&config.providers);

    match cmd {
        ProvidersCommand::List => {
            let rows: Vec<_> = registry
                .kinds()
                .into_iter()
                .filter_map(|kind| registry.get(kind).map(|p| (kind, p)))
                .collect();

            if json {
                let out: Vec<_> = rows
                    .iter()
                    .map(|(kind, p)| {
                        serde_json::json!({
                            "provider": kind.to_string(),
                            "model": p.default_model(),
                            "default": *kind == registry.default_kind(),
                        })
                    })
                    .collect();
                println!("{}", serde_json::to_string_pretty(&out)?);
                return Ok(());
            }

            let mut table = Table::new();
            table
                .load_preset(presets::UTF8_FULL_CONDENSED)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec![
                    Cell::new("Provider").fg(Color::Cyan),
                    Cell::new("Model"),
                    Cell::new("Default"),
                ]);
            for (kind, p) in &rows {
                let default = if *kind == registry.default_kind() { "*" } else { "" };
                table.add_row(vec![
                    Cell::new(kind),
                    Cell::new(p.default_model()),
                    Cell::new(default),
                ]);
            }

            println!();
            println!("{table}");
            println!();
            Ok(())
        }

        ProvidersCommand::Models { provider } => {
            let kind = provider
                .parse::<ProviderKind>()
                .map_err(|e| anyhow::anyhow!(e))?;
            let listed = registry.models(kind).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&listed)?);
                return Ok(());
            }
            println!();
            for model in &listed.models {
                let marker = if *model == listed.default_model { "*" } else { " " };
                println!("  {marker} {model}");
            }
            println!();
            Ok(())
        }

        ProvidersCommand::Test { provider } => {
            let kind = provider
                .map(|p| p.parse::<ProviderKind>())
                .transpose()
                .map_err(|e| anyhow::anyhow!(e))?;
            let p = registry.resolve(kind)?;
            let name = p.name().to_string();

            let outcome = test_provider_connection(p).await;
            if json {
                let out = serde_json::json!({
                    "provider": name,
                    "ok": outcome.is_ok(),
                    "error": outcome.as_ref().err().map(|e| e.to_string()),
                });
                println!("{}", serde_json::to_string_pretty(&out)?);
            } else {
                match &outcome {
                    Ok(()) => println!("  {} {} is reachable", style("✓").green(), style(&name).cyan()),
                    Err(e) => println!("  {} {}: {e}", style("✗").red(), style(&name).cyan()),
                }
            }
            outcome.map_err(Into::into)
        }
    }
}
