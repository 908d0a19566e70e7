//! CLI tool catalog subcommands.

use anyhow::Result;
use clap::Subcommand;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};

use agentflow_types::config::AppConfig;
use agentflow_types::tool::ToolKind;

use crate::state::build_tool_registry;

#[derive(Subcommand)]
pub enum ToolsCommand {
    /// List built-in and configured external tools.
    #[command(alias = "ls")]
    List,
}

/// Handle a tools subcommand. Only needs the config, not the database.
pub fn handle_tools_command(cmd: ToolsCommand, config: &AppConfig, json: bool) -> Result<()> {
    match cmd {
        ToolsCommand::List => {
            let tools = build_tool_registry(config).descriptors();

            if json {
                println!("{}", serde_json::to_string_pretty(&tools)?);
                return Ok(());
            }

            let mut table = Table::new();
            table
                .load_preset(presets::UTF8_FULL_CONDENSED)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec![
                    Cell::new("Name").fg(Color::Cyan),
                    Cell::new("Kind"),
                    Cell::new("Description"),
                ]);
            for tool in &tools {
                let kind = match tool.kind {
                    ToolKind::Internal => "internal",
                    ToolKind::External => "external",
                };
                table.add_row(vec![
                    Cell::new(&tool.name),
                    Cell::new(kind),
                    Cell::new(&tool.description),
                ]);
            }

            println!();
            println!("{table}");
            println!();
            Ok(())
        }
    }
}
