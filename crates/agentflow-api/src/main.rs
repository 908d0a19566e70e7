//! AgentFlow CLI and REST API entry point.
//!
//! Binary name: `aflow`
//!
//! Parses CLI arguments, sets up tracing, then dispatches to the command
//! handlers or starts the REST API server. `validate`, `run`, `tools`,
//! `providers` and `completions` never open the database.

mod cli;
mod http;
mod state;

use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use clap_complete::generate;
use console::style;

use agentflow_infra::config::{data_dir, load_config};

use cli::{Cli, Commands};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // RUST_LOG, when set, wins over these defaults.
    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "warn",
        1 => "info,agentflow=debug",
        _ => "trace",
    };
    if let Err(e) = agentflow_observe::init_tracing(filter, cli.otel) {
        eprintln!("warning: tracing not initialized: {e}");
    }

    let result = dispatch(cli).await;

    agentflow_observe::shutdown_tracing();
    result
}

async fn dispatch(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Completions { shell } => {
            let mut cmd = <Cli as clap::CommandFactory>::command();
            generate(shell, &mut cmd, "aflow", &mut std::io::stdout());
            Ok(())
        }

        Commands::Validate { file } => cli::run::handle_validate(&file, cli.json).await,

        Commands::Run { file, input } => {
            let config = load_config(&data_dir()).await;
            let input = cli::parse_input(input.as_deref())?;
            cli::run::handle_run(&file, input, &config, cli.json, cli.quiet).await
        }

        Commands::Tools { action } => {
            let config = load_config(&data_dir()).await;
            cli::tools::handle_tools_command(action, &config, cli.json)
        }

        Commands::Providers { action } => {
            let config = load_config(&data_dir()).await;
            cli::providers::handle_providers_command(action, &config, cli.json).await
        }

        Commands::Workflow { action } => {
            let state = AppState::init().await?;
            cli::workflow::handle_workflow_command(action, &state, cli.json).await
        }

        Commands::Agent { action } => {
            let state = AppState::init().await?;
            cli::agent::handle_agent_command(action, &state, cli.json).await
        }

        Commands::Exec { action } => {
            let state = AppState::init().await?;
            cli::exec::handle_exec_command(action, &state, cli.json).await
        }

        Commands::Serve { port, host } => {
            let state = AppState::init().await?;
            serve(state, host, port, cli.quiet).await
        }
    }
}

async fn serve(
    state: AppState,
    host: Option<String>,
    port: Option<u16>,
    quiet: bool,
) -> anyhow::Result<()> {
    let recovered = state
        .engine
        .recover()
        .await
        .context("failed to recover interrupted executions")?;
    if !recovered.is_empty() {
        tracing::info!(count = recovered.len(), "resumed interrupted executions");
    }

    let sweep_engine = state.engine.clone();
    let sweep_period = Duration::from_secs(state.config.engine.interaction_sweep_secs.max(1));
    let sweep = tokio::spawn(async move {
        let mut interval = tokio::time::interval(sweep_period);
        loop {
            interval.tick().await;
            match sweep_engine.expire_overdue(chrono::Utc::now()).await {
                Ok(expired) if !expired.is_empty() => {
                    tracing::info!(count = expired.len(), "expired overdue interactions");
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "interaction sweep failed"),
            }
        }
    });

    let host = host.unwrap_or_else(|| state.config.server.host.clone());
    let port = port.unwrap_or(state.config.server.port);
    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    if !quiet {
        println!(
            "  {} AgentFlow API listening on {}",
            style("⚡").bold(),
            style(format!("http://{addr}/api/v1")).cyan()
        );
        println!("  {}", style("Press Ctrl+C to stop").dim());
    }

    let router = http::router::build_router(state);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    sweep.abort();
    if !quiet {
        println!("\n  Server stopped.");
    }
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
