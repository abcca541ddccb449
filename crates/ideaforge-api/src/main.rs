//! IdeaForge CLI entry point.
//!
//! Binary name: `ideaforge`
//!
//! Parses CLI arguments, sets up tracing, wires the router to its providers,
//! cache and spend ledger, then dispatches to the command handler.

mod cli;
mod state;

use clap::Parser;

use cli::{Cli, Commands};
use ideaforge_observe::{filter_directive, init_tracing, shutdown_tracing};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_tracing(filter_directive(cli.verbose, cli.quiet), cli.otel)
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;

    let result = run(cli).await;
    shutdown_tracing();
    result
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let state = AppState::init().await?;

    let result = match cli.command {
        Commands::Route { request } => cli::route::route(&state, request, cli.json).await,
        Commands::Plan { request } => cli::route::plan(&state, request, cli.json).await,
        Commands::Health => cli::health::health(&state, cli.json).await,
        Commands::Budget => cli::budget::budget(&state, cli.json).await,
        Commands::Models => cli::models::models(&state, cli.json),
    };

    state.shutdown().await;
    result
}
