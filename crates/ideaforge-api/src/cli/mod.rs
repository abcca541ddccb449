//! CLI command definitions for the `ideaforge` binary.
//!
//! Uses clap derive macros for argument parsing.

pub mod budget;
pub mod health;
pub mod models;
pub mod route;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use ideaforge_types::request::{Priority, TaskType};

/// Route AI requests across Anthropic, OpenAI and Gemini.
#[derive(Parser)]
#[command(name = "ideaforge", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for verbose, -vv for debug, -vvv for trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Export spans through the OpenTelemetry stdout exporter.
    #[arg(long, global = true)]
    pub otel: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Route one request to the best available provider.
    Route {
        #[command(flatten)]
        request: RequestArgs,
    },

    /// Show how a request would be routed, without calling any provider.
    Plan {
        #[command(flatten)]
        request: RequestArgs,
    },

    /// Health-check every registered provider and show rate-limit headroom.
    Health,

    /// Show today's and this month's spend against the limits.
    Budget,

    /// List the model catalog for registered providers.
    #[command(alias = "ls")]
    Models,
}

/// Request fields shared by `route` and `plan`.
#[derive(Args, Debug)]
pub struct RequestArgs {
    /// Task type (idea_generation, market_research, competitor_analysis,
    /// financial_model, business_plan, market_signals, general).
    #[arg(short, long, default_value = "general")]
    pub task: TaskType,

    /// Request priority (low, medium, high, critical).
    #[arg(short, long, default_value = "medium")]
    pub priority: Priority,

    /// File whose contents are sent as request context.
    #[arg(long)]
    pub context_file: Option<PathBuf>,

    /// Completion token limit (defaults to the router setting).
    #[arg(long)]
    pub max_tokens: Option<u32>,

    /// Sampling temperature.
    #[arg(long)]
    pub temperature: Option<f64>,

    /// Caller identity recorded in the spend ledger.
    #[arg(long)]
    pub user: Option<String>,

    /// The prompt text.
    pub prompt: String,
}
