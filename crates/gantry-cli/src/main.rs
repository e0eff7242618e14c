//! Gantry CLI - drives pipeline runs from the terminal
//!
//! Every command goes through the same orchestrator the control plane uses,
//! against the shared run store:
//! - Create runs and advance them to the next gate
//! - Approve or reject gate1 and gate2
//! - Trigger the final render and upload
//! - Inspect runs, receipts and ops tiers, and intervene as an operator
//!
//! A failing command exits with the stable code of its error kind.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;
mod error;
mod output;

use commands::{gate, ops, run, RunArgs};
use error::{CliError, CliResult};
use gantry_engine::{GateDecision, Orchestrator, PipelineConfig, RetryPolicy};
use gantry_state::FsStore;
use gantry_types::GateName;

/// Gantry CLI application
#[derive(Parser)]
#[command(name = "gantry")]
#[command(about = "Gantry - content pipeline run driver", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "GANTRY_CONFIG")]
    config: Option<PathBuf>,

    /// Storage root, overrides the configuration file
    #[arg(long, env = "GANTRY_ROOT")]
    root: Option<PathBuf>,

    /// Output format (table, json, yaml)
    #[arg(short, long, default_value = "table")]
    output: output::OutputFormat,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands
#[derive(Subcommand)]
enum Commands {
    /// Create a run for a category
    #[command(name = "init-run")]
    InitRun(run::InitArgs),

    /// Advance a run through every step up to the next gate
    #[command(name = "run-e2e")]
    RunE2e(RunArgs),

    /// Approve gate1 (script review)
    #[command(name = "approve-gate1")]
    ApproveGate1(gate::GateArgs),

    /// Reject gate1 and send the run back to the script step
    #[command(name = "reject-gate1")]
    RejectGate1(gate::GateArgs),

    /// Approve gate2 (pre-render review)
    #[command(name = "approve-gate2")]
    ApproveGate2(gate::GateArgs),

    /// Reject gate2 and send the run back to the timeline step
    #[command(name = "reject-gate2")]
    RejectGate2(gate::GateArgs),

    /// Run the final render and upload step
    #[command(name = "render-and-upload")]
    RenderAndUpload(RunArgs),

    /// List runs, or show one run in detail
    Status(run::StatusArgs),

    /// Show a run's receipts in execution order
    History(RunArgs),

    /// Evaluate a run's ops tier
    #[command(name = "ops-tier")]
    OpsTier(RunArgs),

    /// Set the budget or clear the failure count of a run
    #[command(name = "adjust-ops")]
    AdjustOps(ops::AdjustArgs),

    /// Send a run back to an earlier step
    Rewind(ops::RewindArgs),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing; stdout is reserved for command output
    let filter = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .without_time()
                .with_writer(std::io::stderr),
        )
        .init();

    if let Err(err) = run(cli).await {
        output::print_error(&err.to_string());
        if let CliError::Engine(engine) = &err {
            if let Some(reports) = engine.contract_reports() {
                output::print_reports(reports);
            }
        }
        std::process::exit(err.exit_code());
    }
}

async fn run(cli: Cli) -> CliResult<()> {
    let mut config = PipelineConfig::load(cli.config.as_deref())?;
    if let Some(root) = cli.root {
        config.storage.root = root;
    }

    let store = FsStore::open(config.storage.root.clone())
        .await
        .map_err(|e| {
            CliError::Config(format!(
                "cannot open storage root {}: {}",
                config.storage.root.display(),
                e
            ))
        })?;
    tracing::debug!(root = %config.storage.root.display(), "Opened run store");
    let retry = RetryPolicy::from_config(&config.retry);
    let orchestrator = Orchestrator::from_config(config, Arc::new(store))?;
    let format = cli.output;

    match cli.command {
        Commands::InitRun(args) => run::init_run(args, &orchestrator, &retry, format).await,
        Commands::RunE2e(args) => run::run_e2e(args, &orchestrator, &retry, format).await,
        Commands::ApproveGate1(args) => {
            gate::decide(GateName::Gate1, GateDecision::Approve, args, &orchestrator, &retry, format)
                .await
        }
        Commands::RejectGate1(args) => {
            gate::decide(GateName::Gate1, GateDecision::Reject, args, &orchestrator, &retry, format)
                .await
        }
        Commands::ApproveGate2(args) => {
            gate::decide(GateName::Gate2, GateDecision::Approve, args, &orchestrator, &retry, format)
                .await
        }
        Commands::RejectGate2(args) => {
            gate::decide(GateName::Gate2, GateDecision::Reject, args, &orchestrator, &retry, format)
                .await
        }
        Commands::RenderAndUpload(args) => {
            run::render_and_upload(args, &orchestrator, &retry, format).await
        }
        Commands::Status(args) => run::status(args, &orchestrator, &retry, format).await,
        Commands::History(args) => run::history(args, &orchestrator, &retry, format).await,
        Commands::OpsTier(args) => ops::ops_tier(args, &orchestrator, &retry, format).await,
        Commands::AdjustOps(args) => ops::adjust_ops(args, &orchestrator, &retry, format).await,
        Commands::Rewind(args) => ops::rewind(args, &orchestrator, &retry, format).await,
    }
}
