//! Run lifecycle commands

use super::RunArgs;
use crate::error::CliResult;
use crate::output::{
    self, gate_label, print_info, print_success, print_warning, tier_label, OutputFormat,
    ReceiptRow,
};
use clap::Args;
use gantry_engine::{
    HaltReason, Orchestrator, ReceiptSource, RetryPolicy, RunOverview, RunSummary, StepExecution,
};
use serde::Serialize;
use tabled::Tabled;

#[derive(Debug, Clone, Args)]
pub struct InitArgs {
    /// Content category the run produces
    #[arg(long)]
    pub category: String,
}

#[derive(Debug, Clone, Args)]
pub struct StatusArgs {
    /// Show one run in detail instead of listing all runs
    #[arg(long)]
    pub run_id: Option<String>,
}

/// Table row for run listing
#[derive(Debug, Serialize, Tabled)]
struct RunRow {
    run_id: String,
    category: String,
    stage: String,
    gate1: String,
    gate2: String,
    budget: u64,
    failures: u32,
    tier: String,
    updated: String,
}

impl From<RunOverview> for RunRow {
    fn from(run: RunOverview) -> Self {
        Self {
            run_id: run.run_id.to_string(),
            category: run.category,
            stage: run.current_stage.to_string(),
            gate1: gate_label(run.gate1_state),
            gate2: gate_label(run.gate2_state),
            budget: run.budget_remaining,
            failures: run.failure_count,
            tier: tier_label(run.tier),
            updated: run.updated_at.format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }
}

pub async fn init_run(
    args: InitArgs,
    orchestrator: &Orchestrator,
    retry: &RetryPolicy,
    format: OutputFormat,
) -> CliResult<()> {
    let run = retry.run(|| orchestrator.init_run(&args.category)).await?;
    match format {
        OutputFormat::Table => {
            print_success(&format!("Created run {}", run.run_id));
            print_info(&format!("Budget: {}", run.budget_remaining));
            Ok(())
        }
        _ => output::print_single(&run, format),
    }
}

pub async fn run_e2e(
    args: RunArgs,
    orchestrator: &Orchestrator,
    retry: &RetryPolicy,
    format: OutputFormat,
) -> CliResult<()> {
    let run_id = args.run_id();
    let progress = retry.run(|| orchestrator.run_e2e(&run_id)).await?;

    if !matches!(format, OutputFormat::Table) {
        return output::print_single(&progress, format);
    }

    let rows: Vec<ReceiptRow> = progress.receipts.iter().map(ReceiptRow::from).collect();
    if !rows.is_empty() {
        output::print_output(rows, format)?;
    }
    match progress.halted {
        HaltReason::AwaitingGate { gate } => {
            print_warning(&format!("Run {} is waiting on {}", run_id, gate));
        }
        HaltReason::AwaitingRender => {
            print_info(&format!(
                "Run {} is ready for render-and-upload once gate2 is approved",
                run_id
            ));
        }
        HaltReason::Complete => print_success(&format!("Run {} is complete", run_id)),
    }
    Ok(())
}

pub async fn render_and_upload(
    args: RunArgs,
    orchestrator: &Orchestrator,
    retry: &RetryPolicy,
    format: OutputFormat,
) -> CliResult<()> {
    let run_id = args.run_id();
    let execution = retry.run(|| orchestrator.render_and_upload(&run_id)).await?;
    print_execution(&execution, format)
}

pub(crate) fn print_execution(execution: &StepExecution, format: OutputFormat) -> CliResult<()> {
    if !matches!(format, OutputFormat::Table) {
        return output::print_single(execution, format);
    }
    let step = execution.receipt.step_name;
    match execution.source {
        ReceiptSource::Executed => print_success(&format!("{} succeeded", step)),
        ReceiptSource::Cached => print_info(&format!("{} already done, returning cached receipt", step)),
        ReceiptSource::Repaired => print_info(&format!("{} recovered from an unrecorded receipt", step)),
    }
    output::print_output(vec![ReceiptRow::from(&execution.receipt)], format)
}

pub async fn status(
    args: StatusArgs,
    orchestrator: &Orchestrator,
    retry: &RetryPolicy,
    format: OutputFormat,
) -> CliResult<()> {
    match args.run_id {
        None => {
            let runs = retry.run(|| orchestrator.list_runs()).await?;
            match format {
                OutputFormat::Table => {
                    let rows: Vec<RunRow> = runs.into_iter().map(RunRow::from).collect();
                    output::print_output(rows, format)
                }
                _ => output::print_single(&runs, format),
            }
        }
        Some(raw) => {
            let run_id = RunArgs { run_id: raw }.run_id();
            let summary = retry.run(|| orchestrator.summary(&run_id)).await?;
            match format {
                OutputFormat::Table => print_summary(&summary),
                _ => output::print_single(&summary, format),
            }
        }
    }
}

fn print_summary(summary: &RunSummary) -> CliResult<()> {
    let run = &summary.run;
    println!("Run:      {}", run.run_id);
    println!("Category: {}", run.category);
    println!("Stage:    {}", run.current_stage);
    println!("Version:  {}", run.version);
    println!(
        "Tier:     {} ({})",
        tier_label(summary.tier.tier),
        summary.tier.reason
    );
    println!(
        "Budget:   {}  Failures: {}",
        run.budget_remaining, run.failure_count
    );
    for gate in &summary.gates {
        let decided = match (&gate.decided_by, gate.decided_at) {
            (Some(by), Some(at)) => format!(" by {} at {}", by, at.format("%Y-%m-%d %H:%M:%S")),
            _ => String::new(),
        };
        println!("{}:    {}{}", gate.name, gate_label(gate.state), decided);
    }
    if let Some(lease) = &summary.lease {
        println!(
            "Lease:    {} (token {}, expires {})",
            lease.owner_id,
            lease.fencing_token,
            lease.expires_at.format("%H:%M:%S")
        );
    }

    let rows: Vec<ReceiptRow> = summary.latest_receipts.values().map(ReceiptRow::from).collect();
    if !rows.is_empty() {
        println!();
        output::print_output(rows, OutputFormat::Table)?;
    }
    Ok(())
}

pub async fn history(
    args: RunArgs,
    orchestrator: &Orchestrator,
    retry: &RetryPolicy,
    format: OutputFormat,
) -> CliResult<()> {
    let run_id = args.run_id();
    let receipts = retry.run(|| orchestrator.history(&run_id)).await?;
    match format {
        OutputFormat::Table => {
            let rows: Vec<ReceiptRow> = receipts.iter().map(ReceiptRow::from).collect();
            output::print_output(rows, format)
        }
        _ => output::print_single(&receipts, format),
    }
}
