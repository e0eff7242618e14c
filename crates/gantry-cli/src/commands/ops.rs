//! Ops tier and operator intervention commands

use super::RunArgs;
use crate::error::CliResult;
use crate::output::{self, print_info, print_success, tier_label, OutputFormat};
use clap::Args;
use gantry_engine::{Orchestrator, RetryPolicy};
use gantry_types::StepName;

#[derive(Debug, Clone, Args)]
pub struct AdjustArgs {
    #[command(flatten)]
    pub run: RunArgs,

    /// Set the remaining budget
    #[arg(long)]
    pub budget: Option<u64>,

    /// Clear the failure count
    #[arg(long)]
    pub reset_failures: bool,
}

#[derive(Debug, Clone, Args)]
pub struct RewindArgs {
    #[command(flatten)]
    pub run: RunArgs,

    /// Step to send the run back to
    #[arg(long)]
    pub step: StepName,

    /// Operator requesting the rewind
    #[arg(long)]
    pub requested_by: String,
}

pub async fn ops_tier(
    args: RunArgs,
    orchestrator: &Orchestrator,
    retry: &RetryPolicy,
    format: OutputFormat,
) -> CliResult<()> {
    let run_id = args.run_id();
    let report = retry.run(|| orchestrator.ops_tier(&run_id)).await?;
    match format {
        OutputFormat::Table => {
            println!("Tier:     {}", tier_label(report.tier));
            println!("Reason:   {}", report.reason);
            println!("Budget:   {}", report.budget_remaining);
            println!("Failures: {}", report.failure_count);
            Ok(())
        }
        _ => output::print_single(&report, format),
    }
}

pub async fn adjust_ops(
    args: AdjustArgs,
    orchestrator: &Orchestrator,
    retry: &RetryPolicy,
    format: OutputFormat,
) -> CliResult<()> {
    let run_id = args.run.run_id();
    if args.budget.is_none() && !args.reset_failures {
        print_info("Nothing to adjust; pass --budget and/or --reset-failures");
        return Ok(());
    }
    let run = retry
        .run(|| orchestrator.adjust_ops(&run_id, args.budget, args.reset_failures))
        .await?;
    match format {
        OutputFormat::Table => {
            print_success(&format!(
                "Run {} now has budget {} and {} failures",
                run.run_id, run.budget_remaining, run.failure_count
            ));
            Ok(())
        }
        _ => output::print_single(&run, format),
    }
}

pub async fn rewind(
    args: RewindArgs,
    orchestrator: &Orchestrator,
    retry: &RetryPolicy,
    format: OutputFormat,
) -> CliResult<()> {
    let run_id = args.run.run_id();
    let run = retry
        .run(|| orchestrator.rewind(&run_id, args.step, &args.requested_by))
        .await?;
    match format {
        OutputFormat::Table => {
            print_success(&format!(
                "Run {} rewound to {} (revision {})",
                run.run_id,
                run.current_stage,
                run.revision(args.step)
            ));
            Ok(())
        }
        _ => output::print_single(&run, format),
    }
}
