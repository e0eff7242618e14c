//! Gate approval and rejection commands

use super::RunArgs;
use crate::error::CliResult;
use crate::output::{self, gate_label, print_reports, print_success, print_warning, OutputFormat};
use clap::Args;
use gantry_engine::{DecisionRequest, GateDecision, Orchestrator, RetryPolicy};
use gantry_types::GateName;

#[derive(Debug, Clone, Args)]
pub struct GateArgs {
    #[command(flatten)]
    pub run: RunArgs,

    /// Who is making the decision
    #[arg(long)]
    pub reviewer: String,

    /// Free-text notes, required when overriding warnings
    #[arg(long)]
    pub notes: Option<String>,

    /// Approve despite WARN-level contract findings
    #[arg(long = "ack-warnings")]
    pub acknowledge_warnings: bool,
}

impl GateArgs {
    fn request(&self, decision: GateDecision) -> DecisionRequest {
        DecisionRequest {
            decision,
            decided_by: self.reviewer.clone(),
            notes: self.notes.clone(),
            acknowledge_warnings: self.acknowledge_warnings,
        }
    }
}

/// Record a decision on `gate`
pub async fn decide(
    gate: GateName,
    decision: GateDecision,
    args: GateArgs,
    orchestrator: &Orchestrator,
    retry: &RetryPolicy,
    format: OutputFormat,
) -> CliResult<()> {
    let run_id = args.run.run_id();
    let request = args.request(decision);
    let outcome = retry
        .run(|| orchestrator.decide_gate(&run_id, gate, request.clone()))
        .await?;

    if !matches!(format, OutputFormat::Table) {
        return output::print_single(&outcome, format);
    }

    let state = outcome.run.gate_state(gate);
    match decision {
        GateDecision::Approve => print_success(&format!(
            "{} of {} is {}",
            gate,
            run_id,
            gate_label(state)
        )),
        GateDecision::Reject => print_warning(&format!(
            "{} of {} is {}; run is back at {}",
            gate,
            run_id,
            gate_label(state),
            outcome.run.current_stage
        )),
    }
    print_reports(&outcome.reports);
    Ok(())
}
