//! Orchestrator facade
//!
//! The single API the CLI and the control plane drive. Every mutating call
//! takes the run lease first, re-reads the run under it and writes back with
//! the lease's fencing token, so two drivers never interleave on one run.

use crate::actions::StepActions;
use crate::config::PipelineConfig;
use crate::contracts::{Artifacts, ContractRegistry, RenderReadiness};
use crate::error::{EngineError, Result};
use crate::executor::{StepExecution, StepExecutor};
use crate::gate::{DecisionRequest, GateController, GateOutcome};
use crate::inputs::StepInputs;
use crate::lock::{LeaseGuard, LockManager};
use crate::ops_tier::OpsTierEvaluator;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use gantry_state::Storage;
use gantry_types::{
    ContractReport, DecisionAction, Gate, GateDecisionRecord, GateName, GateState, LockKey,
    LockRecord, OpsTier, OpsTierReport, Receipt, Run, RunId, Stage, StepName, StepState,
    WorkerIdentity,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::instrument;

/// Report file written on every tier evaluation
pub const OPS_TIER_REPORT: &str = "ops_tier_report";

/// Why `run_e2e` stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "halt", rename_all = "snake_case")]
pub enum HaltReason {
    /// The next step sits behind a gate that is not APPROVED
    AwaitingGate { gate: GateName },
    /// Only the final step remains; it runs through `render_and_upload`
    AwaitingRender,
    Complete,
}

/// Result of `run_e2e`
#[derive(Debug, Clone, Serialize)]
pub struct RunProgress {
    pub run: Run,
    /// Receipts produced or replayed by this call, in execution order
    pub receipts: Vec<Receipt>,
    pub halted: HaltReason,
}

/// Everything a reviewer needs to see about one run
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run: Run,
    pub tier: OpsTierReport,
    pub gates: Vec<Gate>,
    /// Most recent receipt of each step that has one
    pub latest_receipts: BTreeMap<StepName, Receipt>,
    /// Current run lease, if any record exists
    pub lease: Option<LockRecord>,
}

/// One row of `list_runs`
#[derive(Debug, Clone, Serialize)]
pub struct RunOverview {
    pub run_id: RunId,
    pub category: String,
    pub current_stage: Stage,
    pub gate1_state: GateState,
    pub gate2_state: GateState,
    pub version: u64,
    pub budget_remaining: u64,
    pub failure_count: u32,
    pub tier: OpsTier,
    pub updated_at: DateTime<Utc>,
}

/// Coordinates the store, leases, executor, gates and ops tiers
pub struct Orchestrator {
    config: Arc<PipelineConfig>,
    store: Arc<dyn Storage>,
    locks: LockManager,
    executor: StepExecutor,
    gates: GateController,
    ops: OpsTierEvaluator,
    actions: StepActions,
    worker: WorkerIdentity,
}

impl Orchestrator {
    pub fn new(
        config: PipelineConfig,
        store: Arc<dyn Storage>,
        actions: StepActions,
        contracts: ContractRegistry,
    ) -> Result<Self> {
        config.validate()?;
        let worker = config.worker.identity();
        let ops = OpsTierEvaluator::new(config.ops.clone());
        let locks = LockManager::new(store.clone(), &config.lease);
        let executor = StepExecutor::new(store.clone(), ops.clone(), worker.clone());
        let gates = GateController::new(Arc::new(contracts));

        tracing::info!(
            host_id = %worker.host_id,
            worker_id = %worker.worker_id,
            validators = gates.contracts().len(),
            "Orchestrator ready"
        );

        Ok(Self {
            config: Arc::new(config),
            store,
            locks,
            executor,
            gates,
            ops,
            actions,
            worker,
        })
    }

    /// Command-hook actions and the built-in validators, both from `config`
    pub fn from_config(config: PipelineConfig, store: Arc<dyn Storage>) -> Result<Self> {
        let actions = StepActions::from_config(&config);
        let contracts = ContractRegistry::from_config(&config.contracts)?;
        Self::new(config, store, actions, contracts)
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn Storage> {
        &self.store
    }

    pub fn worker(&self) -> &WorkerIdentity {
        &self.worker
    }

    /// Create today's run for `category`
    #[instrument(skip(self))]
    pub async fn init_run(&self, category: &str) -> Result<Run> {
        let category = category.trim();
        if category.is_empty() {
            return Err(EngineError::InvalidTransition(
                "a run needs a non-empty category".into(),
            ));
        }
        let now = Utc::now();
        let run_id = RunId::derive(category, now);
        let run = Run::new(run_id, category, now, self.config.budget.initial);
        let created = self.store.create(run).await?;
        tracing::info!(
            run_id = %created.run_id,
            budget = created.budget_remaining,
            "Run created"
        );
        Ok(created)
    }

    pub async fn load_run(&self, run_id: &RunId) -> Result<Run> {
        Ok(self.store.load(run_id).await?)
    }

    /// Advance the run step by step until a gate, the final step or the end
    #[instrument(skip(self), fields(run_id = %run_id))]
    pub async fn run_e2e(&self, run_id: &RunId) -> Result<RunProgress> {
        let lease = self.lease_run(run_id).await?;
        let result = self.run_e2e_leased(run_id, &lease).await;
        self.release(lease).await;
        result
    }

    async fn run_e2e_leased(&self, run_id: &RunId, lease: &LeaseGuard) -> Result<RunProgress> {
        let mut run = self.store.load(run_id).await?;
        let mut receipts = Vec::new();

        let halted = loop {
            let Some(step) = run.current_step() else {
                break HaltReason::Complete;
            };
            if let Some(gate) = step.guarded_by() {
                if run.gate_state(gate) != GateState::Approved {
                    break HaltReason::AwaitingGate { gate };
                }
            }
            if step == StepName::RenderUpload {
                break HaltReason::AwaitingRender;
            }

            let execution = self.execute_leased(run, step, lease).await?;
            if execution.run.current_step() == Some(step) {
                return Err(EngineError::InvalidTransition(format!(
                    "{} did not advance past {}",
                    run_id, step
                )));
            }
            receipts.push(execution.receipt);
            run = execution.run;
        };

        self.evaluate_tier(&run).await?;
        tracing::info!(
            run_id = %run.run_id,
            executed = receipts.len(),
            stage = %run.current_stage,
            halted = ?halted,
            "Run halted"
        );
        Ok(RunProgress {
            run,
            receipts,
            halted,
        })
    }

    /// Execute one step of the run. A step already executed with the same
    /// inputs returns its cached receipt.
    #[instrument(skip(self), fields(run_id = %run_id, step = %step))]
    pub async fn execute_step(&self, run_id: &RunId, step: StepName) -> Result<StepExecution> {
        let lease = self.lease_run(run_id).await?;
        let result = async {
            let run = self.store.load(run_id).await?;
            self.execute_leased(run, step, &lease).await
        }
        .await;
        self.release(lease).await;
        result
    }

    async fn execute_leased(
        &self,
        run: Run,
        step: StepName,
        lease: &LeaseGuard,
    ) -> Result<StepExecution> {
        let hook = self.config.hook(step);
        let inputs = StepInputs::for_step(&run, step, &hook)?;
        self.executor
            .execute(run, step, self.actions.get(step), inputs, hook.timeout(), lease)
            .await
    }

    /// Approve or reject a gate after re-evaluating every contract
    #[instrument(skip(self, request), fields(run_id = %run_id, gate = %gate, decision = ?request.decision))]
    pub async fn decide_gate(
        &self,
        run_id: &RunId,
        gate: GateName,
        request: DecisionRequest,
    ) -> Result<GateOutcome> {
        let lease = self.lease_run(run_id).await?;
        let result = self.decide_gate_leased(run_id, gate, &request, &lease).await;
        self.release(lease).await;
        result
    }

    async fn decide_gate_leased(
        &self,
        run_id: &RunId,
        gate: GateName,
        request: &DecisionRequest,
        lease: &LeaseGuard,
    ) -> Result<GateOutcome> {
        let run = self.store.load(run_id).await?;
        let expected_version = run.version;
        let artifacts = Artifacts::collect(&*self.store, run_id).await?;

        let outcome = self
            .gates
            .request_decision(run, gate, request, &artifacts, Utc::now());

        // Refused approvals still leave their reports behind
        let reports = match &outcome {
            Ok(outcome) => Some(outcome.reports.as_slice()),
            Err(err) => err.contract_reports(),
        };
        if let Some(reports) = reports {
            self.write_contract_reports(run_id, reports).await?;
        }

        let outcome = outcome?;
        let run = self
            .store
            .save(&outcome.run, expected_version, lease.token())
            .await?;
        tracing::info!(
            run_id = %run_id,
            gate = %gate,
            state = ?run.gate_state(gate),
            decided_by = %request.decided_by,
            version = run.version,
            "Gate decided"
        );
        Ok(GateOutcome {
            run,
            reports: outcome.reports,
        })
    }

    async fn write_contract_reports(&self, run_id: &RunId, reports: &[ContractReport]) -> Result<()> {
        for report in reports {
            let name = format!("{}_report", report.validator_name);
            self.store
                .write_report(run_id, &name, &serde_json::to_value(report)?)
                .await?;
        }
        Ok(())
    }

    /// Run the final step. Refused while the tier blocks expensive work,
    /// before gate2 is APPROVED, or while upstream artifacts are missing.
    #[instrument(skip(self), fields(run_id = %run_id))]
    pub async fn render_and_upload(&self, run_id: &RunId) -> Result<StepExecution> {
        let lease = self.lease_run(run_id).await?;
        let result = self.render_and_upload_leased(run_id, &lease).await;
        self.release(lease).await;
        result
    }

    async fn render_and_upload_leased(
        &self,
        run_id: &RunId,
        lease: &LeaseGuard,
    ) -> Result<StepExecution> {
        let step = StepName::RenderUpload;
        let run = self.store.load(run_id).await?;
        let hook = self.config.hook(step);
        let inputs = StepInputs::for_step(&run, step, &hook)?;
        let action = self.actions.get(step);

        if self
            .executor
            .find_cached(&run, step, &inputs.hash)
            .await?
            .is_some()
        {
            return self
                .executor
                .execute(run, step, action, inputs, hook.timeout(), lease)
                .await;
        }

        let report = self.evaluate_tier(&run).await?;
        if report.tier.blocks_expensive() {
            tracing::warn!(run_id = %run_id, tier = %report.tier, reason = %report.reason, "Render refused by ops tier");
            return Err(EngineError::TierBlocked {
                step,
                tier: report.tier,
                reason: report.reason,
            });
        }
        if run.gate2_state != GateState::Approved {
            return Err(EngineError::InvalidTransition(format!(
                "{} requires {} to be APPROVED, it is {:?}",
                step,
                GateName::Gate2,
                run.gate2_state
            )));
        }
        if run.current_step() != Some(step) {
            return Err(EngineError::InvalidTransition(format!(
                "run {} is at {}, not {}",
                run_id, run.current_stage, step
            )));
        }
        let artifacts = Artifacts::collect(&*self.store, run_id).await?;
        let missing = RenderReadiness::missing(&run, &artifacts);
        if !missing.is_empty() {
            return Err(EngineError::ArtifactsMissing(missing));
        }

        self.executor
            .execute(run, step, action, inputs, hook.timeout(), lease)
            .await
    }

    /// Evaluate the run's tier and write `ops_tier_report.json`
    #[instrument(skip(self), fields(run_id = %run_id))]
    pub async fn ops_tier(&self, run_id: &RunId) -> Result<OpsTierReport> {
        let run = self.store.load(run_id).await?;
        self.evaluate_tier(&run).await
    }

    async fn evaluate_tier(&self, run: &Run) -> Result<OpsTierReport> {
        let report = self.ops.evaluate(run);
        self.store
            .write_report(&run.run_id, OPS_TIER_REPORT, &serde_json::to_value(&report)?)
            .await?;
        tracing::debug!(run_id = %run.run_id, tier = %report.tier, "Ops tier evaluated");
        Ok(report)
    }

    /// Operator intervention: set the budget and/or clear the failure count
    #[instrument(skip(self), fields(run_id = %run_id))]
    pub async fn adjust_ops(
        &self,
        run_id: &RunId,
        budget: Option<u64>,
        reset_failures: bool,
    ) -> Result<Run> {
        let lease = self.lease_run(run_id).await?;
        let result = async {
            let mut run = self.store.load(run_id).await?;
            let expected_version = run.version;
            if let Some(budget) = budget {
                run.budget_remaining = budget;
            }
            if reset_failures {
                run.failure_count = 0;
            }
            run.updated_at = Utc::now();
            let saved = self.store.save(&run, expected_version, lease.token()).await?;
            let report = self.evaluate_tier(&saved).await?;
            tracing::info!(
                run_id = %run_id,
                budget = saved.budget_remaining,
                failures = saved.failure_count,
                tier = %report.tier,
                "Ops adjusted"
            );
            Ok::<_, EngineError>(saved)
        }
        .await;
        self.release(lease).await;
        result
    }

    /// Send the run back to `step`. That step and every later one return to
    /// PENDING and every gate after it re-opens.
    #[instrument(skip(self), fields(run_id = %run_id, step = %step))]
    pub async fn rewind(&self, run_id: &RunId, step: StepName, requested_by: &str) -> Result<Run> {
        if requested_by.trim().is_empty() {
            return Err(EngineError::InvalidTransition(
                "a rewind needs a requester".into(),
            ));
        }
        let lease = self.lease_run(run_id).await?;
        let result = async {
            let mut run = self.store.load(run_id).await?;
            let expected_version = run.version;
            rewind_run(&mut run, step, requested_by, Utc::now())?;
            let saved = self.store.save(&run, expected_version, lease.token()).await?;
            tracing::info!(
                run_id = %run_id,
                step = %step,
                requested_by,
                version = saved.version,
                "Run rewound"
            );
            Ok::<_, EngineError>(saved)
        }
        .await;
        self.release(lease).await;
        result
    }

    /// Receipts of a run in `started_at` order
    pub async fn history(&self, run_id: &RunId) -> Result<Vec<Receipt>> {
        self.store.load(run_id).await?;
        Ok(self.store.history(run_id).try_collect().await?)
    }

    pub async fn summary(&self, run_id: &RunId) -> Result<RunSummary> {
        let run = self.store.load(run_id).await?;
        let tier = self.ops.evaluate(&run);
        let gates = GateName::ALL.iter().map(|gate| run.gate(*gate)).collect();

        let mut latest_receipts = BTreeMap::new();
        let mut history = self.store.history(run_id);
        while let Some(receipt) = history.try_next().await? {
            latest_receipts.insert(receipt.step_name, receipt);
        }
        drop(history);

        let lease = self.locks.current(&LockKey::run(run_id)).await?;
        Ok(RunSummary {
            run,
            tier,
            gates,
            latest_receipts,
            lease,
        })
    }

    pub async fn list_runs(&self) -> Result<Vec<RunOverview>> {
        let runs = self.store.list().await?;
        Ok(runs
            .into_iter()
            .map(|run| {
                let tier = self.ops.evaluate(&run).tier;
                RunOverview {
                    run_id: run.run_id,
                    category: run.category,
                    current_stage: run.current_stage,
                    gate1_state: run.gate1_state,
                    gate2_state: run.gate2_state,
                    version: run.version,
                    budget_remaining: run.budget_remaining,
                    failure_count: run.failure_count,
                    tier,
                    updated_at: run.updated_at,
                }
            })
            .collect())
    }

    async fn lease_run(&self, run_id: &RunId) -> Result<LeaseGuard> {
        if !run_id.is_path_safe() {
            return Err(EngineError::NotFound(format!("run {}", run_id)));
        }
        self.locks.lease(LockKey::run(run_id), &self.worker).await
    }

    async fn release(&self, lease: LeaseGuard) {
        let key = lease.key().clone();
        if let Err(err) = lease.release().await {
            tracing::warn!(key = %key, error = %err, "Lease release failed; it will expire");
        }
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("worker", &self.worker)
            .field("actions", &self.actions)
            .field("locks", &self.locks)
            .finish()
    }
}

/// Apply a rewind to `run` in place
fn rewind_run(
    run: &mut Run,
    step: StepName,
    requested_by: &str,
    now: DateTime<Utc>,
) -> Result<()> {
    if step.ordinal() > run.current_stage.ordinal() {
        return Err(EngineError::InvalidTransition(format!(
            "cannot rewind {} forward to {} (current stage {})",
            run.run_id, step, run.current_stage
        )));
    }

    for later in StepName::ALL.iter().filter(|s| s.ordinal() >= step.ordinal()) {
        *run.step_mut(*later) = StepState::pending(*later);
    }
    run.bump_revision(step);
    run.current_stage = Stage::from(step);

    for gate in GateName::ALL {
        if gate.preceding_step().ordinal() >= step.ordinal()
            && run.gate_state(gate) != GateState::Pending
        {
            run.record_decision(GateDecisionRecord {
                gate,
                action: DecisionAction::Reset,
                decided_by: requested_by.to_string(),
                decided_at: now,
                notes: Some(format!("rewound to {}", step)),
                acknowledged_warnings: false,
                contracts_snapshot: Vec::new(),
            });
        }
    }
    run.updated_at = now;
    Ok(())
}
