//! Step executor
//!
//! Runs one step idempotently and writes a receipt for every attempt.
//!
//! 1. A SUCCESS receipt with the same `inputs_hash` short-circuits: it is
//!    returned unchanged and the action is never invoked. If the run never
//!    recorded that receipt (a crash between append and save) and the step is
//!    current, the receipt is replayed into the run.
//! 2. Otherwise the step must be the run's current stage, its gate must be
//!    APPROVED and, for expensive steps, the ops tier must allow it.
//! 3. The step is marked RUNNING, the action runs under the caller's
//!    deadline while the lease heartbeat renews, and the outcome is recorded
//!    as a receipt plus a fenced run write.
//!
//! The executor never retries. Retry policy belongs to the driver.

use crate::actions::{StepAction, StepContext, StepFailure, StepOutput};
use crate::error::{EngineError, Result};
use crate::inputs::StepInputs;
use crate::lock::LeaseGuard;
use crate::ops_tier::OpsTierEvaluator;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use gantry_state::{validate_relative_path, Storage, StoreError};
use gantry_types::{
    ContentHash, DecisionAction, GateDecisionRecord, GateName, GateState, Receipt, Run, Stage,
    StepErrorKind, StepName, StepStatus, WorkerIdentity,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// Decided-by recorded on automatic gate resets
pub const SYSTEM_ACTOR: &str = "system";

/// How the returned receipt came about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceiptSource {
    /// The action ran now
    Executed,
    /// An earlier SUCCESS receipt for the same inputs was returned
    Cached,
    /// An earlier SUCCESS receipt the run had not recorded was applied
    Repaired,
}

/// Result of one `execute` call
#[derive(Debug, Clone, Serialize)]
pub struct StepExecution {
    pub receipt: Receipt,
    /// The run after the call
    pub run: Run,
    pub source: ReceiptSource,
}

/// Executes steps against the shared store
#[derive(Clone)]
pub struct StepExecutor {
    store: Arc<dyn Storage>,
    ops: OpsTierEvaluator,
    worker: WorkerIdentity,
}

impl StepExecutor {
    pub fn new(store: Arc<dyn Storage>, ops: OpsTierEvaluator, worker: WorkerIdentity) -> Self {
        Self { store, ops, worker }
    }

    /// Latest SUCCESS receipt of `step` whose inputs hash matches
    pub async fn find_cached(
        &self,
        run: &Run,
        step: StepName,
        inputs_hash: &ContentHash,
    ) -> Result<Option<Receipt>> {
        let mut history = self.store.history(&run.run_id);
        let mut found = None;
        while let Some(receipt) = history.next().await {
            let receipt = receipt?;
            if receipt.step_name == step && receipt.is_success() && &receipt.inputs_hash == inputs_hash
            {
                found = Some(receipt);
            }
        }
        Ok(found)
    }

    /// Run `step` with `action` under `lease`, bounded by `timeout`
    pub async fn execute(
        &self,
        run: Run,
        step: StepName,
        action: Option<Arc<dyn StepAction>>,
        inputs: StepInputs,
        timeout: Duration,
        lease: &LeaseGuard,
    ) -> Result<StepExecution> {
        if let Some(receipt) = self.find_cached(&run, step, &inputs.hash).await? {
            return self.replay(run, step, receipt, lease).await;
        }

        if run.current_step() != Some(step) {
            return Err(EngineError::InvalidTransition(format!(
                "{} is not the current stage of {} ({})",
                step, run.run_id, run.current_stage
            )));
        }
        if let Some(gate) = step.guarded_by() {
            let state = run.gate_state(gate);
            if state != GateState::Approved {
                return Err(EngineError::InvalidTransition(format!(
                    "{} requires {} to be APPROVED, it is {:?}",
                    step, gate, state
                )));
            }
        }
        self.ops.check(&run, step)?;

        // RUNNING is persisted first so other workers see the attempt
        let mut marked = run.clone();
        marked.step_mut(step).status = StepStatus::Running;
        marked.updated_at = Utc::now();
        let running = self
            .store
            .save(&marked, run.version, lease.token())
            .await?;

        let started_at = Utc::now();
        tracing::info!(
            run_id = %run.run_id,
            step = %step,
            inputs_hash = %inputs.hash.short(),
            fencing_token = %lease.token(),
            "Executing step"
        );

        let outcome = match action {
            None => Err(StepFailure::new(
                StepErrorKind::NotConfigured,
                format!("no action configured for {}", step),
            )),
            Some(action) => {
                let ctx = StepContext {
                    run_id: run.run_id.clone(),
                    step,
                    inputs: inputs.document.clone(),
                    inputs_hash: inputs.hash.clone(),
                    run_dir: self.store.run_dir(&run.run_id),
                };
                let heartbeat = lease.heartbeat();
                let result = match tokio::time::timeout(timeout, action.run(&ctx)).await {
                    Ok(result) => result,
                    Err(_) => Err(StepFailure::new(
                        StepErrorKind::Timeout,
                        format!("no result within {}s", timeout.as_secs()),
                    )),
                };
                if heartbeat.lost() {
                    tracing::warn!(run_id = %run.run_id, step = %step, "Lease lost while step was running");
                }
                result
            }
        };

        match outcome {
            Ok(output) => {
                self.record_success(running, step, inputs, output, started_at, timeout, lease)
                    .await
            }
            Err(failure) => {
                Err(self
                    .record_failure(running, step, inputs, failure, started_at, timeout, lease)
                    .await)
            }
        }
    }

    async fn replay(
        &self,
        run: Run,
        step: StepName,
        receipt: Receipt,
        lease: &LeaseGuard,
    ) -> Result<StepExecution> {
        let state = run.step(step);
        let recorded = state.status == StepStatus::Done && state.receipt_id == Some(receipt.receipt_id);
        if recorded || run.current_step() != Some(step) {
            tracing::debug!(run_id = %run.run_id, step = %step, receipt_id = %receipt.receipt_id, "Returning cached receipt");
            return Ok(StepExecution {
                receipt,
                run,
                source: ReceiptSource::Cached,
            });
        }

        tracing::warn!(
            run_id = %run.run_id,
            step = %step,
            receipt_id = %receipt.receipt_id,
            "Replaying unrecorded SUCCESS receipt into run"
        );
        let mut next = run.clone();
        apply_success(&mut next, step, &receipt, Utc::now());
        let saved = self.store.save(&next, run.version, lease.token()).await?;
        Ok(StepExecution {
            receipt,
            run: saved,
            source: ReceiptSource::Repaired,
        })
    }

    /// Output that cannot be recorded fails the step like an action error,
    /// so the run never stays RUNNING without a receipt
    #[allow(clippy::too_many_arguments)]
    async fn record_success(
        &self,
        running: Run,
        step: StepName,
        inputs: StepInputs,
        output: StepOutput,
        started_at: DateTime<Utc>,
        timeout: Duration,
        lease: &LeaseGuard,
    ) -> Result<StepExecution> {
        let outputs_hash = match check_output(&output) {
            Ok(hash) => hash,
            Err(failure) => {
                return Err(self
                    .record_failure(running, step, inputs, failure, started_at, timeout, lease)
                    .await)
            }
        };
        for (path, bytes) in &output.artifacts {
            if let Err(err) = self.store.write_artifact(&running.run_id, path, bytes).await {
                let failure = StepFailure::new(
                    StepErrorKind::Io,
                    format!("could not store artifact {}: {}", path, err),
                );
                return Err(self
                    .record_failure(running, step, inputs, failure, started_at, timeout, lease)
                    .await);
            }
        }

        let receipt = Receipt::success(
            running.run_id.clone(),
            step,
            inputs.hash.clone(),
            outputs_hash,
            started_at,
            &self.worker,
            output.cost,
            lease.token(),
        );
        if let Err(err) = self.store.append(&receipt).await {
            let failure = StepFailure::new(
                StepErrorKind::Io,
                format!("could not record receipt: {}", err),
            );
            return Err(self
                .record_failure(running, step, inputs, failure, started_at, timeout, lease)
                .await);
        }

        // From here on a crash is repaired by replaying the receipt
        let mut next = running.clone();
        apply_success(&mut next, step, &receipt, receipt.finished_at);
        let saved = self
            .store
            .save(&next, running.version, lease.token())
            .await?;

        tracing::info!(
            run_id = %saved.run_id,
            step = %step,
            outputs_hash = %receipt.outputs_hash.as_ref().map(|h| h.short()).unwrap_or_default(),
            cost = receipt.cost,
            stage = %saved.current_stage,
            version = saved.version,
            "Step succeeded"
        );
        Ok(StepExecution {
            receipt,
            run: saved,
            source: ReceiptSource::Executed,
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn record_failure(
        &self,
        running: Run,
        step: StepName,
        inputs: StepInputs,
        failure: StepFailure,
        started_at: DateTime<Utc>,
        timeout: Duration,
        lease: &LeaseGuard,
    ) -> EngineError {
        let receipt = Receipt::failure(
            running.run_id.clone(),
            step,
            inputs.hash,
            started_at,
            &self.worker,
            failure.kind,
            failure.message.clone(),
            lease.token(),
        );
        if let Err(err) = self.store.append(&receipt).await {
            return err.into();
        }

        if let Err(err) = self.save_failed(&running, step, receipt.finished_at, lease).await {
            tracing::error!(
                run_id = %running.run_id,
                step = %step,
                receipt_id = %receipt.receipt_id,
                kind = %failure.kind,
                error = %err,
                "Step failure receipt recorded but the run could not be updated"
            );
            return err;
        }

        tracing::warn!(
            run_id = %running.run_id,
            step = %step,
            kind = %failure.kind,
            message = %failure.message,
            "Step failed"
        );
        match failure.kind {
            StepErrorKind::Timeout => EngineError::StepTimeout {
                step,
                timeout_secs: timeout.as_secs(),
                receipt_id: receipt.receipt_id,
            },
            kind => EngineError::StepExecution {
                step,
                kind,
                message: failure.message,
                receipt_id: receipt.receipt_id,
            },
        }
    }

    /// Mark the step FAILED and count the failure. A version conflict is
    /// retried once from a fresh read; fencing errors are returned.
    async fn save_failed(
        &self,
        running: &Run,
        step: StepName,
        at: DateTime<Utc>,
        lease: &LeaseGuard,
    ) -> Result<Run> {
        let mut next = running.clone();
        apply_failure(&mut next, step, at);
        match self.store.save(&next, running.version, lease.token()).await {
            Ok(saved) => Ok(saved),
            Err(StoreError::VersionConflict { .. }) => {
                let mut fresh = self.store.load(&running.run_id).await?;
                let version = fresh.version;
                apply_failure(&mut fresh, step, at);
                Ok(self.store.save(&fresh, version, lease.token()).await?)
            }
            Err(err) => Err(err.into()),
        }
    }
}

impl std::fmt::Debug for StepExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepExecutor")
            .field("worker", &self.worker)
            .finish()
    }
}

/// Artifact paths must stay inside the run directory and outputs must hash
fn check_output(output: &StepOutput) -> std::result::Result<ContentHash, StepFailure> {
    for (path, _) in &output.artifacts {
        if validate_relative_path(path).is_err() {
            return Err(StepFailure::new(
                StepErrorKind::InvalidOutput,
                format!("artifact path {:?} escapes the run directory", path),
            ));
        }
    }
    ContentHash::of_json(&output.outputs).map_err(|e| {
        StepFailure::new(
            StepErrorKind::InvalidOutput,
            format!("outputs cannot be hashed: {}", e),
        )
    })
}

fn apply_failure(run: &mut Run, step: StepName, now: DateTime<Utc>) {
    let state = run.step_mut(step);
    state.status = StepStatus::Failed;
    state.updated_at = Some(now);
    run.failure_count = run.failure_count.saturating_add(1);
    run.updated_at = now;
}

/// Record a SUCCESS receipt on the run and advance it
fn apply_success(run: &mut Run, step: StepName, receipt: &Receipt, now: DateTime<Utc>) {
    let state = run.step_mut(step);
    state.status = StepStatus::Done;
    state.inputs_hash = Some(receipt.inputs_hash.clone());
    state.outputs_hash = receipt.outputs_hash.clone();
    state.receipt_id = Some(receipt.receipt_id);
    state.updated_at = Some(now);

    run.budget_remaining = run.budget_remaining.saturating_sub(receipt.cost);
    run.current_stage = Stage::after(step);
    run.updated_at = now;

    // Completing the step before a rejected gate re-opens it
    for gate in GateName::ALL {
        if gate.preceding_step() == step && run.gate_state(gate) == GateState::Rejected {
            run.record_decision(GateDecisionRecord {
                gate,
                action: DecisionAction::Reset,
                decided_by: SYSTEM_ACTOR.to_string(),
                decided_at: now,
                notes: Some(format!("{} re-ran after rejection", step)),
                acknowledged_warnings: false,
                contracts_snapshot: Vec::new(),
            });
        }
    }
}
