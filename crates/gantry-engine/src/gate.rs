//! Gate controller
//!
//! Decides gates against a fresh contract evaluation. The controller is a
//! pure transition over a loaded run: it returns the run to persist and the
//! reports the decision saw. The orchestrator persists the result under a
//! lease.
//!
//! - Approval: refused with `GateBlocked` while any required contract FAILs;
//!   WARN (and FAIL from a non-required contract) needs
//!   `acknowledge_warnings` plus non-empty notes.
//! - Rejection: never blocked by contracts. Moves the run back to the step
//!   preceding the gate and bumps that step's revision.

use crate::contracts::{Artifacts, ContractRegistry};
use crate::error::{EngineError, Result};
use chrono::{DateTime, Utc};
use gantry_types::{
    ContractReport, DecisionAction, GateDecisionRecord, GateName, Run, Stage, StepState,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Reviewer decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GateDecision {
    Approve,
    Reject,
}

impl std::fmt::Display for GateDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GateDecision::Approve => f.write_str("approve"),
            GateDecision::Reject => f.write_str("reject"),
        }
    }
}

/// A reviewer's decision on one gate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionRequest {
    pub decision: GateDecision,
    pub decided_by: String,
    #[serde(default)]
    pub notes: Option<String>,
    /// Explicit override of WARN-level findings
    #[serde(default)]
    pub acknowledge_warnings: bool,
}

impl DecisionRequest {
    pub fn approve(decided_by: impl Into<String>) -> Self {
        Self {
            decision: GateDecision::Approve,
            decided_by: decided_by.into(),
            notes: None,
            acknowledge_warnings: false,
        }
    }

    pub fn reject(decided_by: impl Into<String>) -> Self {
        Self {
            decision: GateDecision::Reject,
            ..Self::approve(decided_by)
        }
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn acknowledging_warnings(mut self) -> Self {
        self.acknowledge_warnings = true;
        self
    }

    fn has_notes(&self) -> bool {
        self.notes.as_deref().is_some_and(|n| !n.trim().is_empty())
    }
}

/// Result of an accepted decision
#[derive(Debug, Clone, Serialize)]
pub struct GateOutcome {
    /// The run with the decision applied. The controller does not persist
    /// it; the orchestrator returns the saved run.
    pub run: Run,
    pub reports: Vec<ContractReport>,
}

/// Gate state machine over the contract registry
#[derive(Debug, Clone)]
pub struct GateController {
    contracts: Arc<ContractRegistry>,
}

impl GateController {
    pub fn new(contracts: Arc<ContractRegistry>) -> Self {
        Self { contracts }
    }

    pub fn contracts(&self) -> &ContractRegistry {
        &self.contracts
    }

    /// Evaluate contracts and apply the decision to `run`
    pub fn request_decision(
        &self,
        mut run: Run,
        gate: GateName,
        request: &DecisionRequest,
        artifacts: &Artifacts,
        now: DateTime<Utc>,
    ) -> Result<GateOutcome> {
        if request.decided_by.trim().is_empty() {
            return Err(EngineError::InvalidTransition(
                "a gate decision needs a reviewer".into(),
            ));
        }
        let state = run.gate_state(gate);
        if state.is_decided() {
            return Err(EngineError::InvalidTransition(format!(
                "{} is already {:?}; re-run {} to re-open it",
                gate,
                state,
                gate.preceding_step()
            )));
        }
        if !run.is_at_gate(gate) {
            return Err(EngineError::InvalidTransition(format!(
                "run {} has not reached {} (current stage {})",
                run.run_id, gate, run.current_stage
            )));
        }

        let reports = self.contracts.evaluate_all(&run, artifacts, now);

        if request.decision == GateDecision::Approve {
            let blocking = names(&reports, |r| r.required && r.verdict.is_fail());
            if !blocking.is_empty() {
                return Err(EngineError::GateBlocked {
                    gate,
                    validators: blocking,
                    reports,
                });
            }
            let warnings = names(&reports, |r| {
                r.verdict.is_warn() || (!r.required && r.verdict.is_fail())
            });
            if !warnings.is_empty() && !(request.acknowledge_warnings && request.has_notes()) {
                return Err(EngineError::OverrideRequired {
                    gate,
                    validators: warnings,
                    reports,
                });
            }
        }

        let action = match request.decision {
            GateDecision::Approve => DecisionAction::Approve,
            GateDecision::Reject => DecisionAction::Reject,
        };
        run.record_decision(GateDecisionRecord {
            gate,
            action,
            decided_by: request.decided_by.clone(),
            decided_at: now,
            notes: request.notes.clone(),
            acknowledged_warnings: request.acknowledge_warnings,
            contracts_snapshot: reports.clone(),
        });

        if action == DecisionAction::Reject {
            let back_to = gate.preceding_step();
            *run.step_mut(back_to) = StepState::pending(back_to);
            run.bump_revision(back_to);
            run.current_stage = Stage::from(back_to);
        }
        run.updated_at = now;

        Ok(GateOutcome { run, reports })
    }
}

fn names(reports: &[ContractReport], pick: impl Fn(&ContractReport) -> bool) -> Vec<String> {
    reports
        .iter()
        .filter(|r| pick(r))
        .map(|r| r.validator_name.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts::testing::Fixed;
    use gantry_types::{Finding, GateState, RunId, StepName, StepStatus, Verdict};
    use proptest::prelude::*;

    fn run_at(gate: GateName) -> Run {
        let mut run = Run::new(RunId::new("a-20260101"), "a", Utc::now(), 100);
        for step in gate.preceding_step().predecessors() {
            run.step_mut(*step).status = StepStatus::Done;
        }
        run.step_mut(gate.preceding_step()).status = StepStatus::Done;
        run.current_stage = Stage::from(gate.following_step());
        if gate == GateName::Gate2 {
            run.gate1_state = GateState::Approved;
        }
        run
    }

    fn controller(verdicts: &[(Verdict, bool)]) -> GateController {
        let mut registry = ContractRegistry::new();
        for (index, (verdict, required)) in verdicts.iter().enumerate() {
            registry.register(Fixed::new(&format!("v{}", index), verdict.clone()), *required);
        }
        GateController::new(Arc::new(registry))
    }

    fn fail() -> Verdict {
        Verdict::Fail {
            findings: vec![Finding::new("f", "fatal")],
        }
    }

    fn warn() -> Verdict {
        Verdict::Warn {
            findings: vec![Finding::new("w", "warning")],
        }
    }

    #[test]
    fn approve_with_passing_contracts() {
        let gates = controller(&[(Verdict::Pass, true)]);
        let outcome = gates
            .request_decision(
                run_at(GateName::Gate1),
                GateName::Gate1,
                &DecisionRequest::approve("ana"),
                &Artifacts::new(),
                Utc::now(),
            )
            .unwrap();
        assert_eq!(outcome.run.gate1_state, GateState::Approved);
        assert_eq!(outcome.run.decisions[0].contracts_snapshot.len(), 1);
    }

    #[test]
    fn fail_blocks_approval_and_leaves_gate_pending() {
        let gates = controller(&[(Verdict::Pass, true), (fail(), true)]);
        let err = gates
            .request_decision(
                run_at(GateName::Gate2),
                GateName::Gate2,
                &DecisionRequest::approve("ana").with_notes("ship it").acknowledging_warnings(),
                &Artifacts::new(),
                Utc::now(),
            )
            .unwrap_err();
        match err {
            EngineError::GateBlocked { validators, reports, .. } => {
                assert_eq!(validators, vec!["v1"]);
                assert_eq!(reports.len(), 2);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn warn_needs_acknowledgement_and_notes() {
        let gates = controller(&[(warn(), true)]);
        let run = run_at(GateName::Gate1);
        let decide = |request: DecisionRequest| {
            gates.request_decision(
                run.clone(),
                GateName::Gate1,
                &request,
                &Artifacts::new(),
                Utc::now(),
            )
        };

        assert!(matches!(
            decide(DecisionRequest::approve("ana")),
            Err(EngineError::OverrideRequired { .. })
        ));
        assert!(matches!(
            decide(DecisionRequest::approve("ana").acknowledging_warnings()),
            Err(EngineError::OverrideRequired { .. })
        ));
        let outcome = decide(
            DecisionRequest::approve("ana")
                .acknowledging_warnings()
                .with_notes("tone is fine for this channel"),
        )
        .unwrap();
        assert!(outcome.run.decisions[0].acknowledged_warnings);
    }

    #[test]
    fn non_required_fail_is_overridable() {
        let gates = controller(&[(fail(), false)]);
        let outcome = gates.request_decision(
            run_at(GateName::Gate1),
            GateName::Gate1,
            &DecisionRequest::approve("ana")
                .acknowledging_warnings()
                .with_notes("advisory only"),
            &Artifacts::new(),
            Utc::now(),
        );
        assert!(outcome.is_ok());
    }

    #[test]
    fn reject_moves_back_and_bumps_revision() {
        let gates = controller(&[(fail(), true)]);
        let outcome = gates
            .request_decision(
                run_at(GateName::Gate2),
                GateName::Gate2,
                &DecisionRequest::reject("ana").with_notes("pacing is off"),
                &Artifacts::new(),
                Utc::now(),
            )
            .unwrap();
        let run = outcome.run;
        assert_eq!(run.gate2_state, GateState::Rejected);
        assert_eq!(run.current_stage, Stage::Timeline);
        assert_eq!(run.step(StepName::Timeline).status, StepStatus::Pending);
        assert_eq!(run.revision(StepName::Timeline), 1);
    }

    #[test]
    fn decided_gate_is_terminal() {
        let gates = controller(&[]);
        let mut run = run_at(GateName::Gate1);
        run.gate1_state = GateState::Approved;
        let err = gates
            .request_decision(
                run,
                GateName::Gate1,
                &DecisionRequest::reject("ana"),
                &Artifacts::new(),
                Utc::now(),
            )
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidTransition(_)));
    }

    #[test]
    fn gate_not_reached() {
        let gates = controller(&[]);
        let run = Run::new(RunId::new("a-20260101"), "a", Utc::now(), 100);
        let err = gates
            .request_decision(
                run,
                GateName::Gate1,
                &DecisionRequest::approve("ana"),
                &Artifacts::new(),
                Utc::now(),
            )
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidTransition(_)));
    }

    fn verdict_strategy() -> impl Strategy<Value = (Verdict, bool)> {
        (
            prop_oneof![Just(Verdict::Pass), Just(warn()), Just(fail())],
            any::<bool>(),
        )
    }

    proptest! {
        #[test]
        fn approval_never_passes_a_required_fail(
            verdicts in prop::collection::vec(verdict_strategy(), 0..6),
            acknowledge in any::<bool>(),
            notes in prop::option::of("[a-z ]{0,12}"),
        ) {
            let gates = controller(&verdicts);
            let mut request = DecisionRequest::approve("ana");
            request.acknowledge_warnings = acknowledge;
            request.notes = notes;

            let result = gates.request_decision(
                run_at(GateName::Gate2),
                GateName::Gate2,
                &request,
                &Artifacts::new(),
                Utc::now(),
            );
            let required_fail = verdicts.iter().any(|(v, required)| *required && v.is_fail());
            if required_fail {
                let blocked = matches!(result, Err(EngineError::GateBlocked { .. }));
                prop_assert!(blocked);
            }
            if let Ok(outcome) = result {
                prop_assert_eq!(outcome.run.gate2_state, GateState::Approved);
                prop_assert!(!required_fail);
            }
        }

        #[test]
        fn rejection_always_succeeds(verdicts in prop::collection::vec(verdict_strategy(), 0..6)) {
            let gates = controller(&verdicts);
            let outcome = gates.request_decision(
                run_at(GateName::Gate1),
                GateName::Gate1,
                &DecisionRequest::reject("ana"),
                &Artifacts::new(),
                Utc::now(),
            );
            prop_assert!(outcome.is_ok());
            let run = outcome.unwrap().run;
            prop_assert_eq!(run.gate1_state, GateState::Rejected);
            prop_assert_eq!(run.current_stage, Stage::Script);
        }
    }
}
