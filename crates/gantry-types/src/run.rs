//! The run aggregate
//!
//! A [`Run`] is persisted as `run.json` and mutated only through the run
//! store's compare-and-swap `save`. `version` grows by exactly one per
//! persisted mutation.

use crate::{
    ContentHash, DecisionAction, Gate, GateDecisionRecord, GateName, GateState, ReceiptId, RunId,
    Stage, StepName, StepStatus,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Per-step status and authoritative hashes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepState {
    pub name: StepName,
    pub ordinal: u8,
    pub status: StepStatus,
    /// Inputs hash of the latest SUCCESS receipt
    #[serde(default)]
    pub inputs_hash: Option<ContentHash>,
    /// Outputs hash of the latest SUCCESS receipt
    #[serde(default)]
    pub outputs_hash: Option<ContentHash>,
    #[serde(default)]
    pub receipt_id: Option<ReceiptId>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl StepState {
    pub fn pending(name: StepName) -> Self {
        Self {
            name,
            ordinal: name.ordinal(),
            status: StepStatus::Pending,
            inputs_hash: None,
            outputs_hash: None,
            receipt_id: None,
            updated_at: None,
        }
    }
}

/// One content-production attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub run_id: RunId,
    pub category: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub current_stage: Stage,
    pub gate1_state: GateState,
    pub gate2_state: GateState,
    pub version: u64,
    pub budget_remaining: u64,
    pub failure_count: u32,
    #[serde(default)]
    pub steps: BTreeMap<StepName, StepState>,
    /// Rework counters, bumped when the run is sent back to a step
    #[serde(default)]
    pub revisions: BTreeMap<StepName, u32>,
    /// Append-only gate decision history
    #[serde(default)]
    pub decisions: Vec<GateDecisionRecord>,
    /// Highest fencing token that has written this run
    #[serde(default)]
    pub fence: u64,
}

impl Run {
    /// A fresh run at its first persisted version
    pub fn new(run_id: RunId, category: impl Into<String>, created_at: DateTime<Utc>, budget: u64) -> Self {
        Self {
            run_id,
            category: category.into(),
            created_at,
            updated_at: created_at,
            current_stage: Stage::Discovery,
            gate1_state: GateState::Pending,
            gate2_state: GateState::Pending,
            version: 1,
            budget_remaining: budget,
            failure_count: 0,
            steps: StepName::ALL
                .into_iter()
                .map(|step| (step, StepState::pending(step)))
                .collect(),
            revisions: BTreeMap::new(),
            decisions: Vec::new(),
            fence: 0,
        }
    }

    /// The next step to run, `None` once complete
    pub fn current_step(&self) -> Option<StepName> {
        self.current_stage.step()
    }

    pub fn is_complete(&self) -> bool {
        self.current_stage == Stage::Complete
    }

    pub fn step(&self, name: StepName) -> StepState {
        self.steps
            .get(&name)
            .cloned()
            .unwrap_or_else(|| StepState::pending(name))
    }

    pub fn step_mut(&mut self, name: StepName) -> &mut StepState {
        self.steps
            .entry(name)
            .or_insert_with(|| StepState::pending(name))
    }

    pub fn revision(&self, step: StepName) -> u32 {
        self.revisions.get(&step).copied().unwrap_or(0)
    }

    pub fn bump_revision(&mut self, step: StepName) -> u32 {
        let revision = self.revisions.entry(step).or_insert(0);
        *revision += 1;
        *revision
    }

    pub fn gate_state(&self, gate: GateName) -> GateState {
        match gate {
            GateName::Gate1 => self.gate1_state,
            GateName::Gate2 => self.gate2_state,
        }
    }

    /// Append a decision and apply it to the gate state
    pub fn record_decision(&mut self, record: GateDecisionRecord) {
        let state = match record.action {
            DecisionAction::Approve => GateState::Approved,
            DecisionAction::Reject => GateState::Rejected,
            DecisionAction::Reset => GateState::Pending,
        };
        match record.gate {
            GateName::Gate1 => self.gate1_state = state,
            GateName::Gate2 => self.gate2_state = state,
        }
        self.decisions.push(record);
    }

    /// Latest decision recorded for a gate
    pub fn latest_decision(&self, gate: GateName) -> Option<&GateDecisionRecord> {
        self.decisions.iter().rev().find(|record| record.gate == gate)
    }

    /// Assemble the current view of a gate
    pub fn gate(&self, gate: GateName) -> Gate {
        let state = self.gate_state(gate);
        let decision = self
            .latest_decision(gate)
            .filter(|record| record.action != DecisionAction::Reset && state.is_decided());
        Gate {
            name: gate,
            state,
            decided_by: decision.map(|d| d.decided_by.clone()),
            decided_at: decision.map(|d| d.decided_at),
            notes: decision.and_then(|d| d.notes.clone()),
            contracts_snapshot: decision
                .map(|d| d.contracts_snapshot.clone())
                .unwrap_or_default(),
        }
    }

    /// Whether the run has reached a gate: the preceding step is DONE and
    /// the run sits at the step the gate holds back
    pub fn is_at_gate(&self, gate: GateName) -> bool {
        self.step(gate.preceding_step()).status == StepStatus::Done
            && self.current_step() == Some(gate.following_step())
    }

    /// Authoritative outputs hash of every step before `step`
    pub fn upstream_outputs(&self, step: StepName) -> BTreeMap<StepName, Option<ContentHash>> {
        step.predecessors()
            .iter()
            .map(|prior| (*prior, self.step(*prior).outputs_hash))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run() -> Run {
        Run::new(RunId::new("audio-20260101"), "audio", Utc::now(), 100)
    }

    #[test]
    fn fresh_run_defaults() {
        let run = run();
        assert_eq!(run.version, 1);
        assert_eq!(run.current_stage, Stage::Discovery);
        assert_eq!(run.gate1_state, GateState::Pending);
        assert_eq!(run.steps.len(), StepName::ALL.len());
        assert!(run
            .steps
            .values()
            .all(|step| step.status == StepStatus::Pending));
    }

    #[test]
    fn run_json_shape() {
        let value = serde_json::to_value(run()).unwrap();
        assert_eq!(value["current_stage"], "discovery");
        assert_eq!(value["gate1_state"], "PENDING");
        assert_eq!(value["version"], 1);
        assert_eq!(value["steps"]["render_upload"]["ordinal"], 5);
    }

    #[test]
    fn decisions_drive_gate_state() {
        let mut run = run();
        run.record_decision(GateDecisionRecord {
            gate: GateName::Gate1,
            action: DecisionAction::Reject,
            decided_by: "ana".into(),
            decided_at: Utc::now(),
            notes: Some("weak hook".into()),
            acknowledged_warnings: false,
            contracts_snapshot: vec![],
        });
        assert_eq!(run.gate1_state, GateState::Rejected);
        assert_eq!(run.gate(GateName::Gate1).decided_by.as_deref(), Some("ana"));

        run.record_decision(GateDecisionRecord {
            gate: GateName::Gate1,
            action: DecisionAction::Reset,
            decided_by: "system".into(),
            decided_at: Utc::now(),
            notes: None,
            acknowledged_warnings: false,
            contracts_snapshot: vec![],
        });
        let gate = run.gate(GateName::Gate1);
        assert_eq!(gate.state, GateState::Pending);
        assert!(gate.decided_by.is_none());
        assert_eq!(run.decisions.len(), 2);
    }

    #[test]
    fn revisions_count_up() {
        let mut run = run();
        assert_eq!(run.revision(StepName::Script), 0);
        assert_eq!(run.bump_revision(StepName::Script), 1);
        assert_eq!(run.bump_revision(StepName::Script), 2);
    }

    #[test]
    fn at_gate_requires_done_predecessor() {
        let mut run = run();
        assert!(!run.is_at_gate(GateName::Gate1));
        run.step_mut(StepName::Script).status = StepStatus::Done;
        run.current_stage = Stage::Assets;
        assert!(run.is_at_gate(GateName::Gate1));
        assert!(!run.is_at_gate(GateName::Gate2));
    }
}
