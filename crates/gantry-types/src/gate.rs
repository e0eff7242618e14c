//! Human approval gates
//!
//! A gate moves `PENDING -> APPROVED` or `PENDING -> REJECTED` and stays
//! there. The only way back to `PENDING` is an administrative reset tied to
//! re-running an earlier step, recorded as a [`DecisionAction::Reset`].

use crate::{ContractReport, StepName};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Gate identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateName {
    /// Script review, before paid asset generation
    Gate1,
    /// Final review, before render and upload
    Gate2,
}

impl GateName {
    pub const ALL: [GateName; 2] = [GateName::Gate1, GateName::Gate2];

    /// The step that must be DONE before the gate can be decided.
    /// Rejection moves the run back to this step.
    pub fn preceding_step(self) -> StepName {
        match self {
            GateName::Gate1 => StepName::Script,
            GateName::Gate2 => StepName::Timeline,
        }
    }

    /// The step the gate holds back
    pub fn following_step(self) -> StepName {
        match self {
            GateName::Gate1 => StepName::Assets,
            GateName::Gate2 => StepName::RenderUpload,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            GateName::Gate1 => "gate1",
            GateName::Gate2 => "gate2",
        }
    }
}

impl fmt::Display for GateName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GateName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gate1" => Ok(GateName::Gate1),
            "gate2" => Ok(GateName::Gate2),
            other => Err(format!("unknown gate '{}'", other)),
        }
    }
}

/// Gate state machine value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GateState {
    #[default]
    Pending,
    Approved,
    Rejected,
}

impl GateState {
    pub fn is_decided(self) -> bool {
        !matches!(self, GateState::Pending)
    }
}

/// What a decision record did to the gate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecisionAction {
    Approve,
    Reject,
    /// Administrative re-open back to PENDING
    Reset,
}

/// One entry in a run's append-only gate decision history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateDecisionRecord {
    pub gate: GateName,
    pub action: DecisionAction,
    pub decided_by: String,
    pub decided_at: DateTime<Utc>,
    #[serde(default)]
    pub notes: Option<String>,
    /// Approver explicitly accepted WARN-level findings
    #[serde(default)]
    pub acknowledged_warnings: bool,
    /// Contract reports the approver saw at decision time
    #[serde(default)]
    pub contracts_snapshot: Vec<ContractReport>,
}

/// Current view of a gate, assembled from the run's state and history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Gate {
    pub name: GateName,
    pub state: GateState,
    pub decided_by: Option<String>,
    pub decided_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    pub contracts_snapshot: Vec<ContractReport>,
}
