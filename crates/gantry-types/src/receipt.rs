//! Step execution receipts
//!
//! A receipt is written for every execution attempt, successful or not, and
//! is never modified afterwards.

use crate::{ContentHash, FencingToken, RunId, StepName, WorkerIdentity};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReceiptId(pub Uuid);

impl ReceiptId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ReceiptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReceiptResult {
    Success,
    Failure,
}

/// Classification of a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepErrorKind {
    /// The external action reported an error
    ActionFailed,
    /// The caller's deadline expired before the action returned
    Timeout,
    /// No action is configured for the step
    NotConfigured,
    /// The action returned output that could not be interpreted
    InvalidOutput,
    /// Local I/O failure while launching or reading the action
    Io,
}

impl fmt::Display for StepErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            StepErrorKind::ActionFailed => "action_failed",
            StepErrorKind::Timeout => "timeout",
            StepErrorKind::NotConfigured => "not_configured",
            StepErrorKind::InvalidOutput => "invalid_output",
            StepErrorKind::Io => "io",
        };
        f.write_str(label)
    }
}

/// Immutable audit record of one step execution attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub receipt_id: ReceiptId,
    pub run_id: RunId,
    pub step_name: StepName,
    pub inputs_hash: ContentHash,
    /// Present on SUCCESS only
    pub outputs_hash: Option<ContentHash>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub host_id: String,
    pub worker_id: String,
    pub result: ReceiptResult,
    pub error_kind: Option<StepErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Budget units charged for this attempt
    #[serde(default)]
    pub cost: u64,
    /// Fencing token of the lease held while executing
    pub fencing_token: FencingToken,
}

impl Receipt {
    #[allow(clippy::too_many_arguments)]
    pub fn success(
        run_id: RunId,
        step_name: StepName,
        inputs_hash: ContentHash,
        outputs_hash: ContentHash,
        started_at: DateTime<Utc>,
        worker: &WorkerIdentity,
        cost: u64,
        fencing_token: FencingToken,
    ) -> Self {
        Self {
            receipt_id: ReceiptId::generate(),
            run_id,
            step_name,
            inputs_hash,
            outputs_hash: Some(outputs_hash),
            started_at,
            finished_at: Utc::now(),
            host_id: worker.host_id.clone(),
            worker_id: worker.worker_id.clone(),
            result: ReceiptResult::Success,
            error_kind: None,
            error_message: None,
            cost,
            fencing_token,
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn failure(
        run_id: RunId,
        step_name: StepName,
        inputs_hash: ContentHash,
        started_at: DateTime<Utc>,
        worker: &WorkerIdentity,
        error_kind: StepErrorKind,
        error_message: impl Into<String>,
        fencing_token: FencingToken,
    ) -> Self {
        Self {
            receipt_id: ReceiptId::generate(),
            run_id,
            step_name,
            inputs_hash,
            outputs_hash: None,
            started_at,
            finished_at: Utc::now(),
            host_id: worker.host_id.clone(),
            worker_id: worker.worker_id.clone(),
            result: ReceiptResult::Failure,
            error_kind: Some(error_kind),
            error_message: Some(error_message.into()),
            cost: 0,
            fencing_token,
        }
    }

    pub fn is_success(&self) -> bool {
        self.result == ReceiptResult::Success
    }
}
