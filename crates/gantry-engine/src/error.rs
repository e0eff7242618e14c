//! Error types for the orchestration engine

use chrono::{DateTime, Utc};
use gantry_state::StoreError;
use gantry_types::{
    ContractReport, GateName, HashError, LockKey, OpsTier, ReceiptId, RunId, StepErrorKind,
    StepName,
};
use thiserror::Error;

/// Engine error type
#[derive(Debug, Error)]
pub enum EngineError {
    /// Run or step absent
    #[error("Not found: {0}")]
    NotFound(String),

    /// A run already exists for the category and day
    #[error("Run already exists: {0}")]
    AlreadyExists(RunId),

    /// The run moved on since it was read
    #[error("Version conflict on {run_id}: expected {expected}, found {actual}")]
    VersionConflict {
        run_id: RunId,
        expected: u64,
        actual: u64,
    },

    /// Another worker holds the lease
    #[error("Lock {key} held by {owner} until {expires_at}")]
    LockHeld {
        key: LockKey,
        owner: String,
        expires_at: DateTime<Utc>,
    },

    /// Our lease lapsed, or a newer owner has already written the run
    #[error("Lease expired: {0}")]
    LockExpired(String),

    /// The backing store could not be locked in time
    #[error("Storage busy: {0}")]
    Busy(String),

    /// The step action failed; a FAILURE receipt was recorded
    #[error("Step {step} failed ({kind}): {message}")]
    StepExecution {
        step: StepName,
        kind: StepErrorKind,
        message: String,
        receipt_id: ReceiptId,
    },

    /// The step action missed its deadline; a FAILURE receipt was recorded
    #[error("Step {step} timed out after {timeout_secs}s")]
    StepTimeout {
        step: StepName,
        timeout_secs: u64,
        receipt_id: ReceiptId,
    },

    /// A required contract reported FAIL
    #[error("Gate {gate} blocked by failing contracts: {}", .validators.join(", "))]
    GateBlocked {
        gate: GateName,
        validators: Vec<String>,
        reports: Vec<ContractReport>,
    },

    /// Contracts reported WARN and the decision did not acknowledge them
    #[error("Gate {gate} needs an acknowledged override with notes for warnings from: {}", .validators.join(", "))]
    OverrideRequired {
        gate: GateName,
        validators: Vec<String>,
        reports: Vec<ContractReport>,
    },

    /// The ops tier refuses expensive work
    #[error("Tier {tier} blocks {step}: {reason}")]
    TierBlocked {
        step: StepName,
        tier: OpsTier,
        reason: String,
    },

    /// A validator itself errored
    #[error("Contract {validator} could not be evaluated: {message}")]
    ContractEvaluation { validator: String, message: String },

    /// The run is not in a state that allows the operation
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    /// Artifacts a later step needs are not present
    #[error("Artifacts missing: {}", .0.join(", "))]
    ArtifactsMissing(Vec<String>),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Stable classification of an [`EngineError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    AlreadyExists,
    VersionConflict,
    LockHeld,
    LockExpired,
    Busy,
    StepExecution,
    StepTimeout,
    GateBlocked,
    OverrideRequired,
    InvalidTransition,
    TierBlocked,
    ContractEvaluation,
    ArtifactsMissing,
    Storage,
    Config,
    Internal,
}

impl ErrorKind {
    /// Process exit code reported by the CLI
    pub fn exit_code(self) -> i32 {
        match self {
            ErrorKind::NotFound => 10,
            ErrorKind::AlreadyExists => 11,
            ErrorKind::VersionConflict => 20,
            ErrorKind::LockHeld => 21,
            ErrorKind::LockExpired => 22,
            ErrorKind::Busy => 23,
            ErrorKind::StepExecution => 30,
            ErrorKind::StepTimeout => 31,
            ErrorKind::GateBlocked => 40,
            ErrorKind::OverrideRequired => 41,
            ErrorKind::InvalidTransition => 42,
            ErrorKind::TierBlocked => 50,
            ErrorKind::ContractEvaluation => 60,
            ErrorKind::ArtifactsMissing => 61,
            ErrorKind::Storage => 70,
            ErrorKind::Config => 78,
            ErrorKind::Internal => 1,
        }
    }

    /// HTTP status reported by the control plane
    pub fn http_status(self) -> u16 {
        match self {
            ErrorKind::NotFound => 404,
            ErrorKind::AlreadyExists
            | ErrorKind::VersionConflict
            | ErrorKind::LockHeld
            | ErrorKind::LockExpired
            | ErrorKind::InvalidTransition => 409,
            ErrorKind::Busy => 503,
            ErrorKind::GateBlocked | ErrorKind::OverrideRequired | ErrorKind::ArtifactsMissing => {
                422
            }
            ErrorKind::TierBlocked => 423,
            ErrorKind::StepExecution | ErrorKind::StepTimeout | ErrorKind::ContractEvaluation => {
                502
            }
            ErrorKind::Storage | ErrorKind::Config | ErrorKind::Internal => 500,
        }
    }

    /// Contention errors are safe to retry from a fresh read
    pub fn is_contention(self) -> bool {
        matches!(
            self,
            ErrorKind::VersionConflict
                | ErrorKind::LockHeld
                | ErrorKind::LockExpired
                | ErrorKind::Busy
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::AlreadyExists => "already_exists",
            ErrorKind::VersionConflict => "version_conflict",
            ErrorKind::LockHeld => "lock_held",
            ErrorKind::LockExpired => "lock_expired",
            ErrorKind::Busy => "busy",
            ErrorKind::StepExecution => "step_execution",
            ErrorKind::StepTimeout => "step_timeout",
            ErrorKind::GateBlocked => "gate_blocked",
            ErrorKind::OverrideRequired => "override_required",
            ErrorKind::InvalidTransition => "invalid_transition",
            ErrorKind::TierBlocked => "tier_blocked",
            ErrorKind::ContractEvaluation => "contract_evaluation",
            ErrorKind::ArtifactsMissing => "artifacts_missing",
            ErrorKind::Storage => "storage",
            ErrorKind::Config => "config",
            ErrorKind::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::NotFound(_) => ErrorKind::NotFound,
            EngineError::AlreadyExists(_) => ErrorKind::AlreadyExists,
            EngineError::VersionConflict { .. } => ErrorKind::VersionConflict,
            EngineError::LockHeld { .. } => ErrorKind::LockHeld,
            EngineError::LockExpired(_) => ErrorKind::LockExpired,
            EngineError::Busy(_) => ErrorKind::Busy,
            EngineError::StepExecution { .. } => ErrorKind::StepExecution,
            EngineError::StepTimeout { .. } => ErrorKind::StepTimeout,
            EngineError::GateBlocked { .. } => ErrorKind::GateBlocked,
            EngineError::OverrideRequired { .. } => ErrorKind::OverrideRequired,
            EngineError::TierBlocked { .. } => ErrorKind::TierBlocked,
            EngineError::ContractEvaluation { .. } => ErrorKind::ContractEvaluation,
            EngineError::InvalidTransition(_) => ErrorKind::InvalidTransition,
            EngineError::ArtifactsMissing(_) => ErrorKind::ArtifactsMissing,
            EngineError::Storage(_) => ErrorKind::Storage,
            EngineError::Config(_) => ErrorKind::Config,
            EngineError::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn is_contention(&self) -> bool {
        self.kind().is_contention()
    }

    /// Create a not found error for a run
    pub fn run_not_found(run_id: &RunId) -> Self {
        Self::NotFound(format!("run {}", run_id))
    }

    /// Contract reports attached to a refused gate decision
    pub fn contract_reports(&self) -> Option<&[ContractReport]> {
        match self {
            EngineError::GateBlocked { reports, .. }
            | EngineError::OverrideRequired { reports, .. } => Some(reports),
            _ => None,
        }
    }
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::RunNotFound(run_id) => EngineError::run_not_found(&run_id),
            StoreError::AlreadyExists(run_id) => EngineError::AlreadyExists(run_id),
            StoreError::VersionConflict {
                run_id,
                expected,
                actual,
            } => EngineError::VersionConflict {
                run_id,
                expected,
                actual,
            },
            StoreError::StaleFence {
                run_id,
                presented,
                current,
            } => EngineError::LockExpired(format!(
                "fencing token {} on {} superseded by {}",
                presented, run_id, current
            )),
            StoreError::LockHeld {
                key,
                owner,
                expires_at,
            } => EngineError::LockHeld {
                key,
                owner,
                expires_at,
            },
            StoreError::LockExpired(key) => EngineError::LockExpired(key.to_string()),
            StoreError::Busy(what) => EngineError::Busy(what),
            other => EngineError::Storage(other.to_string()),
        }
    }
}

impl From<HashError> for EngineError {
    fn from(err: HashError) -> Self {
        EngineError::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Internal(err.to_string())
    }
}

impl From<config::ConfigError> for EngineError {
    fn from(err: config::ConfigError) -> Self {
        EngineError::Config(err.to_string())
    }
}
