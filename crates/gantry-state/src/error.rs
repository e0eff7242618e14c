//! Error types for storage operations

use chrono::{DateTime, Utc};
use gantry_types::{LockKey, ReceiptId, RunId};
use thiserror::Error;

/// Storage error type
#[derive(Debug, Error)]
pub enum StoreError {
    /// Run does not exist
    #[error("run not found: {0}")]
    RunNotFound(RunId),

    /// Run already exists
    #[error("run already exists: {0}")]
    AlreadyExists(RunId),

    /// Compare-and-swap failed: the stored version moved on
    #[error("version conflict on {run_id}: expected {expected}, stored {actual}")]
    VersionConflict {
        run_id: RunId,
        expected: u64,
        actual: u64,
    },

    /// A newer lease owner has already written the run
    #[error("stale fencing token on {run_id}: presented {presented}, run fenced at {current}")]
    StaleFence {
        run_id: RunId,
        presented: u64,
        current: u64,
    },

    /// Another owner holds an unexpired lease
    #[error("lock {key} held by {owner} until {expires_at}")]
    LockHeld {
        key: LockKey,
        owner: String,
        expires_at: DateTime<Utc>,
    },

    /// The lease is gone, expired, or owned by someone else
    #[error("lock {0} expired or not owned")]
    LockExpired(LockKey),

    /// Receipts are write-once
    #[error("receipt {0} already recorded")]
    DuplicateReceipt(ReceiptId),

    /// Path escapes the run directory
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// A state file exists but cannot be interpreted
    #[error("corrupt state file: {0}")]
    Corrupt(String),

    /// The backing mutex file could not be taken in time
    #[error("storage busy: {0}")]
    Busy(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Contention errors: the caller should re-read and retry
    pub fn is_contention(&self) -> bool {
        matches!(
            self,
            StoreError::VersionConflict { .. }
                | StoreError::StaleFence { .. }
                | StoreError::LockHeld { .. }
                | StoreError::LockExpired(_)
                | StoreError::Busy(_)
        )
    }
}

/// Result type for storage operations
pub type StoreResult<T> = Result<T, StoreError>;
