//! Storage trait definitions

use crate::error::{StoreError, StoreResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{BoxStream, StreamExt};
use gantry_types::{FencingToken, LockKey, LockRecord, Receipt, Run, RunId, StepName};
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

/// Combined storage trait
pub trait Storage: RunStore + ReceiptLedger + LeaseStore + ArtifactStore + Send + Sync {}

impl<T> Storage for T where T: RunStore + ReceiptLedger + LeaseStore + ArtifactStore + Send + Sync {}

/// Versioned run aggregate
#[async_trait]
pub trait RunStore: Send + Sync {
    /// Persist a new run. Fails with `AlreadyExists` if the id is taken.
    async fn create(&self, run: Run) -> StoreResult<Run>;

    /// Load a run. Fails with `RunNotFound`.
    async fn load(&self, run_id: &RunId) -> StoreResult<Run>;

    /// Compare-and-swap write.
    ///
    /// Succeeds only if the stored version equals `expected_version` and
    /// `fencing_token` is not lower than the run's recorded fence. While a
    /// lease on `LockKey::run` exists, the token must also not be older than
    /// that lease's, and a write under that lease fails once it has expired.
    /// The stored run gets `version = expected_version + 1` and is returned.
    async fn save(
        &self,
        run: &Run,
        expected_version: u64,
        fencing_token: FencingToken,
    ) -> StoreResult<Run>;

    /// All runs, ordered by id
    async fn list(&self) -> StoreResult<Vec<Run>>;
}

/// Append-only receipt log
#[async_trait]
pub trait ReceiptLedger: Send + Sync {
    /// Record a receipt. Receipts are write-once.
    async fn append(&self, receipt: &Receipt) -> StoreResult<()>;

    /// Every receipt of a run, ordered by `started_at`.
    ///
    /// The stream is lazy and finite; calling `history` again restarts it.
    fn history<'a>(&'a self, run_id: &'a RunId) -> BoxStream<'a, StoreResult<Receipt>>;

    /// Most recent SUCCESS receipt for a step
    async fn latest_success(
        &self,
        run_id: &RunId,
        step: StepName,
    ) -> StoreResult<Option<Receipt>> {
        let mut history = self.history(run_id);
        let mut latest: Option<Receipt> = None;
        while let Some(receipt) = history.next().await {
            let receipt = receipt?;
            if receipt.step_name == step && receipt.is_success() {
                latest = Some(receipt);
            }
        }
        Ok(latest)
    }
}

/// Lease backing store
#[async_trait]
pub trait LeaseStore: Send + Sync {
    /// Take a lease. Fails with `LockHeld` while any other unexpired lease
    /// exists for the key, including one held by the same owner.
    async fn acquire(&self, key: &LockKey, owner_id: &str, ttl: Duration)
        -> StoreResult<LockRecord>;

    /// Extend an unexpired lease. Fails with `LockExpired` if the lease has
    /// lapsed or the owner/token do not match.
    async fn renew(
        &self,
        key: &LockKey,
        owner_id: &str,
        fencing_token: FencingToken,
        ttl: Duration,
    ) -> StoreResult<LockRecord>;

    /// Drop the lease identified by `owner_id` and `fencing_token`.
    /// Releasing a lease one does not hold, including an expired lease that
    /// has since been re-acquired, is a no-op.
    async fn release(
        &self,
        key: &LockKey,
        owner_id: &str,
        fencing_token: FencingToken,
    ) -> StoreResult<()>;

    /// Current lease record, expired or not
    async fn current(&self, key: &LockKey) -> StoreResult<Option<LockRecord>>;
}

/// Files inside a run's directory
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn read_artifact(&self, run_id: &RunId, path: &str) -> StoreResult<Option<Vec<u8>>>;

    async fn write_artifact(&self, run_id: &RunId, path: &str, bytes: &[u8]) -> StoreResult<()>;

    /// Directory external step actions work in, if the backend has one
    fn run_dir(&self, run_id: &RunId) -> Option<PathBuf>;

    /// Write `<name>.json`
    async fn write_report(
        &self,
        run_id: &RunId,
        name: &str,
        report: &serde_json::Value,
    ) -> StoreResult<()> {
        let bytes = serde_json::to_vec_pretty(report)?;
        self.write_artifact(run_id, &format!("{}.json", name), &bytes)
            .await
    }
}

/// Reject absolute paths and anything that climbs out of the run directory
pub fn validate_relative_path(path: &str) -> StoreResult<&Path> {
    let candidate = Path::new(path);
    let escapes = path.is_empty()
        || candidate
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if escapes {
        return Err(StoreError::InvalidPath(path.to_string()));
    }
    Ok(candidate)
}

/// Fence a run write against the run's current lease, if any
pub(crate) fn check_run_lease(
    run_id: &RunId,
    fencing_token: FencingToken,
    lease: Option<&LockRecord>,
    now: DateTime<Utc>,
) -> StoreResult<()> {
    let Some(lease) = lease else {
        return Ok(());
    };
    if fencing_token < lease.fencing_token {
        return Err(StoreError::StaleFence {
            run_id: run_id.clone(),
            presented: fencing_token.0,
            current: lease.fencing_token.0,
        });
    }
    if fencing_token == lease.fencing_token && lease.is_expired(now) {
        return Err(StoreError::LockExpired(lease.resource_key.clone()));
    }
    Ok(())
}

/// Reject run ids that are not a single safe path component
pub(crate) fn validate_run_id(run_id: &RunId) -> StoreResult<()> {
    if run_id.is_path_safe() {
        Ok(())
    } else {
        Err(StoreError::InvalidPath(run_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_paths() {
        assert!(validate_relative_path("script.md").is_ok());
        assert!(validate_relative_path("assets/manifest.json").is_ok());
        assert!(validate_relative_path("../run.json").is_err());
        assert!(validate_relative_path("/etc/passwd").is_err());
        assert!(validate_relative_path("").is_err());
    }

    #[test]
    fn run_lease_fences_writes() {
        let run_id = RunId::new("run_x");
        let now = Utc::now();
        let lease = LockRecord {
            resource_key: LockKey::run(&run_id),
            owner_id: "h/w2".to_string(),
            acquired_at: now,
            expires_at: now + chrono::Duration::seconds(60),
            fencing_token: FencingToken(7),
        };

        assert!(check_run_lease(&run_id, FencingToken(1), None, now).is_ok());
        assert!(check_run_lease(&run_id, FencingToken(7), Some(&lease), now).is_ok());
        assert!(check_run_lease(&run_id, FencingToken(9), Some(&lease), now).is_ok());
        assert!(matches!(
            check_run_lease(&run_id, FencingToken(6), Some(&lease), now),
            Err(StoreError::StaleFence { presented: 6, current: 7, .. })
        ));

        let later = now + chrono::Duration::seconds(61);
        assert!(matches!(
            check_run_lease(&run_id, FencingToken(7), Some(&lease), later),
            Err(StoreError::LockExpired(_))
        ));
    }
}
