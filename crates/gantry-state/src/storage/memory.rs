//! In-memory storage implementation

use super::traits::*;
use crate::error::{StoreError, StoreResult};
use async_trait::async_trait;
use chrono::Utc;
use futures::stream::{self, BoxStream, StreamExt};
use gantry_types::{FencingToken, LockKey, LockRecord, Receipt, Run, RunId};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Default)]
struct LeaseTable {
    records: HashMap<LockKey, LockRecord>,
    last_token: u64,
}

/// In-memory storage for development and testing
#[derive(Debug, Default)]
pub struct InMemoryStore {
    runs: Mutex<BTreeMap<RunId, Run>>,
    receipts: Mutex<HashMap<RunId, Vec<Receipt>>>,
    leases: Mutex<LeaseTable>,
    artifacts: Mutex<HashMap<(RunId, String), Vec<u8>>>,
}

impl InMemoryStore {
    /// Create a new in-memory store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RunStore for InMemoryStore {
    async fn create(&self, run: Run) -> StoreResult<Run> {
        let mut runs = self.runs.lock();
        if runs.contains_key(&run.run_id) {
            return Err(StoreError::AlreadyExists(run.run_id));
        }
        runs.insert(run.run_id.clone(), run.clone());
        Ok(run)
    }

    async fn load(&self, run_id: &RunId) -> StoreResult<Run> {
        self.runs
            .lock()
            .get(run_id)
            .cloned()
            .ok_or_else(|| StoreError::RunNotFound(run_id.clone()))
    }

    async fn save(
        &self,
        run: &Run,
        expected_version: u64,
        fencing_token: FencingToken,
    ) -> StoreResult<Run> {
        let mut runs = self.runs.lock();
        let stored = runs
            .get_mut(&run.run_id)
            .ok_or_else(|| StoreError::RunNotFound(run.run_id.clone()))?;

        if stored.version != expected_version {
            return Err(StoreError::VersionConflict {
                run_id: run.run_id.clone(),
                expected: expected_version,
                actual: stored.version,
            });
        }
        if fencing_token.0 < stored.fence {
            return Err(StoreError::StaleFence {
                run_id: run.run_id.clone(),
                presented: fencing_token.0,
                current: stored.fence,
            });
        }
        {
            let leases = self.leases.lock();
            let lease = leases.records.get(&LockKey::run(&run.run_id));
            check_run_lease(&run.run_id, fencing_token, lease, Utc::now())?;
        }

        let mut next = run.clone();
        next.version = expected_version + 1;
        next.fence = stored.fence.max(fencing_token.0);
        *stored = next.clone();
        Ok(next)
    }

    async fn list(&self) -> StoreResult<Vec<Run>> {
        Ok(self.runs.lock().values().cloned().collect())
    }
}

#[async_trait]
impl ReceiptLedger for InMemoryStore {
    async fn append(&self, receipt: &Receipt) -> StoreResult<()> {
        let mut receipts = self.receipts.lock();
        let log = receipts.entry(receipt.run_id.clone()).or_default();
        if log.iter().any(|r| r.receipt_id == receipt.receipt_id) {
            return Err(StoreError::DuplicateReceipt(receipt.receipt_id));
        }
        // Keep the log sorted by started_at; equal timestamps keep append order
        let position = log.partition_point(|r| r.started_at <= receipt.started_at);
        log.insert(position, receipt.clone());
        Ok(())
    }

    fn history<'a>(&'a self, run_id: &'a RunId) -> BoxStream<'a, StoreResult<Receipt>> {
        let snapshot = self
            .receipts
            .lock()
            .get(run_id)
            .cloned()
            .unwrap_or_default();
        stream::iter(snapshot.into_iter().map(Ok)).boxed()
    }
}

#[async_trait]
impl LeaseStore for InMemoryStore {
    async fn acquire(
        &self,
        key: &LockKey,
        owner_id: &str,
        ttl: Duration,
    ) -> StoreResult<LockRecord> {
        let now = Utc::now();
        let mut table = self.leases.lock();
        if let Some(existing) = table.records.get(key) {
            if !existing.is_expired(now) {
                return Err(StoreError::LockHeld {
                    key: key.clone(),
                    owner: existing.owner_id.clone(),
                    expires_at: existing.expires_at,
                });
            }
        }

        table.last_token += 1;
        let record = LockRecord {
            resource_key: key.clone(),
            owner_id: owner_id.to_string(),
            acquired_at: now,
            expires_at: now + chrono_ttl(ttl),
            fencing_token: FencingToken(table.last_token),
        };
        table.records.insert(key.clone(), record.clone());
        Ok(record)
    }

    async fn renew(
        &self,
        key: &LockKey,
        owner_id: &str,
        fencing_token: FencingToken,
        ttl: Duration,
    ) -> StoreResult<LockRecord> {
        let now = Utc::now();
        let mut table = self.leases.lock();
        match table.records.get_mut(key) {
            Some(record)
                if record.is_held_by(owner_id, now) && record.fencing_token == fencing_token =>
            {
                record.expires_at = now + chrono_ttl(ttl);
                Ok(record.clone())
            }
            _ => Err(StoreError::LockExpired(key.clone())),
        }
    }

    async fn release(
        &self,
        key: &LockKey,
        owner_id: &str,
        fencing_token: FencingToken,
    ) -> StoreResult<()> {
        let mut table = self.leases.lock();
        if table.records.get(key).is_some_and(|record| {
            record.owner_id == owner_id && record.fencing_token == fencing_token
        }) {
            table.records.remove(key);
        }
        Ok(())
    }

    async fn current(&self, key: &LockKey) -> StoreResult<Option<LockRecord>> {
        Ok(self.leases.lock().records.get(key).cloned())
    }
}

#[async_trait]
impl ArtifactStore for InMemoryStore {
    async fn read_artifact(&self, run_id: &RunId, path: &str) -> StoreResult<Option<Vec<u8>>> {
        validate_relative_path(path)?;
        Ok(self
            .artifacts
            .lock()
            .get(&(run_id.clone(), path.to_string()))
            .cloned())
    }

    async fn write_artifact(&self, run_id: &RunId, path: &str, bytes: &[u8]) -> StoreResult<()> {
        validate_relative_path(path)?;
        self.artifacts
            .lock()
            .insert((run_id.clone(), path.to_string()), bytes.to_vec());
        Ok(())
    }

    fn run_dir(&self, _run_id: &RunId) -> Option<PathBuf> {
        None
    }
}

pub(crate) fn chrono_ttl(ttl: Duration) -> chrono::Duration {
    chrono::Duration::milliseconds(i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX / 2))
}
