//! Filesystem storage implementation
//!
//! Workers on one host, or on hosts sharing a strongly consistent
//! filesystem, coordinate through this layout. Every read-modify-write is
//! serialised by a mutex file and lands through a temp file + rename, so a
//! reader never sees a half-written `run.json`.

use super::memory::chrono_ttl;
use super::mutex_file::MutexFile;
use super::traits::*;
use crate::error::{StoreError, StoreResult};
use async_trait::async_trait;
use chrono::Utc;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use gantry_types::{FencingToken, LockKey, LockRecord, Receipt, Run, RunId};
use serde::{de::DeserializeOwned, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const RUN_FILE: &str = "run.json";
const RUN_MUTEX: &str = ".run.lock";
const RECEIPTS_DIR: &str = "receipts";
const LEASES_DIR: &str = ".leases";
const LEASES_MUTEX: &str = ".mutex";
const FENCING_FILE: &str = "fencing.seq";

/// Filesystem-backed store rooted at one directory of runs
#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
    mutex_wait: Duration,
}

impl FsStore {
    /// Open (and create if needed) a store rooted at `root`
    pub async fn open(root: impl Into<PathBuf>) -> StoreResult<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(root.join(LEASES_DIR)).await?;
        Ok(Self {
            root,
            mutex_wait: Duration::from_secs(5),
        })
    }

    /// How long to wait for a busy mutex file before failing with `Busy`
    pub fn with_mutex_wait(mut self, wait: Duration) -> Self {
        self.mutex_wait = wait;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn run_path(&self, run_id: &RunId) -> PathBuf {
        self.root.join(run_id.as_str())
    }

    fn leases_path(&self) -> PathBuf {
        self.root.join(LEASES_DIR)
    }

    fn lease_file(&self, key: &LockKey) -> PathBuf {
        self.leases_path()
            .join(format!("{}.json", hex::encode(key.as_str())))
    }

    async fn lock_run(&self, run_id: &RunId) -> StoreResult<MutexFile> {
        MutexFile::acquire(self.run_path(run_id).join(RUN_MUTEX), self.mutex_wait).await
    }

    async fn lock_leases(&self) -> StoreResult<MutexFile> {
        MutexFile::acquire(self.leases_path().join(LEASES_MUTEX), self.mutex_wait).await
    }

    async fn next_fencing_token(&self) -> StoreResult<FencingToken> {
        let path = self.leases_path().join(FENCING_FILE);
        let last = match tokio::fs::read_to_string(&path).await {
            Ok(text) => text.trim().parse::<u64>().map_err(|e| {
                StoreError::Corrupt(format!("{}: {}", path.display(), e))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => 0,
            Err(e) => return Err(e.into()),
        };
        let next = last + 1;
        write_atomic(&path, next.to_string().as_bytes()).await?;
        Ok(FencingToken(next))
    }
}

#[async_trait]
impl RunStore for FsStore {
    async fn create(&self, run: Run) -> StoreResult<Run> {
        validate_run_id(&run.run_id)?;
        tokio::fs::create_dir_all(self.run_path(&run.run_id)).await?;
        let _guard = self.lock_run(&run.run_id).await?;

        let path = self.run_path(&run.run_id).join(RUN_FILE);
        if tokio::fs::try_exists(&path).await? {
            return Err(StoreError::AlreadyExists(run.run_id));
        }
        write_json(&path, &run).await?;
        tracing::debug!(run_id = %run.run_id, "Created run");
        Ok(run)
    }

    async fn load(&self, run_id: &RunId) -> StoreResult<Run> {
        validate_run_id(run_id)?;
        read_json(&self.run_path(run_id).join(RUN_FILE))
            .await?
            .ok_or_else(|| StoreError::RunNotFound(run_id.clone()))
    }

    async fn save(
        &self,
        run: &Run,
        expected_version: u64,
        fencing_token: FencingToken,
    ) -> StoreResult<Run> {
        validate_run_id(&run.run_id)?;
        let path = self.run_path(&run.run_id).join(RUN_FILE);
        if !tokio::fs::try_exists(&path).await? {
            return Err(StoreError::RunNotFound(run.run_id.clone()));
        }
        let _guard = self.lock_run(&run.run_id).await?;

        let stored: Run = read_json(&path)
            .await?
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
            let _leases = self.lock_leases().await?;
            let lease_file = self.lease_file(&LockKey::run(&run.run_id));
            let lease = read_json::<LockRecord>(&lease_file).await?;
            check_run_lease(&run.run_id, fencing_token, lease.as_ref(), Utc::now())?;
        }

        let mut next = run.clone();
        next.version = expected_version + 1;
        next.fence = stored.fence.max(fencing_token.0);
        write_json(&path, &next).await?;
        Ok(next)
    }

    async fn list(&self) -> StoreResult<Vec<Run>> {
        let mut runs = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            if name.to_string_lossy().starts_with('.') || !entry.file_type().await?.is_dir() {
                continue;
            }
            if let Some(run) = read_json::<Run>(&entry.path().join(RUN_FILE)).await? {
                runs.push(run);
            }
        }
        runs.sort_by(|a, b| a.run_id.cmp(&b.run_id));
        Ok(runs)
    }
}

#[async_trait]
impl ReceiptLedger for FsStore {
    async fn append(&self, receipt: &Receipt) -> StoreResult<()> {
        validate_run_id(&receipt.run_id)?;
        let dir = self.run_path(&receipt.run_id).join(RECEIPTS_DIR);
        tokio::fs::create_dir_all(&dir).await?;

        // Zero-padded micros make lexical file order equal started_at order
        let file = dir.join(format!(
            "{:020}-{}.json",
            receipt.started_at.timestamp_micros().max(0),
            receipt.receipt_id
        ));
        if tokio::fs::try_exists(&file).await? {
            return Err(StoreError::DuplicateReceipt(receipt.receipt_id));
        }
        write_json(&file, receipt).await
    }

    fn history<'a>(&'a self, run_id: &'a RunId) -> BoxStream<'a, StoreResult<Receipt>> {
        let dir = self.run_path(run_id).join(RECEIPTS_DIR);
        stream::once(list_receipt_files(dir))
            .map_ok(|files| stream::iter(files.into_iter().map(Ok::<PathBuf, StoreError>)))
            .try_flatten()
            .and_then(|file| async move {
                read_json::<Receipt>(&file)
                    .await?
                    .ok_or_else(|| StoreError::InvalidPath(file.display().to_string()))
            })
            .boxed()
    }
}

#[async_trait]
impl LeaseStore for FsStore {
    async fn acquire(
        &self,
        key: &LockKey,
        owner_id: &str,
        ttl: Duration,
    ) -> StoreResult<LockRecord> {
        let _guard = self.lock_leases().await?;
        let now = Utc::now();
        let file = self.lease_file(key);

        if let Some(existing) = read_json::<LockRecord>(&file).await? {
            if !existing.is_expired(now) {
                return Err(StoreError::LockHeld {
                    key: key.clone(),
                    owner: existing.owner_id,
                    expires_at: existing.expires_at,
                });
            }
        }

        let record = LockRecord {
            resource_key: key.clone(),
            owner_id: owner_id.to_string(),
            acquired_at: now,
            expires_at: now + chrono_ttl(ttl),
            fencing_token: self.next_fencing_token().await?,
        };
        write_json(&file, &record).await?;
        Ok(record)
    }

    async fn renew(
        &self,
        key: &LockKey,
        owner_id: &str,
        fencing_token: FencingToken,
        ttl: Duration,
    ) -> StoreResult<LockRecord> {
        let _guard = self.lock_leases().await?;
        let now = Utc::now();
        let file = self.lease_file(key);

        match read_json::<LockRecord>(&file).await? {
            Some(mut record)
                if record.is_held_by(owner_id, now) && record.fencing_token == fencing_token =>
            {
                record.expires_at = now + chrono_ttl(ttl);
                write_json(&file, &record).await?;
                Ok(record)
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
        let _guard = self.lock_leases().await?;
        let file = self.lease_file(key);
        if let Some(record) = read_json::<LockRecord>(&file).await? {
            if record.owner_id == owner_id && record.fencing_token == fencing_token {
                tokio::fs::remove_file(&file).await?;
            }
        }
        Ok(())
    }

    async fn current(&self, key: &LockKey) -> StoreResult<Option<LockRecord>> {
        read_json(&self.lease_file(key)).await
    }
}

#[async_trait]
impl ArtifactStore for FsStore {
    async fn read_artifact(&self, run_id: &RunId, path: &str) -> StoreResult<Option<Vec<u8>>> {
        validate_run_id(run_id)?;
        let relative = validate_relative_path(path)?;
        match tokio::fs::read(self.run_path(run_id).join(relative)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_artifact(&self, run_id: &RunId, path: &str, bytes: &[u8]) -> StoreResult<()> {
        validate_run_id(run_id)?;
        let relative = validate_relative_path(path)?;
        let target = self.run_path(run_id).join(relative);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        write_atomic(&target, bytes).await
    }

    fn run_dir(&self, run_id: &RunId) -> Option<PathBuf> {
        Some(self.run_path(run_id))
    }
}

async fn list_receipt_files(dir: PathBuf) -> StoreResult<Vec<PathBuf>> {
    let mut entries = match tokio::fs::read_dir(&dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let is_receipt = path.extension().is_some_and(|ext| ext == "json")
            && !entry.file_name().to_string_lossy().starts_with('.');
        if is_receipt {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> StoreResult<Option<T>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> StoreResult<()> {
    let bytes = serde_json::to_vec_pretty(value)?;
    write_atomic(path, &bytes).await
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> StoreResult<()> {
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp = path.with_file_name(format!(".{}.tmp-{}", file_name, uuid::Uuid::new_v4()));
    tokio::fs::write(&temp, bytes).await?;
    if let Err(e) = tokio::fs::rename(&temp, path).await {
        let _ = tokio::fs::remove_file(&temp).await;
        return Err(e.into());
    }
    Ok(())
}
