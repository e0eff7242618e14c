//! Distributed lock manager
//!
//! Leases over the shared [`LeaseStore`]. A lease expires unless renewed, so
//! a crashed worker's lock becomes reclaimable without intervention. The
//! fencing token handed out at acquisition accompanies every run write made
//! under the lease; the run store rejects tokens older than the newest one
//! that has written the run.

use crate::config::LeaseConfig;
use crate::error::Result;
use gantry_state::Storage;
use gantry_types::{FencingToken, LockKey, LockRecord, WorkerIdentity};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Acquires, renews and releases leases
#[derive(Clone)]
pub struct LockManager {
    store: Arc<dyn Storage>,
    ttl: Duration,
    renew_every: Duration,
}

impl LockManager {
    pub fn new(store: Arc<dyn Storage>, config: &LeaseConfig) -> Self {
        Self {
            store,
            ttl: config.ttl(),
            renew_every: config.renew_every(),
        }
    }

    /// Take a lease; fails fast with `LockHeld` rather than queueing
    pub async fn acquire(
        &self,
        resource_key: &LockKey,
        owner_id: &str,
        ttl: Duration,
    ) -> Result<LockRecord> {
        let record = self.store.acquire(resource_key, owner_id, ttl).await?;
        tracing::debug!(
            key = %resource_key,
            owner = owner_id,
            fencing_token = %record.fencing_token,
            "Lease acquired"
        );
        Ok(record)
    }

    /// Extend a lease by the configured ttl; fails with `LockExpired`
    pub async fn renew(
        &self,
        resource_key: &LockKey,
        owner_id: &str,
        fencing_token: FencingToken,
    ) -> Result<LockRecord> {
        Ok(self
            .store
            .renew(resource_key, owner_id, fencing_token, self.ttl)
            .await?)
    }

    /// Drop a lease; a lease that expired and was taken over is left alone
    pub async fn release(
        &self,
        resource_key: &LockKey,
        owner_id: &str,
        fencing_token: FencingToken,
    ) -> Result<()> {
        self.store
            .release(resource_key, owner_id, fencing_token)
            .await?;
        tracing::debug!(
            key = %resource_key,
            owner = owner_id,
            fencing_token = %fencing_token,
            "Lease released"
        );
        Ok(())
    }

    pub async fn current(&self, resource_key: &LockKey) -> Result<Option<LockRecord>> {
        Ok(self.store.current(resource_key).await?)
    }

    /// Acquire with the configured ttl and wrap the lease in a guard
    pub async fn lease(&self, resource_key: LockKey, worker: &WorkerIdentity) -> Result<LeaseGuard> {
        let owner_id = worker.owner_id();
        let record = self.acquire(&resource_key, &owner_id, self.ttl).await?;
        Ok(LeaseGuard {
            manager: self.clone(),
            record,
            released: false,
        })
    }
}

impl std::fmt::Debug for LockManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockManager")
            .field("ttl", &self.ttl)
            .field("renew_every", &self.renew_every)
            .finish()
    }
}

/// A held lease. Release it explicitly; dropping an unreleased guard
/// releases it in the background when a runtime is available.
#[derive(Debug)]
pub struct LeaseGuard {
    manager: LockManager,
    record: LockRecord,
    released: bool,
}

impl LeaseGuard {
    pub fn token(&self) -> FencingToken {
        self.record.fencing_token
    }

    pub fn key(&self) -> &LockKey {
        &self.record.resource_key
    }

    pub fn record(&self) -> &LockRecord {
        &self.record
    }

    /// Start renewing the lease in the background until the returned
    /// heartbeat is dropped
    pub fn heartbeat(&self) -> Heartbeat {
        let manager = self.manager.clone();
        let key = self.record.resource_key.clone();
        let owner = self.record.owner_id.clone();
        let token = self.record.fencing_token;
        let lost = Arc::new(AtomicBool::new(false));
        let flag = lost.clone();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(manager.renew_every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(err) = manager.renew(&key, &owner, token).await {
                    tracing::warn!(
                        key = %key,
                        fencing_token = %token,
                        error = %err,
                        "Lease renewal failed; later writes will be fenced off"
                    );
                    flag.store(true, Ordering::SeqCst);
                    break;
                }
            }
        });

        Heartbeat { task, lost }
    }

    pub async fn release(mut self) -> Result<()> {
        self.released = true;
        self.manager
            .release(
                &self.record.resource_key,
                &self.record.owner_id,
                self.record.fencing_token,
            )
            .await
    }
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let manager = self.manager.clone();
            let key = self.record.resource_key.clone();
            let owner = self.record.owner_id.clone();
            let token = self.record.fencing_token;
            handle.spawn(async move {
                if let Err(err) = manager.release(&key, &owner, token).await {
                    tracing::warn!(key = %key, error = %err, "Background lease release failed");
                }
            });
        }
    }
}

/// Background lease renewal, stopped on drop
#[derive(Debug)]
pub struct Heartbeat {
    task: JoinHandle<()>,
    lost: Arc<AtomicBool>,
}

impl Heartbeat {
    /// Whether a renewal has failed
    pub fn lost(&self) -> bool {
        self.lost.load(Ordering::SeqCst)
    }
}

impl Drop for Heartbeat {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use gantry_state::InMemoryStore;

    fn manager(ttl_secs: u64, renew_every_secs: u64) -> LockManager {
        LockManager::new(
            Arc::new(InMemoryStore::new()),
            &LeaseConfig {
                ttl_secs,
                renew_every_secs,
            },
        )
    }

    #[tokio::test]
    async fn exactly_one_concurrent_acquire_wins() {
        let locks = manager(60, 20);
        let key = LockKey::new("run_x:script_step");
        let ttl = Duration::from_secs(60);

        let (a, b) = tokio::join!(
            locks.acquire(&key, "A", ttl),
            locks.acquire(&key, "B", ttl)
        );
        assert_eq!(a.is_ok() as u8 + b.is_ok() as u8, 1);
        let loser = if a.is_ok() { b } else { a };
        assert!(matches!(loser, Err(EngineError::LockHeld { .. })));
    }

    #[tokio::test]
    async fn guard_release_frees_key() {
        let locks = manager(60, 20);
        let worker = WorkerIdentity::new("h", "w1");
        let guard = locks.lease(LockKey::new("run_x"), &worker).await.unwrap();
        assert!(locks.lease(LockKey::new("run_x"), &worker).await.is_err());
        guard.release().await.unwrap();
        assert!(locks.lease(LockKey::new("run_x"), &worker).await.is_ok());
    }

    #[tokio::test]
    async fn expired_guard_release_spares_successor() {
        let locks = manager(60, 20);
        let key = LockKey::new("run_x");
        let worker = WorkerIdentity::new("h", "w");
        let stale = LeaseGuard {
            manager: locks.clone(),
            record: locks
                .acquire(&key, &worker.owner_id(), Duration::from_millis(20))
                .await
                .unwrap(),
            released: false,
        };
        tokio::time::sleep(Duration::from_millis(40)).await;

        // Same worker identity takes the key again after expiry
        let successor = locks.lease(key.clone(), &worker).await.unwrap();
        stale.release().await.unwrap();

        let current = locks.current(&key).await.unwrap().unwrap();
        assert_eq!(current.fencing_token, successor.token());
        let other = WorkerIdentity::new("other", "w");
        assert!(matches!(
            locks.lease(key, &other).await,
            Err(EngineError::LockHeld { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_keeps_lease_alive() {
        let locks = manager(3, 1);
        let worker = WorkerIdentity::new("h", "w1");
        let guard = locks.lease(LockKey::new("run_x"), &worker).await.unwrap();
        let before = guard.record().expires_at;

        let heartbeat = guard.heartbeat();
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!heartbeat.lost());
        drop(heartbeat);

        let current = locks.current(guard.key()).await.unwrap().unwrap();
        assert!(current.expires_at >= before);
        assert_eq!(current.fencing_token, guard.token());
    }
}
