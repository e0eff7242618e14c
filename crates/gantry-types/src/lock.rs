//! Lease records

use crate::{RunId, StepName};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Strictly increasing number handed out with every acquired lease.
///
/// Stores reject writes carrying a token lower than the highest one they
/// have already accepted for the same run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FencingToken(pub u64);

impl fmt::Display for FencingToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Resource a lease protects: a whole run, or one step of a run
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LockKey(String);

impl LockKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn run(run_id: &RunId) -> Self {
        Self(run_id.to_string())
    }

    pub fn step(run_id: &RunId, step: StepName) -> Self {
        Self(format!("{}:{}", run_id, step))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A time-bounded lease
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRecord {
    pub resource_key: LockKey,
    pub owner_id: String,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub fencing_token: FencingToken,
}

impl LockRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn is_held_by(&self, owner_id: &str, now: DateTime<Utc>) -> bool {
        self.owner_id == owner_id && !self.is_expired(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn step_keys() {
        let run = RunId::new("run_x");
        assert_eq!(LockKey::step(&run, StepName::Script).as_str(), "run_x:script");
        assert_eq!(LockKey::run(&run).as_str(), "run_x");
    }

    #[test]
    fn expiry_is_inclusive() {
        let now = Utc::now();
        let record = LockRecord {
            resource_key: LockKey::new("k"),
            owner_id: "A".into(),
            acquired_at: now - Duration::seconds(60),
            expires_at: now,
            fencing_token: FencingToken(1),
        };
        assert!(record.is_expired(now));
        assert!(!record.is_held_by("A", now));
        assert!(record.is_held_by("A", now - Duration::seconds(1)));
        assert!(!record.is_held_by("B", now - Duration::seconds(1)));
    }
}
