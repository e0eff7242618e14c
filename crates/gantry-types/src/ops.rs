//! Operational execution tiers

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Execution tier derived from budget and failure pressure.
///
/// Ordered by severity: `Normal < LowCompute < Critical < Paused`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OpsTier {
    Normal,
    LowCompute,
    Critical,
    Paused,
}

impl OpsTier {
    /// Whether expensive steps are refused at this tier
    pub fn blocks_expensive(self) -> bool {
        matches!(self, OpsTier::Critical | OpsTier::Paused)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OpsTier::Normal => "NORMAL",
            OpsTier::LowCompute => "LOW_COMPUTE",
            OpsTier::Critical => "CRITICAL",
            OpsTier::Paused => "PAUSED",
        }
    }
}

impl fmt::Display for OpsTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Derived tier report. Never stored authoritatively.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpsTierReport {
    pub tier: OpsTier,
    pub reason: String,
    pub budget_remaining: u64,
    pub failure_count: u32,
    pub computed_at: DateTime<Utc>,
}
