//! Ops tier evaluation
//!
//! A pure function of the run's budget and failure count plus thresholds
//! fixed at startup. Evaluating the same run state twice yields the same
//! report, `computed_at` included: it is the run's `updated_at`.

use crate::config::OpsThresholds;
use crate::error::{EngineError, Result};
use gantry_types::{OpsTier, OpsTierReport, Run, StepName};

/// Derives the execution tier of a run
#[derive(Debug, Clone, Default)]
pub struct OpsTierEvaluator {
    thresholds: OpsThresholds,
}

impl OpsTierEvaluator {
    pub fn new(thresholds: OpsThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &OpsThresholds {
        &self.thresholds
    }

    /// Evaluate the tier; the most severe matching rule wins
    pub fn evaluate(&self, run: &Run) -> OpsTierReport {
        let t = &self.thresholds;
        let budget = run.budget_remaining;
        let failures = run.failure_count;

        let (tier, reason) = if budget == 0 {
            (OpsTier::Paused, "budget exhausted".to_string())
        } else if failures > t.failure_ceiling {
            (
                OpsTier::Paused,
                format!("{} failures exceed ceiling {}", failures, t.failure_ceiling),
            )
        } else if failures > t.failure_critical {
            (
                OpsTier::Critical,
                format!("{} failures exceed critical threshold {}", failures, t.failure_critical),
            )
        } else if budget <= t.budget_critical {
            (
                OpsTier::Critical,
                format!("budget {} at or below critical threshold {}", budget, t.budget_critical),
            )
        } else if budget < t.budget_warning {
            (
                OpsTier::LowCompute,
                format!("budget {} below warning threshold {}", budget, t.budget_warning),
            )
        } else if failures > t.failure_warning {
            (
                OpsTier::LowCompute,
                format!("{} failures exceed warning threshold {}", failures, t.failure_warning),
            )
        } else {
            (OpsTier::Normal, "budget and failures within limits".to_string())
        };

        OpsTierReport {
            tier,
            reason,
            budget_remaining: budget,
            failure_count: failures,
            computed_at: run.updated_at,
        }
    }

    /// Refuse expensive steps at CRITICAL and PAUSED
    pub fn check(&self, run: &Run, step: StepName) -> Result<OpsTierReport> {
        let report = self.evaluate(run);
        if step.is_expensive() && report.tier.blocks_expensive() {
            return Err(EngineError::TierBlocked {
                step,
                tier: report.tier,
                reason: report.reason,
            });
        }
        Ok(report)
    }
}
