//! Contract verdicts and reports

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single structured finding produced by a validator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    /// Stable machine-readable code, e.g. `injection.ignore_instructions`
    pub code: String,
    pub message: String,
    /// Field or artifact the finding refers to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<u8>,
}

impl Finding {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            field: None,
            severity: None,
        }
    }

    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    pub fn with_severity(mut self, severity: u8) -> Self {
        self.severity = Some(severity);
        self
    }
}

/// Validator verdict
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    Pass,
    Warn { findings: Vec<Finding> },
    Fail { findings: Vec<Finding> },
}

impl Verdict {
    /// Build a verdict from findings: FAIL if any fatal finding exists,
    /// WARN if only warnings exist, PASS otherwise.
    pub fn from_findings(fatal: Vec<Finding>, warnings: Vec<Finding>) -> Self {
        if !fatal.is_empty() {
            let mut findings = fatal;
            findings.extend(warnings);
            Verdict::Fail { findings }
        } else if !warnings.is_empty() {
            Verdict::Warn { findings: warnings }
        } else {
            Verdict::Pass
        }
    }

    pub fn is_pass(&self) -> bool {
        matches!(self, Verdict::Pass)
    }

    pub fn is_warn(&self) -> bool {
        matches!(self, Verdict::Warn { .. })
    }

    pub fn is_fail(&self) -> bool {
        matches!(self, Verdict::Fail { .. })
    }

    pub fn findings(&self) -> &[Finding] {
        match self {
            Verdict::Pass => &[],
            Verdict::Warn { findings } | Verdict::Fail { findings } => findings,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Verdict::Pass => "PASS",
            Verdict::Warn { .. } => "WARN",
            Verdict::Fail { .. } => "FAIL",
        }
    }
}

/// Output of one validator for one run at one point in time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractReport {
    pub validator_name: String,
    #[serde(flatten)]
    pub verdict: Verdict,
    /// Whether a FAIL from this validator blocks approval outright
    pub required: bool,
    pub evaluated_at: DateTime<Utc>,
}
