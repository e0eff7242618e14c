//! Pipeline configuration
//!
//! Loaded once at startup from an optional file plus `GANTRY_` environment
//! variables (`GANTRY_OPS__BUDGET_WARNING=150`). Every field has a default,
//! so an empty configuration is valid. Nothing here is mutated at runtime.

use crate::error::{EngineError, Result};
use gantry_types::{StepName, WorkerIdentity};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main pipeline configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Storage configuration
    #[serde(default)]
    pub storage: StorageConfig,

    /// Budget assigned to new runs
    #[serde(default)]
    pub budget: BudgetConfig,

    /// Ops tier thresholds
    #[serde(default)]
    pub ops: OpsThresholds,

    /// Lease timing
    #[serde(default)]
    pub lease: LeaseConfig,

    /// Driver retry policy
    #[serde(default)]
    pub retry: RetryConfig,

    /// Command hook per step
    #[serde(default)]
    pub steps: BTreeMap<StepName, StepHookConfig>,

    /// Contract validator settings
    #[serde(default)]
    pub contracts: ContractsConfig,

    /// Identity of this worker process
    #[serde(default)]
    pub worker: WorkerConfig,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding one subtree per run
    #[serde(default = "default_storage_root")]
    pub root: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: default_storage_root(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetConfig {
    /// Budget units assigned to a new run
    #[serde(default = "default_initial_budget")]
    pub initial: u64,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            initial: default_initial_budget(),
        }
    }
}

/// Thresholds the ops tier evaluator compares against
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OpsThresholds {
    /// Below this budget the run drops to LOW_COMPUTE
    #[serde(default = "default_budget_warning")]
    pub budget_warning: u64,

    /// At or below this budget the run is CRITICAL
    #[serde(default = "default_budget_critical")]
    pub budget_critical: u64,

    /// More failures than this drops the run to LOW_COMPUTE
    #[serde(default = "default_failure_warning")]
    pub failure_warning: u32,

    /// More failures than this makes the run CRITICAL
    #[serde(default = "default_failure_critical")]
    pub failure_critical: u32,

    /// More failures than this pauses the run
    #[serde(default = "default_failure_ceiling")]
    pub failure_ceiling: u32,
}

impl Default for OpsThresholds {
    fn default() -> Self {
        Self {
            budget_warning: default_budget_warning(),
            budget_critical: default_budget_critical(),
            failure_warning: default_failure_warning(),
            failure_critical: default_failure_critical(),
            failure_ceiling: default_failure_ceiling(),
        }
    }
}

/// Lease timing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaseConfig {
    #[serde(default = "default_lease_ttl")]
    pub ttl_secs: u64,

    /// Heartbeat interval while a step action runs
    #[serde(default = "default_renew_every")]
    pub renew_every_secs: u64,
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_lease_ttl(),
            renew_every_secs: default_renew_every(),
        }
    }
}

impl LeaseConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn renew_every(&self) -> Duration {
        Duration::from_secs(self.renew_every_secs)
    }
}

/// Driver retry policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    /// Also retry failed step actions, not only contention
    #[serde(default)]
    pub retry_step_failures: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay(),
            max_delay_ms: default_max_delay(),
            retry_step_failures: false,
        }
    }
}

/// External command that performs one step
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StepHookConfig {
    /// Program and arguments
    #[serde(default)]
    pub command: Vec<String>,

    #[serde(default = "default_step_timeout")]
    pub timeout_secs: u64,

    /// Budget units charged on success unless the hook reports its own cost
    #[serde(default)]
    pub cost: u64,
}

impl Default for StepHookConfig {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            timeout_secs: default_step_timeout(),
            cost: 0,
        }
    }
}

impl StepHookConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Extra injection pattern for the input-safety scan
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PatternConfig {
    pub code: String,
    /// Regular expression, matched case-insensitively
    pub pattern: String,
    pub severity: u8,
}

/// Contract validator settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractsConfig {
    /// Injection matches at or above this severity FAIL, below it WARN
    #[serde(default = "default_safety_fail_severity")]
    pub safety_fail_severity: u8,

    #[serde(default)]
    pub extra_patterns: Vec<PatternConfig>,

    /// Repeated-phrase ratio that triggers WARN
    #[serde(default = "default_originality_warn")]
    pub originality_warn_ratio: f64,

    /// Repeated-phrase ratio that triggers FAIL
    #[serde(default = "default_originality_fail")]
    pub originality_fail_ratio: f64,

    /// Any of these satisfies the disclosure requirement for linked content
    #[serde(default = "default_disclosure_phrases")]
    pub disclosure_phrases: Vec<String>,

    /// Validators whose FAIL blocks approval outright
    #[serde(default = "default_required_contracts")]
    pub required: Vec<String>,
}

impl Default for ContractsConfig {
    fn default() -> Self {
        Self {
            safety_fail_severity: default_safety_fail_severity(),
            extra_patterns: Vec::new(),
            originality_warn_ratio: default_originality_warn(),
            originality_fail_ratio: default_originality_fail(),
            disclosure_phrases: default_disclosure_phrases(),
            required: default_required_contracts(),
        }
    }
}

/// Identity recorded on receipts and used as the lease owner
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    #[serde(default = "default_host_id")]
    pub host_id: String,

    #[serde(default = "default_worker_id")]
    pub worker_id: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            host_id: default_host_id(),
            worker_id: default_worker_id(),
        }
    }
}

impl WorkerConfig {
    pub fn identity(&self) -> WorkerIdentity {
        WorkerIdentity::new(self.host_id.clone(), self.worker_id.clone())
    }
}

// Default value helpers
fn default_storage_root() -> PathBuf {
    PathBuf::from("./runs")
}

fn default_initial_budget() -> u64 {
    1000
}

fn default_budget_warning() -> u64 {
    200
}

fn default_budget_critical() -> u64 {
    25
}

fn default_failure_warning() -> u32 {
    2
}

fn default_failure_critical() -> u32 {
    4
}

fn default_failure_ceiling() -> u32 {
    8
}

fn default_lease_ttl() -> u64 {
    60
}

fn default_renew_every() -> u64 {
    20
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay() -> u64 {
    200
}

fn default_max_delay() -> u64 {
    5000
}

fn default_step_timeout() -> u64 {
    600
}

fn default_safety_fail_severity() -> u8 {
    7
}

fn default_originality_warn() -> f64 {
    0.15
}

fn default_originality_fail() -> f64 {
    0.35
}

fn default_disclosure_phrases() -> Vec<String> {
    ["#ad", "sponsored", "affiliate", "paid partnership"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_required_contracts() -> Vec<String> {
    [
        "input_safety",
        "originality",
        "compliance",
        "render_readiness",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_host_id() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|host| !host.trim().is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}

fn default_worker_id() -> String {
    format!("{}-{}", default_host_id(), std::process::id())
}

impl PipelineConfig {
    /// Load configuration from an optional file and `GANTRY_` variables
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("GANTRY")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: PipelineConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject threshold orderings the tier evaluator cannot make sense of
    pub fn validate(&self) -> Result<()> {
        let ops = &self.ops;
        if ops.budget_critical > ops.budget_warning {
            return Err(EngineError::Config(format!(
                "ops.budget_critical ({}) must not exceed ops.budget_warning ({})",
                ops.budget_critical, ops.budget_warning
            )));
        }
        if !(ops.failure_warning <= ops.failure_critical
            && ops.failure_critical <= ops.failure_ceiling)
        {
            return Err(EngineError::Config(
                "failure thresholds must satisfy warning <= critical <= ceiling".into(),
            ));
        }
        if self.lease.ttl_secs == 0 || self.lease.renew_every_secs >= self.lease.ttl_secs {
            return Err(EngineError::Config(format!(
                "lease.renew_every_secs ({}) must be below lease.ttl_secs ({})",
                self.lease.renew_every_secs, self.lease.ttl_secs
            )));
        }
        if self.retry.max_attempts == 0 {
            return Err(EngineError::Config("retry.max_attempts must be at least 1".into()));
        }
        let contracts = &self.contracts;
        if contracts.originality_warn_ratio > contracts.originality_fail_ratio {
            return Err(EngineError::Config(
                "contracts.originality_warn_ratio must not exceed originality_fail_ratio".into(),
            ));
        }
        for (step, hook) in &self.steps {
            if hook.timeout_secs == 0 {
                return Err(EngineError::Config(format!(
                    "steps.{}.timeout_secs must be positive",
                    step
                )));
            }
        }
        Ok(())
    }

    /// Hook for a step, falling back to an unconfigured default
    pub fn hook(&self, step: StepName) -> StepHookConfig {
        self.steps.get(&step).cloned().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = PipelineConfig::default();
        assert_eq!(config.budget.initial, 1000);
        assert_eq!(config.ops.budget_warning, 200);
        assert_eq!(config.ops.failure_ceiling, 8);
        assert_eq!(config.lease.ttl(), Duration::from_secs(60));
        assert_eq!(config.contracts.required.len(), 4);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_unconfigured_hook() {
        let config = PipelineConfig::default();
        let hook = config.hook(StepName::Voice);
        assert!(hook.command.is_empty());
        assert_eq!(hook.timeout_secs, 600);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[budget]
initial = 300

[ops]
budget_warning = 100

[steps.script]
command = ["python3", "write_script.py"]
timeout_secs = 90
cost = 5
"#
        )
        .unwrap();

        let config = PipelineConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.budget.initial, 300);
        assert_eq!(config.ops.budget_warning, 100);
        assert_eq!(config.ops.budget_critical, 25);
        let hook = config.hook(StepName::Script);
        assert_eq!(hook.command, vec!["python3", "write_script.py"]);
        assert_eq!(hook.cost, 5);
    }

    #[test]
    fn test_rejects_inverted_thresholds() {
        let mut config = PipelineConfig::default();
        config.ops.budget_critical = 500;
        assert!(matches!(config.validate(), Err(EngineError::Config(_))));

        let mut config = PipelineConfig::default();
        config.lease.renew_every_secs = 60;
        assert!(config.validate().is_err());
    }
}
