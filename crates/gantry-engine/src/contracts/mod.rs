//! Contract validator registry
//!
//! Validators are pure checks over a run and a snapshot of its artifacts.
//! The registry evaluates every one of them for every gate decision; a FAIL
//! from an earlier validator never hides the verdicts of later ones.

mod compliance;
mod originality;
mod readiness;
mod safety;

pub use compliance::DisclosureCompliance;
pub use originality::Originality;
pub use readiness::RenderReadiness;
pub use safety::{InjectionPattern, InputSafety};

use crate::config::ContractsConfig;
use crate::error::{EngineError, Result};
use chrono::{DateTime, Utc};
use gantry_state::ArtifactStore;
use gantry_types::{ContractReport, Finding, Run, RunId, StepName, Verdict};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;

/// Snapshot of the artifact files a run has produced so far
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Artifacts {
    files: BTreeMap<String, Vec<u8>>,
}

impl Artifacts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read every step artifact the store has for the run
    pub async fn collect<S>(store: &S, run_id: &RunId) -> Result<Self>
    where
        S: ArtifactStore + ?Sized,
    {
        let mut artifacts = Self::new();
        for step in StepName::ALL {
            if let Some(bytes) = store.read_artifact(run_id, step.artifact()).await? {
                artifacts.insert(step.artifact(), bytes);
            }
        }
        Ok(artifacts)
    }

    pub fn insert(&mut self, path: impl Into<String>, bytes: impl Into<Vec<u8>>) {
        self.files.insert(path.into(), bytes.into());
    }

    pub fn with(mut self, path: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        self.insert(path, bytes);
        self
    }

    pub fn contains(&self, path: &str) -> bool {
        self.files.contains_key(path)
    }

    pub fn bytes(&self, path: &str) -> Option<&[u8]> {
        self.files.get(path).map(Vec::as_slice)
    }

    /// Artifact as text, lossily decoded
    pub fn text(&self, path: &str) -> Option<String> {
        self.bytes(path)
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
    }

    /// Artifact parsed as JSON; `None` when absent
    pub fn json(&self, path: &str) -> Option<std::result::Result<Value, serde_json::Error>> {
        self.bytes(path).map(serde_json::from_slice)
    }
}

/// One machine-checkable contract
pub trait ContractValidator: Send + Sync {
    /// Stable name, also used for the `<name>_report.json` file
    fn name(&self) -> &str;

    /// Evaluate the contract. An `Err` is reported as FAIL, never as PASS.
    fn evaluate(&self, run: &Run, artifacts: &Artifacts) -> Result<Verdict>;
}

/// Ordered set of validators plus which of them are required
#[derive(Clone, Default)]
pub struct ContractRegistry {
    validators: Vec<Arc<dyn ContractValidator>>,
    required: HashSet<String>,
}

impl ContractRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// The four built-in validators, configured
    pub fn from_config(config: &ContractsConfig) -> Result<Self> {
        let builtins: [Arc<dyn ContractValidator>; 4] = [
            Arc::new(InputSafety::from_config(config)?),
            Arc::new(Originality::from_config(config)),
            Arc::new(DisclosureCompliance::from_config(config)?),
            Arc::new(RenderReadiness),
        ];
        if let Some(unknown) = config
            .required
            .iter()
            .find(|name| !builtins.iter().any(|v| v.name() == name.as_str()))
        {
            return Err(EngineError::Config(format!(
                "contracts.required names unknown validator '{}'",
                unknown
            )));
        }

        let mut registry = Self::new();
        for validator in builtins {
            let required = config.required.iter().any(|name| name == validator.name());
            registry.register(validator, required);
        }
        Ok(registry)
    }

    /// Add a validator; `required` validators block approval on FAIL
    pub fn register(&mut self, validator: Arc<dyn ContractValidator>, required: bool) {
        if required {
            self.required.insert(validator.name().to_string());
        }
        self.validators.push(validator);
    }

    pub fn with(mut self, validator: Arc<dyn ContractValidator>, required: bool) -> Self {
        self.register(validator, required);
        self
    }

    pub fn is_required(&self, name: &str) -> bool {
        self.required.contains(name)
    }

    pub fn len(&self) -> usize {
        self.validators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }

    /// Evaluate every validator, in registration order
    pub fn evaluate_all(
        &self,
        run: &Run,
        artifacts: &Artifacts,
        evaluated_at: DateTime<Utc>,
    ) -> Vec<ContractReport> {
        self.validators
            .iter()
            .map(|validator| {
                let verdict = validator
                    .evaluate(run, artifacts)
                    .unwrap_or_else(|err| {
                        tracing::warn!(
                            run_id = %run.run_id,
                            validator = validator.name(),
                            error = %err,
                            "Contract evaluation failed, reporting FAIL"
                        );
                        Verdict::Fail {
                            findings: vec![Finding::new("contract.evaluation_error", err.to_string())],
                        }
                    });
                ContractReport {
                    validator_name: validator.name().to_string(),
                    verdict,
                    required: self.is_required(validator.name()),
                    evaluated_at,
                }
            })
            .collect()
    }
}

impl fmt::Debug for ContractRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.validators.iter().map(|v| v.name()).collect();
        f.debug_struct("ContractRegistry")
            .field("validators", &names)
            .field("required", &self.required)
            .finish()
    }
}

/// Wrap an artifact parse error as a contract evaluation error
pub(crate) fn evaluation_error(validator: &str, message: impl fmt::Display) -> EngineError {
    EngineError::ContractEvaluation {
        validator: validator.to_string(),
        message: message.to_string(),
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Validator that always returns a fixed verdict
    pub struct Fixed {
        pub name: String,
        pub verdict: Verdict,
    }

    impl Fixed {
        pub fn new(name: &str, verdict: Verdict) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                verdict,
            })
        }
    }

    impl ContractValidator for Fixed {
        fn name(&self) -> &str {
            &self.name
        }

        fn evaluate(&self, _run: &Run, _artifacts: &Artifacts) -> Result<Verdict> {
            Ok(self.verdict.clone())
        }
    }

    pub struct Broken;

    impl ContractValidator for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        fn evaluate(&self, _run: &Run, _artifacts: &Artifacts) -> Result<Verdict> {
            Err(evaluation_error("broken", "artifact unreadable"))
        }
    }
}
