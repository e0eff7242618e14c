//! Render readiness: the artifacts the next step consumes must exist

use super::{Artifacts, ContractValidator};
use crate::error::Result;
use gantry_types::{Finding, Run, StepName, Verdict};

const NAME: &str = "render_readiness";

/// Every artifact produced by a step before the run's current stage must be
/// present in storage.
#[derive(Debug, Clone, Copy, Default)]
pub struct RenderReadiness;

impl RenderReadiness {
    /// Artifacts the run's next step needs that are absent
    pub fn missing(run: &Run, artifacts: &Artifacts) -> Vec<String> {
        let required: &[StepName] = match run.current_step() {
            Some(step) => step.predecessors(),
            None => &StepName::ALL,
        };
        required
            .iter()
            .map(|step| step.artifact())
            .filter(|path| !artifacts.contains(path))
            .map(String::from)
            .collect()
    }
}

impl ContractValidator for RenderReadiness {
    fn name(&self) -> &str {
        NAME
    }

    fn evaluate(&self, run: &Run, artifacts: &Artifacts) -> Result<Verdict> {
        let findings: Vec<Finding> = Self::missing(run, artifacts)
            .into_iter()
            .map(|path| {
                Finding::new("readiness.missing_artifact", format!("{} is missing", path))
                    .with_field(path)
            })
            .collect();
        Ok(Verdict::from_findings(findings, Vec::new()))
    }
}
