//! Step inputs
//!
//! A step consumes everything upstream of it. The inputs document is
//! canonical JSON, so its hash changes exactly when an upstream output, the
//! step's revision or its configured hook changes.

use crate::config::StepHookConfig;
use crate::error::Result;
use gantry_types::{ContentHash, Run, StepName};
use serde_json::{json, Value};

/// Inputs document and its content hash
#[derive(Debug, Clone, PartialEq)]
pub struct StepInputs {
    pub document: Value,
    pub hash: ContentHash,
}

impl StepInputs {
    /// Build the inputs of `step` from the run's authoritative state
    pub fn for_step(run: &Run, step: StepName, hook: &StepHookConfig) -> Result<Self> {
        let document = json!({
            "run_id": run.run_id,
            "category": run.category,
            "step": step,
            "revision": run.revision(step),
            "hook": hook,
            "upstream": run.upstream_outputs(step),
        });
        Self::from_document(document)
    }

    pub fn from_document(document: Value) -> Result<Self> {
        let hash = ContentHash::of_json(&document)?;
        Ok(Self { document, hash })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use gantry_types::{RunId, StepStatus};

    fn run() -> Run {
        Run::new(RunId::new("audio-20260101"), "audio", Utc::now(), 100)
    }

    #[test]
    fn same_state_same_hash() {
        let run = run();
        let hook = StepHookConfig::default();
        let a = StepInputs::for_step(&run, StepName::Script, &hook).unwrap();
        let b = StepInputs::for_step(&run.clone(), StepName::Script, &hook).unwrap();
        assert_eq!(a.hash, b.hash);
    }

    #[test]
    fn upstream_output_changes_hash() {
        let mut run = run();
        let hook = StepHookConfig::default();
        let before = StepInputs::for_step(&run, StepName::Script, &hook).unwrap();

        let discovery = run.step_mut(StepName::Discovery);
        discovery.status = StepStatus::Done;
        discovery.outputs_hash = Some(ContentHash::of_bytes(b"sources"));
        let after = StepInputs::for_step(&run, StepName::Script, &hook).unwrap();
        assert_ne!(before.hash, after.hash);

        // Downstream outputs are not inputs
        run.step_mut(StepName::Voice).outputs_hash = Some(ContentHash::of_bytes(b"x"));
        let unaffected = StepInputs::for_step(&run, StepName::Script, &hook).unwrap();
        assert_eq!(after.hash, unaffected.hash);
    }

    #[test]
    fn revision_changes_hash() {
        let mut run = run();
        let hook = StepHookConfig::default();
        let first = StepInputs::for_step(&run, StepName::Script, &hook).unwrap();
        run.bump_revision(StepName::Script);
        let second = StepInputs::for_step(&run, StepName::Script, &hook).unwrap();
        assert_ne!(first.hash, second.hash);
        assert_eq!(second.document["revision"], 1);
    }
}
