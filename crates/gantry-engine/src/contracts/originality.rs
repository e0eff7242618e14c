//! Originality check over the generated script

use super::{Artifacts, ContractValidator};
use crate::config::ContractsConfig;
use crate::error::Result;
use gantry_types::{Finding, Run, StepName, Verdict};
use std::collections::HashMap;

const NAME: &str = "originality";
const SHINGLE: usize = 5;

/// Flags scripts that repeat themselves or lift their sources verbatim.
///
/// The ratio is the share of five-word phrases in the script that occur
/// more than once in it, or that also occur in the discovered sources.
#[derive(Debug, Clone)]
pub struct Originality {
    warn_ratio: f64,
    fail_ratio: f64,
}

impl Originality {
    pub fn new(warn_ratio: f64, fail_ratio: f64) -> Self {
        Self {
            warn_ratio,
            fail_ratio,
        }
    }

    pub fn from_config(config: &ContractsConfig) -> Self {
        Self::new(config.originality_warn_ratio, config.originality_fail_ratio)
    }
}

fn words(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric() && c != '\'')
        .filter(|word| !word.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn shingles(words: &[String]) -> Vec<String> {
    words.windows(SHINGLE).map(|window| window.join(" ")).collect()
}

/// Share of script shingles that repeat within the script or appear in `sources`
pub(crate) fn unoriginal_ratio(script: &str, sources: &str) -> f64 {
    let script_shingles = shingles(&words(script));
    if script_shingles.is_empty() {
        return 0.0;
    }
    let source_shingles: std::collections::HashSet<String> =
        shingles(&words(sources)).into_iter().collect();

    let mut counts: HashMap<&str, usize> = HashMap::new();
    for shingle in &script_shingles {
        *counts.entry(shingle.as_str()).or_default() += 1;
    }
    let flagged = script_shingles
        .iter()
        .filter(|s| counts[s.as_str()] > 1 || source_shingles.contains(s.as_str()))
        .count();
    flagged as f64 / script_shingles.len() as f64
}

impl ContractValidator for Originality {
    fn name(&self) -> &str {
        NAME
    }

    fn evaluate(&self, _run: &Run, artifacts: &Artifacts) -> Result<Verdict> {
        let Some(script) = artifacts.text(StepName::Script.artifact()) else {
            return Ok(Verdict::Pass);
        };
        if words(&script).is_empty() {
            return Ok(Verdict::Fail {
                findings: vec![Finding::new("originality.empty_script", "script is empty")
                    .with_field(StepName::Script.artifact())],
            });
        }

        let sources = artifacts
            .text(StepName::Discovery.artifact())
            .unwrap_or_default();
        let ratio = unoriginal_ratio(&script, &sources);
        let finding = || {
            Finding::new(
                "originality.repeated_phrases",
                format!("{:.0}% of five-word phrases are repeated or copied", ratio * 100.0),
            )
            .with_field(StepName::Script.artifact())
        };

        Ok(if ratio >= self.fail_ratio {
            Verdict::Fail {
                findings: vec![finding()],
            }
        } else if ratio >= self.warn_ratio {
            Verdict::Warn {
                findings: vec![finding()],
            }
        } else {
            Verdict::Pass
        })
    }
}
