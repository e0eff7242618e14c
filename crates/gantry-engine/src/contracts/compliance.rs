//! Disclosure and link-format compliance over generated material

use super::{Artifacts, ContractValidator};
use crate::config::ContractsConfig;
use crate::error::{EngineError, Result};
use gantry_types::{Finding, Run, StepName, Verdict};
use regex::Regex;

const NAME: &str = "compliance";

/// Linked content must carry a disclosure; links must be well formed.
///
/// - FAIL: the script links out but contains none of the disclosure phrases
/// - WARN: plain `http://` links, or bare URLs outside markdown link syntax
#[derive(Debug, Clone)]
pub struct DisclosureCompliance {
    disclosure_phrases: Vec<String>,
    url: Regex,
    markdown_link: Regex,
}

impl DisclosureCompliance {
    pub fn new(disclosure_phrases: Vec<String>) -> Result<Self> {
        let compile = |pattern: &str| {
            Regex::new(pattern).map_err(|e| EngineError::Internal(e.to_string()))
        };
        Ok(Self {
            disclosure_phrases: disclosure_phrases
                .into_iter()
                .map(|phrase| phrase.to_lowercase())
                .collect(),
            url: compile(r#"https?://[^\s)\]>"']+"#)?,
            markdown_link: compile(r#"\[[^\]]+\]\((https?://[^\s)]+)\)"#)?,
        })
    }

    pub fn from_config(config: &ContractsConfig) -> Result<Self> {
        Self::new(config.disclosure_phrases.clone())
    }
}

impl ContractValidator for DisclosureCompliance {
    fn name(&self) -> &str {
        NAME
    }

    fn evaluate(&self, _run: &Run, artifacts: &Artifacts) -> Result<Verdict> {
        let field = StepName::Script.artifact();
        let Some(script) = artifacts.text(field) else {
            return Ok(Verdict::Pass);
        };

        let links: Vec<&str> = self.url.find_iter(&script).map(|m| m.as_str()).collect();
        if links.is_empty() {
            return Ok(Verdict::Pass);
        }

        let mut fatal = Vec::new();
        let mut warnings = Vec::new();

        let lowered = script.to_lowercase();
        if !self
            .disclosure_phrases
            .iter()
            .any(|phrase| lowered.contains(phrase.as_str()))
        {
            fatal.push(
                Finding::new(
                    "compliance.missing_disclosure",
                    format!("{} link(s) without a disclosure", links.len()),
                )
                .with_field(field),
            );
        }

        for link in links.iter().filter(|link| link.starts_with("http://")) {
            warnings.push(
                Finding::new("compliance.insecure_link", format!("{} is not https", link))
                    .with_field(field),
            );
        }

        let formatted: Vec<&str> = self
            .markdown_link
            .captures_iter(&script)
            .filter_map(|caps| caps.get(1).map(|m| m.as_str()))
            .collect();
        let bare = links
            .iter()
            .filter(|link| !formatted.contains(link))
            .count();
        if bare > 0 {
            warnings.push(
                Finding::new(
                    "compliance.bare_link",
                    format!("{} link(s) outside markdown link syntax", bare),
                )
                .with_field(field),
            );
        }

        Ok(Verdict::from_findings(fatal, warnings))
    }
}
