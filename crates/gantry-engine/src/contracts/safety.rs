//! Input-safety scan over externally sourced fields

use super::{evaluation_error, Artifacts, ContractValidator};
use crate::config::ContractsConfig;
use crate::error::{EngineError, Result};
use gantry_types::{Finding, Run, StepName, Verdict};
use regex::Regex;
use serde_json::Value;

const NAME: &str = "input_safety";

/// A compiled injection pattern
#[derive(Debug, Clone)]
pub struct InjectionPattern {
    pub code: String,
    pub regex: Regex,
    pub severity: u8,
}

impl InjectionPattern {
    pub fn new(code: &str, pattern: &str, severity: u8) -> Result<Self> {
        let regex = Regex::new(&format!("(?i){}", pattern))
            .map_err(|e| EngineError::Config(format!("bad injection pattern {}: {}", code, e)))?;
        Ok(Self {
            code: code.to_string(),
            regex,
            severity,
        })
    }
}

const BUILTIN_PATTERNS: &[(&str, &str, u8)] = &[
    (
        "injection.ignore_instructions",
        r"\b(ignore|disregard|forget)\b.{0,20}\b(previous|prior|above|all)\b.{0,20}\b(instructions|rules|prompts?)\b",
        9,
    ),
    ("injection.role_override", r"\byou are now\b|\bact as (an? )?(admin|developer|system)\b", 8),
    ("injection.system_prompt", r"\bsystem prompt\b", 6),
    ("injection.script_tag", r"<\s*script\b", 8),
    ("injection.template", r"\{\{.*\}\}|\$\{[^}]*\}", 4),
    ("injection.credentials", r"\b(api[_ -]?key|password|secret token)\b", 3),
];

/// Scans every string in `discovery.json`, the only externally sourced
/// artifact. Matches at or above the fail severity FAIL; weaker matches WARN.
#[derive(Debug, Clone)]
pub struct InputSafety {
    patterns: Vec<InjectionPattern>,
    fail_severity: u8,
}

impl InputSafety {
    pub fn new(patterns: Vec<InjectionPattern>, fail_severity: u8) -> Self {
        Self {
            patterns,
            fail_severity,
        }
    }

    pub fn from_config(config: &ContractsConfig) -> Result<Self> {
        let mut patterns = BUILTIN_PATTERNS
            .iter()
            .map(|(code, pattern, severity)| InjectionPattern::new(code, pattern, *severity))
            .collect::<Result<Vec<_>>>()?;
        for extra in &config.extra_patterns {
            patterns.push(InjectionPattern::new(
                &extra.code,
                &extra.pattern,
                extra.severity,
            )?);
        }
        Ok(Self::new(patterns, config.safety_fail_severity))
    }

    fn scan(&self, pointer: &str, value: &Value, fatal: &mut Vec<Finding>, warnings: &mut Vec<Finding>) {
        match value {
            Value::String(text) => {
                for pattern in &self.patterns {
                    if pattern.regex.is_match(text) {
                        let finding = Finding::new(
                            pattern.code.clone(),
                            format!("field matches {}", pattern.code),
                        )
                        .with_field(pointer)
                        .with_severity(pattern.severity);
                        if pattern.severity >= self.fail_severity {
                            fatal.push(finding);
                        } else {
                            warnings.push(finding);
                        }
                    }
                }
            }
            Value::Array(items) => {
                for (index, item) in items.iter().enumerate() {
                    self.scan(&format!("{}/{}", pointer, index), item, fatal, warnings);
                }
            }
            Value::Object(map) => {
                for (key, item) in map {
                    let escaped = key.replace('~', "~0").replace('/', "~1");
                    self.scan(&format!("{}/{}", pointer, escaped), item, fatal, warnings);
                }
            }
            _ => {}
        }
    }
}

impl ContractValidator for InputSafety {
    fn name(&self) -> &str {
        NAME
    }

    fn evaluate(&self, _run: &Run, artifacts: &Artifacts) -> Result<Verdict> {
        let path = StepName::Discovery.artifact();
        let Some(parsed) = artifacts.json(path) else {
            // Nothing external to scan; render_readiness reports the absence
            return Ok(Verdict::Pass);
        };
        let document = parsed.map_err(|e| evaluation_error(NAME, format!("{}: {}", path, e)))?;

        let mut fatal = Vec::new();
        let mut warnings = Vec::new();
        self.scan("", &document, &mut fatal, &mut warnings);
        Ok(Verdict::from_findings(fatal, warnings))
    }
}
