//! Step actions
//!
//! The body of a step (script generation, TTS, rendering, upload) is an
//! external collaborator. The executor only sees the [`StepAction`] trait:
//! inputs in, JSON outputs plus optional artifacts out.

use crate::config::{PipelineConfig, StepHookConfig};
use async_trait::async_trait;
use gantry_types::{ContentHash, RunId, StepErrorKind, StepName};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use thiserror::Error;
use tokio::process::Command;

/// What an action gets to see
#[derive(Debug, Clone)]
pub struct StepContext {
    pub run_id: RunId,
    pub step: StepName,
    /// Canonical inputs document
    pub inputs: Value,
    pub inputs_hash: ContentHash,
    /// Working directory on backends that have one
    pub run_dir: Option<PathBuf>,
}

/// Successful action result
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepOutput {
    /// Hashed into the receipt's `outputs_hash`
    pub outputs: Value,
    /// Budget units spent
    pub cost: u64,
    /// Files to store in the run directory, relative path and contents
    pub artifacts: Vec<(String, Vec<u8>)>,
}

impl StepOutput {
    pub fn new(outputs: Value) -> Self {
        Self {
            outputs,
            ..Default::default()
        }
    }

    pub fn with_cost(mut self, cost: u64) -> Self {
        self.cost = cost;
        self
    }

    pub fn with_artifact(mut self, path: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        self.artifacts.push((path.into(), bytes.into()));
        self
    }
}

/// Classified action failure
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct StepFailure {
    pub kind: StepErrorKind,
    pub message: String,
}

impl StepFailure {
    pub fn new(kind: StepErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn action_failed(message: impl Into<String>) -> Self {
        Self::new(StepErrorKind::ActionFailed, message)
    }
}

/// Body of one step
#[async_trait]
pub trait StepAction: Send + Sync {
    async fn run(&self, ctx: &StepContext) -> Result<StepOutput, StepFailure>;
}

/// Actions by step
#[derive(Clone, Default)]
pub struct StepActions {
    actions: HashMap<StepName, Arc<dyn StepAction>>,
}

impl StepActions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Command hooks for every step that has a command configured
    pub fn from_config(config: &PipelineConfig) -> Self {
        let mut actions = Self::new();
        for (step, hook) in &config.steps {
            if !hook.command.is_empty() {
                actions.insert(*step, Arc::new(CommandAction::from_hook(hook)));
            }
        }
        actions
    }

    pub fn insert(&mut self, step: StepName, action: Arc<dyn StepAction>) {
        self.actions.insert(step, action);
    }

    pub fn with(mut self, step: StepName, action: Arc<dyn StepAction>) -> Self {
        self.insert(step, action);
        self
    }

    pub fn get(&self, step: StepName) -> Option<Arc<dyn StepAction>> {
        self.actions.get(&step).cloned()
    }
}

impl fmt::Debug for StepActions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut steps: Vec<_> = self.actions.keys().collect();
        steps.sort();
        f.debug_struct("StepActions").field("steps", &steps).finish()
    }
}

/// Runs an external command as the step body.
///
/// The command gets `GANTRY_RUN_ID`, `GANTRY_RUN_DIR`, `GANTRY_STEP` and
/// `GANTRY_INPUTS_HASH` in its environment and the inputs document on stdin.
/// Its stdout must be a JSON document; that document becomes the step's
/// outputs. A top-level `cost` number overrides the configured cost, and a
/// top-level `artifacts` object of `path -> text` is written into the run
/// directory.
#[derive(Debug, Clone)]
pub struct CommandAction {
    argv: Vec<String>,
    default_cost: u64,
}

impl CommandAction {
    pub fn new(argv: Vec<String>) -> Self {
        Self {
            argv,
            default_cost: 0,
        }
    }

    pub fn from_hook(hook: &StepHookConfig) -> Self {
        Self {
            argv: hook.command.clone(),
            default_cost: hook.cost,
        }
    }

    fn parse_stdout(&self, stdout: &[u8]) -> Result<StepOutput, StepFailure> {
        let outputs: Value = serde_json::from_slice(stdout).map_err(|e| {
            StepFailure::new(
                StepErrorKind::InvalidOutput,
                format!("stdout is not a JSON document: {}", e),
            )
        })?;

        let cost = match outputs.get("cost") {
            None => self.default_cost,
            Some(value) => value.as_u64().ok_or_else(|| {
                StepFailure::new(
                    StepErrorKind::InvalidOutput,
                    "cost must be a non-negative integer",
                )
            })?,
        };

        let mut artifacts = Vec::new();
        if let Some(files) = outputs.get("artifacts").and_then(Value::as_object) {
            for (path, contents) in files {
                let text = contents.as_str().ok_or_else(|| {
                    StepFailure::new(
                        StepErrorKind::InvalidOutput,
                        format!("artifact {} must be a string", path),
                    )
                })?;
                artifacts.push((path.clone(), text.as_bytes().to_vec()));
            }
        }

        Ok(StepOutput {
            outputs,
            cost,
            artifacts,
        })
    }
}

#[async_trait]
impl StepAction for CommandAction {
    async fn run(&self, ctx: &StepContext) -> Result<StepOutput, StepFailure> {
        let Some((program, args)) = self.argv.split_first() else {
            return Err(StepFailure::new(
                StepErrorKind::NotConfigured,
                format!("no command configured for {}", ctx.step),
            ));
        };

        let mut command = Command::new(program);
        command
            .args(args)
            .env("GANTRY_RUN_ID", ctx.run_id.as_str())
            .env("GANTRY_STEP", ctx.step.as_str())
            .env("GANTRY_INPUTS_HASH", ctx.inputs_hash.as_str())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // The executor's timeout drops this future; take the child with it
            .kill_on_drop(true);
        if let Some(dir) = &ctx.run_dir {
            command.env("GANTRY_RUN_DIR", dir).current_dir(dir);
        }

        tracing::debug!(step = %ctx.step, program = %program, "Spawning step command");
        let mut child = command.spawn().map_err(|e| {
            StepFailure::new(StepErrorKind::Io, format!("failed to spawn {}: {}", program, e))
        })?;

        if let Some(mut stdin) = child.stdin.take() {
            use tokio::io::AsyncWriteExt;
            let document = ctx.inputs.to_string();
            // A command that ignores stdin may close it early
            let _ = stdin.write_all(document.as_bytes()).await;
        }

        let output = child.wait_with_output().await.map_err(|e| {
            StepFailure::new(StepErrorKind::Io, format!("failed to wait for {}: {}", program, e))
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail: String = stderr
                .lines()
                .rev()
                .take(5)
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .collect::<Vec<_>>()
                .join("\n");
            return Err(StepFailure::action_failed(format!(
                "{} exited with {}: {}",
                program, output.status, tail
            )));
        }

        self.parse_stdout(&output.stdout)
    }
}
