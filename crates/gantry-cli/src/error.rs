//! CLI error types

use gantry_engine::{EngineError, ErrorKind};
use thiserror::Error;

/// CLI error types
#[derive(Debug, Error)]
pub enum CliError {
    /// The orchestrator refused or failed the command
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML encoding error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl CliError {
    /// Stable process exit code; engine errors use their kind's code
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Engine(err) => err.kind().exit_code(),
            CliError::Config(_) => ErrorKind::Config.exit_code(),
            CliError::Io(_) => ErrorKind::Storage.exit_code(),
            CliError::Json(_) | CliError::Yaml(_) => ErrorKind::Internal.exit_code(),
        }
    }
}

/// Result type for CLI operations
pub type CliResult<T> = Result<T, CliError>;
