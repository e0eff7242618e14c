//! Application state for API handlers

use crate::config::AuthConfig;
use gantry_engine::{Orchestrator, RetryPolicy};
use std::sync::Arc;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// The orchestrator every endpoint passes through to
    pub orchestrator: Arc<Orchestrator>,

    /// Retry wrapper around orchestrator calls
    pub retry: RetryPolicy,

    /// Capability tokens
    pub auth: Arc<AuthConfig>,

    /// Daemon version
    pub version: String,

    /// Daemon start time
    pub started_at: chrono::DateTime<chrono::Utc>,
}

impl AppState {
    /// Create new application state
    pub fn new(orchestrator: Arc<Orchestrator>, retry: RetryPolicy, auth: AuthConfig) -> Self {
        Self {
            orchestrator,
            retry,
            auth: Arc::new(auth),
            version: env!("CARGO_PKG_VERSION").to_string(),
            started_at: chrono::Utc::now(),
        }
    }

    /// Get uptime as a human-readable string
    pub fn uptime(&self) -> String {
        let duration = chrono::Utc::now() - self.started_at;
        let secs = duration.num_seconds();

        if secs < 60 {
            format!("{}s", secs)
        } else if secs < 3600 {
            format!("{}m {}s", secs / 60, secs % 60)
        } else if secs < 86400 {
            format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
        } else {
            format!("{}d {}h", secs / 86400, (secs % 86400) / 3600)
        }
    }
}
