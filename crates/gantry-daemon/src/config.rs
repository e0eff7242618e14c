//! Configuration for gantryd

use gantry_engine::PipelineConfig;
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::Path;

/// Main daemon configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Pipeline settings shared with the CLI
    #[serde(flatten)]
    pub pipeline: PipelineConfig,

    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Shared-secret tokens, one per capability
    #[serde(default)]
    pub auth: AuthConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// Enable CORS
    #[serde(default = "default_true")]
    pub enable_cors: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            enable_cors: true,
        }
    }
}

/// Capability tokens. An unset token disables that capability entirely.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Summary, listing, receipts and ops tier
    #[serde(default)]
    pub read_token: Option<String>,

    /// Gate decisions
    #[serde(default)]
    pub gate_token: Option<String>,

    /// The final render-and-upload trigger
    #[serde(default)]
    pub go_token: Option<String>,
}

// Default value helpers
fn default_true() -> bool {
    true
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from((Ipv4Addr::LOCALHOST, 8080))
}

impl DaemonConfig {
    /// Load configuration from an optional file and `GANTRY_` variables
    pub fn load(path: Option<&Path>) -> Result<Self, config::ConfigError> {
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

        builder.build()?.try_deserialize()
    }
}
