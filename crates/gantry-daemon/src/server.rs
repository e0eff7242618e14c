//! Server setup and lifecycle management

use crate::api::create_router;
use crate::api::rest::state::AppState;
use crate::config::DaemonConfig;
use crate::error::{DaemonError, DaemonResult};
use gantry_engine::{Orchestrator, RetryPolicy};
use gantry_state::FsStore;
use std::sync::Arc;
use tokio::net::TcpListener;

/// Gantry control-plane server
pub struct Server {
    config: DaemonConfig,
    orchestrator: Arc<Orchestrator>,
}

impl Server {
    /// Open the run store and build the orchestrator
    pub async fn new(config: DaemonConfig) -> DaemonResult<Self> {
        config.pipeline.validate()?;
        let store = FsStore::open(config.pipeline.storage.root.clone())
            .await
            .map_err(|e| DaemonError::Config(format!("cannot open storage root: {}", e)))?;
        let orchestrator = Orchestrator::from_config(config.pipeline.clone(), Arc::new(store))?;

        Ok(Self {
            config,
            orchestrator: Arc::new(orchestrator),
        })
    }

    /// Run the server
    pub async fn run(self) -> DaemonResult<()> {
        let addr = self.config.server.listen_addr;

        let state = AppState::new(
            self.orchestrator.clone(),
            RetryPolicy::from_config(&self.config.pipeline.retry),
            self.config.auth.clone(),
        );
        let app = create_router(state, self.config.server.enable_cors);

        let listener = TcpListener::bind(addr).await?;

        tracing::info!("Gantry daemon listening on {}", addr);
        tracing::info!(
            storage_root = %self.config.pipeline.storage.root.display(),
            read = self.config.auth.read_token.is_some(),
            gate = self.config.auth.gate_token.is_some(),
            go = self.config.auth.go_token.is_some(),
            "Capabilities configured"
        );

        // Run server with graceful shutdown
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| DaemonError::Server(e.to_string()))?;

        tracing::info!("Gantry daemon shutting down");
        Ok(())
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        }
    }
}
