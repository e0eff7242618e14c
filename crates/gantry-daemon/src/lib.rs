//! Gantry daemon library
//!
//! The control plane is a thin HTTP surface over the same orchestrator the
//! CLI drives:
//! - Liveness endpoint
//! - Read-only run summary, listing, receipts and ops tier
//! - Gate decisions
//! - The final render-and-upload trigger
//!
//! Each capability is authenticated with its own shared-secret header.

pub mod api;
pub mod config;
pub mod error;
pub mod server;

pub use config::DaemonConfig;
pub use error::{ApiError, DaemonError};
pub use server::Server;
