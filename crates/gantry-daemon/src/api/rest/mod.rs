//! REST control plane under `/api/v1`

pub mod auth;
pub mod handlers;
pub mod router;
pub mod state;
