//! Error types for gantryd

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use gantry_engine::EngineError;
use serde::Serialize;
use thiserror::Error;

/// Daemon-level errors
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Server startup error
    #[error("Server error: {0}")]
    Server(String),

    /// Orchestrator or storage setup failed
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// API-specific errors
#[derive(Debug, Error)]
pub enum ApiError {
    /// No or wrong capability token
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// The capability is disabled on this daemon
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Bad request
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Orchestrator refused or failed the operation
    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, details) = match &self {
            ApiError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED".to_string(), None),
            ApiError::Forbidden(_) => (StatusCode::FORBIDDEN, "FORBIDDEN".to_string(), None),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST".to_string(), None),
            ApiError::Engine(err) => {
                let kind = err.kind();
                let status = StatusCode::from_u16(kind.http_status())
                    .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
                let details = err
                    .contract_reports()
                    .and_then(|reports| serde_json::to_value(reports).ok());
                (status, kind.as_str().to_uppercase(), details)
            }
        };

        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }

        let body = ErrorResponse {
            error: self.to_string(),
            code,
            details,
        };

        (status, Json(body)).into_response()
    }
}

/// Result type alias for API operations
pub type ApiResult<T> = Result<T, ApiError>;

/// Result type alias for daemon operations
pub type DaemonResult<T> = Result<T, DaemonError>;

#[cfg(test)]
mod tests {
    use super::*;
    use gantry_types::{GateName, OpsTier, RunId, StepName};

    #[test]
    fn test_api_error_status_codes() {
        assert_eq!(
            ApiError::Unauthorized("x".into()).into_response().status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ApiError::from(EngineError::run_not_found(&RunId::new("a-1")))
                .into_response()
                .status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::from(EngineError::TierBlocked {
                step: StepName::RenderUpload,
                tier: OpsTier::Paused,
                reason: "budget exhausted".into(),
            })
            .into_response()
            .status(),
            StatusCode::LOCKED
        );
        assert_eq!(
            ApiError::from(EngineError::GateBlocked {
                gate: GateName::Gate2,
                validators: vec!["originality".into()],
                reports: Vec::new(),
            })
            .into_response()
            .status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
    }
}
