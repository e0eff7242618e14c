//! Shared-secret capability checks
//!
//! Each capability has its own header and token. A request for one
//! capability never authenticates another.

use super::state::AppState;
use crate::error::ApiError;
use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use subtle::ConstantTimeEq;

pub const READ_TOKEN_HEADER: &str = "x-gantry-read-token";
pub const GATE_TOKEN_HEADER: &str = "x-gantry-gate-token";
pub const GO_TOKEN_HEADER: &str = "x-gantry-go-token";

/// What a route lets the caller do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    Read,
    GateDecision,
    Go,
}

impl Capability {
    pub fn header(self) -> &'static str {
        match self {
            Capability::Read => READ_TOKEN_HEADER,
            Capability::GateDecision => GATE_TOKEN_HEADER,
            Capability::Go => GO_TOKEN_HEADER,
        }
    }

    fn token(self, state: &AppState) -> Option<&str> {
        let auth = &state.auth;
        match self {
            Capability::Read => auth.read_token.as_deref(),
            Capability::GateDecision => auth.gate_token.as_deref(),
            Capability::Go => auth.go_token.as_deref(),
        }
    }

    /// Check the request headers against the configured token
    pub fn authorize(self, state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
        let expected = self
            .token(state)
            .filter(|token| !token.is_empty())
            .ok_or_else(|| ApiError::Forbidden(format!("{:?} capability is disabled", self)))?;

        let presented = headers
            .get(self.header())
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| ApiError::Unauthorized(format!("missing {} header", self.header())))?;

        if !tokens_match(presented.as_bytes(), expected.as_bytes()) {
            tracing::warn!(capability = ?self, "Rejected request with wrong token");
            return Err(ApiError::Unauthorized(format!("invalid {}", self.header())));
        }
        Ok(())
    }
}

fn tokens_match(presented: &[u8], expected: &[u8]) -> bool {
    bool::from(presented.ct_eq(expected))
}

pub async fn require_read(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    Capability::Read.authorize(&state, request.headers())?;
    Ok(next.run(request).await)
}

pub async fn require_gate(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    Capability::GateDecision.authorize(&state, request.headers())?;
    Ok(next.run(request).await)
}

pub async fn require_go(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    Capability::Go.authorize(&state, request.headers())?;
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compares_tokens() {
        assert!(tokens_match(b"secret", b"secret"));
        assert!(!tokens_match(b"secret", b"secreT"));
        assert!(!tokens_match(b"secret", b"secrets"));
        assert!(!tokens_match(b"", b"secret"));
    }
}
