//! Gate decision and final trigger handlers
//!
//! Both pass straight through to the orchestrator, which applies the same
//! gate, contract and tier checks as the CLI.

use crate::api::rest::state::AppState;
use crate::error::{ApiError, ApiResult};
use axum::{
    extract::{Path, State},
    Json,
};
use gantry_engine::{DecisionRequest, GateDecision, GateOutcome, StepExecution};
use gantry_types::{GateName, RunId};
use serde::Deserialize;

/// Gate decision request
#[derive(Debug, Deserialize)]
pub struct GateDecisionBody {
    pub decision: GateDecision,
    pub reviewer: String,
    #[serde(default)]
    pub notes: Option<String>,
    /// Explicit override of WARN-level contract findings
    #[serde(default)]
    pub acknowledge_warnings: bool,
}

impl From<GateDecisionBody> for DecisionRequest {
    fn from(body: GateDecisionBody) -> Self {
        DecisionRequest {
            decision: body.decision,
            decided_by: body.reviewer,
            notes: body.notes,
            acknowledge_warnings: body.acknowledge_warnings,
        }
    }
}

/// Approve or reject a gate
pub async fn decide_gate(
    State(state): State<AppState>,
    Path((id, gate)): Path<(String, String)>,
    Json(body): Json<GateDecisionBody>,
) -> ApiResult<Json<GateOutcome>> {
    let gate: GateName = gate.parse().map_err(ApiError::BadRequest)?;
    let run_id = RunId::new(id);
    let request = DecisionRequest::from(body);

    tracing::info!(
        run_id = %run_id,
        gate = %gate,
        decision = %request.decision,
        reviewer = %request.decided_by,
        "Gate decision received"
    );

    let orchestrator = &state.orchestrator;
    let outcome = state
        .retry
        .run(|| orchestrator.decide_gate(&run_id, gate, request.clone()))
        .await?;
    Ok(Json(outcome))
}

/// Final trigger: render and upload
pub async fn go(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<StepExecution>> {
    let run_id = RunId::new(id);
    tracing::info!(run_id = %run_id, "Render and upload requested");

    let orchestrator = &state.orchestrator;
    let execution = state
        .retry
        .run(|| orchestrator.render_and_upload(&run_id))
        .await?;
    Ok(Json(execution))
}
