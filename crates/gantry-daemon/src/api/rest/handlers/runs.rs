//! Read-only run handlers

use crate::api::rest::state::AppState;
use crate::error::ApiResult;
use axum::{
    extract::{Path, State},
    Json,
};
use gantry_engine::{RunOverview, RunSummary};
use gantry_types::{OpsTierReport, Receipt, RunId};

/// List all runs
pub async fn list_runs(State(state): State<AppState>) -> ApiResult<Json<Vec<RunOverview>>> {
    let orchestrator = &state.orchestrator;
    let runs = state.retry.run(|| orchestrator.list_runs()).await?;
    Ok(Json(runs))
}

/// Summary of one run: state, tier, gates, latest receipts and lease
pub async fn get_run(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<RunSummary>> {
    let run_id = RunId::new(id);
    let orchestrator = &state.orchestrator;
    let summary = state.retry.run(|| orchestrator.summary(&run_id)).await?;
    Ok(Json(summary))
}

/// Receipt history of one run
pub async fn list_receipts(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<Receipt>>> {
    let run_id = RunId::new(id);
    let orchestrator = &state.orchestrator;
    let receipts = state.retry.run(|| orchestrator.history(&run_id)).await?;
    Ok(Json(receipts))
}

/// Current ops tier of one run
pub async fn get_ops_tier(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<OpsTierReport>> {
    let run_id = RunId::new(id);
    let orchestrator = &state.orchestrator;
    let report = state.retry.run(|| orchestrator.ops_tier(&run_id)).await?;
    Ok(Json(report))
}
