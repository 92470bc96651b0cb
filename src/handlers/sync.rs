//! Tick trigger endpoint

use axum::{extract::State, response::Json};

use crate::error::ApiError;
use crate::server::AppState;
use crate::sync_worker::TickSummary;

/// Run one worker tick and report what it did
///
/// Intended for an external scheduler; requires a trigger token.
#[utoipa::path(
    post,
    path = "/internal/wallet-sync/tick",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Tick completed", body = TickSummary),
        (status = 401, description = "Missing or invalid trigger token", body = ApiError,
         content_type = "application/problem+json"),
        (status = 500, description = "Job store failure", body = ApiError,
         content_type = "application/problem+json")
    ),
    tag = "wallet-sync"
)]
pub async fn trigger_tick(State(state): State<AppState>) -> Result<Json<TickSummary>, ApiError> {
    let summary = state.worker.tick().await?;
    Ok(Json(summary))
}
