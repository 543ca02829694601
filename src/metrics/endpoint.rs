use axum::{
    extract::State,
    http::header,
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;

use super::StatsSnapshot;
use crate::handlers::AppError;
use crate::AppState;

// ─── GET /metrics ────────────────────────────────────────────────
/// Exporter health: fetch counters and collection-time histograms.

pub async fn process_metrics(State(state): State<Arc<AppState>>) -> Result<Response, AppError> {
    let body = state.exporter.encode().map_err(|e| {
        tracing::error!(error = %e, "failed to encode exporter metrics");
        AppError::Internal
    })?;
    Ok(([(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)], body).into_response())
}

// ─── GET /api/stats ──────────────────────────────────────────────
/// JSON snapshot of recent scrapes.

pub async fn get_stats(State(state): State<Arc<AppState>>) -> Json<StatsSnapshot> {
    Json(state.stats.snapshot())
}
