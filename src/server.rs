use axum::{middleware as axum_mw, routing::get, Router};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use crate::handlers::probe;
use crate::metrics::endpoint;
use crate::middleware::timing;
use crate::AppState;

/// Builds the full Axum `Router` with all routes and middleware.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        // ── Probe endpoints ─────────────────────────────────────
        .route("/probe/metrics/list", get(probe::probe_list))
        .route("/probe/metrics/resource", get(probe::probe_resource))
        // ── Exporter self-observation ───────────────────────────
        .route("/metrics", get(endpoint::process_metrics))
        .route("/api/stats", get(endpoint::get_stats))
        .route("/healthz", get(|| async { "ok" }))
        // ── Provide shared state to all routes above ────────────
        .with_state(state)
        // ── Global middleware (applied bottom-up) ───────────────
        .layer(axum_mw::from_fn(timing::timing_middleware))
        .layer(CorsLayer::permissive())
}
