// SPDX-License-Identifier: GPL-3.0-or-later
//! Thin HTTP surface: webhook intake, queue introspection, manual triggers
//! and the realtime subscription bridge. Everything of substance happens in
//! the job queue; these endpoints mostly enqueue.

pub mod handlers;

use axum::{routing::get, routing::post, Json, Router};
use curarr_application::Deps;
use curarr_realtime::BroadcastHub;
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

use handlers::jobs::{bulk_start, enrich_movie, queue_stats, scan_library, verify_movie};
use handlers::webhook::receive_webhook;
use handlers::ws::ws_subscribe;

#[derive(Clone)]
pub struct ApiState {
    pub deps: Arc<Deps>,
    pub hub: Arc<BroadcastHub>,
}

#[derive(Serialize, utoipa::ToSchema)]
struct HealthResponse {
    status: &'static str,
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

pub fn router(state: ApiState) -> Router {
    info!(target: "api", "building router");

    let api_v1 = Router::new()
        .route("/webhook", post(receive_webhook))
        .route("/jobs/stats", get(queue_stats))
        .route("/movies/:id/enrich", post(enrich_movie))
        .route("/movies/:id/verify", post(verify_movie))
        .route("/libraries/:id/scan", post(scan_library))
        .route("/bulk/enrich", post(bulk_start));

    Router::new()
        .route("/health", get(health_handler))
        .route("/ws", get(ws_subscribe))
        .nest("/api/v1", api_v1)
        .with_state(state)
}
