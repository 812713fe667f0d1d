pub mod analytics;
pub mod ingest;

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post, put};
use axum::Router;
use sqlx::PgPool;

use crate::buffer::IngestBuffer;

pub const MAX_BODY_BYTES: usize = 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub buffer: Arc<IngestBuffer>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ingest", post(ingest::ingest))
        .route("/buffer/status", get(ingest::buffer_status))
        .route("/vehicles/{id}/status", get(analytics::vehicle_status))
        .route("/meters/{id}/status", get(analytics::meter_status))
        .route("/vehicles/{id}/history", get(analytics::vehicle_history))
        .route("/meters/{id}/history", get(analytics::meter_history))
        .route("/vehicles/{id}/stats/hourly", get(analytics::vehicle_hourly))
        .route("/meters/{id}/stats/hourly", get(analytics::meter_hourly))
        .route("/fleet/summary", get(analytics::fleet_summary))
        .route("/dashboard/24h", get(analytics::dashboard_24h))
        .route(
            "/vehicles/{id}/performance",
            get(analytics::vehicle_performance),
        )
        .route(
            "/vehicles/{id}/performance/cached",
            get(analytics::vehicle_performance_cached),
        )
        .route(
            "/vehicles/{id}/link",
            put(analytics::put_link).delete(analytics::delete_link),
        )
        .route("/metrics", get(crate::metrics_server::render))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(state)
}
