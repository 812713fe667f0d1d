use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde_json::json;
use time::OffsetDateTime;

use crate::buffer::BufferDepth;
use crate::transform::{self, TelemetryMessage};

use super::AppState;

/// Accept one telemetry message. 202 means accepted into the staging buffer,
/// not persisted; durability follows at the next flush.
pub async fn ingest(
    State(state): State<AppState>,
    message: Result<Json<TelemetryMessage>, JsonRejection>,
) -> (StatusCode, Json<serde_json::Value>) {
    let Json(message) = match message {
        Ok(message) => message,
        Err(rejection) => {
            // Covers malformed JSON, unknown discriminators, unknown payload
            // fields and oversized bodies alike.
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({
                    "errors": [{ "field": "body", "message": rejection.body_text() }]
                })),
            );
        }
    };

    if let Err(err) = transform::validate(&message) {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "errors": err.errors })),
        );
    }

    let ingested_at = OffsetDateTime::now_utc();
    match message {
        TelemetryMessage::Vehicle(payload) => {
            state.buffer.push_vehicle(payload.into_reading(ingested_at));
        }
        TelemetryMessage::Meter(payload) => {
            state.buffer.push_meter(payload.into_reading(ingested_at));
        }
    }
    metrics::counter!("ingest_requests_total").increment(1);

    (StatusCode::ACCEPTED, Json(json!({ "accepted": true })))
}

pub async fn buffer_status(State(state): State<AppState>) -> Json<BufferDepth> {
    Json(state.buffer.depth())
}
