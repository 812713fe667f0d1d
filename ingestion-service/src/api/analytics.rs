use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use fleet_client::db::{history_queries, performance_queries, stats_queries, status_queries};
use fleet_client::db::performance_queries::VehiclePerformance24h;
use fleet_client::db::stats_queries::FleetHourlySummary;
use fleet_client::domain::{
    MeterCurrent, MeterHourlyStats, MeterReading, VehicleCurrent, VehicleHourlyStats,
    VehicleReading,
};

use crate::transform::MAX_DEVICE_ID_LEN;

use super::AppState;

type ApiError = (StatusCode, String);

const DEFAULT_HISTORY_LIMIT: i64 = 1_000;
const MAX_HISTORY_LIMIT: i64 = 10_000;

fn internal_error(err: anyhow::Error) -> ApiError {
    tracing::error!(error = %err, "read query failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "internal error".to_string(),
    )
}

#[derive(Debug, Deserialize)]
pub struct RangeParams {
    pub from: Option<String>,
    pub to: Option<String>,
    pub limit: Option<i64>,
}

/// Range reads must carry an explicit `[from, to)` window so every scan
/// prunes to a bounded set of monthly partitions.
fn parse_range(params: &RangeParams) -> Result<(OffsetDateTime, OffsetDateTime), ApiError> {
    let (Some(from), Some(to)) = (&params.from, &params.to) else {
        return Err((
            StatusCode::BAD_REQUEST,
            "from and to are required".to_string(),
        ));
    };
    let from = parse_ts("from", from)?;
    let to = parse_ts("to", to)?;
    if to < from {
        return Err((
            StatusCode::BAD_REQUEST,
            "to must not precede from".to_string(),
        ));
    }
    Ok((from, to))
}

fn parse_ts(field: &str, raw: &str) -> Result<OffsetDateTime, ApiError> {
    OffsetDateTime::parse(raw, &Rfc3339).map_err(|_| {
        (
            StatusCode::BAD_REQUEST,
            format!("{field} must be an RFC 3339 timestamp"),
        )
    })
}

fn history_limit(params: &RangeParams) -> i64 {
    params
        .limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .clamp(1, MAX_HISTORY_LIMIT)
}

/// Unknown devices serialize as `null` rather than 404 so dashboards polling
/// a fixed device list stay stable.
pub async fn vehicle_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Option<VehicleCurrent>>, ApiError> {
    status_queries::vehicle_current(&state.pool, &id)
        .await
        .map(Json)
        .map_err(internal_error)
}

pub async fn meter_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Option<MeterCurrent>>, ApiError> {
    status_queries::meter_current(&state.pool, &id)
        .await
        .map(Json)
        .map_err(internal_error)
}

pub async fn vehicle_history(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<RangeParams>,
) -> Result<Json<Vec<VehicleReading>>, ApiError> {
    let (from, to) = parse_range(&params)?;
    history_queries::vehicle_history(&state.pool, &id, from, to, history_limit(&params))
        .await
        .map(Json)
        .map_err(internal_error)
}

pub async fn meter_history(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<RangeParams>,
) -> Result<Json<Vec<MeterReading>>, ApiError> {
    let (from, to) = parse_range(&params)?;
    history_queries::meter_history(&state.pool, &id, from, to, history_limit(&params))
        .await
        .map(Json)
        .map_err(internal_error)
}

pub async fn vehicle_hourly(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<RangeParams>,
) -> Result<Json<Vec<VehicleHourlyStats>>, ApiError> {
    let (from, to) = parse_range(&params)?;
    stats_queries::vehicle_hourly_stats(&state.pool, &id, from, to)
        .await
        .map(Json)
        .map_err(internal_error)
}

pub async fn meter_hourly(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<RangeParams>,
) -> Result<Json<Vec<MeterHourlyStats>>, ApiError> {
    let (from, to) = parse_range(&params)?;
    stats_queries::meter_hourly_stats(&state.pool, &id, from, to)
        .await
        .map(Json)
        .map_err(internal_error)
}

pub async fn fleet_summary(
    State(state): State<AppState>,
    Query(params): Query<RangeParams>,
) -> Result<Json<Vec<FleetHourlySummary>>, ApiError> {
    let (from, to) = parse_range(&params)?;
    stats_queries::fleet_summary(&state.pool, from, to)
        .await
        .map(Json)
        .map_err(internal_error)
}

#[derive(Serialize)]
pub struct Dashboard24h {
    pub vehicles: Vec<VehicleHourlyStats>,
    pub meters: Vec<MeterHourlyStats>,
}

pub async fn dashboard_24h(
    State(state): State<AppState>,
) -> Result<Json<Dashboard24h>, ApiError> {
    let vehicles = stats_queries::vehicle_stats_last_24h(&state.pool)
        .await
        .map_err(internal_error)?;
    let meters = stats_queries::meter_stats_last_24h(&state.pool)
        .await
        .map_err(internal_error)?;
    Ok(Json(Dashboard24h { vehicles, meters }))
}

pub async fn vehicle_performance(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<VehiclePerformance24h>, ApiError> {
    match performance_queries::vehicle_performance(&state.pool, &id)
        .await
        .map_err(internal_error)?
    {
        Some(perf) => Ok(Json(perf)),
        None => Err((
            StatusCode::NOT_FOUND,
            "vehicle has no meter link".to_string(),
        )),
    }
}

pub async fn vehicle_performance_cached(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<VehiclePerformance24h>, ApiError> {
    match performance_queries::vehicle_performance_cached(&state.pool, &id)
        .await
        .map_err(internal_error)?
    {
        Some(perf) => Ok(Json(perf)),
        None => Err((
            StatusCode::NOT_FOUND,
            "vehicle has no meter link".to_string(),
        )),
    }
}

#[derive(Debug, Deserialize)]
pub struct LinkRequest {
    pub meter_id: String,
}

pub async fn put_link(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<LinkRequest>,
) -> Result<StatusCode, ApiError> {
    if req.meter_id.is_empty() || req.meter_id.len() > MAX_DEVICE_ID_LEN {
        return Err((
            StatusCode::BAD_REQUEST,
            "meter_id must be 1..=64 characters".to_string(),
        ));
    }
    performance_queries::upsert_link(&state.pool, &id, &req.meter_id)
        .await
        .map_err(internal_error)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn delete_link(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let removed = performance_queries::remove_link(&state.pool, &id)
        .await
        .map_err(internal_error)?;
    if removed {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err((
            StatusCode::NOT_FOUND,
            "vehicle has no meter link".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(from: Option<&str>, to: Option<&str>) -> RangeParams {
        RangeParams {
            from: from.map(String::from),
            to: to.map(String::from),
            limit: None,
        }
    }

    #[test]
    fn missing_range_is_rejected() {
        let err = parse_range(&params(None, None)).unwrap_err();
        assert_eq!(err.0, StatusCode::BAD_REQUEST);

        let err = parse_range(&params(Some("2026-08-01T00:00:00Z"), None)).unwrap_err();
        assert_eq!(err.0, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn equal_bounds_are_allowed() {
        // from == to is an empty window, served as an empty list downstream.
        let (from, to) =
            parse_range(&params(Some("2026-08-01T00:00:00Z"), Some("2026-08-01T00:00:00Z")))
                .unwrap();
        assert_eq!(from, to);
    }

    #[test]
    fn inverted_bounds_are_rejected() {
        let err = parse_range(&params(
            Some("2026-08-02T00:00:00Z"),
            Some("2026-08-01T00:00:00Z"),
        ))
        .unwrap_err();
        assert_eq!(err.0, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn non_rfc3339_bounds_are_rejected() {
        let err = parse_range(&params(Some("yesterday"), Some("today"))).unwrap_err();
        assert_eq!(err.0, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn history_limit_is_clamped() {
        let mut p = params(None, None);
        assert_eq!(history_limit(&p), DEFAULT_HISTORY_LIMIT);
        p.limit = Some(0);
        assert_eq!(history_limit(&p), 1);
        p.limit = Some(1_000_000);
        assert_eq!(history_limit(&p), MAX_HISTORY_LIMIT);
    }
}
