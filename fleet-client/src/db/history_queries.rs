use anyhow::Result;
use sqlx::PgPool;
use time::OffsetDateTime;

use crate::domain::{MeterReading, VehicleReading};

/// Fetch a latest-first slice of one vehicle's reading history.
///
/// `start`/`end` bound `recorded_at` as `[start, end)`; the predicate on the
/// partition key lets the planner prune to the covered monthly partitions,
/// and the `(vehicle_id, recorded_at DESC)` index serves the ordering.
pub async fn vehicle_history(
    pool: &PgPool,
    vehicle_id: &str,
    start: OffsetDateTime,
    end: OffsetDateTime,
    limit: i64,
) -> Result<Vec<VehicleReading>> {
    let rows = sqlx::query_as::<_, VehicleReading>(
        r#"
        SELECT
            recorded_at,
            vehicle_id,
            soc,
            kwh_delivered_dc,
            battery_temp,
            ingested_at
        FROM vehicle_readings
        WHERE vehicle_id = $1
          AND recorded_at >= $2
          AND recorded_at <  $3
        ORDER BY recorded_at DESC
        LIMIT $4
        "#,
    )
    .bind(vehicle_id)
    .bind(start)
    .bind(end)
    .bind(limit)
    .persistent(false)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

pub async fn meter_history(
    pool: &PgPool,
    meter_id: &str,
    start: OffsetDateTime,
    end: OffsetDateTime,
    limit: i64,
) -> Result<Vec<MeterReading>> {
    let rows = sqlx::query_as::<_, MeterReading>(
        r#"
        SELECT
            recorded_at,
            meter_id,
            kwh_consumed_ac,
            voltage,
            ingested_at
        FROM meter_readings
        WHERE meter_id = $1
          AND recorded_at >= $2
          AND recorded_at <  $3
        ORDER BY recorded_at DESC
        LIMIT $4
        "#,
    )
    .bind(meter_id)
    .bind(start)
    .bind(end)
    .bind(limit)
    .persistent(false)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}
