use anyhow::Result;
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::PgPool;
use time::OffsetDateTime;

use crate::domain::{MeterHourlyStats, VehicleHourlyStats};

/// One fleet-wide hour across both device classes.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct FleetHourlySummary {
    #[serde(with = "time::serde::rfc3339")]
    pub hour_bucket: OffsetDateTime,
    pub vehicles_reporting: i64,
    pub total_kwh_delivered_dc: Decimal,
    pub meters_reporting: i64,
    pub total_kwh_consumed_ac: Decimal,
}

/// Fleet-wide hourly totals over `[start, end)`, grouped by hour.
///
/// Served entirely from the rollup tables; the cold store is never touched.
pub async fn fleet_summary(
    pool: &PgPool,
    start: OffsetDateTime,
    end: OffsetDateTime,
) -> Result<Vec<FleetHourlySummary>> {
    let rows = sqlx::query_as::<_, FleetHourlySummary>(
        r#"
        SELECT
            COALESCE(v.hour_bucket, m.hour_bucket) AS hour_bucket,
            COALESCE(v.vehicles_reporting, 0)      AS vehicles_reporting,
            COALESCE(v.total_kwh_delivered_dc, 0)  AS total_kwh_delivered_dc,
            COALESCE(m.meters_reporting, 0)        AS meters_reporting,
            COALESCE(m.total_kwh_consumed_ac, 0)   AS total_kwh_consumed_ac
        FROM (
            SELECT
                hour_bucket,
                COUNT(*)                   AS vehicles_reporting,
                SUM(total_kwh_delivered_dc) AS total_kwh_delivered_dc
            FROM vehicle_hourly_stats
            WHERE hour_bucket >= $1 AND hour_bucket < $2
            GROUP BY hour_bucket
        ) v
        FULL OUTER JOIN (
            SELECT
                hour_bucket,
                COUNT(*)                   AS meters_reporting,
                SUM(total_kwh_consumed_ac) AS total_kwh_consumed_ac
            FROM meter_hourly_stats
            WHERE hour_bucket >= $1 AND hour_bucket < $2
            GROUP BY hour_bucket
        ) m ON m.hour_bucket = v.hour_bucket
        ORDER BY hour_bucket
        "#,
    )
    .bind(start)
    .bind(end)
    .persistent(false)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Per-vehicle hourly rows for the trailing 24 hours, newest hour first.
pub async fn vehicle_stats_last_24h(pool: &PgPool) -> Result<Vec<VehicleHourlyStats>> {
    let rows = sqlx::query_as::<_, VehicleHourlyStats>(
        r#"
        SELECT
            vehicle_id,
            hour_bucket,
            sample_count,
            avg_soc,
            min_soc,
            max_soc,
            total_kwh_delivered_dc,
            avg_battery_temp
        FROM vehicle_hourly_stats
        WHERE hour_bucket >= NOW() - INTERVAL '24 hours'
        ORDER BY hour_bucket DESC, vehicle_id
        "#,
    )
    .persistent(false)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

pub async fn meter_stats_last_24h(pool: &PgPool) -> Result<Vec<MeterHourlyStats>> {
    let rows = sqlx::query_as::<_, MeterHourlyStats>(
        r#"
        SELECT
            meter_id,
            hour_bucket,
            sample_count,
            total_kwh_consumed_ac,
            avg_voltage,
            min_voltage,
            max_voltage
        FROM meter_hourly_stats
        WHERE hour_bucket >= NOW() - INTERVAL '24 hours'
        ORDER BY hour_bucket DESC, meter_id
        "#,
    )
    .persistent(false)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Hourly drill-down for a single vehicle over `[start, end)`.
pub async fn vehicle_hourly_stats(
    pool: &PgPool,
    vehicle_id: &str,
    start: OffsetDateTime,
    end: OffsetDateTime,
) -> Result<Vec<VehicleHourlyStats>> {
    let rows = sqlx::query_as::<_, VehicleHourlyStats>(
        r#"
        SELECT
            vehicle_id,
            hour_bucket,
            sample_count,
            avg_soc,
            min_soc,
            max_soc,
            total_kwh_delivered_dc,
            avg_battery_temp
        FROM vehicle_hourly_stats
        WHERE vehicle_id = $1
          AND hour_bucket >= $2
          AND hour_bucket <  $3
        ORDER BY hour_bucket
        "#,
    )
    .bind(vehicle_id)
    .bind(start)
    .bind(end)
    .persistent(false)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

pub async fn meter_hourly_stats(
    pool: &PgPool,
    meter_id: &str,
    start: OffsetDateTime,
    end: OffsetDateTime,
) -> Result<Vec<MeterHourlyStats>> {
    let rows = sqlx::query_as::<_, MeterHourlyStats>(
        r#"
        SELECT
            meter_id,
            hour_bucket,
            sample_count,
            total_kwh_consumed_ac,
            avg_voltage,
            min_voltage,
            max_voltage
        FROM meter_hourly_stats
        WHERE meter_id = $1
          AND hour_bucket >= $2
          AND hour_bucket <  $3
        ORDER BY hour_bucket
        "#,
    )
    .bind(meter_id)
    .bind(start)
    .bind(end)
    .persistent(false)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}
