//! Scheduled rollup job: recompute per-device hourly aggregates from the
//! cold reading tables for a trailing window, then refresh the materialized
//! 24h performance summary. Run from cron; a 15 minute cadence keeps the
//! cached performance endpoint acceptably fresh.

use anyhow::Result;
use ingestion_service::{config::AppConfig, observability};

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    let cfg = AppConfig::load()?;
    let pool = cfg.database.connect().await?;
    let window_hours = cfg.rollup.window_hours as i32;

    // Recompute whole hour buckets inside the window. ON CONFLICT makes the
    // job idempotent: re-running it converges on the same aggregates.
    let vehicle_rows = sqlx::query(
        r#"
        INSERT INTO vehicle_hourly_stats
            (vehicle_id, hour_bucket, sample_count, avg_soc, min_soc, max_soc,
             total_kwh_delivered_dc, avg_battery_temp)
        SELECT
            vehicle_id,
            DATE_TRUNC('hour', recorded_at) AS hour_bucket,
            COUNT(*),
            AVG(soc),
            MIN(soc),
            MAX(soc),
            SUM(kwh_delivered_dc),
            AVG(battery_temp)
        FROM vehicle_readings
        WHERE recorded_at >= DATE_TRUNC('hour', NOW()) - MAKE_INTERVAL(hours => $1)
        GROUP BY vehicle_id, DATE_TRUNC('hour', recorded_at)
        ON CONFLICT (vehicle_id, hour_bucket) DO UPDATE SET
            sample_count           = EXCLUDED.sample_count,
            avg_soc                = EXCLUDED.avg_soc,
            min_soc                = EXCLUDED.min_soc,
            max_soc                = EXCLUDED.max_soc,
            total_kwh_delivered_dc = EXCLUDED.total_kwh_delivered_dc,
            avg_battery_temp       = EXCLUDED.avg_battery_temp
        "#,
    )
    .bind(window_hours)
    .persistent(false)
    .execute(&pool)
    .await?
    .rows_affected();

    let meter_rows = sqlx::query(
        r#"
        INSERT INTO meter_hourly_stats
            (meter_id, hour_bucket, sample_count, total_kwh_consumed_ac,
             avg_voltage, min_voltage, max_voltage)
        SELECT
            meter_id,
            DATE_TRUNC('hour', recorded_at) AS hour_bucket,
            COUNT(*),
            SUM(kwh_consumed_ac),
            AVG(voltage),
            MIN(voltage),
            MAX(voltage)
        FROM meter_readings
        WHERE recorded_at >= DATE_TRUNC('hour', NOW()) - MAKE_INTERVAL(hours => $1)
        GROUP BY meter_id, DATE_TRUNC('hour', recorded_at)
        ON CONFLICT (meter_id, hour_bucket) DO UPDATE SET
            sample_count          = EXCLUDED.sample_count,
            total_kwh_consumed_ac = EXCLUDED.total_kwh_consumed_ac,
            avg_voltage           = EXCLUDED.avg_voltage,
            min_voltage           = EXCLUDED.min_voltage,
            max_voltage           = EXCLUDED.max_voltage
        "#,
    )
    .bind(window_hours)
    .persistent(false)
    .execute(&pool)
    .await?
    .rows_affected();

    // CONCURRENTLY keeps the cached performance endpoint readable during the
    // refresh; it requires the unique index on vehicle_id.
    sqlx::query("REFRESH MATERIALIZED VIEW CONCURRENTLY vehicle_performance_24h")
        .persistent(false)
        .execute(&pool)
        .await?;

    tracing::info!(
        vehicle_rows,
        meter_rows,
        window_hours,
        "hourly rollup recomputed and 24h summary refreshed"
    );

    Ok(())
}
