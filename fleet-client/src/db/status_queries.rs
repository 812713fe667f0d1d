use anyhow::Result;
use sqlx::PgPool;

use crate::domain::{MeterCurrent, VehicleCurrent};

/// Point lookup of the latest known state for a single vehicle.
///
/// All statements here run unprepared so they stay compatible with a
/// transaction-mode connection pooler in front of the database.
pub async fn vehicle_current(pool: &PgPool, vehicle_id: &str) -> Result<Option<VehicleCurrent>> {
    let row = sqlx::query_as::<_, VehicleCurrent>(
        r#"
        SELECT
            vehicle_id,
            soc,
            kwh_delivered_dc,
            battery_temp,
            last_seen_at,
            updated_at
        FROM vehicle_current
        WHERE vehicle_id = $1
        "#,
    )
    .bind(vehicle_id)
    .persistent(false)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

pub async fn meter_current(pool: &PgPool, meter_id: &str) -> Result<Option<MeterCurrent>> {
    let row = sqlx::query_as::<_, MeterCurrent>(
        r#"
        SELECT
            meter_id,
            kwh_consumed_ac,
            voltage,
            last_seen_at,
            updated_at
        FROM meter_current
        WHERE meter_id = $1
        "#,
    )
    .bind(meter_id)
    .persistent(false)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}
