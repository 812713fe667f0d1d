use anyhow::Result;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;
use sqlx::PgPool;

use crate::domain::VehicleMeterLink;

/// Charging efficiency of one vehicle over the trailing 24 hours: DC energy
/// the battery received versus AC energy the linked meter measured.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct VehiclePerformance24h {
    pub vehicle_id: String,
    pub meter_id: String,
    pub total_dc_delivered_kwh: Decimal,
    pub total_ac_consumed_kwh: Decimal,
    pub efficiency_pct: Decimal,
}

/// `100 * dc / ac` rounded to two fractional digits; `0` when no AC energy
/// was measured (never a division failure). Midpoints round away from zero,
/// matching `ROUND(numeric, 2)` in the materialized summary.
pub fn efficiency_pct(total_dc: Decimal, total_ac: Decimal) -> Decimal {
    if total_ac.is_zero() {
        return Decimal::ZERO;
    }
    (Decimal::ONE_HUNDRED * total_dc / total_ac)
        .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

pub async fn vehicle_link(pool: &PgPool, vehicle_id: &str) -> Result<Option<VehicleMeterLink>> {
    let link = sqlx::query_as::<_, VehicleMeterLink>(
        r#"
        SELECT vehicle_id, meter_id, linked_at
        FROM vehicle_meter_links
        WHERE vehicle_id = $1
        "#,
    )
    .bind(vehicle_id)
    .persistent(false)
    .fetch_optional(pool)
    .await?;

    Ok(link)
}

/// Resolve the vehicle's charging-station link, then run the two independent
/// 24h aggregations against the cold tables. `None` means the vehicle has no
/// current link.
pub async fn vehicle_performance(
    pool: &PgPool,
    vehicle_id: &str,
) -> Result<Option<VehiclePerformance24h>> {
    let Some(link) = vehicle_link(pool, vehicle_id).await? else {
        return Ok(None);
    };

    let (total_dc,): (Option<Decimal>,) = sqlx::query_as(
        r#"
        SELECT SUM(kwh_delivered_dc)
        FROM vehicle_readings
        WHERE vehicle_id = $1
          AND recorded_at >= NOW() - INTERVAL '24 hours'
        "#,
    )
    .bind(&link.vehicle_id)
    .persistent(false)
    .fetch_one(pool)
    .await?;

    let (total_ac,): (Option<Decimal>,) = sqlx::query_as(
        r#"
        SELECT SUM(kwh_consumed_ac)
        FROM meter_readings
        WHERE meter_id = $1
          AND recorded_at >= NOW() - INTERVAL '24 hours'
        "#,
    )
    .bind(&link.meter_id)
    .persistent(false)
    .fetch_one(pool)
    .await?;

    let total_dc = total_dc.unwrap_or(Decimal::ZERO);
    let total_ac = total_ac.unwrap_or(Decimal::ZERO);

    Ok(Some(VehiclePerformance24h {
        vehicle_id: link.vehicle_id,
        meter_id: link.meter_id,
        total_dc_delivered_kwh: total_dc,
        total_ac_consumed_kwh: total_ac,
        efficiency_pct: efficiency_pct(total_dc, total_ac),
    }))
}

/// Same contract served from the materialized summary, which a scheduled job
/// refreshes every 15 minutes. Cheaper than the live aggregation but up to
/// one refresh interval stale.
pub async fn vehicle_performance_cached(
    pool: &PgPool,
    vehicle_id: &str,
) -> Result<Option<VehiclePerformance24h>> {
    let row = sqlx::query_as::<_, VehiclePerformance24h>(
        r#"
        SELECT
            vehicle_id,
            meter_id,
            total_dc_delivered_kwh,
            total_ac_consumed_kwh,
            efficiency_pct
        FROM vehicle_performance_24h
        WHERE vehicle_id = $1
        "#,
    )
    .bind(vehicle_id)
    .persistent(false)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

pub async fn upsert_link(pool: &PgPool, vehicle_id: &str, meter_id: &str) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO vehicle_meter_links (vehicle_id, meter_id, linked_at)
        VALUES ($1, $2, NOW())
        ON CONFLICT (vehicle_id) DO UPDATE SET
            meter_id  = EXCLUDED.meter_id,
            linked_at = NOW()
        "#,
    )
    .bind(vehicle_id)
    .bind(meter_id)
    .persistent(false)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn remove_link(pool: &PgPool, vehicle_id: &str) -> Result<bool> {
    let result = sqlx::query("DELETE FROM vehicle_meter_links WHERE vehicle_id = $1")
        .bind(vehicle_id)
        .persistent(false)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}

#[cfg(test)]
mod tests {
    use super::efficiency_pct;
    use rust_decimal_macros::dec;

    #[test]
    fn efficiency_rounds_to_two_digits() {
        assert_eq!(efficiency_pct(dec!(8.5), dec!(9.3)), dec!(91.40));
        assert_eq!(efficiency_pct(dec!(1), dec!(3)), dec!(33.33));
    }

    #[test]
    fn efficiency_midpoints_round_away_from_zero() {
        assert_eq!(efficiency_pct(dec!(0.125), dec!(100)), dec!(0.13));
    }

    #[test]
    fn efficiency_is_zero_when_no_ac_consumption() {
        assert_eq!(efficiency_pct(dec!(5.0), dec!(0)), dec!(0));
    }

    #[test]
    fn efficiency_can_exceed_one_hundred() {
        // Clock skew between vehicle and meter windows can report more DC
        // than AC; the ratio is reported as-is rather than clamped.
        assert_eq!(efficiency_pct(dec!(10), dec!(8)), dec!(125.00));
    }
}
