use std::collections::HashMap;

use fleet_client::domain::VehicleReading;
use sqlx::{PgPool, Postgres, QueryBuilder};
use time::OffsetDateTime;

use crate::buffer::BatchSink;

/// Transactional dual write for vehicle batches: append to the partitioned
/// history table, then conditionally upsert the per-vehicle current rows.
pub struct VehicleSink {
    pool: PgPool,
}

impl VehicleSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn write_batch(&self, batch: &[VehicleReading]) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        // One multi-row insert; the database routes each row to the monthly
        // partition covering its recorded_at.
        let mut history = QueryBuilder::<Postgres>::new(
            "INSERT INTO vehicle_readings \
             (recorded_at, vehicle_id, soc, kwh_delivered_dc, battery_temp, ingested_at) ",
        );
        history.push_values(batch, |mut b, r| {
            b.push_bind(r.recorded_at)
                .push_bind(&r.vehicle_id)
                .push_bind(r.soc)
                .push_bind(r.kwh_delivered_dc)
                .push_bind(r.battery_temp)
                .push_bind(r.ingested_at);
        });
        history.build().persistent(false).execute(&mut *tx).await?;

        // Postgres rejects a multi-row ON CONFLICT DO UPDATE that touches the
        // same key twice, so reduce the batch to the newest reading per
        // vehicle first; the guard below then keeps stale rows from
        // overwriting fresher state regardless of flush commit order.
        let latest = latest_per_vehicle(batch);
        let mut current = QueryBuilder::<Postgres>::new(
            "INSERT INTO vehicle_current \
             (vehicle_id, soc, kwh_delivered_dc, battery_temp, last_seen_at, updated_at) ",
        );
        current.push_values(latest, |mut b, r| {
            b.push_bind(&r.vehicle_id)
                .push_bind(r.soc)
                .push_bind(r.kwh_delivered_dc)
                .push_bind(r.battery_temp)
                .push_bind(r.recorded_at)
                .push("NOW()");
        });
        current.push(
            " ON CONFLICT (vehicle_id) DO UPDATE SET \
               soc = EXCLUDED.soc, \
               kwh_delivered_dc = EXCLUDED.kwh_delivered_dc, \
               battery_temp = EXCLUDED.battery_temp, \
               last_seen_at = EXCLUDED.last_seen_at, \
               updated_at = NOW() \
             WHERE vehicle_current.last_seen_at < EXCLUDED.last_seen_at",
        );
        current.build().persistent(false).execute(&mut *tx).await?;

        tx.commit().await
    }
}

/// Newest reading per vehicle; on equal timestamps the first occurrence wins,
/// matching the strictly-greater staleness guard.
fn latest_per_vehicle(batch: &[VehicleReading]) -> Vec<&VehicleReading> {
    let mut latest: HashMap<&str, &VehicleReading> = HashMap::with_capacity(batch.len());
    for r in batch {
        latest
            .entry(r.vehicle_id.as_str())
            .and_modify(|kept| {
                if r.recorded_at > kept.recorded_at {
                    *kept = r;
                }
            })
            .or_insert(r);
    }
    latest.into_values().collect()
}

#[async_trait::async_trait]
impl BatchSink<VehicleReading> for VehicleSink {
    async fn ingest_batch(&self, batch: &[VehicleReading]) -> Result<(), sqlx::Error> {
        if batch.is_empty() {
            return Ok(());
        }
        self.write_batch(batch).await?;

        metrics::counter!("ingested_readings_total", "class" => "vehicle")
            .increment(batch.len() as u64);
        if let Some(oldest) = batch.iter().map(|r| r.ingested_at).min() {
            let lag = OffsetDateTime::now_utc() - oldest;
            metrics::histogram!("ingest_flush_lag_seconds", "class" => "vehicle")
                .record(lag.as_seconds_f64());
        }
        Ok(())
    }
}
