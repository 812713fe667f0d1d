use std::collections::HashMap;

use fleet_client::domain::MeterReading;
use sqlx::{PgPool, Postgres, QueryBuilder};
use time::OffsetDateTime;

use crate::buffer::BatchSink;

/// Transactional dual write for meter batches; the meter twin of
/// `VehicleSink`. The two classes stay separate on purpose: their schemas
/// differ enough that a shared generic write path would obscure the SQL.
pub struct MeterSink {
    pool: PgPool,
}

impl MeterSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn write_batch(&self, batch: &[MeterReading]) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let mut history = QueryBuilder::<Postgres>::new(
            "INSERT INTO meter_readings \
             (recorded_at, meter_id, kwh_consumed_ac, voltage, ingested_at) ",
        );
        history.push_values(batch, |mut b, r| {
            b.push_bind(r.recorded_at)
                .push_bind(&r.meter_id)
                .push_bind(r.kwh_consumed_ac)
                .push_bind(r.voltage)
                .push_bind(r.ingested_at);
        });
        history.build().persistent(false).execute(&mut *tx).await?;

        let latest = latest_per_meter(batch);
        let mut current = QueryBuilder::<Postgres>::new(
            "INSERT INTO meter_current \
             (meter_id, kwh_consumed_ac, voltage, last_seen_at, updated_at) ",
        );
        current.push_values(latest, |mut b, r| {
            b.push_bind(&r.meter_id)
                .push_bind(r.kwh_consumed_ac)
                .push_bind(r.voltage)
                .push_bind(r.recorded_at)
                .push("NOW()");
        });
        current.push(
            " ON CONFLICT (meter_id) DO UPDATE SET \
               kwh_consumed_ac = EXCLUDED.kwh_consumed_ac, \
               voltage = EXCLUDED.voltage, \
               last_seen_at = EXCLUDED.last_seen_at, \
               updated_at = NOW() \
             WHERE meter_current.last_seen_at < EXCLUDED.last_seen_at",
        );
        current.build().persistent(false).execute(&mut *tx).await?;

        tx.commit().await
    }
}

fn latest_per_meter(batch: &[MeterReading]) -> Vec<&MeterReading> {
    let mut latest: HashMap<&str, &MeterReading> = HashMap::with_capacity(batch.len());
    for r in batch {
        latest
            .entry(r.meter_id.as_str())
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
impl BatchSink<MeterReading> for MeterSink {
    async fn ingest_batch(&self, batch: &[MeterReading]) -> Result<(), sqlx::Error> {
        if batch.is_empty() {
            return Ok(());
        }
        self.write_batch(batch).await?;

        metrics::counter!("ingested_readings_total", "class" => "meter")
            .increment(batch.len() as u64);
        if let Some(oldest) = batch.iter().map(|r| r.ingested_at).min() {
            let lag = OffsetDateTime::now_utc() - oldest;
            metrics::histogram!("ingest_flush_lag_seconds", "class" => "meter")
                .record(lag.as_seconds_f64());
        }
        Ok(())
    }
}
