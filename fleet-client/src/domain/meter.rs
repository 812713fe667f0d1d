use rust_decimal::Decimal;
use serde::Serialize;
use time::OffsetDateTime;

/// One telemetry sample from one smart meter, as stored in the cold table.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct MeterReading {
    #[serde(with = "time::serde::rfc3339")]
    pub recorded_at: OffsetDateTime,
    pub meter_id: String,
    pub kwh_consumed_ac: Decimal,
    pub voltage: Decimal,
    #[serde(with = "time::serde::rfc3339")]
    pub ingested_at: OffsetDateTime,
}

/// Latest known state of one meter (hot table row).
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct MeterCurrent {
    pub meter_id: String,
    pub kwh_consumed_ac: Decimal,
    pub voltage: Decimal,
    #[serde(with = "time::serde::rfc3339")]
    pub last_seen_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}
