use rust_decimal::Decimal;
use serde::Serialize;
use time::OffsetDateTime;

/// One telemetry sample from one vehicle, as stored in the cold table.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct VehicleReading {
    #[serde(with = "time::serde::rfc3339")]
    pub recorded_at: OffsetDateTime,
    pub vehicle_id: String,
    pub soc: Decimal,
    pub kwh_delivered_dc: Decimal,
    pub battery_temp: Decimal,
    #[serde(with = "time::serde::rfc3339")]
    pub ingested_at: OffsetDateTime,
}

/// Latest known state of one vehicle (hot table row).
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct VehicleCurrent {
    pub vehicle_id: String,
    pub soc: Decimal,
    pub kwh_delivered_dc: Decimal,
    pub battery_temp: Decimal,
    #[serde(with = "time::serde::rfc3339")]
    pub last_seen_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}
