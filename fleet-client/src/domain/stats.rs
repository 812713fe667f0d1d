use rust_decimal::Decimal;
use serde::Serialize;
use time::OffsetDateTime;

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct VehicleHourlyStats {
    pub vehicle_id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub hour_bucket: OffsetDateTime,
    pub sample_count: i64,
    pub avg_soc: Decimal,
    pub min_soc: Decimal,
    pub max_soc: Decimal,
    pub total_kwh_delivered_dc: Decimal,
    pub avg_battery_temp: Decimal,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct MeterHourlyStats {
    pub meter_id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub hour_bucket: OffsetDateTime,
    pub sample_count: i64,
    pub total_kwh_consumed_ac: Decimal,
    pub avg_voltage: Decimal,
    pub min_voltage: Decimal,
    pub max_voltage: Decimal,
}
