use serde::Serialize;
use time::OffsetDateTime;

/// Association between a vehicle and the meter at its charging station.
/// A vehicle has at most one current link.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct VehicleMeterLink {
    pub vehicle_id: String,
    pub meter_id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub linked_at: OffsetDateTime,
}
