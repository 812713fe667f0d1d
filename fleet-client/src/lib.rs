pub mod db;
pub mod domain;

pub use domain::{
    MeterCurrent, MeterHourlyStats, MeterReading, VehicleCurrent, VehicleHourlyStats,
    VehicleMeterLink, VehicleReading,
};
