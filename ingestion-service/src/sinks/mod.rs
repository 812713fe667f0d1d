pub mod meter;
pub mod vehicle;

pub use meter::MeterSink;
pub use vehicle::VehicleSink;
