//! Validation of incoming telemetry payloads.
//!
//! The wire format is a tagged union: a `type` discriminator (`METER` or
//! `VEHICLE`) plus a `payload` object matching the variant. Payload schemas
//! are strict; an unknown discriminator or an unknown field fails
//! deserialization before validation runs.

use fleet_client::domain::{MeterReading, VehicleReading};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use time::macros::datetime;
use time::OffsetDateTime;

pub const MAX_DEVICE_ID_LEN: usize = 64;

// Broad sanity window for device clocks; anything outside is a device fault,
// not data.
const MIN_RECORDED_AT: OffsetDateTime = datetime!(2000-01-01 00:00:00 UTC);
const MAX_RECORDED_AT: OffsetDateTime = datetime!(2100-01-01 00:00:00 UTC);

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum TelemetryMessage {
    #[serde(rename = "VEHICLE")]
    Vehicle(VehiclePayload),
    #[serde(rename = "METER")]
    Meter(MeterPayload),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VehiclePayload {
    pub vehicle_id: String,
    pub soc: Decimal,
    pub kwh_delivered_dc: Decimal,
    pub battery_temp: Decimal,
    #[serde(with = "time::serde::rfc3339")]
    pub recorded_at: OffsetDateTime,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MeterPayload {
    pub meter_id: String,
    pub kwh_consumed_ac: Decimal,
    pub voltage: Decimal,
    #[serde(with = "time::serde::rfc3339")]
    pub recorded_at: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

impl FieldError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("telemetry payload failed validation ({} field errors)", errors.len())]
pub struct ValidationError {
    pub errors: Vec<FieldError>,
}

/// Validate one message and reject it whole on the first bad field set.
/// Validation never mutates; accepted payloads convert via `into_reading`.
pub fn validate(message: &TelemetryMessage) -> Result<(), ValidationError> {
    let (class, errors) = match message {
        TelemetryMessage::Vehicle(p) => ("vehicle", validate_vehicle(p)),
        TelemetryMessage::Meter(p) => ("meter", validate_meter(p)),
    };
    if errors.is_empty() {
        Ok(())
    } else {
        metrics::counter!("validation_rejected_total", "class" => class).increment(1);
        Err(ValidationError { errors })
    }
}

pub fn validate_vehicle(p: &VehiclePayload) -> Vec<FieldError> {
    let mut errors = device_id_errors("vehicle_id", &p.vehicle_id);

    if p.soc < Decimal::ZERO || p.soc > Decimal::ONE_HUNDRED {
        errors.push(FieldError::new("soc", "soc must be between 0 and 100"));
    }
    if p.kwh_delivered_dc < Decimal::ZERO {
        errors.push(FieldError::new(
            "kwh_delivered_dc",
            "kwh_delivered_dc must be non-negative",
        ));
    }
    // battery_temp is unbounded.
    errors.extend(recorded_at_errors(p.recorded_at));
    errors
}

pub fn validate_meter(p: &MeterPayload) -> Vec<FieldError> {
    let mut errors = device_id_errors("meter_id", &p.meter_id);

    if p.kwh_consumed_ac < Decimal::ZERO {
        errors.push(FieldError::new(
            "kwh_consumed_ac",
            "kwh_consumed_ac must be non-negative",
        ));
    }
    if p.voltage < Decimal::ZERO {
        errors.push(FieldError::new("voltage", "voltage must be non-negative"));
    }
    errors.extend(recorded_at_errors(p.recorded_at));
    errors
}

fn device_id_errors(field: &'static str, id: &str) -> Vec<FieldError> {
    let mut errors = Vec::new();
    if id.is_empty() {
        errors.push(FieldError::new(field, "identifier must not be empty"));
    }
    if id.len() > MAX_DEVICE_ID_LEN {
        errors.push(FieldError::new(
            field,
            format!("identifier exceeds {MAX_DEVICE_ID_LEN} characters"),
        ));
    }
    errors
}

fn recorded_at_errors(recorded_at: OffsetDateTime) -> Vec<FieldError> {
    if recorded_at < MIN_RECORDED_AT || recorded_at >= MAX_RECORDED_AT {
        vec![FieldError::new(
            "recorded_at",
            "timestamp outside the accepted range",
        )]
    } else {
        Vec::new()
    }
}

impl VehiclePayload {
    pub fn into_reading(self, ingested_at: OffsetDateTime) -> VehicleReading {
        VehicleReading {
            recorded_at: self.recorded_at,
            vehicle_id: self.vehicle_id,
            soc: self.soc,
            kwh_delivered_dc: self.kwh_delivered_dc,
            battery_temp: self.battery_temp,
            ingested_at,
        }
    }
}

impl MeterPayload {
    pub fn into_reading(self, ingested_at: OffsetDateTime) -> MeterReading {
        MeterReading {
            recorded_at: self.recorded_at,
            meter_id: self.meter_id,
            kwh_consumed_ac: self.kwh_consumed_ac,
            voltage: self.voltage,
            ingested_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn vehicle_payload() -> VehiclePayload {
        VehiclePayload {
            vehicle_id: "V001".to_string(),
            soc: dec!(80.25),
            kwh_delivered_dc: dec!(1.2500),
            battery_temp: dec!(-12.50),
            recorded_at: datetime!(2026-08-01 10:00:00 UTC),
        }
    }

    fn meter_payload() -> MeterPayload {
        MeterPayload {
            meter_id: "M001".to_string(),
            kwh_consumed_ac: dec!(1.4000),
            voltage: dec!(230.10),
            recorded_at: datetime!(2026-08-01 10:00:00 UTC),
        }
    }

    #[test]
    fn accepts_valid_payloads() {
        assert!(validate_vehicle(&vehicle_payload()).is_empty());
        assert!(validate_meter(&meter_payload()).is_empty());
    }

    #[test]
    fn soc_bounds_are_inclusive() {
        let mut p = vehicle_payload();
        p.soc = dec!(0);
        assert!(validate_vehicle(&p).is_empty());
        p.soc = dec!(100);
        assert!(validate_vehicle(&p).is_empty());
        p.soc = dec!(100.01);
        assert_eq!(validate_vehicle(&p)[0].field, "soc");
        p.soc = dec!(-0.01);
        assert_eq!(validate_vehicle(&p)[0].field, "soc");
    }

    #[test]
    fn negative_energy_is_rejected() {
        let mut v = vehicle_payload();
        v.kwh_delivered_dc = dec!(-0.0001);
        assert_eq!(validate_vehicle(&v)[0].field, "kwh_delivered_dc");

        let mut m = meter_payload();
        m.kwh_consumed_ac = dec!(-1);
        assert_eq!(validate_meter(&m)[0].field, "kwh_consumed_ac");
    }

    #[test]
    fn negative_voltage_is_rejected_but_negative_temp_is_not() {
        let mut m = meter_payload();
        m.voltage = dec!(-230);
        assert_eq!(validate_meter(&m)[0].field, "voltage");

        let mut v = vehicle_payload();
        v.battery_temp = dec!(-40);
        assert!(validate_vehicle(&v).is_empty());
    }

    #[test]
    fn identifier_length_boundary_is_64() {
        let mut p = vehicle_payload();
        p.vehicle_id = "v".repeat(64);
        assert!(validate_vehicle(&p).is_empty());
        p.vehicle_id = "v".repeat(65);
        assert_eq!(validate_vehicle(&p)[0].field, "vehicle_id");
        p.vehicle_id = String::new();
        assert_eq!(validate_vehicle(&p)[0].field, "vehicle_id");
    }

    #[test]
    fn out_of_window_timestamp_is_rejected() {
        let mut p = meter_payload();
        p.recorded_at = datetime!(1999-12-31 23:59:59 UTC);
        assert_eq!(validate_meter(&p)[0].field, "recorded_at");
    }

    #[test]
    fn multiple_bad_fields_report_together() {
        let mut p = vehicle_payload();
        p.vehicle_id = String::new();
        p.soc = dec!(150);
        p.kwh_delivered_dc = dec!(-1);
        let errors = validate_vehicle(&p);
        assert_eq!(errors.len(), 3);
    }

    #[test]
    fn decodes_tagged_vehicle_message() {
        let msg: TelemetryMessage = serde_json::from_str(
            r#"{
                "type": "VEHICLE",
                "payload": {
                    "vehicle_id": "V001",
                    "soc": 80.25,
                    "kwh_delivered_dc": 1.25,
                    "battery_temp": 21.0,
                    "recorded_at": "2026-08-01T10:00:00Z"
                }
            }"#,
        )
        .unwrap();
        assert!(matches!(msg, TelemetryMessage::Vehicle(_)));
    }

    #[test]
    fn unknown_discriminator_fails_decode() {
        let res: Result<TelemetryMessage, _> = serde_json::from_str(
            r#"{"type": "CHARGER", "payload": {}}"#,
        );
        assert!(res.is_err());
    }

    #[test]
    fn unknown_payload_field_fails_decode() {
        let res: Result<TelemetryMessage, _> = serde_json::from_str(
            r#"{
                "type": "METER",
                "payload": {
                    "meter_id": "M001",
                    "kwh_consumed_ac": 1.4,
                    "voltage": 230.1,
                    "recorded_at": "2026-08-01T10:00:00Z",
                    "firmware": "9.1"
                }
            }"#,
        );
        assert!(res.is_err());
    }

    #[test]
    fn offset_naive_timestamp_fails_decode() {
        let res: Result<TelemetryMessage, _> = serde_json::from_str(
            r#"{
                "type": "METER",
                "payload": {
                    "meter_id": "M001",
                    "kwh_consumed_ac": 1.4,
                    "voltage": 230.1,
                    "recorded_at": "2026-08-01 10:00:00"
                }
            }"#,
        );
        assert!(res.is_err());
    }
}
