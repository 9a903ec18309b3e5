//! Typed sensors: reading channels hosted by devices.
//!
//! A sensor is built from a SENSOR_INFO response and keeps that field set as
//! its attribute source. Its `state_field` is the one long-lived mutable
//! reference in the model: a SENSORS_STATE response replaces it wholesale.

use chrono::{DateTime, Local, TimeZone};
use serde_json::{Map, Value};
use simarine_proto::{Field, MessageFields, ProtocolError};

use crate::attrs::{field_to_value, AttrSpec};

// ── Catalogue enums ───────────────────────────────────────────────────────────

/// Meaning of a timestamp sensor's state value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampStateType {
    /// System time, timezone adjusted. This is what the display shows.
    Localtime,
    /// System time, nominally UTC; firmware 1.21 adjusts it the wrong way.
    Utc,
    /// Boot time, timezone adjusted.
    BootTime,
    Unknown(i64),
}

impl TimestampStateType {
    pub fn from_value(n: i64) -> Self {
        match n {
            0 => Self::Localtime,
            1 => Self::Utc,
            2 => Self::BootTime,
            other => Self::Unknown(other),
        }
    }

    pub fn name(self) -> String {
        match self {
            Self::Localtime => "LOCALTIME".into(),
            Self::Utc => "UTC".into(),
            Self::BootTime => "BOOT_TIME".into(),
            Self::Unknown(n) => format!("UNKNOWN_{n}"),
        }
    }
}

fn timestamp_state_name(n: i64) -> String {
    TimestampStateType::from_value(n).name()
}

// ── Sensor kinds ──────────────────────────────────────────────────────────────

/// Sensor variant, selected by the type id in field 2.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorKind {
    None,
    Voltage,
    Current,
    CoulombCounter,
    Temperature,
    Atmosphere,
    AtmosphereTrend,
    Resistance,
    Timestamp,
    Angle,
    User,
    Unknown(i32),
}

impl SensorKind {
    pub fn from_type_id(type_id: Option<i32>) -> Self {
        match type_id {
            Some(0) => Self::None,
            Some(1) => Self::Voltage,
            Some(2) => Self::Current,
            Some(3) => Self::CoulombCounter,
            Some(4) => Self::Temperature,
            Some(5) => Self::Atmosphere,
            Some(6) => Self::AtmosphereTrend,
            Some(7) => Self::Resistance,
            Some(10) => Self::Timestamp,
            Some(16) => Self::Angle,
            Some(22) => Self::User,
            Some(other) => Self::Unknown(other),
            None => Self::Unknown(-1),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Voltage => "voltage",
            Self::Current => "current",
            Self::CoulombCounter => "coulomb_counter",
            Self::Temperature => "temperature",
            Self::Atmosphere => "atmosphere",
            Self::AtmosphereTrend => "atmosphere_trend",
            Self::Resistance => "resistance",
            Self::Timestamp => "timestamp",
            Self::Angle => "angle",
            Self::User => "user",
            Self::Unknown(_) => "unknown",
        }
    }

    /// Unit of the scaled state value, for kinds that measure something.
    pub fn unit(self) -> Option<&'static str> {
        match self {
            Self::Voltage => Some("volts"),
            Self::Current => Some("amps"),
            Self::CoulombCounter => Some("amp_hours"),
            Self::Temperature => Some("celsius"),
            Self::Atmosphere => Some("millibars"),
            Self::AtmosphereTrend => Some("millibars_per_hour"),
            Self::Resistance => Some("ohms"),
            Self::Timestamp => Some("unix_timestamp"),
            Self::Angle => Some("degrees"),
            _ => None,
        }
    }

    /// Multiplier turning the raw state integer into the unit above.
    pub fn state_scale(self) -> f64 {
        match self {
            Self::Voltage | Self::CoulombCounter => 0.001,
            Self::Current | Self::Atmosphere => 0.01,
            Self::Temperature | Self::AtmosphereTrend | Self::Angle => 0.1,
            _ => 1.0,
        }
    }
}

static VOLTAGE_ATTRS: &[AttrSpec] = &[AttrSpec::scaled_state("volts", 0.001)];
static CURRENT_ATTRS: &[AttrSpec] = &[AttrSpec::scaled_state("amps", 0.01)];
static COULOMB_ATTRS: &[AttrSpec] = &[AttrSpec::scaled_state("amp_hours", 0.001)];
static TEMPERATURE_ATTRS: &[AttrSpec] = &[AttrSpec::scaled_state("celsius", 0.1)];
static ATMOSPHERE_ATTRS: &[AttrSpec] = &[AttrSpec::scaled_state("millibars", 0.01)];
static ATMOSPHERE_TREND_ATTRS: &[AttrSpec] =
    &[AttrSpec::scaled_state("millibars_per_hour", 0.1)];
static RESISTANCE_ATTRS: &[AttrSpec] = &[AttrSpec::state("ohms")];
static TIMESTAMP_ATTRS: &[AttrSpec] = &[
    AttrSpec::decoded("state_type", 4, timestamp_state_name),
    AttrSpec::state("unix_timestamp"),
    AttrSpec::civil_state("datetime"),
];
static ANGLE_ATTRS: &[AttrSpec] = &[AttrSpec::scaled_state("degrees", 0.1)];

// ── Sensor ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Sensor {
    fields: MessageFields,
    kind: SensorKind,
    state_field: Option<Field>,
}

impl Sensor {
    /// Build the typed view over a SENSOR_INFO response's fields.
    pub fn from_fields(fields: MessageFields) -> Result<Sensor, ProtocolError> {
        fields.ensure_indexed()?;
        let kind = SensorKind::from_type_id(fields.get(2).map(|f| f.int32()));
        Ok(Sensor {
            fields,
            kind,
            state_field: None,
        })
    }

    pub fn kind(&self) -> SensorKind {
        self.kind
    }

    pub fn type_name(&self) -> &'static str {
        self.kind.name()
    }

    pub fn fields(&self) -> &MessageFields {
        &self.fields
    }

    pub fn id(&self) -> Option<i32> {
        self.fields.get(1).map(|f| f.int32())
    }

    pub fn type_id(&self) -> Option<i32> {
        self.fields.get(2).map(|f| f.int32())
    }

    pub fn device_id(&self) -> Option<i32> {
        self.fields.get(3).map(|f| f.int32())
    }

    pub fn device_sensor_id(&self) -> Option<i32> {
        self.fields.get(4).map(|f| f.int32())
    }

    pub fn unit(&self) -> Option<&'static str> {
        self.kind.unit()
    }

    /// Latest state field, if a SENSORS_STATE refresh has bound one.
    pub fn state_field(&self) -> Option<&Field> {
        self.state_field.as_ref()
    }

    /// Rebind the state wholesale from a SENSORS_STATE response field.
    pub fn set_state_field(&mut self, field: Field) {
        self.state_field = Some(field);
    }

    /// Raw state integer.
    pub fn state_raw(&self) -> Option<i32> {
        self.state_field.as_ref().map(|f| f.int32())
    }

    /// State scaled into the kind's unit.
    pub fn state_value(&self) -> Option<f64> {
        self.state_raw().map(|v| v as f64 * self.kind.state_scale())
    }

    pub fn volts(&self) -> Option<f64> {
        (self.kind == SensorKind::Voltage).then(|| self.state_value()).flatten()
    }

    pub fn amps(&self) -> Option<f64> {
        (self.kind == SensorKind::Current).then(|| self.state_value()).flatten()
    }

    pub fn amp_hours(&self) -> Option<f64> {
        (self.kind == SensorKind::CoulombCounter).then(|| self.state_value()).flatten()
    }

    pub fn celsius(&self) -> Option<f64> {
        (self.kind == SensorKind::Temperature).then(|| self.state_value()).flatten()
    }

    pub fn millibars(&self) -> Option<f64> {
        (self.kind == SensorKind::Atmosphere).then(|| self.state_value()).flatten()
    }

    pub fn millibars_per_hour(&self) -> Option<f64> {
        (self.kind == SensorKind::AtmosphereTrend).then(|| self.state_value()).flatten()
    }

    pub fn ohms(&self) -> Option<f64> {
        (self.kind == SensorKind::Resistance).then(|| self.state_value()).flatten()
    }

    pub fn degrees(&self) -> Option<f64> {
        (self.kind == SensorKind::Angle).then(|| self.state_value()).flatten()
    }

    pub fn unix_timestamp(&self) -> Option<i64> {
        match self.kind {
            SensorKind::Timestamp => self.state_raw().map(i64::from),
            _ => None,
        }
    }

    pub fn datetime(&self) -> Option<DateTime<Local>> {
        Local.timestamp_opt(self.unix_timestamp()?, 0).single()
    }

    pub fn state_type(&self) -> Option<TimestampStateType> {
        match self.kind {
            SensorKind::Timestamp => self
                .fields
                .get(4)
                .map(|f| TimestampStateType::from_value(f.int32() as i64)),
            _ => None,
        }
    }

    fn attr_specs(&self) -> &'static [AttrSpec] {
        match self.kind {
            SensorKind::Voltage => VOLTAGE_ATTRS,
            SensorKind::Current => CURRENT_ATTRS,
            SensorKind::CoulombCounter => COULOMB_ATTRS,
            SensorKind::Temperature => TEMPERATURE_ATTRS,
            SensorKind::Atmosphere => ATMOSPHERE_ATTRS,
            SensorKind::AtmosphereTrend => ATMOSPHERE_TREND_ATTRS,
            SensorKind::Resistance => RESISTANCE_ATTRS,
            SensorKind::Timestamp => TIMESTAMP_ATTRS,
            SensorKind::Angle => ANGLE_ATTRS,
            _ => &[],
        }
    }

    /// Nested primitive map of everything this sensor exposes.
    pub fn snapshot(&self) -> Value {
        let mut out = Map::new();
        out.insert("id".into(), self.id().map(Value::from).unwrap_or(Value::Null));
        out.insert("type".into(), Value::String(self.type_name().into()));
        out.insert(
            "type_id".into(),
            self.type_id().map(Value::from).unwrap_or(Value::Null),
        );
        out.insert(
            "device_id".into(),
            self.device_id().map(Value::from).unwrap_or(Value::Null),
        );
        out.insert(
            "device_sensor_id".into(),
            self.device_sensor_id().map(Value::from).unwrap_or(Value::Null),
        );
        if let Some(unit) = self.unit() {
            out.insert("unit".into(), Value::String(unit.into()));
        }

        for spec in self.attr_specs() {
            out.insert(
                spec.name.into(),
                spec.read(&self.fields, self.state_field.as_ref()),
            );
        }

        out.insert(
            "state_field".into(),
            self.state_field
                .as_ref()
                .map(field_to_value)
                .unwrap_or(Value::Null),
        );

        let mut raw = Map::new();
        if let Ok(map) = self.fields.as_map() {
            for (id, field) in map {
                raw.insert(id.to_string(), field_to_value(field));
            }
        }
        out.insert("fields".into(), Value::Object(raw));

        Value::Object(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use serde_json::json;

    fn fields(hex_str: &str) -> MessageFields {
        MessageFields::new(Bytes::from(hex::decode(hex_str).unwrap()))
    }

    fn state(hex_str: &str) -> Field {
        fields(hex_str).get(0).unwrap()
    }

    fn sensor_of(type_id: u8) -> Sensor {
        let payload = format!("ff010100000007ff0201000000{type_id:02x}ff030100000002");
        Sensor::from_fields(fields(&payload)).unwrap()
    }

    fn assert_close(value: Option<f64>, want: f64) {
        let value = value.expect("value missing");
        assert!((value - want).abs() < 1e-9, "{value} != {want}");
    }

    #[test]
    fn voltage_scaling() {
        let mut sensor = sensor_of(1);
        assert_eq!(sensor.kind(), SensorKind::Voltage);
        assert_eq!(sensor.unit(), Some("volts"));
        assert_eq!(sensor.volts(), None);
        // 12450 = 0x30a2
        sensor.set_state_field(state("ff0001000030a2"));
        assert_close(sensor.volts(), 12.450);
        assert_close(sensor.snapshot()["volts"].as_f64(), 12.45);
    }

    #[test]
    fn temperature_scaling() {
        let mut sensor = sensor_of(4);
        sensor.set_state_field(state("ff0001000000eb"));
        assert_close(sensor.celsius(), 23.5);
        // a different kind's accessor stays None even with state bound
        assert_eq!(sensor.volts(), None);
    }

    #[test]
    fn atmosphere_scaling() {
        let mut sensor = sensor_of(5);
        // 101325 = 0x18bcd
        sensor.set_state_field(state("ff000100018bcd"));
        assert_close(sensor.millibars(), 1013.25);
    }

    #[test]
    fn resistance_is_raw_ohms() {
        let mut sensor = sensor_of(7);
        sensor.set_state_field(state("ff0001000001dd"));
        assert_close(sensor.ohms(), 477.0);
        assert_eq!(sensor.state_raw(), Some(0x1DD));
    }

    #[test]
    fn negative_temperature() {
        let mut sensor = sensor_of(4);
        // -125 = 0xffffff83 -> -12.5 degrees
        sensor.set_state_field(state("ff0001ffffff83"));
        assert_close(sensor.celsius(), -12.5);
    }

    #[test]
    fn timestamp_sensor_state_type() {
        let payload = "ff010100000007ff02010000000aff030100000000ff040100000002";
        let mut sensor = Sensor::from_fields(fields(payload)).unwrap();
        assert_eq!(sensor.kind(), SensorKind::Timestamp);
        assert_eq!(sensor.state_type(), Some(TimestampStateType::BootTime));
        sensor.set_state_field(state("ff0001691c8a3c"));
        assert_eq!(sensor.unix_timestamp(), Some(0x691C_8A3C));
        assert!(sensor.datetime().is_some());
    }

    #[test]
    fn unknown_type_id_falls_back_to_base() {
        let sensor = sensor_of(0x2B);
        assert_eq!(sensor.kind(), SensorKind::Unknown(0x2B));
        assert_eq!(sensor.type_name(), "unknown");
        assert_eq!(sensor.unit(), None);
    }

    #[test]
    fn snapshot_carries_identity_and_state() {
        let mut sensor = sensor_of(2);
        sensor.set_state_field(state("ff0001fffffc16"));
        let snap = sensor.snapshot();
        assert_eq!(snap["id"], 7);
        assert_eq!(snap["type"], "current");
        assert_eq!(snap["device_id"], 2);
        assert_eq!(snap["unit"], "amps");
        assert_close(snap["amps"].as_f64(), -10.02);
        assert_eq!(snap["state_field"], json!(-1002));
    }
}
