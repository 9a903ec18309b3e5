//! Typed devices: logical units hosted by the controller.
//!
//! A device is built from a DEVICE_INFO response's field set and keeps that
//! field set as its attribute source. The variant is selected by the type id
//! in field 1; unknown ids fall back to the untyped base.

use chrono::{DateTime, Local, TimeZone};
use serde_json::{Map, Value};
use simarine_proto::{MessageFields, ProtocolError};

use crate::attrs::{civil_time, field_to_value, AttrSpec};

// ── Catalogue enums ───────────────────────────────────────────────────────────
//
// Decoders admit unrecognized numeric variants as UNKNOWN_<n> instead of
// failing: controller firmware grows new codes faster than captures do.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatteryType {
    WetLowMaintenance,
    WetMaintenanceFree,
    Agm,
    DeepCycle,
    Gel,
    Lifepo4,
    Unknown(i64),
}

impl BatteryType {
    pub fn from_value(n: i64) -> Self {
        match n {
            1 => Self::WetLowMaintenance,
            2 => Self::WetMaintenanceFree,
            3 => Self::Agm,
            4 => Self::DeepCycle,
            5 => Self::Gel,
            6 => Self::Lifepo4,
            other => Self::Unknown(other),
        }
    }

    pub fn name(self) -> String {
        match self {
            Self::WetLowMaintenance => "WET_LOW_MAINTENANCE".into(),
            Self::WetMaintenanceFree => "WET_MAINTENANCE_FREE".into(),
            Self::Agm => "AGM".into(),
            Self::DeepCycle => "DEEP_CYCLE".into(),
            Self::Gel => "GEL".into(),
            Self::Lifepo4 => "LIFEPO4".into(),
            Self::Unknown(n) => format!("UNKNOWN_{n}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TankFluidType {
    Water,
    Fuel,
    WasteWater,
    Unknown(i64),
}

impl TankFluidType {
    pub fn from_value(n: i64) -> Self {
        match n {
            1 => Self::Water,
            2 => Self::Fuel,
            3 => Self::WasteWater,
            other => Self::Unknown(other),
        }
    }

    pub fn name(self) -> String {
        match self {
            Self::Water => "WATER".into(),
            Self::Fuel => "FUEL".into(),
            Self::WasteWater => "WASTE_WATER".into(),
            Self::Unknown(n) => format!("UNKNOWN_{n}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThermometerType {
    Ntc10k,
    Ntc5k,
    Ntc1k,
    Vdo,
    Unknown(i64),
}

impl ThermometerType {
    pub fn from_value(n: i64) -> Self {
        match n {
            1 => Self::Ntc10k,
            2 => Self::Ntc5k,
            3 => Self::Ntc1k,
            4 => Self::Vdo,
            other => Self::Unknown(other),
        }
    }

    pub fn name(self) -> String {
        match self {
            Self::Ntc10k => "NTC_10K".into(),
            Self::Ntc5k => "NTC_5K".into(),
            Self::Ntc1k => "NTC_1K".into(),
            Self::Vdo => "VDO".into(),
            Self::Unknown(n) => format!("UNKNOWN_{n}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InclinometerAxis {
    Pitch,
    Roll,
    Unknown(i64),
}

impl InclinometerAxis {
    pub fn from_value(n: i64) -> Self {
        match n {
            1 => Self::Pitch,
            2 => Self::Roll,
            other => Self::Unknown(other),
        }
    }

    pub fn name(self) -> String {
        match self {
            Self::Pitch => "PITCH".into(),
            Self::Roll => "ROLL".into(),
            Self::Unknown(n) => format!("UNKNOWN_{n}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InclinometerDisplayType {
    Line,
    Caravan,
    Unknown(i64),
}

impl InclinometerDisplayType {
    pub fn from_value(n: i64) -> Self {
        match n {
            1 => Self::Line,
            2 => Self::Caravan,
            other => Self::Unknown(other),
        }
    }

    pub fn name(self) -> String {
        match self {
            Self::Line => "LINE".into(),
            Self::Caravan => "CARAVAN".into(),
            Self::Unknown(n) => format!("UNKNOWN_{n}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnOff {
    On,
    Off,
    Unknown(i64),
}

impl OnOff {
    pub fn from_value(n: i64) -> Self {
        match n {
            1 => Self::On,
            2 => Self::Off,
            other => Self::Unknown(other),
        }
    }

    pub fn name(self) -> String {
        match self {
            Self::On => "ON".into(),
            Self::Off => "OFF".into(),
            Self::Unknown(n) => format!("UNKNOWN_{n}"),
        }
    }
}

fn battery_type_name(n: i64) -> String {
    BatteryType::from_value(n).name()
}

fn fluid_type_name(n: i64) -> String {
    TankFluidType::from_value(n).name()
}

fn ntc_type_name(n: i64) -> String {
    ThermometerType::from_value(n).name()
}

fn axis_name(n: i64) -> String {
    InclinometerAxis::from_value(n).name()
}

fn display_type_name(n: i64) -> String {
    InclinometerDisplayType::from_value(n).name()
}

fn on_off_name(n: i64) -> String {
    OnOff::from_value(n).name()
}

// ── Device kinds ──────────────────────────────────────────────────────────────

/// Device variant, selected by the type id in field 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    Null,
    Voltmeter,
    Ammeter,
    Thermometer,
    Barometer,
    Ohmmeter,
    Clock,
    Tank,
    Battery,
    System,
    Inclinometer,
    Unknown(i32),
}

impl DeviceKind {
    pub fn from_type_id(type_id: Option<i32>) -> Self {
        match type_id {
            Some(0) => Self::Null,
            Some(1) => Self::Voltmeter,
            Some(2) => Self::Ammeter,
            Some(3) => Self::Thermometer,
            Some(5) => Self::Barometer,
            Some(6) => Self::Ohmmeter,
            Some(7) => Self::Clock,
            Some(8) => Self::Tank,
            Some(9) => Self::Battery,
            Some(10) => Self::System,
            Some(13) => Self::Inclinometer,
            Some(other) => Self::Unknown(other),
            None => Self::Unknown(-1),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Voltmeter => "voltmeter",
            Self::Ammeter => "ammeter",
            Self::Thermometer => "thermometer",
            Self::Barometer => "barometer",
            Self::Ohmmeter => "ohmmeter",
            Self::Clock => "clock",
            Self::Tank => "tank",
            Self::Battery => "battery",
            Self::System => "system",
            Self::Inclinometer => "inclinometer",
            Self::Unknown(_) => "unknown",
        }
    }
}

// per-variant descriptor tables, consulted at access time

static VOLTMETER_ATTRS: &[AttrSpec] = &[
    AttrSpec::timestamp("parent_device_id_updated", 6),
    AttrSpec::value("parent_device_id", 6), // 255 == unassigned
];

static THERMOMETER_ATTRS: &[AttrSpec] = &[
    AttrSpec::timestamp("ntc_type_updated", 6),
    AttrSpec::decoded("ntc_type", 6, ntc_type_name),
    AttrSpec::timestamp("priority_updated", 9),
    AttrSpec::value("priority", 9),
];

static BAROMETER_ATTRS: &[AttrSpec] = &[
    AttrSpec::timestamp("altitude_updated", 6),
    AttrSpec::value("altitude", 6),
];

static OHMMETER_ATTRS: &[AttrSpec] = &[
    AttrSpec::timestamp("parent_device_id_updated", 7),
    AttrSpec::value("parent_device_id", 7), // 255 == unassigned
];

static TANK_ATTRS: &[AttrSpec] = &[
    AttrSpec::timestamp("fluid_type_updated", 6),
    AttrSpec::decoded("fluid_type", 6, fluid_type_name),
    AttrSpec::timestamp("capacity_updated", 7),
    AttrSpec::scaled("capacity", 7, 0.1),
];

static BATTERY_ATTRS: &[AttrSpec] = &[
    AttrSpec::value("voltmeter_device_id", 4),
    AttrSpec::timestamp("capacity_c20_updated", 5),
    AttrSpec::scaled("capacity_c20", 5, 0.01),
    AttrSpec::timestamp("capacity_c10_updated", 6),
    AttrSpec::scaled("capacity_c10", 6, 0.01),
    AttrSpec::timestamp("capacity_c5_updated", 7),
    AttrSpec::scaled("capacity_c5", 7, 0.01),
    AttrSpec::timestamp("battery_type_updated", 8),
    AttrSpec::decoded("battery_type", 8, battery_type_name),
    AttrSpec::timestamp("temperature_device_id_updated", 10),
    AttrSpec::value("temperature_device_id", 10),
];

static SYSTEM_ATTRS: &[AttrSpec] = &[
    AttrSpec::value("serial_number", 3),
    AttrSpec::timestamp("system_datetime", 9),
    AttrSpec::value("wifi_ssid", 10),
    AttrSpec::value("tcp_port", 12),
    AttrSpec::value("udp_port", 14),
    AttrSpec::value("wifi_pass", 15),
];

static INCLINOMETER_ATTRS: &[AttrSpec] = &[
    AttrSpec::timestamp("axis_updated", 3),
    AttrSpec::decoded("axis", 3, axis_name),
    AttrSpec::timestamp("nonlinear_updated", 6),
    AttrSpec::decoded("nonlinear", 6, on_off_name),
    AttrSpec::timestamp("display_type_updated", 7),
    AttrSpec::decoded("display_type", 7, display_type_name),
    AttrSpec::timestamp("reverse_updated", 9),
    AttrSpec::decoded("reverse", 9, on_off_name),
    AttrSpec::timestamp("display_updated", 10),
    AttrSpec::decoded("display", 10, on_off_name),
];

// ── Device ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Device {
    fields: MessageFields,
    kind: DeviceKind,
}

impl Device {
    /// Build the typed view over a DEVICE_INFO response's fields. Walks the
    /// field set once so later descriptor reads cannot trip over a malformed
    /// payload.
    pub fn from_fields(fields: MessageFields) -> Result<Device, ProtocolError> {
        fields.ensure_indexed()?;
        let kind = DeviceKind::from_type_id(fields.get(1).map(|f| f.int32()));
        Ok(Device { fields, kind })
    }

    pub fn kind(&self) -> DeviceKind {
        self.kind
    }

    /// Lowercase variant name ("tank", "voltmeter", ...).
    pub fn type_name(&self) -> &'static str {
        self.kind.name()
    }

    pub fn fields(&self) -> &MessageFields {
        &self.fields
    }

    pub fn id(&self) -> Option<i32> {
        self.fields.get(0).map(|f| f.int32())
    }

    pub fn type_id(&self) -> Option<i32> {
        self.fields.get(1).map(|f| f.int32())
    }

    pub fn created(&self) -> Option<DateTime<Local>> {
        let ts = self.fields.get(1)?.timestamp()?;
        Local.timestamp_opt(ts as i64, 0).single()
    }

    pub fn name(&self) -> Option<String> {
        self.fields.get(3).and_then(|f| f.text())
    }

    /// Barometer mounting altitude in metres.
    pub fn altitude(&self) -> Option<i32> {
        match self.kind {
            DeviceKind::Barometer => self.fields.get(6).map(|f| f.int32()),
            _ => None,
        }
    }

    /// Tank capacity in litres.
    pub fn capacity(&self) -> Option<f64> {
        match self.kind {
            DeviceKind::Tank => self.fields.get(7).map(|f| f.int32() as f64 * 0.1),
            _ => None,
        }
    }

    /// Battery capacities in amp hours at the C20/C10/C5 discharge rates.
    pub fn capacities(&self) -> Option<(f64, f64, f64)> {
        match self.kind {
            DeviceKind::Battery => {
                let read = |id| self.fields.get(id).map(|f| f.int32() as f64 * 0.01);
                Some((read(5)?, read(6)?, read(7)?))
            }
            _ => None,
        }
    }

    pub fn battery_type(&self) -> Option<BatteryType> {
        match self.kind {
            DeviceKind::Battery => self
                .fields
                .get(8)
                .map(|f| BatteryType::from_value(f.int32() as i64)),
            _ => None,
        }
    }

    pub fn fluid_type(&self) -> Option<TankFluidType> {
        match self.kind {
            DeviceKind::Tank => self
                .fields
                .get(6)
                .map(|f| TankFluidType::from_value(f.int32() as i64)),
            _ => None,
        }
    }

    fn attr_specs(&self) -> &'static [AttrSpec] {
        match self.kind {
            DeviceKind::Voltmeter => VOLTMETER_ATTRS,
            DeviceKind::Thermometer => THERMOMETER_ATTRS,
            DeviceKind::Barometer => BAROMETER_ATTRS,
            DeviceKind::Ohmmeter => OHMMETER_ATTRS,
            DeviceKind::Tank => TANK_ATTRS,
            DeviceKind::Battery => BATTERY_ATTRS,
            DeviceKind::System => SYSTEM_ATTRS,
            DeviceKind::Inclinometer => INCLINOMETER_ATTRS,
            _ => &[],
        }
    }

    /// Nested primitive map of everything this device exposes.
    pub fn snapshot(&self) -> Value {
        let mut out = Map::new();
        out.insert("id".into(), self.id().map(Value::from).unwrap_or(Value::Null));
        out.insert("type".into(), Value::String(self.type_name().into()));
        out.insert(
            "type_id".into(),
            self.type_id().map(Value::from).unwrap_or(Value::Null),
        );
        out.insert(
            "name".into(),
            self.name().map(Value::String).unwrap_or(Value::Null),
        );
        out.insert(
            "created".into(),
            civil_time(self.fields.get(1).and_then(|f| f.timestamp()).map(i64::from)),
        );

        for spec in self.attr_specs() {
            out.insert(spec.name.into(), spec.read(&self.fields, None));
        }

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
