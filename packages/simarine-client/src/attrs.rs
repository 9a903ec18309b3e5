//! Attribute descriptors over a shared field container.
//!
//! Each typed device/sensor variant declares a static table of
//! `(attribute name, field id, read kind, rendering)` entries consulted at
//! access time. This keeps per-variant mappings declarative: the snapshot
//! and observer layers walk the table, typed accessors read the same fields
//! directly.

use chrono::{Local, TimeZone};
use serde_json::{json, Value};
use simarine_proto::{Field, FieldValue, MessageFields};

/// Where an attribute reads from.
#[derive(Debug, Clone, Copy)]
pub enum ReadKind {
    /// The field's polymorphic value.
    Value,
    /// The field's leading timestamp, rendered as civil time.
    Timestamp,
    /// The sensor's rebindable state field.
    State,
}

/// How a raw integer value is presented.
#[derive(Debug, Clone, Copy)]
pub enum Render {
    Raw,
    Scaled(f64),
    /// Catalogue decode; unknown values become `UNKNOWN_<n>`.
    Enum(fn(i64) -> String),
    /// Unix seconds to civil time.
    CivilTime,
}

#[derive(Debug, Clone, Copy)]
pub struct AttrSpec {
    pub name: &'static str,
    pub field_id: u8,
    pub read: ReadKind,
    pub render: Render,
}

impl AttrSpec {
    pub const fn value(name: &'static str, field_id: u8) -> Self {
        AttrSpec { name, field_id, read: ReadKind::Value, render: Render::Raw }
    }

    pub const fn scaled(name: &'static str, field_id: u8, scale: f64) -> Self {
        AttrSpec { name, field_id, read: ReadKind::Value, render: Render::Scaled(scale) }
    }

    pub const fn decoded(name: &'static str, field_id: u8, decode: fn(i64) -> String) -> Self {
        AttrSpec { name, field_id, read: ReadKind::Value, render: Render::Enum(decode) }
    }

    pub const fn timestamp(name: &'static str, field_id: u8) -> Self {
        AttrSpec { name, field_id, read: ReadKind::Timestamp, render: Render::CivilTime }
    }

    pub const fn state(name: &'static str) -> Self {
        AttrSpec { name, field_id: 0, read: ReadKind::State, render: Render::Raw }
    }

    pub const fn scaled_state(name: &'static str, scale: f64) -> Self {
        AttrSpec { name, field_id: 0, read: ReadKind::State, render: Render::Scaled(scale) }
    }

    pub const fn civil_state(name: &'static str) -> Self {
        AttrSpec { name, field_id: 0, read: ReadKind::State, render: Render::CivilTime }
    }

    /// Evaluate against a field set (and the state field for `State` reads).
    /// Absent fields read as null, never as an error.
    pub fn read(&self, fields: &MessageFields, state_field: Option<&Field>) -> Value {
        let field = match self.read {
            ReadKind::Value | ReadKind::Timestamp => fields.get(self.field_id),
            ReadKind::State => state_field.cloned(),
        };
        let Some(field) = field else {
            return Value::Null;
        };

        if matches!(self.read, ReadKind::Timestamp) {
            return civil_time(field.timestamp().map(i64::from));
        }

        match field.value() {
            FieldValue::Text(s) => Value::String(s),
            FieldValue::Series(s) => json!(s),
            FieldValue::Int(v) => match self.render {
                Render::Raw => json!(v),
                Render::Scaled(scale) => json!(v as f64 * scale),
                Render::Enum(decode) => Value::String(decode(v as i64)),
                Render::CivilTime => civil_time(Some(v as i64)),
            },
        }
    }
}

pub(crate) fn civil_time(unix_secs: Option<i64>) -> Value {
    unix_secs
        .and_then(|secs| Local.timestamp_opt(secs, 0).single())
        .map(|dt| Value::String(dt.to_rfc3339()))
        .unwrap_or(Value::Null)
}

/// Normalize one field to a diff-friendly primitive.
pub(crate) fn field_to_value(field: &Field) -> Value {
    match field.value() {
        FieldValue::Int(v) => json!(v),
        FieldValue::Text(s) => Value::String(s),
        FieldValue::Series(s) => json!(s),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn fields(hex_str: &str) -> MessageFields {
        MessageFields::new(Bytes::from(hex::decode(hex_str).unwrap()))
    }

    #[test]
    fn absent_field_reads_null() {
        let fs = fields("ff010100000001");
        assert_eq!(AttrSpec::value("name", 3).read(&fs, None), Value::Null);
    }

    #[test]
    fn scaled_read() {
        // 12450 = 0x30a2
        let fs = fields("ff0501000030a2");
        let value = AttrSpec::scaled("volts", 5, 0.001).read(&fs, None);
        assert!((value.as_f64().unwrap() - 12.45).abs() < 1e-9);
    }

    #[test]
    fn enum_decode_with_catchall() {
        fn decode(n: i64) -> String {
            match n {
                1 => "WATER".into(),
                _ => format!("UNKNOWN_{n}"),
            }
        }
        let fs = fields("ff060100000009");
        assert_eq!(
            AttrSpec::decoded("fluid_type", 6, decode).read(&fs, None),
            Value::String("UNKNOWN_9".into())
        );
    }

    #[test]
    fn state_read_uses_state_field() {
        let fs = fields("ff010100000001");
        let state = fields("ff0001000000eb").get(0).unwrap();
        assert_eq!(
            AttrSpec::scaled_state("celsius", 0.1).read(&fs, Some(&state)),
            json!(23.5)
        );
        assert_eq!(
            AttrSpec::scaled_state("celsius", 0.1).read(&fs, None),
            Value::Null
        );
    }
}
