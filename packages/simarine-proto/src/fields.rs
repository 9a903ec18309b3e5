//! TLV field cursor over a message payload.
//!
//! Fields are zero-copy views into the payload `Bytes`; random access runs
//! one linear scan that materializes an id-to-field map (last writer wins on
//! duplicate ids), after which lookups are O(log n). Decoded text and time
//! series samples are the only copies ever made.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use bytes::Bytes;

use crate::error::ProtocolError;
use crate::MARKER;

// ── Field types ───────────────────────────────────────────────────────────────

/// Wire encodings a field value can use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageFieldType {
    /// 4-byte signed integer. Field length 7.
    Int,
    /// 4-byte timestamp, marker, 4-byte signed integer. Field length 12.
    TimestampedInt,
    /// 4-byte timestamp, marker, UTF-8 bytes, zero terminator. Variable.
    TimestampedText,
    /// Two 4-byte timestamps and a counted run of marker-separated u16
    /// pairs; carries the 72-hour pressure history. Length `14 + 5*count`.
    Timeseries,
}

impl MessageFieldType {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(Self::Int),
            0x03 => Some(Self::TimestampedInt),
            0x04 => Some(Self::TimestampedText),
            0x0B => Some(Self::Timeseries),
            _ => None,
        }
    }

    pub fn byte(self) -> u8 {
        match self {
            Self::Int => 0x01,
            Self::TimestampedInt => 0x03,
            Self::TimestampedText => 0x04,
            Self::Timeseries => 0x0B,
        }
    }
}

/// Decoded value of a field, shaped by its wire type.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Int(i32),
    Text(String),
    Series(Vec<u16>),
}

// ── Field view ────────────────────────────────────────────────────────────────

/// One parsed field: a validated window into the payload.
#[derive(Debug, Clone)]
pub struct Field {
    data: Bytes,
    offset: usize,
    length: usize,
    id: u8,
    field_type: MessageFieldType,
}

impl Field {
    /// Parse the field starting at `offset`. Validates the lead-in marker and
    /// computes the field length from its type.
    pub(crate) fn parse(data: &Bytes, offset: usize) -> Result<Field, ProtocolError> {
        let malformed = |reason| ProtocolError::MalformedField { offset, reason };

        if offset + 3 > data.len() {
            return Err(malformed("truncated field header"));
        }
        if data[offset] != MARKER {
            return Err(malformed("missing field marker"));
        }
        let id = data[offset + 1];
        let field_type = MessageFieldType::from_byte(data[offset + 2])
            .ok_or_else(|| malformed("unknown field type"))?;

        let length = match field_type {
            MessageFieldType::Int => 7,
            MessageFieldType::TimestampedInt => 12,
            MessageFieldType::TimestampedText => {
                // text starts past marker+id+type, timestamp and inner marker
                let text_start = offset + 8;
                if text_start > data.len() {
                    return Err(malformed("truncated text field"));
                }
                let zero = data[text_start..]
                    .iter()
                    .position(|&b| b == 0x00)
                    .ok_or_else(|| malformed("unterminated text field"))?;
                text_start + zero + 1 - offset
            }
            MessageFieldType::Timeseries => {
                if offset + 14 > data.len() {
                    return Err(malformed("truncated time series header"));
                }
                let count = data[offset + 13] as usize;
                let length = 14 + 5 * count;
                if offset + length > data.len() {
                    return Err(malformed("truncated time series"));
                }
                // the byte after the last block is either the next field's
                // marker or the checksum marker region
                if let Some(&next) = data.get(offset + length) {
                    if next != MARKER {
                        return Err(malformed("time series not closed by marker"));
                    }
                }
                length
            }
        };

        if offset + length > data.len() {
            return Err(malformed("field overruns payload"));
        }

        Ok(Field {
            data: data.clone(),
            offset,
            length,
            id,
            field_type,
        })
    }

    pub fn id(&self) -> u8 {
        self.id
    }

    pub fn field_type(&self) -> MessageFieldType {
        self.field_type
    }

    /// Total encoded length, marker included.
    pub fn length(&self) -> usize {
        self.length
    }

    fn value_bytes(&self) -> &[u8] {
        let d = &self.data[..];
        match self.field_type {
            MessageFieldType::Int => &d[self.offset + 3..self.offset + 7],
            MessageFieldType::TimestampedInt => &d[self.offset + 8..self.offset + 12],
            MessageFieldType::TimestampedText => {
                &d[self.offset + 8..self.offset + self.length - 1]
            }
            // expose the newest sample pair so consumers have a cheap
            // stability key for repeated broadcasts
            MessageFieldType::Timeseries => {
                if self.sample_count() == 0 {
                    &[]
                } else {
                    &d[self.offset + 15..self.offset + 19]
                }
            }
        }
    }

    fn be4(&self) -> [u8; 4] {
        let v = self.value_bytes();
        let n = v.len().min(4);
        let mut out = [0u8; 4];
        out[4 - n..].copy_from_slice(&v[..n]);
        out
    }

    fn be2(&self, at: usize) -> [u8; 2] {
        let v = self.value_bytes();
        let mut out = [0u8; 2];
        for (i, slot) in out.iter_mut().enumerate() {
            *slot = v.get(at + i).copied().unwrap_or(0);
        }
        out
    }

    pub fn int32(&self) -> i32 {
        i32::from_be_bytes(self.be4())
    }

    pub fn uint32(&self) -> u32 {
        u32::from_be_bytes(self.be4())
    }

    pub fn int16_hi(&self) -> i16 {
        i16::from_be_bytes(self.be2(0))
    }

    pub fn int16_lo(&self) -> i16 {
        i16::from_be_bytes(self.be2(2))
    }

    pub fn uint16_hi(&self) -> u16 {
        u16::from_be_bytes(self.be2(0))
    }

    pub fn uint16_lo(&self) -> u16 {
        u16::from_be_bytes(self.be2(2))
    }

    /// Leading timestamp, on every variant that carries one.
    pub fn timestamp(&self) -> Option<u32> {
        match self.field_type {
            MessageFieldType::Int => None,
            _ => {
                let d = &self.data[..];
                Some(u32::from_be_bytes([
                    d[self.offset + 3],
                    d[self.offset + 4],
                    d[self.offset + 5],
                    d[self.offset + 6],
                ]))
            }
        }
    }

    /// Second timestamp of a time series (duplicate or window end).
    pub fn end_timestamp(&self) -> Option<u32> {
        match self.field_type {
            MessageFieldType::Timeseries => {
                let d = &self.data[..];
                Some(u32::from_be_bytes([
                    d[self.offset + 8],
                    d[self.offset + 9],
                    d[self.offset + 10],
                    d[self.offset + 11],
                ]))
            }
            _ => None,
        }
    }

    /// Decoded text, `TimestampedText` only. Invalid UTF-8 is replaced, not
    /// rejected (controller names are operator input).
    pub fn text(&self) -> Option<String> {
        match self.field_type {
            MessageFieldType::TimestampedText => {
                Some(String::from_utf8_lossy(self.value_bytes()).into_owned())
            }
            _ => None,
        }
    }

    fn sample_count(&self) -> usize {
        match self.field_type {
            MessageFieldType::Timeseries => self.data[self.offset + 13] as usize,
            _ => 0,
        }
    }

    /// Samples of a time series in emission order (newest first, two u16 per
    /// block).
    pub fn timeseries(&self) -> Option<Vec<u16>> {
        if self.field_type != MessageFieldType::Timeseries {
            return None;
        }
        let d = &self.data[..];
        let mut out = Vec::with_capacity(self.sample_count() * 2);
        for block in 0..self.sample_count() {
            let at = self.offset + 14 + 5 * block;
            out.push(u16::from_be_bytes([d[at + 1], d[at + 2]]));
            out.push(u16::from_be_bytes([d[at + 3], d[at + 4]]));
        }
        Some(out)
    }

    /// Polymorphic value: text, sample series, or signed integer.
    pub fn value(&self) -> FieldValue {
        match self.field_type {
            MessageFieldType::TimestampedText => {
                FieldValue::Text(self.text().unwrap_or_default())
            }
            MessageFieldType::Timeseries => {
                FieldValue::Series(self.timeseries().unwrap_or_default())
            }
            _ => FieldValue::Int(self.int32()),
        }
    }
}

// ── Cursor ────────────────────────────────────────────────────────────────────

/// Lazy cursor over the fields of one payload.
#[derive(Debug, Clone)]
pub struct MessageFields {
    data: Bytes,
    index: OnceLock<Result<BTreeMap<u8, Field>, ProtocolError>>,
}

impl MessageFields {
    pub fn new(data: Bytes) -> Self {
        MessageFields {
            data,
            index: OnceLock::new(),
        }
    }

    /// Forward iteration over the raw field sequence, duplicates included.
    pub fn iter(&self) -> FieldIter {
        FieldIter {
            data: self.data.clone(),
            pos: 0,
            failed: false,
        }
    }

    fn indexed(&self) -> &Result<BTreeMap<u8, Field>, ProtocolError> {
        self.index.get_or_init(|| {
            let mut map = BTreeMap::new();
            for field in self.iter() {
                let field = field?;
                map.insert(field.id(), field);
            }
            Ok(map)
        })
    }

    /// Walk the whole payload once, surfacing any malformed field.
    pub fn ensure_indexed(&self) -> Result<(), ProtocolError> {
        match self.indexed() {
            Ok(_) => Ok(()),
            Err(e) => Err(e.clone()),
        }
    }

    /// Indexed lookup; `None` for absent ids (and for anything past a
    /// malformed region — call [`ensure_indexed`](Self::ensure_indexed)
    /// first to distinguish).
    pub fn get(&self, id: u8) -> Option<Field> {
        self.indexed().as_ref().ok()?.get(&id).cloned()
    }

    /// Full id-to-field map, last writer wins.
    pub fn as_map(&self) -> Result<&BTreeMap<u8, Field>, ProtocolError> {
        match self.indexed() {
            Ok(map) => Ok(map),
            Err(e) => Err(e.clone()),
        }
    }

    /// Underlying payload bytes.
    pub fn payload(&self) -> &Bytes {
        &self.data
    }
}

impl<'a> IntoIterator for &'a MessageFields {
    type Item = Result<Field, ProtocolError>;
    type IntoIter = FieldIter;

    fn into_iter(self) -> FieldIter {
        self.iter()
    }
}

/// Iterator yielding parsed field views in payload order. Stops cleanly when
/// fewer bytes than a field prefix remain (the pressure-history broadcast
/// leaves a single trailing marker), or after the first malformed field.
pub struct FieldIter {
    data: Bytes,
    pos: usize,
    failed: bool,
}

impl Iterator for FieldIter {
    type Item = Result<Field, ProtocolError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.pos + 3 > self.data.len() {
            return None;
        }
        match Field::parse(&self.data, self.pos) {
            Ok(field) => {
                self.pos += field.length();
                Some(Ok(field))
            }
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(hex_str: &str) -> MessageFields {
        MessageFields::new(Bytes::from(hex::decode(hex_str).unwrap()))
    }

    #[test]
    fn int_field() {
        let fs = fields("ff010100000013");
        let f = fs.get(1).unwrap();
        assert_eq!(f.field_type(), MessageFieldType::Int);
        assert_eq!(f.length(), 7);
        assert_eq!(f.int32(), 0x13);
        assert_eq!(f.timestamp(), None);
        assert_eq!(f.value(), FieldValue::Int(0x13));
    }

    #[test]
    fn timestamped_int_field() {
        let fs = fields("ff010365932547ff00000001");
        let f = fs.get(1).unwrap();
        assert_eq!(f.field_type(), MessageFieldType::TimestampedInt);
        assert_eq!(f.length(), 12);
        assert_eq!(f.timestamp(), Some(0x6593_2547));
        assert_eq!(f.int32(), 1);
    }

    #[test]
    fn timestamped_text_field() {
        let fs = fields("ff030465932547ff5343353033205b313736355d203100");
        let f = fs.get(3).unwrap();
        assert_eq!(f.field_type(), MessageFieldType::TimestampedText);
        assert_eq!(f.length(), 23);
        assert_eq!(f.timestamp(), Some(0x6593_2547));
        assert_eq!(f.text().as_deref(), Some("SC503 [1765] 1"));
        assert_eq!(f.value(), FieldValue::Text("SC503 [1765] 1".into()));
    }

    #[test]
    fn text_terminator_is_single_zero_before_next_marker() {
        // "A\0" directly followed by another INT field
        let fs = fields("ff030465932547ff4100ff050100000002");
        let text = fs.get(3).unwrap();
        assert_eq!(text.text().as_deref(), Some("A"));
        assert_eq!(text.length(), 10);
        assert_eq!(fs.get(5).unwrap().int32(), 2);
    }

    #[test]
    fn unterminated_text_is_malformed() {
        let fs = fields("ff030465932547ff414141");
        let err = fs.ensure_indexed().unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::MalformedField {
                reason: "unterminated text field",
                ..
            }
        ));
        assert!(fs.get(3).is_none());
    }

    fn history_payload(count: u8) -> Vec<u8> {
        let mut payload = hex::decode("ff000b691c89f0ff691c89f0ff").unwrap();
        payload.push(count);
        for i in 0..count as u16 {
            payload.push(0xFF);
            let hi = 0x560B_u16.wrapping_sub(i);
            let lo = 0x560A_u16.wrapping_sub(i);
            payload.extend_from_slice(&hi.to_be_bytes());
            payload.extend_from_slice(&lo.to_be_bytes());
        }
        // checksum-marker region spills one FF into the payload tail
        payload.push(0xFF);
        payload
    }

    #[test]
    fn timeseries_field() {
        let fs = MessageFields::new(Bytes::from(history_payload(225)));
        let f = fs.get(0).unwrap();
        assert_eq!(f.field_type(), MessageFieldType::Timeseries);
        assert_eq!(f.length(), 14 + 5 * 225);
        assert_eq!(f.timestamp(), Some(0x691C_89F0));
        assert_eq!(f.end_timestamp(), Some(0x691C_89F0));
        let series = f.timeseries().unwrap();
        assert_eq!(series.len(), 450);
        assert_eq!((series[0], series[1]), (0x560B, 0x560A));
        assert_eq!(f.uint16_hi(), 0x560B);
        assert_eq!(f.uint16_lo(), 0x560A);
        assert_eq!(f.value(), FieldValue::Series(series));
    }

    #[test]
    fn timeseries_iteration_absorbs_trailing_marker() {
        let fs = MessageFields::new(Bytes::from(history_payload(3)));
        let parsed: Vec<_> = fs.iter().collect();
        assert_eq!(parsed.len(), 1);
        assert!(parsed[0].is_ok());
    }

    #[test]
    fn timeseries_with_misplaced_terminal_marker_is_malformed() {
        let mut payload = history_payload(3);
        let tail = payload.len() - 1;
        payload[tail] = 0x00;
        let fs = MessageFields::new(Bytes::from(payload));
        assert!(matches!(
            fs.ensure_indexed().unwrap_err(),
            ProtocolError::MalformedField {
                reason: "time series not closed by marker",
                ..
            }
        ));
    }

    #[test]
    fn system_info_response_payload_walk() {
        let fs = fields("ff010184b3ee93ff020100010015");
        let parsed: Vec<_> = fs.iter().map(|f| f.unwrap()).collect();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].id(), 1);
        assert_eq!(parsed[0].uint32(), 0x84B3_EE93);
        assert_eq!(parsed[1].id(), 2);
        assert_eq!(parsed[1].int16_hi(), 1);
        assert_eq!(parsed[1].int16_lo(), 21);
    }

    #[test]
    fn duplicate_ids_last_writer_wins() {
        let fs = fields("ff010100000001ff010100000002");
        assert_eq!(fs.get(1).unwrap().int32(), 2);
        // iteration still yields both occurrences
        assert_eq!(fs.iter().count(), 2);
    }

    #[test]
    fn empty_payload_yields_nothing() {
        let fs = fields("");
        assert_eq!(fs.iter().count(), 0);
        assert!(fs.get(0).is_none());
        assert!(fs.ensure_indexed().is_ok());
    }

    #[test]
    fn negative_state_values_decode_signed() {
        // fffffc16 = -1002
        let fs = fields("ff0201fffffc16");
        let f = fs.get(2).unwrap();
        assert_eq!(f.int32(), -1002);
        assert_eq!(f.uint32(), 0xFFFF_FC16);
    }
}
