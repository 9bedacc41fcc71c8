// Copyright (c) esphome-native-api-rs contributors
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Minimal protobuf field reader/writer for the ESPHome Native API messages.
//!
//! The protobuf schema itself is treated as a fixed external contract:
//! rather than generating full message types from `.proto` files, each message in
//! [`crate::wire::messages`] reads and writes its own known fields directly
//! against this wire-level helper, in the same shape as a hand-rolled
//! `ProtoFields`/`encode_*_field` reader-writer pair, generalized to
//! propagate malformed-input errors instead of silently truncating, and
//! to an `IndexMap` so repeated fields keep their wire order.
use indexmap::IndexMap;

use crate::error::CodecError;
use crate::varint::{decode_varint, encode_varint};

/// Protobuf wire types this client needs to speak. ESPHome's schema never
/// uses fixed64/sfixed64 groups, so only varint/length-delimited/fixed32
/// are implemented.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WireType {
    Varint,
    Fixed64,
    LengthDelimited,
    Fixed32,
}

impl WireType {
    fn from_tag_byte(tag: u64) -> Result<Self, CodecError> {
        match tag & 0x7 {
            0 => Ok(Self::Varint),
            1 => Ok(Self::Fixed64),
            2 => Ok(Self::LengthDelimited),
            5 => Ok(Self::Fixed32),
            _ => Err(CodecError::MalformedVarint),
        }
    }

    fn as_tag_bits(self) -> u64 {
        match self {
            Self::Varint => 0,
            Self::Fixed64 => 1,
            Self::LengthDelimited => 2,
            Self::Fixed32 => 5,
        }
    }
}

fn tag(field: u32, wire_type: WireType) -> Vec<u8> {
    encode_varint(((field as u64) << 3) | wire_type.as_tag_bits())
}

/// A decoded field value, still typed by wire shape rather than by
/// message-specific semantics (that mapping lives in `messages.rs`).
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Varint(u64),
    Fixed64(u64),
    Bytes(Vec<u8>),
    Fixed32(u32),
}

/// Every field present in a decoded message, keyed by field number, in the
/// order they were read off the wire. Protobuf allows repeated fields and
/// out-of-order field numbers, so each key maps to a `Vec`.
#[derive(Debug, Clone, Default)]
pub struct ProtoFields {
    fields: IndexMap<u32, Vec<FieldValue>>,
}

impl ProtoFields {
    pub fn decode(data: &[u8]) -> Result<Self, CodecError> {
        let mut fields: IndexMap<u32, Vec<FieldValue>> = IndexMap::new();
        let mut pos = 0usize;

        while pos < data.len() {
            let (raw_tag, tag_len) = decode_varint(data, pos)?.ok_or(CodecError::MalformedVarint)?;
            pos += tag_len;
            let field_number = (raw_tag >> 3) as u32;
            let wire_type = WireType::from_tag_byte(raw_tag)?;

            let value = match wire_type {
                WireType::Varint => {
                    let (v, len) = decode_varint(data, pos)?.ok_or(CodecError::MalformedVarint)?;
                    pos += len;
                    FieldValue::Varint(v)
                }
                WireType::Fixed64 => {
                    let bytes = data.get(pos..pos + 8).ok_or(CodecError::MalformedVarint)?;
                    pos += 8;
                    FieldValue::Fixed64(u64::from_le_bytes(bytes.try_into().unwrap()))
                }
                WireType::LengthDelimited => {
                    let (len, len_size) = decode_varint(data, pos)?.ok_or(CodecError::MalformedVarint)?;
                    pos += len_size;
                    let bytes = data.get(pos..pos + len as usize).ok_or(CodecError::MalformedVarint)?;
                    pos += len as usize;
                    FieldValue::Bytes(bytes.to_vec())
                }
                WireType::Fixed32 => {
                    let bytes = data.get(pos..pos + 4).ok_or(CodecError::MalformedVarint)?;
                    pos += 4;
                    FieldValue::Fixed32(u32::from_le_bytes(bytes.try_into().unwrap()))
                }
            };

            fields.entry(field_number).or_default().push(value);
        }

        Ok(Self { fields })
    }

    fn first(&self, field: u32) -> Option<&FieldValue> {
        self.fields.get(&field).and_then(|v| v.first())
    }

    pub fn get_uint32(&self, field: u32) -> u32 {
        match self.first(field) {
            Some(FieldValue::Varint(v)) => *v as u32,
            _ => 0,
        }
    }

    pub fn get_uint64(&self, field: u32) -> u64 {
        match self.first(field) {
            Some(FieldValue::Varint(v)) => *v,
            _ => 0,
        }
    }

    pub fn get_bool(&self, field: u32) -> bool {
        self.get_uint32(field) != 0
    }

    /// Protobuf's `enum` fields decode onto the wire exactly like varints.
    pub fn get_enum(&self, field: u32) -> u32 {
        self.get_uint32(field)
    }

    pub fn get_string(&self, field: u32) -> String {
        match self.first(field) {
            Some(FieldValue::Bytes(b)) => String::from_utf8_lossy(b).into_owned(),
            _ => String::new(),
        }
    }

    pub fn get_bytes(&self, field: u32) -> Vec<u8> {
        match self.first(field) {
            Some(FieldValue::Bytes(b)) => b.clone(),
            _ => Vec::new(),
        }
    }

    pub fn get_float(&self, field: u32) -> f32 {
        match self.first(field) {
            Some(FieldValue::Fixed32(v)) => f32::from_bits(*v),
            _ => 0.0,
        }
    }

    /// A `fixed32` field read as a raw unsigned integer, distinct from
    /// `get_float`'s bit-reinterpretation of the same wire shape.
    pub fn get_fixed32(&self, field: u32) -> u32 {
        match self.first(field) {
            Some(FieldValue::Fixed32(v)) => *v,
            _ => 0,
        }
    }

    /// All occurrences of a repeated varint field, in wire order.
    pub fn get_repeated_uint32(&self, field: u32) -> Vec<u32> {
        self.fields
            .get(&field)
            .map(|values| values.iter().filter_map(|v| match v { FieldValue::Varint(v) => Some(*v as u32), _ => None }).collect())
            .unwrap_or_default()
    }
}

/// Appends fields to a protobuf message buffer. ESPHome (like proto3 in
/// general) omits fields at their zero value, so each writer checks for
/// the default before emitting anything.
#[derive(Debug, Default)]
pub struct ProtoWriter {
    buf: Vec<u8>,
}

impl ProtoWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_string(&mut self, field: u32, value: &str) -> &mut Self {
        if value.is_empty() {
            return self;
        }
        self.buf.extend(tag(field, WireType::LengthDelimited));
        self.buf.extend(encode_varint(value.len() as u64));
        self.buf.extend_from_slice(value.as_bytes());
        self
    }

    pub fn write_bytes(&mut self, field: u32, value: &[u8]) -> &mut Self {
        if value.is_empty() {
            return self;
        }
        self.buf.extend(tag(field, WireType::LengthDelimited));
        self.buf.extend(encode_varint(value.len() as u64));
        self.buf.extend_from_slice(value);
        self
    }

    pub fn write_uint32(&mut self, field: u32, value: u32) -> &mut Self {
        if value == 0 {
            return self;
        }
        self.buf.extend(tag(field, WireType::Varint));
        self.buf.extend(encode_varint(value as u64));
        self
    }

    pub fn write_uint64(&mut self, field: u32, value: u64) -> &mut Self {
        if value == 0 {
            return self;
        }
        self.buf.extend(tag(field, WireType::Varint));
        self.buf.extend(encode_varint(value));
        self
    }

    pub fn write_bool(&mut self, field: u32, value: bool) -> &mut Self {
        if !value {
            return self;
        }
        self.buf.extend(tag(field, WireType::Varint));
        self.buf.extend(encode_varint(1));
        self
    }

    pub fn write_enum(&mut self, field: u32, value: u32) -> &mut Self {
        self.write_uint32(field, value)
    }

    pub fn write_float(&mut self, field: u32, value: f32) -> &mut Self {
        if value == 0.0 {
            return self;
        }
        self.buf.extend(tag(field, WireType::Fixed32));
        self.buf.extend_from_slice(&value.to_bits().to_le_bytes());
        self
    }

    /// Writes a `fixed32` field (e.g. `GetTimeResponse.epoch_seconds`), not
    /// to be confused with `write_uint32`'s varint encoding of the same Rust
    /// type.
    pub fn write_fixed32(&mut self, field: u32, value: u32) -> &mut Self {
        if value == 0 {
            return self;
        }
        self.buf.extend(tag(field, WireType::Fixed32));
        self.buf.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_field_round_trips() {
        let mut w = ProtoWriter::new();
        w.write_string(1, "kitchen-light");
        let fields = ProtoFields::decode(&w.finish()).unwrap();
        assert_eq!(fields.get_string(1), "kitchen-light");
    }

    #[test]
    fn zero_values_are_omitted_per_proto3_semantics() {
        let mut w = ProtoWriter::new();
        w.write_uint32(1, 0).write_bool(2, false).write_string(3, "");
        assert!(w.finish().is_empty());
    }

    #[test]
    fn mixed_field_message_round_trips() {
        let mut w = ProtoWriter::new();
        w.write_uint32(1, 42).write_string(2, "sensor.temp").write_bool(3, true).write_float(4, 21.5);
        let fields = ProtoFields::decode(&w.finish()).unwrap();
        assert_eq!(fields.get_uint32(1), 42);
        assert_eq!(fields.get_string(2), "sensor.temp");
        assert!(fields.get_bool(3));
        assert!((fields.get_float(4) - 21.5).abs() < f32::EPSILON);
    }

    #[test]
    fn repeated_varint_fields_preserve_order() {
        let mut buf = Vec::new();
        for v in [3u32, 1, 4, 1, 5] {
            let mut w = ProtoWriter::new();
            w.write_uint32(9, v);
            buf.extend(w.finish());
        }
        let fields = ProtoFields::decode(&buf).unwrap();
        assert_eq!(fields.get_repeated_uint32(9), vec![3, 1, 4, 1, 5]);
    }

    #[test]
    fn truncated_length_delimited_field_is_malformed() {
        let mut buf = tag(1, WireType::LengthDelimited);
        buf.extend(encode_varint(10));
        buf.extend_from_slice(b"short");
        assert!(ProtoFields::decode(&buf).is_err());
    }

    #[test]
    fn unknown_fields_are_skipped_without_error() {
        let mut w = ProtoWriter::new();
        w.write_uint32(99, 7).write_string(1, "known");
        let fields = ProtoFields::decode(&w.finish()).unwrap();
        assert_eq!(fields.get_string(1), "known");
        assert_eq!(fields.get_uint32(50), 0);
    }
}
