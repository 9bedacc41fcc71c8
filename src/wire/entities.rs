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

//! Entity descriptors and state records. One struct per entity kind the
//! client speaks, plus the `EntityCatalog` that indexes them by their
//! stable numeric key.

use indexmap::IndexMap;

use crate::error::CodecError;
use crate::wire::messages::{message_type, ApiMessage};
use crate::wire::proto::{ProtoFields, ProtoWriter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    BinarySensor,
    Cover,
    Fan,
    Light,
    Sensor,
    Switch,
    TextSensor,
}

/// Fields common to every `ListEntities<Kind>Response` message.
#[derive(Debug, Clone, Default, PartialEq)]
struct EntityCommon {
    object_id: String,
    key: u32,
    name: String,
    unique_id: String,
}

impl EntityCommon {
    fn decode(f: &ProtoFields) -> Self {
        Self { object_id: f.get_string(1), key: f.get_uint32(2), name: f.get_string(3), unique_id: f.get_string(4) }
    }

    fn write(&self, w: &mut ProtoWriter) {
        w.write_string(1, &self.object_id).write_uint32(2, self.key).write_string(3, &self.name).write_string(4, &self.unique_id);
    }
}

/// A catalog entry: the entity's identity plus kind. Variant-specific
/// descriptor fields (device class, unit of measurement, supported speed
/// levels, ...) stay on the kind-specific `ListEntities*Response` structs;
/// the catalog itself only needs enough to route commands and identify
/// entities in events.
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    pub key: u32,
    pub object_id: String,
    pub name: String,
    pub unique_id: String,
    pub kind: EntityKind,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListEntitiesBinarySensorResponse {
    common: EntityCommon,
    pub device_class: String,
    pub is_status_binary_sensor: bool,
}

impl ListEntitiesBinarySensorResponse {
    pub fn to_entity(&self) -> Entity {
        Entity { key: self.common.key, object_id: self.common.object_id.clone(), name: self.common.name.clone(), unique_id: self.common.unique_id.clone(), kind: EntityKind::BinarySensor }
    }
}

impl ApiMessage for ListEntitiesBinarySensorResponse {
    const MESSAGE_TYPE: u32 = message_type::LIST_ENTITIES_BINARY_SENSOR_RESPONSE;

    fn encode(&self) -> Vec<u8> {
        let mut w = ProtoWriter::new();
        self.common.write(&mut w);
        w.write_string(5, &self.device_class).write_bool(6, self.is_status_binary_sensor);
        w.finish()
    }

    fn decode(payload: &[u8]) -> Result<Self, CodecError> {
        let f = ProtoFields::decode(payload)?;
        Ok(Self { common: EntityCommon::decode(&f), device_class: f.get_string(5), is_status_binary_sensor: f.get_bool(6) })
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListEntitiesSensorResponse {
    common: EntityCommon,
    pub device_class: String,
    pub unit_of_measurement: String,
    pub accuracy_decimals: u32,
}

impl ListEntitiesSensorResponse {
    pub fn to_entity(&self) -> Entity {
        Entity { key: self.common.key, object_id: self.common.object_id.clone(), name: self.common.name.clone(), unique_id: self.common.unique_id.clone(), kind: EntityKind::Sensor }
    }
}

impl ApiMessage for ListEntitiesSensorResponse {
    const MESSAGE_TYPE: u32 = message_type::LIST_ENTITIES_SENSOR_RESPONSE;

    fn encode(&self) -> Vec<u8> {
        let mut w = ProtoWriter::new();
        self.common.write(&mut w);
        w.write_string(5, &self.device_class).write_string(6, &self.unit_of_measurement).write_uint32(7, self.accuracy_decimals);
        w.finish()
    }

    fn decode(payload: &[u8]) -> Result<Self, CodecError> {
        let f = ProtoFields::decode(payload)?;
        Ok(Self {
            common: EntityCommon::decode(&f),
            device_class: f.get_string(5),
            unit_of_measurement: f.get_string(6),
            accuracy_decimals: f.get_uint32(7),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListEntitiesSwitchResponse {
    common: EntityCommon,
    pub device_class: String,
    pub assumed_state: bool,
}

impl ListEntitiesSwitchResponse {
    pub fn to_entity(&self) -> Entity {
        Entity { key: self.common.key, object_id: self.common.object_id.clone(), name: self.common.name.clone(), unique_id: self.common.unique_id.clone(), kind: EntityKind::Switch }
    }
}

impl ApiMessage for ListEntitiesSwitchResponse {
    const MESSAGE_TYPE: u32 = message_type::LIST_ENTITIES_SWITCH_RESPONSE;

    fn encode(&self) -> Vec<u8> {
        let mut w = ProtoWriter::new();
        self.common.write(&mut w);
        w.write_bool(6, self.assumed_state).write_string(8, &self.device_class);
        w.finish()
    }

    fn decode(payload: &[u8]) -> Result<Self, CodecError> {
        let f = ProtoFields::decode(payload)?;
        Ok(Self { common: EntityCommon::decode(&f), device_class: f.get_string(8), assumed_state: f.get_bool(6) })
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListEntitiesTextSensorResponse {
    common: EntityCommon,
    pub device_class: String,
}

impl ListEntitiesTextSensorResponse {
    pub fn to_entity(&self) -> Entity {
        Entity { key: self.common.key, object_id: self.common.object_id.clone(), name: self.common.name.clone(), unique_id: self.common.unique_id.clone(), kind: EntityKind::TextSensor }
    }
}

impl ApiMessage for ListEntitiesTextSensorResponse {
    const MESSAGE_TYPE: u32 = message_type::LIST_ENTITIES_TEXT_SENSOR_RESPONSE;

    fn encode(&self) -> Vec<u8> {
        let mut w = ProtoWriter::new();
        self.common.write(&mut w);
        w.write_string(7, &self.device_class);
        w.finish()
    }

    fn decode(payload: &[u8]) -> Result<Self, CodecError> {
        let f = ProtoFields::decode(payload)?;
        Ok(Self { common: EntityCommon::decode(&f), device_class: f.get_string(7) })
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListEntitiesFanResponse {
    common: EntityCommon,
    pub supports_oscillation: bool,
    pub supports_speed: bool,
    pub supported_speed_count: u32,
}

impl ListEntitiesFanResponse {
    pub fn to_entity(&self) -> Entity {
        Entity { key: self.common.key, object_id: self.common.object_id.clone(), name: self.common.name.clone(), unique_id: self.common.unique_id.clone(), kind: EntityKind::Fan }
    }
}

impl ApiMessage for ListEntitiesFanResponse {
    const MESSAGE_TYPE: u32 = message_type::LIST_ENTITIES_FAN_RESPONSE;

    fn encode(&self) -> Vec<u8> {
        let mut w = ProtoWriter::new();
        self.common.write(&mut w);
        w.write_bool(5, self.supports_oscillation).write_bool(6, self.supports_speed).write_uint32(11, self.supported_speed_count);
        w.finish()
    }

    fn decode(payload: &[u8]) -> Result<Self, CodecError> {
        let f = ProtoFields::decode(payload)?;
        Ok(Self {
            common: EntityCommon::decode(&f),
            supports_oscillation: f.get_bool(5),
            supports_speed: f.get_bool(6),
            supported_speed_count: f.get_uint32(11),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListEntitiesCoverResponse {
    common: EntityCommon,
    pub assumed_state: bool,
    pub supports_position: bool,
    pub supports_tilt: bool,
    pub device_class: String,
}

impl ListEntitiesCoverResponse {
    pub fn to_entity(&self) -> Entity {
        Entity { key: self.common.key, object_id: self.common.object_id.clone(), name: self.common.name.clone(), unique_id: self.common.unique_id.clone(), kind: EntityKind::Cover }
    }
}

impl ApiMessage for ListEntitiesCoverResponse {
    const MESSAGE_TYPE: u32 = message_type::LIST_ENTITIES_COVER_RESPONSE;

    fn encode(&self) -> Vec<u8> {
        let mut w = ProtoWriter::new();
        self.common.write(&mut w);
        w.write_bool(5, self.assumed_state).write_bool(6, self.supports_position).write_bool(7, self.supports_tilt).write_string(8, &self.device_class);
        w.finish()
    }

    fn decode(payload: &[u8]) -> Result<Self, CodecError> {
        let f = ProtoFields::decode(payload)?;
        Ok(Self {
            common: EntityCommon::decode(&f),
            assumed_state: f.get_bool(5),
            supports_position: f.get_bool(6),
            supports_tilt: f.get_bool(7),
            device_class: f.get_string(8),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListEntitiesLightResponse {
    common: EntityCommon,
    pub supports_brightness: bool,
    pub supports_rgb: bool,
    pub supports_color_temperature: bool,
    pub min_mireds: f32,
    pub max_mireds: f32,
}

impl ListEntitiesLightResponse {
    pub fn to_entity(&self) -> Entity {
        Entity { key: self.common.key, object_id: self.common.object_id.clone(), name: self.common.name.clone(), unique_id: self.common.unique_id.clone(), kind: EntityKind::Light }
    }
}

impl ApiMessage for ListEntitiesLightResponse {
    const MESSAGE_TYPE: u32 = message_type::LIST_ENTITIES_LIGHT_RESPONSE;

    fn encode(&self) -> Vec<u8> {
        let mut w = ProtoWriter::new();
        self.common.write(&mut w);
        w.write_bool(5, self.supports_brightness)
            .write_bool(6, self.supports_rgb)
            .write_bool(9, self.supports_color_temperature)
            .write_float(10, self.min_mireds)
            .write_float(11, self.max_mireds);
        w.finish()
    }

    fn decode(payload: &[u8]) -> Result<Self, CodecError> {
        let f = ProtoFields::decode(payload)?;
        Ok(Self {
            common: EntityCommon::decode(&f),
            supports_brightness: f.get_bool(5),
            supports_rgb: f.get_bool(6),
            supports_color_temperature: f.get_bool(9),
            min_mireds: f.get_float(10),
            max_mireds: f.get_float(11),
        })
    }
}

/// A decoded `<Kind>StateResponse`, tagged so it can travel on the generic
/// `state` event channel as well as its kind-specific one.
#[derive(Debug, Clone, PartialEq)]
pub enum EntityState {
    BinarySensor { key: u32, state: bool, missing_state: bool },
    Sensor { key: u32, state: f32, missing_state: bool },
    Switch { key: u32, state: bool },
    TextSensor { key: u32, state: String, missing_state: bool },
    Fan { key: u32, state: bool, oscillating: bool, speed_level: u32 },
    Cover { key: u32, position: f32, tilt: f32, current_operation: u32 },
    Light { key: u32, state: bool, brightness: f32, color_temperature: f32, red: f32, green: f32, blue: f32 },
}

impl EntityState {
    pub fn key(&self) -> u32 {
        match self {
            Self::BinarySensor { key, .. }
            | Self::Sensor { key, .. }
            | Self::Switch { key, .. }
            | Self::TextSensor { key, .. }
            | Self::Fan { key, .. }
            | Self::Cover { key, .. }
            | Self::Light { key, .. } => *key,
        }
    }

    pub fn kind(&self) -> EntityKind {
        match self {
            Self::BinarySensor { .. } => EntityKind::BinarySensor,
            Self::Sensor { .. } => EntityKind::Sensor,
            Self::Switch { .. } => EntityKind::Switch,
            Self::TextSensor { .. } => EntityKind::TextSensor,
            Self::Fan { .. } => EntityKind::Fan,
            Self::Cover { .. } => EntityKind::Cover,
            Self::Light { .. } => EntityKind::Light,
        }
    }

    /// Decodes a `<Kind>StateResponse` payload given its wire type. Returns
    /// `None` for a wire type this function does not recognize as a state
    /// message; callers log those as unhandled rather than treating them as
    /// errors.
    pub fn decode(message_type_id: u32, payload: &[u8]) -> Result<Option<Self>, CodecError> {
        let f = ProtoFields::decode(payload)?;
        let state = match message_type_id {
            message_type::BINARY_SENSOR_STATE_RESPONSE => {
                Self::BinarySensor { key: f.get_uint32(1), state: f.get_bool(2), missing_state: f.get_bool(3) }
            }
            message_type::SENSOR_STATE_RESPONSE => {
                Self::Sensor { key: f.get_uint32(1), state: f.get_float(2), missing_state: f.get_bool(3) }
            }
            message_type::SWITCH_STATE_RESPONSE => Self::Switch { key: f.get_uint32(1), state: f.get_bool(2) },
            message_type::TEXT_SENSOR_STATE_RESPONSE => {
                Self::TextSensor { key: f.get_uint32(1), state: f.get_string(2), missing_state: f.get_bool(3) }
            }
            message_type::FAN_STATE_RESPONSE => Self::Fan {
                key: f.get_uint32(1),
                state: f.get_bool(2),
                oscillating: f.get_bool(3),
                speed_level: f.get_uint32(4),
            },
            message_type::COVER_STATE_RESPONSE => Self::Cover {
                key: f.get_uint32(1),
                position: f.get_float(3),
                tilt: f.get_float(4),
                current_operation: f.get_enum(5),
            },
            message_type::LIGHT_STATE_RESPONSE => Self::Light {
                key: f.get_uint32(1),
                state: f.get_bool(2),
                brightness: f.get_float(3),
                color_temperature: f.get_float(4),
                red: f.get_float(5),
                green: f.get_float(6),
                blue: f.get_float(7),
            },
            _ => return Ok(None),
        };
        Ok(Some(state))
    }
}

/// Entities indexed by their stable numeric key, cleared at the start of
/// each enumeration.
#[derive(Debug, Default)]
pub struct EntityCatalog {
    entities: IndexMap<u32, Entity>,
}

impl EntityCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.entities.clear();
    }

    pub fn insert(&mut self, entity: Entity) {
        self.entities.insert(entity.key, entity);
    }

    pub fn get(&self, key: u32) -> Option<&Entity> {
        self.entities.get(&key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binary_sensor_descriptor_round_trips() {
        let resp = ListEntitiesBinarySensorResponse {
            common: EntityCommon { object_id: "front_door".into(), key: 42, name: "Front Door".into(), unique_id: "fd1".into() },
            device_class: "door".into(),
            is_status_binary_sensor: false,
        };
        let decoded = ListEntitiesBinarySensorResponse::decode(&resp.encode()).unwrap();
        assert_eq!(decoded, resp);
        assert_eq!(decoded.to_entity().kind, EntityKind::BinarySensor);
    }

    #[test]
    fn catalog_clears_between_enumerations() {
        let mut catalog = EntityCatalog::new();
        catalog.insert(Entity { key: 1, object_id: "a".into(), name: "A".into(), unique_id: "".into(), kind: EntityKind::Switch });
        assert_eq!(catalog.len(), 1);
        catalog.clear();
        assert!(catalog.is_empty());
    }

    #[test]
    fn sensor_state_decodes_by_wire_type() {
        let mut w = ProtoWriter::new();
        w.write_uint32(1, 7).write_float(2, 21.5);
        let state = EntityState::decode(message_type::SENSOR_STATE_RESPONSE, &w.finish()).unwrap().unwrap();
        assert_eq!(state, EntityState::Sensor { key: 7, state: 21.5, missing_state: false });
        assert_eq!(state.kind(), EntityKind::Sensor);
    }

    #[test]
    fn unrecognized_type_yields_none() {
        assert!(EntityState::decode(9999, &[]).unwrap().is_none());
    }
}
