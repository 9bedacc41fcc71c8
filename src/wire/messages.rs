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

//! Typed request/response messages for the unencrypted wire protocol.
//!
//! Field numbers follow the publicly documented ESPHome Native API protobuf
//! schema, treated as a fixed external contract: this module only
//! encodes/decodes the fields the client actually touches rather than
//! generating full message types from `.proto` sources.

use crate::error::CodecError;
use crate::wire::proto::{ProtoFields, ProtoWriter};

/// Numeric wire type identifiers. Two logical messages share id 3/4 in the
/// upstream source (Connect/Authenticate aliases); this client treats them
/// as the single `Connect` pair.
pub mod message_type {
    pub const HELLO_REQUEST: u32 = 1;
    pub const HELLO_RESPONSE: u32 = 2;
    pub const CONNECT_REQUEST: u32 = 3;
    pub const CONNECT_RESPONSE: u32 = 4;
    pub const DISCONNECT_REQUEST: u32 = 5;
    pub const DISCONNECT_RESPONSE: u32 = 6;
    pub const PING_REQUEST: u32 = 7;
    pub const PING_RESPONSE: u32 = 8;
    pub const DEVICE_INFO_REQUEST: u32 = 9;
    pub const DEVICE_INFO_RESPONSE: u32 = 10;
    pub const LIST_ENTITIES_REQUEST: u32 = 11;
    pub const LIST_ENTITIES_BINARY_SENSOR_RESPONSE: u32 = 12;
    pub const LIST_ENTITIES_COVER_RESPONSE: u32 = 13;
    pub const LIST_ENTITIES_FAN_RESPONSE: u32 = 14;
    pub const LIST_ENTITIES_LIGHT_RESPONSE: u32 = 15;
    pub const LIST_ENTITIES_SENSOR_RESPONSE: u32 = 16;
    pub const LIST_ENTITIES_SWITCH_RESPONSE: u32 = 17;
    pub const LIST_ENTITIES_TEXT_SENSOR_RESPONSE: u32 = 18;
    pub const LIST_ENTITIES_DONE_RESPONSE: u32 = 19;
    pub const SUBSCRIBE_STATES_REQUEST: u32 = 20;
    pub const BINARY_SENSOR_STATE_RESPONSE: u32 = 21;
    pub const COVER_STATE_RESPONSE: u32 = 22;
    pub const FAN_STATE_RESPONSE: u32 = 23;
    pub const LIGHT_STATE_RESPONSE: u32 = 24;
    pub const SENSOR_STATE_RESPONSE: u32 = 25;
    pub const SWITCH_STATE_RESPONSE: u32 = 26;
    pub const TEXT_SENSOR_STATE_RESPONSE: u32 = 27;
    pub const SUBSCRIBE_LOGS_REQUEST: u32 = 28;
    pub const SUBSCRIBE_LOGS_RESPONSE: u32 = 29;
    pub const COVER_COMMAND_REQUEST: u32 = 30;
    pub const FAN_COMMAND_REQUEST: u32 = 31;
    pub const LIGHT_COMMAND_REQUEST: u32 = 32;
    pub const SWITCH_COMMAND_REQUEST: u32 = 33;
    pub const GET_TIME_REQUEST: u32 = 36;
    pub const GET_TIME_RESPONSE: u32 = 37;
}

/// A message with a fixed wire type identifier and a protobuf body.
pub trait ApiMessage: Sized {
    const MESSAGE_TYPE: u32;

    fn encode(&self) -> Vec<u8>;
    fn decode(payload: &[u8]) -> Result<Self, CodecError>;
}

macro_rules! empty_message {
    ($name:ident, $type_id:expr) => {
        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
        pub struct $name;

        impl ApiMessage for $name {
            const MESSAGE_TYPE: u32 = $type_id;

            fn encode(&self) -> Vec<u8> {
                Vec::new()
            }

            fn decode(_payload: &[u8]) -> Result<Self, CodecError> {
                Ok(Self)
            }
        }
    };
}

empty_message!(DisconnectRequest, message_type::DISCONNECT_REQUEST);
empty_message!(DisconnectResponse, message_type::DISCONNECT_RESPONSE);
empty_message!(PingRequest, message_type::PING_REQUEST);
empty_message!(PingResponse, message_type::PING_RESPONSE);
empty_message!(DeviceInfoRequest, message_type::DEVICE_INFO_REQUEST);
empty_message!(ListEntitiesRequest, message_type::LIST_ENTITIES_REQUEST);
empty_message!(ListEntitiesDoneResponse, message_type::LIST_ENTITIES_DONE_RESPONSE);
empty_message!(SubscribeStatesRequest, message_type::SUBSCRIBE_STATES_REQUEST);
empty_message!(GetTimeRequest, message_type::GET_TIME_REQUEST);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelloRequest {
    pub client_info: String,
    pub api_version_major: u32,
    pub api_version_minor: u32,
}

impl ApiMessage for HelloRequest {
    const MESSAGE_TYPE: u32 = message_type::HELLO_REQUEST;

    fn encode(&self) -> Vec<u8> {
        let mut w = ProtoWriter::new();
        w.write_string(1, &self.client_info)
            .write_uint32(2, self.api_version_major)
            .write_uint32(3, self.api_version_minor);
        w.finish()
    }

    fn decode(payload: &[u8]) -> Result<Self, CodecError> {
        let f = ProtoFields::decode(payload)?;
        Ok(Self {
            client_info: f.get_string(1),
            api_version_major: f.get_uint32(2),
            api_version_minor: f.get_uint32(3),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HelloResponse {
    pub api_version_major: u32,
    pub api_version_minor: u32,
    pub server_info: String,
    pub name: String,
}

impl ApiMessage for HelloResponse {
    const MESSAGE_TYPE: u32 = message_type::HELLO_RESPONSE;

    fn encode(&self) -> Vec<u8> {
        let mut w = ProtoWriter::new();
        w.write_uint32(1, self.api_version_major)
            .write_uint32(2, self.api_version_minor)
            .write_string(3, &self.server_info)
            .write_string(4, &self.name);
        w.finish()
    }

    fn decode(payload: &[u8]) -> Result<Self, CodecError> {
        let f = ProtoFields::decode(payload)?;
        Ok(Self {
            api_version_major: f.get_uint32(1),
            api_version_minor: f.get_uint32(2),
            server_info: f.get_string(3),
            name: f.get_string(4),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectRequest {
    pub password: String,
}

impl ApiMessage for ConnectRequest {
    const MESSAGE_TYPE: u32 = message_type::CONNECT_REQUEST;

    fn encode(&self) -> Vec<u8> {
        let mut w = ProtoWriter::new();
        w.write_string(1, &self.password);
        w.finish()
    }

    fn decode(payload: &[u8]) -> Result<Self, CodecError> {
        let f = ProtoFields::decode(payload)?;
        Ok(Self { password: f.get_string(1) })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectResponse {
    pub invalid_password: bool,
}

impl ApiMessage for ConnectResponse {
    const MESSAGE_TYPE: u32 = message_type::CONNECT_RESPONSE;

    fn encode(&self) -> Vec<u8> {
        let mut w = ProtoWriter::new();
        w.write_bool(1, self.invalid_password);
        w.finish()
    }

    fn decode(payload: &[u8]) -> Result<Self, CodecError> {
        let f = ProtoFields::decode(payload)?;
        Ok(Self { invalid_password: f.get_bool(1) })
    }
}

/// Device attributes cached after the handshake.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceInfoResponse {
    pub uses_password: bool,
    pub name: String,
    pub mac_address: String,
    pub esphome_version: String,
    pub compilation_time: String,
    pub model: String,
    pub has_deep_sleep: bool,
    pub project_name: String,
    pub project_version: String,
    pub webserver_port: u32,
    pub manufacturer: String,
    pub friendly_name: String,
    pub suggested_area: String,
    pub bluetooth_proxy_feature_flags: u32,
    pub voice_assistant_feature_flags: u32,
}

impl ApiMessage for DeviceInfoResponse {
    const MESSAGE_TYPE: u32 = message_type::DEVICE_INFO_RESPONSE;

    fn encode(&self) -> Vec<u8> {
        let mut w = ProtoWriter::new();
        w.write_bool(1, self.uses_password)
            .write_string(2, &self.name)
            .write_string(3, &self.mac_address)
            .write_string(4, &self.esphome_version)
            .write_string(5, &self.compilation_time)
            .write_string(6, &self.model)
            .write_bool(7, self.has_deep_sleep)
            .write_string(8, &self.project_name)
            .write_string(9, &self.project_version)
            .write_uint32(10, self.webserver_port)
            .write_string(12, &self.manufacturer)
            .write_string(13, &self.friendly_name)
            .write_string(16, &self.suggested_area)
            .write_uint32(15, self.bluetooth_proxy_feature_flags)
            .write_uint32(17, self.voice_assistant_feature_flags);
        w.finish()
    }

    fn decode(payload: &[u8]) -> Result<Self, CodecError> {
        let f = ProtoFields::decode(payload)?;
        Ok(Self {
            uses_password: f.get_bool(1),
            name: f.get_string(2),
            mac_address: f.get_string(3),
            esphome_version: f.get_string(4),
            compilation_time: f.get_string(5),
            model: f.get_string(6),
            has_deep_sleep: f.get_bool(7),
            project_name: f.get_string(8),
            project_version: f.get_string(9),
            webserver_port: f.get_uint32(10),
            manufacturer: f.get_string(12),
            friendly_name: f.get_string(13),
            suggested_area: f.get_string(16),
            bluetooth_proxy_feature_flags: f.get_uint32(15),
            voice_assistant_feature_flags: f.get_uint32(17),
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GetTimeResponse {
    pub epoch_seconds: u32,
}

impl ApiMessage for GetTimeResponse {
    const MESSAGE_TYPE: u32 = message_type::GET_TIME_RESPONSE;

    fn encode(&self) -> Vec<u8> {
        let mut w = ProtoWriter::new();
        w.write_fixed32(1, self.epoch_seconds);
        w.finish()
    }

    fn decode(payload: &[u8]) -> Result<Self, CodecError> {
        let f = ProtoFields::decode(payload)?;
        Ok(Self { epoch_seconds: f.get_fixed32(1) })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscribeLogsRequest {
    pub level: u32,
    pub dump_config: bool,
}

impl ApiMessage for SubscribeLogsRequest {
    const MESSAGE_TYPE: u32 = message_type::SUBSCRIBE_LOGS_REQUEST;

    fn encode(&self) -> Vec<u8> {
        let mut w = ProtoWriter::new();
        w.write_enum(1, self.level).write_bool(2, self.dump_config);
        w.finish()
    }

    fn decode(payload: &[u8]) -> Result<Self, CodecError> {
        let f = ProtoFields::decode(payload)?;
        Ok(Self { level: f.get_enum(1), dump_config: f.get_bool(2) })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscribeLogsResponse {
    pub level: u32,
    pub message: Vec<u8>,
}

impl ApiMessage for SubscribeLogsResponse {
    const MESSAGE_TYPE: u32 = message_type::SUBSCRIBE_LOGS_RESPONSE;

    fn encode(&self) -> Vec<u8> {
        let mut w = ProtoWriter::new();
        w.write_enum(1, self.level).write_bytes(2, &self.message);
        w.finish()
    }

    fn decode(payload: &[u8]) -> Result<Self, CodecError> {
        let f = ProtoFields::decode(payload)?;
        Ok(Self { level: f.get_enum(1), message: f.get_bytes(2) })
    }
}

// --- Commands ---

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SwitchCommandRequest {
    pub key: u32,
    pub state: bool,
}

impl ApiMessage for SwitchCommandRequest {
    const MESSAGE_TYPE: u32 = message_type::SWITCH_COMMAND_REQUEST;

    fn encode(&self) -> Vec<u8> {
        let mut w = ProtoWriter::new();
        w.write_uint32(1, self.key).write_bool(2, self.state);
        w.finish()
    }

    fn decode(payload: &[u8]) -> Result<Self, CodecError> {
        let f = ProtoFields::decode(payload)?;
        Ok(Self { key: f.get_uint32(1), state: f.get_bool(2) })
    }
}

/// Light command options. Each optional value carries a companion `has_*`
/// flag that must be set whenever the value is provided.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LightCommandRequest {
    pub key: u32,
    pub has_state: bool,
    pub state: bool,
    pub has_brightness: bool,
    pub brightness: f32,
    pub has_rgb: bool,
    pub red: f32,
    pub green: f32,
    pub blue: f32,
    pub has_color_temperature: bool,
    pub color_temperature: f32,
    pub has_transition_length: bool,
    pub transition_length: u32,
}

impl ApiMessage for LightCommandRequest {
    const MESSAGE_TYPE: u32 = message_type::LIGHT_COMMAND_REQUEST;

    fn encode(&self) -> Vec<u8> {
        let mut w = ProtoWriter::new();
        w.write_uint32(1, self.key)
            .write_bool(2, self.has_state)
            .write_bool(3, self.state)
            .write_bool(4, self.has_brightness)
            .write_float(5, self.brightness)
            .write_bool(6, self.has_rgb)
            .write_float(7, self.red)
            .write_float(8, self.green)
            .write_float(9, self.blue)
            .write_bool(10, self.has_color_temperature)
            .write_float(11, self.color_temperature)
            .write_bool(14, self.has_transition_length)
            .write_uint32(15, self.transition_length);
        w.finish()
    }

    fn decode(payload: &[u8]) -> Result<Self, CodecError> {
        let f = ProtoFields::decode(payload)?;
        Ok(Self {
            key: f.get_uint32(1),
            has_state: f.get_bool(2),
            state: f.get_bool(3),
            has_brightness: f.get_bool(4),
            brightness: f.get_float(5),
            has_rgb: f.get_bool(6),
            red: f.get_float(7),
            green: f.get_float(8),
            blue: f.get_float(9),
            has_color_temperature: f.get_bool(10),
            color_temperature: f.get_float(11),
            has_transition_length: f.get_bool(14),
            transition_length: f.get_uint32(15),
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FanCommandRequest {
    pub key: u32,
    pub has_state: bool,
    pub state: bool,
    /// Legacy on/off-style speed, superseded by `speed_level` but still
    /// part of the wire contract for devices/clients that only speak it.
    pub has_speed: bool,
    pub speed: u32,
    pub has_oscillating: bool,
    pub oscillating: bool,
    pub has_speed_level: bool,
    pub speed_level: u32,
}

impl ApiMessage for FanCommandRequest {
    const MESSAGE_TYPE: u32 = message_type::FAN_COMMAND_REQUEST;

    fn encode(&self) -> Vec<u8> {
        let mut w = ProtoWriter::new();
        w.write_uint32(1, self.key)
            .write_bool(2, self.has_state)
            .write_bool(3, self.state)
            .write_bool(4, self.has_speed)
            .write_uint32(5, self.speed)
            .write_bool(6, self.has_oscillating)
            .write_bool(7, self.oscillating)
            .write_bool(8, self.has_speed_level)
            .write_uint32(9, self.speed_level);
        w.finish()
    }

    fn decode(payload: &[u8]) -> Result<Self, CodecError> {
        let f = ProtoFields::decode(payload)?;
        Ok(Self {
            key: f.get_uint32(1),
            has_state: f.get_bool(2),
            state: f.get_bool(3),
            has_speed: f.get_bool(4),
            speed: f.get_uint32(5),
            has_oscillating: f.get_bool(6),
            oscillating: f.get_bool(7),
            has_speed_level: f.get_bool(8),
            speed_level: f.get_uint32(9),
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CoverCommandRequest {
    pub key: u32,
    pub has_position: bool,
    pub position: f32,
    pub has_tilt: bool,
    pub tilt: f32,
    pub stop: bool,
}

impl ApiMessage for CoverCommandRequest {
    const MESSAGE_TYPE: u32 = message_type::COVER_COMMAND_REQUEST;

    fn encode(&self) -> Vec<u8> {
        let mut w = ProtoWriter::new();
        w.write_uint32(1, self.key)
            .write_bool(2, self.has_position)
            .write_float(3, self.position)
            .write_bool(4, self.has_tilt)
            .write_float(5, self.tilt)
            .write_bool(6, self.stop);
        w.finish()
    }

    fn decode(payload: &[u8]) -> Result<Self, CodecError> {
        let f = ProtoFields::decode(payload)?;
        Ok(Self {
            key: f.get_uint32(1),
            has_position: f.get_bool(2),
            position: f.get_float(3),
            has_tilt: f.get_bool(4),
            tilt: f.get_float(5),
            stop: f.get_bool(6),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hello_request_round_trips() {
        let req = HelloRequest { client_info: "esphome-native-api-rs".into(), api_version_major: 1, api_version_minor: 9 };
        let decoded = HelloRequest::decode(&req.encode()).unwrap();
        assert_eq!(req, decoded);
    }

    #[test]
    fn connect_response_round_trips() {
        let resp = ConnectResponse { invalid_password: true };
        assert_eq!(ConnectResponse::decode(&resp.encode()).unwrap(), resp);
    }

    #[test]
    fn device_info_round_trips() {
        let info = DeviceInfoResponse {
            name: "kitchen".into(),
            mac_address: "AA:BB:CC:DD:EE:FF".into(),
            has_deep_sleep: true,
            friendly_name: "Kitchen Sensor".into(),
            ..Default::default()
        };
        let decoded = DeviceInfoResponse::decode(&info.encode()).unwrap();
        assert_eq!(decoded, info);
    }

    #[test]
    fn light_command_preserves_has_flags() {
        let cmd = LightCommandRequest { key: 9, has_state: true, state: true, has_brightness: true, brightness: 0.5, ..Default::default() };
        let decoded = LightCommandRequest::decode(&cmd.encode()).unwrap();
        assert_eq!(decoded, cmd);
        assert!(!decoded.has_rgb);
    }

    #[test]
    fn empty_message_decodes_regardless_of_payload() {
        assert_eq!(PingRequest::decode(&[]).unwrap(), PingRequest);
        assert_eq!(PingRequest::decode(&[1, 2, 3]).unwrap(), PingRequest);
    }

    #[test]
    fn fan_command_preserves_both_legacy_speed_and_speed_level() {
        let cmd = FanCommandRequest {
            key: 3,
            has_state: true,
            state: true,
            has_speed: true,
            speed: 1,
            has_oscillating: true,
            oscillating: false,
            has_speed_level: true,
            speed_level: 100,
        };
        let decoded = FanCommandRequest::decode(&cmd.encode()).unwrap();
        assert_eq!(decoded, cmd);
    }
}
