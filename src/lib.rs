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

//! A Rust client for the ESPHome Native API: a length-prefixed,
//! protobuf-encoded, TCP protocol for controlling and monitoring ESPHome
//! devices, with an optional Noise-encrypted transport.
//!
//! [`Client`] is the entry point: configure it with a [`ConnectionConfig`],
//! call [`Client::connect`], then use [`Client::list_entities`],
//! [`Client::subscribe_states`], and the per-kind command methods.

#![forbid(unsafe_code)]

pub mod client;
pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod events;
pub mod handshake;
pub mod noise;
mod varint;
pub mod wire;

pub use client::Client;
pub use config::{ConnectionConfig, ReconnectPolicy};
pub use error::{Error, Result};
pub use events::ClientEvent;
pub use wire::entities::{Entity, EntityKind, EntityState};
