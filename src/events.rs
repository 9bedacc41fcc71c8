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

//! Event types broadcast by the [`crate::connection::Connection`] and the
//! [`crate::client::Client`] facade.
//!
//! `tokio::sync::broadcast` stands in for a callback-registry style event
//! emitter: ordered, multi-subscriber fan-out without a registry to manage
//! by hand. `once`-style single-delivery waits are served separately by the
//! request/response correlator in `client.rs`, not by these buses.

use bytes::Bytes;

use crate::wire::entities::{Entity, EntityState};

/// Connection-level lifecycle and transport events. A `ConnectionPhase`
/// snapshot accompanies `StateChanged` rather than requiring subscribers to
/// poll accessors.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    Connected,
    Disconnected { reason: Option<String> },
    Message { message_type: u64, payload: Bytes },
    Error(String),
    StateChanged(crate::connection::ConnectionPhase),
}

/// Facade-level events. `State` carries every kind-specific state update;
/// subscribers that only care about one kind are expected to match on
/// [`EntityState`] themselves.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    Connected,
    Disconnected { reason: Option<String> },
    Entity(Entity),
    State(EntityState),
    Log { level: u32, message: String },
    Error(String),
}
