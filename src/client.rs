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

//! Client Facade: request/response correlation, the entity catalog,
//! subscription registries, and command issuance, all driven off a single
//! subscription to the `Connection`'s raw event stream.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{broadcast, oneshot, Mutex, RwLock};

use crate::config::ConnectionConfig;
use crate::connection::Connection;
use crate::error::{ConnectionError, Error};
use crate::events::{ClientEvent, ConnectionEvent};
use crate::handshake::{self, AuthGuard, DeviceInfo};
use crate::wire::entities::{
    Entity, EntityCatalog, EntityState, ListEntitiesBinarySensorResponse, ListEntitiesCoverResponse, ListEntitiesFanResponse,
    ListEntitiesLightResponse, ListEntitiesSensorResponse, ListEntitiesSwitchResponse, ListEntitiesTextSensorResponse,
};
use crate::wire::messages::{
    message_type, ApiMessage, CoverCommandRequest, FanCommandRequest, LightCommandRequest, ListEntitiesRequest, SubscribeLogsRequest,
    SubscribeLogsResponse, SubscribeStatesRequest, SwitchCommandRequest,
};

const LIST_ENTITIES_TIMEOUT: Duration = Duration::from_secs(10);

/// A connected, authenticated ESPHome Native API client.
///
/// Construction does not connect; call [`Client::connect`]. Cloning shares
/// the same underlying connection and dispatcher.
#[derive(Clone)]
pub struct Client {
    connection: Connection,
    config: ConnectionConfig,
    auth_guard: AuthGuard,
    list_entities_lock: Arc<Mutex<()>>,
    catalog: Arc<RwLock<EntityCatalog>>,
    device_info: Arc<RwLock<Option<DeviceInfo>>>,
    events: broadcast::Sender<ClientEvent>,
    states: broadcast::Sender<EntityState>,
    logs: broadcast::Sender<(u32, String)>,
    states_subscribed: Arc<Mutex<bool>>,
    /// The handshake result a waiting `connect()` call wants delivered. Only
    /// ever populated across the span of one `connect()` call; reconnects
    /// the `Connection` drives on its own (after the caller's `connect()`
    /// has already returned) find this empty and just update `device_info`
    /// and emit `ClientEvent::Connected` without anyone to notify directly.
    pending_handshake: Arc<Mutex<Option<oneshot::Sender<Result<DeviceInfo, Error>>>>>,
}

impl Client {
    pub fn new(config: ConnectionConfig) -> Self {
        let connection = Connection::new(config.clone());
        let (events, _) = broadcast::channel(64);
        let (states, _) = broadcast::channel(256);
        let (logs, _) = broadcast::channel(256);

        let client = Self {
            connection,
            config,
            auth_guard: AuthGuard::new(),
            list_entities_lock: Arc::new(Mutex::new(())),
            catalog: Arc::new(RwLock::new(EntityCatalog::new())),
            device_info: Arc::new(RwLock::new(None)),
            events,
            states,
            logs,
            states_subscribed: Arc::new(Mutex::new(false)),
            pending_handshake: Arc::new(Mutex::new(None)),
        };
        client.spawn_dispatcher();
        client
    }

    /// Routes every inbound connection event to the catalog, subscription
    /// buses, and the facade-level event channel. Ping/disconnect are
    /// already handled by the `Connection` itself and never reach this loop
    /// as `Message` events.
    ///
    /// `ConnectionEvent::Connected` additionally (re-)runs the handshake/auth
    /// driver: the spec requires it run on *every* fresh connection, not
    /// just the one the caller's `connect()` observes, so that automatic
    /// reconnects come back authenticated instead of stuck behind
    /// `AuthenticationRequired`.
    fn spawn_dispatcher(&self) {
        let mut raw_events = self.connection.subscribe();
        let catalog = self.catalog.clone();
        let events = self.events.clone();
        let states = self.states.clone();
        let logs = self.logs.clone();
        let connection = self.connection.clone();
        let config = self.config.clone();
        let auth_guard = self.auth_guard.clone();
        let device_info = self.device_info.clone();
        let pending_handshake = self.pending_handshake.clone();

        tokio::spawn(async move {
            loop {
                let event = match raw_events.recv().await {
                    Ok(event) => event,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return,
                };

                match &event {
                    ConnectionEvent::Message { message_type: type_id, payload } => {
                        Self::route_message(*type_id as u32, payload, &catalog, &events, &states, &logs).await;
                    }
                    ConnectionEvent::Connected => {
                        let connection = connection.clone();
                        let config = config.clone();
                        let auth_guard = auth_guard.clone();
                        let device_info = device_info.clone();
                        let events = events.clone();
                        let pending_handshake = pending_handshake.clone();
                        tokio::spawn(async move {
                            Self::run_handshake_and_notify(&connection, &config, &auth_guard, &device_info, &events, &pending_handshake)
                                .await;
                        });
                    }
                    _ => {
                        if let Some(client_event) = handshake::to_client_event(&event) {
                            let _ = events.send(client_event);
                        }
                    }
                }
            }
        });
    }

    /// Runs the handshake/auth driver against a freshly `Open` connection,
    /// caches the resulting device info, emits `ClientEvent::Connected`/
    /// `Error`, and — if a `connect()` call is waiting on this specific
    /// attempt — delivers the result to it.
    async fn run_handshake_and_notify(
        connection: &Connection,
        config: &ConnectionConfig,
        auth_guard: &AuthGuard,
        device_info: &Arc<RwLock<Option<DeviceInfo>>>,
        events: &broadcast::Sender<ClientEvent>,
        pending_handshake: &Arc<Mutex<Option<oneshot::Sender<Result<DeviceInfo, Error>>>>>,
    ) {
        let result = handshake::run(connection, &config.client_info, config.password.as_deref(), auth_guard).await;
        match &result {
            Ok(info) => {
                *device_info.write().await = Some(info.clone());
                let _ = events.send(ClientEvent::Connected);
            }
            Err(e) => {
                let _ = events.send(ClientEvent::Error(e.to_string()));
                // Handshake/auth failures reject the caller's `connect()`
                // outright rather than silently retrying behind it.
                connection.disconnect_without_reconnect().await;
            }
        }
        if let Some(tx) = pending_handshake.lock().await.take() {
            let _ = tx.send(result);
        }
    }

    async fn route_message(
        type_id: u32,
        payload: &Bytes,
        catalog: &Arc<RwLock<EntityCatalog>>,
        events: &broadcast::Sender<ClientEvent>,
        states: &broadcast::Sender<EntityState>,
        logs: &broadcast::Sender<(u32, String)>,
    ) {
        macro_rules! route_entity {
            ($ty:ty) => {
                if let Ok(descriptor) = <$ty as ApiMessage>::decode(payload) {
                    let entity = descriptor.to_entity();
                    catalog.write().await.insert(entity.clone());
                    let _ = events.send(ClientEvent::Entity(entity));
                    return;
                }
            };
        }

        match type_id {
            message_type::LIST_ENTITIES_BINARY_SENSOR_RESPONSE => route_entity!(ListEntitiesBinarySensorResponse),
            message_type::LIST_ENTITIES_SENSOR_RESPONSE => route_entity!(ListEntitiesSensorResponse),
            message_type::LIST_ENTITIES_SWITCH_RESPONSE => route_entity!(ListEntitiesSwitchResponse),
            message_type::LIST_ENTITIES_TEXT_SENSOR_RESPONSE => route_entity!(ListEntitiesTextSensorResponse),
            message_type::LIST_ENTITIES_FAN_RESPONSE => route_entity!(ListEntitiesFanResponse),
            message_type::LIST_ENTITIES_COVER_RESPONSE => route_entity!(ListEntitiesCoverResponse),
            message_type::LIST_ENTITIES_LIGHT_RESPONSE => route_entity!(ListEntitiesLightResponse),
            message_type::SUBSCRIBE_LOGS_RESPONSE => {
                if let Ok(log) = SubscribeLogsResponse::decode(payload) {
                    let message = String::from_utf8_lossy(&log.message).into_owned();
                    let _ = logs.send((log.level, message.clone()));
                    let _ = events.send(ClientEvent::Log { level: log.level, message });
                }
            }
            _ => {
                if let Ok(Some(state)) = EntityState::decode(type_id, payload) {
                    let _ = states.send(state.clone());
                    let _ = events.send(ClientEvent::State(state));
                } else {
                    tracing::debug!(target: "discovery", message_type = type_id, "unhandled message type");
                }
            }
        }
    }

    pub fn events(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    /// Connects the transport and runs the handshake/auth sequence.
    /// Resolves once authenticated device info has been fetched and cached.
    ///
    /// The handshake itself is driven by the dispatcher task in response to
    /// the `Connection`'s own `Connected` event (see `spawn_dispatcher`), so
    /// that the same driver also re-runs on automatic reconnects; this
    /// method just registers to be notified of the attempt it kicked off.
    pub async fn connect(&self) -> Result<(), Error> {
        let mut pending = self.pending_handshake.lock().await;
        if pending.is_some() {
            return Err(Error::AuthenticationInProgress);
        }
        let (tx, rx) = oneshot::channel();
        *pending = Some(tx);
        drop(pending);

        if let Err(e) = self.connection.connect().await {
            self.pending_handshake.lock().await.take();
            return Err(e.into());
        }

        rx.await.map_err(|_| Error::Connection(ConnectionError::ConnectionLost))?.map(|_| ())
    }

    pub async fn disconnect(&self) {
        self.connection.disconnect().await;
    }

    pub async fn destroy(&self) {
        self.connection.destroy().await;
    }

    pub async fn is_connected(&self) -> bool {
        self.connection.is_connected().await
    }

    pub async fn is_authenticated(&self) -> bool {
        self.connection.is_authenticated().await
    }

    pub async fn device_info(&self) -> Option<DeviceInfo> {
        self.device_info.read().await.clone()
    }

    async fn require_authenticated(&self) -> Result<(), Error> {
        if self.connection.is_authenticated().await {
            Ok(())
        } else {
            Err(Error::AuthenticationRequired)
        }
    }

    /// Clears the catalog, requests the full entity list, and waits for
    /// `ListEntitiesDoneResponse`.
    pub async fn list_entities(&self) -> Result<Vec<Entity>, Error> {
        self.require_authenticated().await?;
        let _guard = self.list_entities_lock.lock().await;

        self.catalog.write().await.clear();
        let mut raw_events = self.connection.subscribe();
        self.connection
            .send(ListEntitiesRequest::MESSAGE_TYPE as u64, Bytes::from(ListEntitiesRequest.encode()))
            .await
            .map_err(Error::from)?;

        let wait_for_done = async {
            loop {
                match raw_events.recv().await {
                    Ok(ConnectionEvent::Message { message_type: t, .. }) if t as u32 == message_type::LIST_ENTITIES_DONE_RESPONSE => return Ok(()),
                    Ok(ConnectionEvent::Disconnected { .. }) => return Err(ConnectionError::ConnectionLost),
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return Err(ConnectionError::ConnectionLost),
                }
            }
        };

        tokio::time::timeout(LIST_ENTITIES_TIMEOUT, wait_for_done)
            .await
            .map_err(|_| Error::Timeout { operation: "list_entities", elapsed: LIST_ENTITIES_TIMEOUT })??;

        Ok(self.catalog.read().await.iter().cloned().collect())
    }

    /// Returns a snapshot of the currently cached entity catalog without
    /// re-running enumeration. Empty until `list_entities()` has completed
    /// at least once.
    pub async fn entities(&self) -> Vec<Entity> {
        self.catalog.read().await.iter().cloned().collect()
    }

    /// Looks up a single cached entity by its stable numeric key.
    pub async fn entity(&self, key: u32) -> Result<Entity, Error> {
        self.catalog.read().await.get(key).cloned().ok_or(Error::EntityNotFound(key))
    }

    /// Subscribes to state updates, sending `SubscribeStatesRequest` only
    /// on the first call.
    pub async fn subscribe_states(&self) -> Result<broadcast::Receiver<EntityState>, Error> {
        self.require_authenticated().await?;
        let mut sent = self.states_subscribed.lock().await;
        if !*sent {
            self.connection
                .send(SubscribeStatesRequest::MESSAGE_TYPE as u64, Bytes::from(SubscribeStatesRequest.encode()))
                .await
                .map_err(Error::from)?;
            *sent = true;
        }
        Ok(self.states.subscribe())
    }

    /// Subscribes to the device's log stream at `level` (0-7, see
    /// Glossary). Each call re-sends the request, since the device may be
    /// asked to change verbosity mid-session.
    pub async fn subscribe_logs(&self, level: u32) -> Result<broadcast::Receiver<(u32, String)>, Error> {
        self.require_authenticated().await?;
        let req = SubscribeLogsRequest { level, dump_config: false };
        self.connection.send(SubscribeLogsRequest::MESSAGE_TYPE as u64, Bytes::from(req.encode())).await.map_err(Error::from)?;
        Ok(self.logs.subscribe())
    }

    pub async fn switch_command(&self, key: u32, state: bool) -> Result<(), Error> {
        self.require_authenticated().await?;
        let req = SwitchCommandRequest { key, state };
        self.connection.send(SwitchCommandRequest::MESSAGE_TYPE as u64, Bytes::from(req.encode())).await.map_err(Error::from)
    }

    pub async fn light_command(&self, command: LightCommandRequest) -> Result<(), Error> {
        self.require_authenticated().await?;
        self.connection.send(LightCommandRequest::MESSAGE_TYPE as u64, Bytes::from(command.encode())).await.map_err(Error::from)
    }

    pub async fn fan_command(&self, command: FanCommandRequest) -> Result<(), Error> {
        self.require_authenticated().await?;
        self.connection.send(FanCommandRequest::MESSAGE_TYPE as u64, Bytes::from(command.encode())).await.map_err(Error::from)
    }

    pub async fn cover_command(&self, command: CoverCommandRequest) -> Result<(), Error> {
        self.require_authenticated().await?;
        self.connection.send(CoverCommandRequest::MESSAGE_TYPE as u64, Bytes::from(command.encode())).await.map_err(Error::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn commands_require_authentication() {
        let client = Client::new(ConnectionConfig::new("127.0.0.1"));
        let err = client.switch_command(1, true).await.unwrap_err();
        assert!(matches!(err, Error::AuthenticationRequired));
    }
}
