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

//! Handshake & Auth Driver: runs once per fresh `Connection`, negotiating
//! protocol version, authenticating, and fetching device info before the
//! connection is usable by the client facade.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::broadcast;

use crate::connection::Connection;
use crate::error::{ConnectionError, Error, HandshakeError};
use crate::events::{ClientEvent, ConnectionEvent};
use crate::wire::messages::{
    message_type, ApiMessage, ConnectRequest, ConnectResponse, DeviceInfoRequest, DeviceInfoResponse, HelloRequest, HelloResponse,
};

const HELLO_TIMEOUT: Duration = Duration::from_secs(5);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const DEVICE_INFO_TIMEOUT: Duration = Duration::from_secs(5);
const OVERALL_TIMEOUT: Duration = Duration::from_secs(10);

/// Guards against concurrent `authenticate()` calls on the same connection:
/// a second call while one is already in flight fails immediately.
#[derive(Clone, Default)]
pub struct AuthGuard(Arc<AtomicBool>);

impl AuthGuard {
    pub fn new() -> Self {
        Self::default()
    }

    fn acquire(&self) -> Result<AuthGuardToken, HandshakeError> {
        if self.0.swap(true, Ordering::SeqCst) {
            return Err(HandshakeError::AlreadyAuthenticating);
        }
        Ok(AuthGuardToken(self.0.clone()))
    }
}

struct AuthGuardToken(Arc<AtomicBool>);

impl Drop for AuthGuardToken {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Awaits the next inbound message of the given wire type from the
/// connection's event stream, ignoring everything else, up to `deadline`.
async fn await_message(events: &mut broadcast::Receiver<ConnectionEvent>, expected_type: u32, deadline: Duration) -> Result<Bytes, HandshakeError> {
    let wait = async {
        loop {
            match events.recv().await {
                Ok(ConnectionEvent::Message { message_type, payload }) if message_type as u32 == expected_type => return Ok(payload),
                Ok(ConnectionEvent::Disconnected { .. }) => {
                    return Err(HandshakeError::Connection(ConnectionError::ConnectionLost));
                }
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return Err(HandshakeError::Connection(ConnectionError::ConnectionLost)),
            }
        }
    };

    tokio::time::timeout(deadline, wait).await.map_err(|_| HandshakeError::Timeout(deadline))?
}

/// The device attributes cached after a successful handshake.
pub type DeviceInfo = DeviceInfoResponse;

/// Runs the handshake/auth sequence against a `Connection` that has just
/// reached `Open`. Returns the cached device info on success.
pub async fn run(
    connection: &Connection,
    client_info: &str,
    password: Option<&str>,
    guard: &AuthGuard,
) -> Result<DeviceInfo, Error> {
    let _token = guard.acquire()?;
    tokio::time::timeout(OVERALL_TIMEOUT, run_inner(connection, client_info, password))
        .await
        .map_err(|_| Error::Timeout { operation: "handshake", elapsed: OVERALL_TIMEOUT })?
}

async fn run_inner(connection: &Connection, client_info: &str, password: Option<&str>) -> Result<DeviceInfo, Error> {
    let mut events = connection.subscribe();

    let hello = HelloRequest { client_info: client_info.to_string(), api_version_major: 1, api_version_minor: 9 };
    connection.send(HelloRequest::MESSAGE_TYPE as u64, Bytes::from(hello.encode())).await.map_err(HandshakeError::Connection)?;
    let hello_payload = await_message(&mut events, HelloResponse::MESSAGE_TYPE, HELLO_TIMEOUT).await?;
    let hello_response = HelloResponse::decode(&hello_payload).map_err(ConnectionError::Codec).map_err(HandshakeError::Connection)?;
    connection.set_api_version(hello_response.api_version_major, hello_response.api_version_minor).await;
    connection.set_server_info(hello_response.server_info.clone()).await;

    if hello_response.api_version_major != hello.api_version_major {
        return Err(HandshakeError::ProtocolVersionMismatch {
            major: hello_response.api_version_major,
            minor: hello_response.api_version_minor,
        }
        .into());
    }

    match password {
        Some(password) => {
            let req = ConnectRequest { password: password.to_string() };
            connection.send(ConnectRequest::MESSAGE_TYPE as u64, Bytes::from(req.encode())).await.map_err(HandshakeError::Connection)?;
            let payload = await_message(&mut events, ConnectResponse::MESSAGE_TYPE, CONNECT_TIMEOUT).await?;
            let response = ConnectResponse::decode(&payload).map_err(ConnectionError::Codec).map_err(HandshakeError::Connection)?;
            if response.invalid_password {
                // Teardown (and reconnect suppression) is the caller's job —
                // see `Client::run_handshake_and_notify`, which tears every
                // handshake failure down the same way.
                return Err(HandshakeError::InvalidPassword.into());
            }
            connection.set_authenticated(true).await;
        }
        None => connection.set_authenticated(true).await,
    }

    connection
        .send(DeviceInfoRequest::MESSAGE_TYPE as u64, Bytes::from(DeviceInfoRequest.encode()))
        .await
        .map_err(HandshakeError::Connection)?;
    let info_payload = await_message(&mut events, DeviceInfoResponse::MESSAGE_TYPE, DEVICE_INFO_TIMEOUT).await?;
    let device_info = DeviceInfoResponse::decode(&info_payload).map_err(ConnectionError::Codec).map_err(HandshakeError::Connection)?;

    if device_info.has_deep_sleep {
        connection.set_deep_sleep_mode(true);
    }

    Ok(device_info)
}

/// Converts a low-level connection event into a facade-level one,
/// collapsing `Message`/`StateChanged` (which the facade handles itself,
/// via its own subscription to the raw event stream) down to the subset
/// surfaced directly to client callers.
pub fn to_client_event(event: &ConnectionEvent) -> Option<ClientEvent> {
    match event {
        ConnectionEvent::Connected => Some(ClientEvent::Connected),
        ConnectionEvent::Disconnected { reason } => Some(ClientEvent::Disconnected { reason: reason.clone() }),
        ConnectionEvent::Error(e) => Some(ClientEvent::Error(e.clone())),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_guard_rejects_concurrent_acquire() {
        let guard = AuthGuard::new();
        let _first = guard.acquire().unwrap();
        assert!(matches!(guard.acquire(), Err(HandshakeError::AlreadyAuthenticating)));
    }

    #[test]
    fn auth_guard_releases_on_drop() {
        let guard = AuthGuard::new();
        {
            let _first = guard.acquire().unwrap();
        }
        assert!(guard.acquire().is_ok());
    }
}
