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

//! Connection configuration and its builder defaults.

use std::time::Duration;

use crate::error::{Error, HandshakeError, NoiseError};

/// Reconnect behavior, kept as its own small struct so it can be disabled
/// wholesale for deep-sleep devices.
#[derive(Clone, Debug)]
pub struct ReconnectPolicy {
    pub enabled: bool,
    pub interval: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self { enabled: true, interval: Duration::from_secs(5) }
    }
}

/// Immutable connection parameters.
#[derive(Clone, Debug)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
    /// 32 raw PSK bytes, decoded up front from the base64 form ESPHome exposes.
    pub psk: Option<[u8; 32]>,
    pub client_info: String,
    pub reconnect: ReconnectPolicy,
    pub ping_interval: Duration,
    pub ping_timeout: Duration,
    pub connect_timeout: Duration,
}

impl ConnectionConfig {
    /// Builds a config for an unencrypted (plaintext) connection.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: 6053,
            password: None,
            psk: None,
            client_info: "esphome-native-api-rs".to_string(),
            reconnect: ReconnectPolicy::default(),
            ping_interval: Duration::from_secs(20),
            ping_timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Configures Noise encryption from a base64-encoded 32-byte PSK, the
    /// same `noise_psk` string ESPHome prints in its device config.
    ///
    /// Validated eagerly: a malformed key is a configuration-time error,
    /// not something discovered mid-handshake.
    pub fn with_encryption_key(mut self, base64_psk: &str) -> Result<Self, Error> {
        use base64::Engine;
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(base64_psk.trim())
            .map_err(|e| Error::Noise(NoiseError::InvalidPsk(e.to_string())))?;
        let psk: [u8; 32] = bytes
            .try_into()
            .map_err(|_| Error::Handshake(HandshakeError::InvalidEncryptionKey("PSK must be 32 bytes".into())))?;
        self.psk = Some(psk);
        Ok(self)
    }

    pub fn with_client_info(mut self, client_info: impl Into<String>) -> Self {
        self.client_info = client_info.into();
        self
    }

    pub fn with_reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    pub fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }

    pub fn with_ping_timeout(mut self, timeout: Duration) -> Self {
        self.ping_timeout = timeout;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn is_encrypted(&self) -> bool {
        self.psk.is_some()
    }
}
