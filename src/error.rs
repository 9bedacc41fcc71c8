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

//! Error taxonomy for the ESPHome Native API client.
//!
//! One `thiserror` enum per concern, following the shape of
//! `errors/src/network/*`: small enums with `#[error(...)]` messages
//! and `From` conversions, composed into a single top-level [`Error`] at
//! the public API boundary.

use std::time::Duration;

/// Errors raised by the frame codec.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("frame declared length {len} exceeds the {max} byte cap")]
    MessageTooLarge { len: u64, max: u64 },

    #[error("malformed varint: continuation bit set past 10 bytes")]
    MalformedVarint,

    #[error("decrypted noise message of {0} bytes is shorter than the 4-byte type+length header")]
    Truncated(usize),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CodecError {
    /// Whether this error must tear down the connection rather than just
    /// being reported upward.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::MessageTooLarge { .. } | Self::MalformedVarint | Self::Truncated(_))
    }
}

/// Errors raised by the Noise transport.
#[derive(Debug, thiserror::Error)]
pub enum NoiseError {
    #[error("invalid pre-shared key: {0}")]
    InvalidPsk(String),

    #[error("noise handshake failed: {0}")]
    HandshakeFailed(String),

    #[error("noise encrypt/decrypt failed: {0}")]
    CryptoFailed(String),
}

/// Errors raised by the [`crate::connection::Connection`].
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("connection timed out after {0:?}")]
    ConnectionTimeout(Duration),

    #[error("connection refused by {0}")]
    ConnectionRefused(String),

    #[error("connection reset")]
    ConnectionReset,

    #[error("connection lost")]
    ConnectionLost,

    #[error("not connected")]
    NotConnected,

    #[error("connection already destroyed")]
    Destroyed,

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Noise(#[from] NoiseError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ConnectionError {
    /// Mirrors `CodecError::is_fatal` / AEAD failures: does this error
    /// require tearing the socket down rather than just reporting upward?
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Codec(e) => e.is_fatal(),
            Self::Noise(_) => true,
            Self::ConnectionReset | Self::ConnectionLost | Self::Io(_) => true,
            _ => false,
        }
    }
}

/// Errors raised while driving the handshake/auth sequence.
#[derive(Debug, thiserror::Error)]
pub enum HandshakeError {
    #[error("invalid password")]
    InvalidPassword,

    #[error("invalid encryption key: {0}")]
    InvalidEncryptionKey(String),

    #[error("authentication already in progress")]
    AlreadyAuthenticating,

    #[error("handshake step timed out after {0:?}")]
    Timeout(Duration),

    #[error("protocol version mismatch: server reported {major}.{minor}")]
    ProtocolVersionMismatch { major: u32, minor: u32 },

    #[error(transparent)]
    Connection(#[from] ConnectionError),
}

/// Top-level error type returned from the [`crate::client::Client`] facade.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Handshake(#[from] HandshakeError),

    #[error(transparent)]
    Noise(#[from] NoiseError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("entity with key {0} not found")]
    EntityNotFound(u32),

    #[error("operation '{operation}' timed out after {elapsed:?}")]
    Timeout { operation: &'static str, elapsed: Duration },

    #[error("authentication required")]
    AuthenticationRequired,

    #[error("already authenticating")]
    AuthenticationInProgress,
}

impl Error {
    /// A short, user-facing suggestion for this error kind, if one applies.
    pub fn suggestion(&self) -> Option<&'static str> {
        match self {
            Self::Connection(ConnectionError::ConnectionRefused(_)) => {
                Some("check that the device is powered on and reachable on the configured port")
            }
            Self::Connection(ConnectionError::ConnectionTimeout(_)) => {
                Some("check the host/port and that nothing is blocking the connection")
            }
            Self::Handshake(HandshakeError::InvalidPassword) => Some("verify the configured API password"),
            Self::Handshake(HandshakeError::InvalidEncryptionKey(_)) => {
                Some("verify the base64-encoded noise_psk from the device's ESPHome configuration")
            }
            Self::EntityNotFound(_) => Some("call list_entities() again to refresh the catalog"),
            Self::AuthenticationInProgress => Some("wait for the in-flight connect() call to finish before calling it again"),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
