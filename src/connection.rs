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

//! Connection: owns the TCP stream, drives liveness timers, runs the
//! reconnect loop, and exposes a typed send/receive interface to the
//! handshake driver and client facade above it.
//!
//! Follows the single-task-per-peer shape of
//! `node/bft/src/gateway.rs`'s per-connection reader/writer split, but
//! collapsed to one task per connection: a single execution context
//! serializes socket reads, timer callbacks, and sends for a given
//! connection, so there is nothing to gain from splitting reader/writer
//! tasks the way a multi-peer gateway does.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::SinkExt;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, oneshot, RwLock};
use tokio::time::Instant;
use tokio_stream::StreamExt;
use tokio_util::codec::Framed;

use crate::codec::FrameCodec;
use crate::config::ConnectionConfig;
use crate::error::{CodecError, ConnectionError, NoiseError};
use crate::events::ConnectionEvent;
use crate::noise::{NoiseHandshake, NoiseTransport};
use crate::wire::messages::ApiMessage;

/// Lifecycle phases a connection moves through, from first dial to
/// permanent teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    Idle,
    Connecting,
    HandshakingNoise,
    Open,
    Reconnecting,
    Destroyed,
}

/// Observable connection attributes. Owned exclusively by the
/// `Connection`; everything else only reads it through accessors.
#[derive(Debug, Clone, Default)]
pub struct ConnectionState {
    pub connected: bool,
    pub authenticated: bool,
    pub api_version: Option<(u32, u32)>,
    pub server_info: Option<String>,
}

/// The one-byte marker ESPHome's noise frame helper uses ahead of every
/// Noise-phase record (handshake and data alike), distinct from the `0x00`
/// plaintext preamble.
const NOISE_FRAME_MARKER: u8 = 0x01;

/// One-time preamble sent before the first handshake frame, nothing else.
/// `[0x01, 0x00, 0x00]` — the same marker byte as every other Noise-phase
/// record, with a zero length, acting as a protocol-selection handshake of
/// its own ahead of the actual Noise handshake.
const NOISE_HELLO: [u8; 3] = [0x01, 0x00, 0x00];

async fn write_noise_frame(stream: &mut TcpStream, payload: &[u8]) -> std::io::Result<()> {
    let mut header = [0u8; 3];
    header[0] = NOISE_FRAME_MARKER;
    header[1..3].copy_from_slice(&(payload.len() as u16).to_be_bytes());
    stream.write_all(&header).await?;
    stream.write_all(payload).await
}

async fn read_noise_frame(stream: &mut TcpStream) -> std::io::Result<Vec<u8>> {
    let mut header = [0u8; 3];
    stream.read_exact(&mut header).await?;
    if header[0] != NOISE_FRAME_MARKER {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("expected noise marker byte 0x{NOISE_FRAME_MARKER:02x}, got 0x{:02x}", header[0]),
        ));
    }
    let len = u16::from_be_bytes([header[1], header[2]]) as usize;
    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload).await?;
    Ok(payload)
}

/// Builds the data-phase plaintext: a fixed 4-byte big-endian
/// `[type, length]` header ahead of the payload, distinct from the
/// varint-based preamble the plaintext wire uses — this framing lives
/// entirely inside the Noise-encrypted record, never on the wire by itself.
fn encode_noise_message(message_type: u64, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + payload.len());
    out.push(((message_type >> 8) & 0xff) as u8);
    out.push((message_type & 0xff) as u8);
    out.push(((payload.len() >> 8) & 0xff) as u8);
    out.push((payload.len() & 0xff) as u8);
    out.extend_from_slice(payload);
    out
}

/// Parses decrypted data-phase plaintext back into `(message_type,
/// payload)`. The embedded length is ignored in favor of the actual
/// remaining byte count, matching how a real device's own framing is
/// trusted to have already sized the Noise record correctly.
fn decode_noise_message(plaintext: &[u8]) -> Result<(u64, Bytes), ConnectionError> {
    if plaintext.len() < 4 {
        return Err(CodecError::Truncated(plaintext.len()).into());
    }
    let message_type = ((plaintext[0] as u64) << 8) | plaintext[1] as u64;
    Ok((message_type, Bytes::copy_from_slice(&plaintext[4..])))
}

/// The plaintext and Noise-encrypted wires behind one capability set,
/// dispatched statically rather than through duck-typed field access.
enum Transport {
    Plain(Framed<TcpStream, FrameCodec>),
    Noise { stream: TcpStream, cipher: NoiseTransport },
}

impl Transport {
    async fn connect(config: &ConnectionConfig) -> Result<Self, ConnectionError> {
        let stream = tokio::time::timeout(config.connect_timeout, TcpStream::connect((config.host.as_str(), config.port)))
            .await
            .map_err(|_| ConnectionError::ConnectionTimeout(config.connect_timeout))?
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::ConnectionRefused => ConnectionError::ConnectionRefused(format!("{}:{}", config.host, config.port)),
                _ => ConnectionError::Io(e),
            })?;
        stream.set_nodelay(true).ok();

        match config.psk {
            None => Ok(Self::Plain(Framed::new(stream, FrameCodec))),
            Some(psk) => {
                let mut stream = stream;
                let mut handshake = NoiseHandshake::new_initiator(&psk)?;
                let msg1 = handshake.write_first_message()?;

                // NOISE_HELLO and the first handshake frame go out as one
                // write; the frame payload carries a leading 0x00 success
                // prefix ahead of the raw handshake bytes.
                let mut frame_payload = Vec::with_capacity(1 + msg1.len());
                frame_payload.push(0x00);
                frame_payload.extend_from_slice(&msg1);
                let mut packet = Vec::with_capacity(NOISE_HELLO.len() + 3 + frame_payload.len());
                packet.extend_from_slice(&NOISE_HELLO);
                packet.push(NOISE_FRAME_MARKER);
                packet.extend_from_slice(&(frame_payload.len() as u16).to_be_bytes());
                packet.extend_from_slice(&frame_payload);
                stream.write_all(&packet).await?;

                // ServerHello: [chosen_proto, server_name\0, mac\0], arrives
                // before the handshake response and must be validated first.
                let server_hello = read_noise_frame(&mut stream).await?;
                let chosen_proto = *server_hello
                    .first()
                    .ok_or_else(|| NoiseError::HandshakeFailed("ServerHello is empty".into()))?;
                if chosen_proto != 0x01 {
                    return Err(NoiseError::HandshakeFailed(format!("server selected unknown protocol {chosen_proto}")).into());
                }

                let hs_response = read_noise_frame(&mut stream).await?;
                let prefix = *hs_response
                    .first()
                    .ok_or_else(|| NoiseError::HandshakeFailed("handshake response is empty".into()))?;
                if prefix != 0x00 {
                    let message = if hs_response.len() > 1 {
                        String::from_utf8_lossy(&hs_response[1..]).into_owned()
                    } else {
                        "unknown handshake error".to_string()
                    };
                    return Err(NoiseError::HandshakeFailed(message).into());
                }

                let cipher = handshake.read_final_message(&hs_response[1..])?;
                Ok(Self::Noise { stream, cipher })
            }
        }
    }

    async fn recv(&mut self) -> Result<(u64, Bytes), ConnectionError> {
        match self {
            Self::Plain(framed) => match framed.next().await {
                Some(Ok(frame)) => Ok(frame),
                Some(Err(e)) => Err(ConnectionError::Codec(e)),
                None => Err(ConnectionError::ConnectionLost),
            },
            Self::Noise { stream, cipher } => {
                let ciphertext = read_noise_frame(stream).await.map_err(ConnectionError::Io)?;
                let plaintext = cipher.decrypt(&ciphertext)?;
                decode_noise_message(&plaintext)
            }
        }
    }

    async fn send(&mut self, message_type: u64, payload: Bytes) -> Result<(), ConnectionError> {
        match self {
            Self::Plain(framed) => framed.send((message_type, payload)).await.map_err(ConnectionError::Codec),
            Self::Noise { stream, cipher } => {
                let plaintext = encode_noise_message(message_type, &payload);
                let ciphertext = cipher.encrypt(&plaintext)?;
                write_noise_frame(stream, &ciphertext).await.map_err(ConnectionError::Io)
            }
        }
    }
}

/// Outcome of structural inbound-message handling: whether the session loop
/// should stop, the message was fully handled in-place, or it should be
/// forwarded to subscribers as-is.
enum InboundOutcome {
    Forward,
    Consumed,
    Stop,
}

enum Command {
    Send { message_type: u64, payload: Bytes, ack: oneshot::Sender<Result<(), ConnectionError>> },
    Disconnect,
    Destroy,
}

/// Handle to a running connection. Cloning shares the same background
/// session and event bus.
#[derive(Clone)]
pub struct Connection {
    config: ConnectionConfig,
    state: Arc<RwLock<ConnectionState>>,
    phase: Arc<RwLock<ConnectionPhase>>,
    deep_sleep: Arc<AtomicBool>,
    cmd_tx: Arc<RwLock<Option<mpsc::Sender<Command>>>>,
    events: broadcast::Sender<ConnectionEvent>,
    expected_disconnect: Arc<AtomicBool>,
    /// Set by `disconnect_without_reconnect` to suppress the one reconnect
    /// attempt `end_session` would otherwise schedule. Consumed (reset to
    /// `false`) the next time `end_session` runs.
    suppress_reconnect: Arc<AtomicBool>,
}

impl Connection {
    pub fn new(config: ConnectionConfig) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            config,
            state: Arc::new(RwLock::new(ConnectionState::default())),
            phase: Arc::new(RwLock::new(ConnectionPhase::Idle)),
            deep_sleep: Arc::new(AtomicBool::new(false)),
            cmd_tx: Arc::new(RwLock::new(None)),
            events,
            expected_disconnect: Arc::new(AtomicBool::new(false)),
            suppress_reconnect: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events.subscribe()
    }

    pub async fn phase(&self) -> ConnectionPhase {
        *self.phase.read().await
    }

    pub async fn is_connected(&self) -> bool {
        matches!(self.phase().await, ConnectionPhase::Open)
    }

    pub async fn is_authenticated(&self) -> bool {
        self.state.read().await.authenticated
    }

    pub async fn get_state(&self) -> ConnectionState {
        self.state.read().await.clone()
    }

    pub async fn set_authenticated(&self, value: bool) {
        self.state.write().await.authenticated = value;
        self.emit_state_change().await;
    }

    pub async fn set_api_version(&self, major: u32, minor: u32) {
        self.state.write().await.api_version = Some((major, minor));
        self.emit_state_change().await;
    }

    pub async fn set_server_info(&self, info: String) {
        self.state.write().await.server_info = Some(info);
        self.emit_state_change().await;
    }

    pub fn set_deep_sleep_mode(&self, enabled: bool) {
        self.deep_sleep.store(enabled, Ordering::SeqCst);
    }

    async fn emit_state_change(&self) {
        let phase = self.phase().await;
        let _ = self.events.send(ConnectionEvent::StateChanged(phase));
    }

    async fn set_phase(&self, phase: ConnectionPhase) {
        *self.phase.write().await = phase;
    }

    /// Establishes the TCP stream and, if configured, completes the Noise
    /// handshake. Resolves once the transport reaches `Open`;
    /// application-level handshake/auth is the caller's (`handshake.rs`'s)
    /// responsibility.
    pub async fn connect(&self) -> Result<(), ConnectionError> {
        if matches!(self.phase().await, ConnectionPhase::Destroyed) {
            return Err(ConnectionError::Destroyed);
        }

        self.set_phase(ConnectionPhase::Connecting).await;
        if self.config.is_encrypted() {
            self.set_phase(ConnectionPhase::HandshakingNoise).await;
        }

        let attempts = if self.config.reconnect.enabled { 3 } else { 1 };
        let mut backoff = Duration::from_secs(1);
        let mut last_err = None;

        for attempt in 0..attempts {
            match Transport::connect(&self.config).await {
                Ok(transport) => {
                    self.begin_session(transport).await;
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(target: "connection", attempt, error = %e, "connect attempt failed");
                    last_err = Some(e);
                    if attempt + 1 < attempts {
                        tokio::time::sleep(backoff).await;
                        backoff = (backoff * 2).min(Duration::from_secs(5));
                    }
                }
            }
        }

        let err = last_err.unwrap_or(ConnectionError::NotConnected);
        if self.config.reconnect.enabled {
            self.spawn_reconnect_loop();
        } else {
            self.set_phase(ConnectionPhase::Idle).await;
        }
        Err(err)
    }

    fn spawn_reconnect_loop(&self) {
        let this = self.clone();
        tokio::spawn(async move {
            this.set_phase(ConnectionPhase::Reconnecting).await;
            loop {
                if matches!(this.phase().await, ConnectionPhase::Destroyed) {
                    return;
                }
                tokio::time::sleep(this.config.reconnect.interval).await;
                this.set_phase(ConnectionPhase::Connecting).await;
                match Transport::connect(&this.config).await {
                    Ok(transport) => {
                        this.begin_session(transport).await;
                        return;
                    }
                    Err(e) => {
                        tracing::warn!(target: "connection", error = %e, "reconnect attempt failed");
                        this.set_phase(ConnectionPhase::Reconnecting).await;
                    }
                }
            }
        });
    }

    async fn begin_session(&self, transport: Transport) {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        *self.cmd_tx.write().await = Some(cmd_tx);
        *self.state.write().await = ConnectionState { connected: true, ..ConnectionState::default() };
        self.expected_disconnect.store(false, Ordering::SeqCst);
        self.set_phase(ConnectionPhase::Open).await;
        let _ = self.events.send(ConnectionEvent::Connected);

        let this = self.clone();
        tokio::spawn(async move { this.run_session(transport, cmd_rx).await });
    }

    /// The session loop: one task owns the transport, the ping timers, and
    /// the command channel for the lifetime of a single TCP connection.
    async fn run_session(&self, mut transport: Transport, mut cmd_rx: mpsc::Receiver<Command>) {
        let mut ping_due = tokio::time::interval(self.config.ping_interval);
        ping_due.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut awaiting_pong: Option<Instant> = None;

        loop {
            let ping_timeout_fires = async {
                match awaiting_pong {
                    Some(sent_at) => tokio::time::sleep_until(sent_at + self.config.ping_timeout).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                frame = transport.recv() => {
                    match frame {
                        Ok((message_type, payload)) => {
                            match self.handle_inbound(message_type, &payload, &mut transport, &mut awaiting_pong).await {
                                InboundOutcome::Stop => break,
                                InboundOutcome::Consumed => {}
                                InboundOutcome::Forward => {
                                    let _ = self.events.send(ConnectionEvent::Message { message_type, payload });
                                }
                            }
                        }
                        Err(e) => {
                            tracing::warn!(target: "connection", error = %e, "session read failed");
                            let _ = self.events.send(ConnectionEvent::Error(e.to_string()));
                            break;
                        }
                    }
                }
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(Command::Send { message_type, payload, ack }) => {
                            let result = transport.send(message_type, payload).await;
                            let _ = ack.send(result);
                        }
                        Some(Command::Disconnect) | None => break,
                        Some(Command::Destroy) => {
                            self.set_phase(ConnectionPhase::Destroyed).await;
                            break;
                        }
                    }
                }
                _ = ping_due.tick(), if !self.deep_sleep.load(Ordering::SeqCst) && awaiting_pong.is_none() => {
                    if transport.send(crate::wire::messages::message_type::PING_REQUEST as u64, Bytes::new()).await.is_ok() {
                        awaiting_pong = Some(Instant::now());
                    }
                }
                _ = ping_timeout_fires, if awaiting_pong.is_some() => {
                    tracing::warn!(target: "connection", "ping timed out, treating as disconnect");
                    break;
                }
            }
        }

        self.end_session().await;
    }

    /// Messages the Connection handles structurally without surfacing to
    /// the facade: ping/pong liveness, disconnect acknowledgment, and time
    /// sync all stay internal to the transport layer.
    async fn handle_inbound(&self, message_type: u64, payload: &[u8], transport: &mut Transport, awaiting_pong: &mut Option<Instant>) -> InboundOutcome {
        use crate::wire::messages::message_type as mt;
        match message_type as u32 {
            mt::PING_REQUEST => {
                let _ = transport.send(mt::PING_RESPONSE as u64, Bytes::new()).await;
                InboundOutcome::Consumed
            }
            mt::PING_RESPONSE => {
                *awaiting_pong = None;
                InboundOutcome::Consumed
            }
            mt::DISCONNECT_REQUEST => {
                let _ = transport.send(mt::DISCONNECT_RESPONSE as u64, Bytes::new()).await;
                // Deep-sleep devices own their connection cadence; `end_session`
                // checks this flag alongside `deep_sleep` to skip the reconnect loop.
                self.expected_disconnect.store(true, Ordering::SeqCst);
                InboundOutcome::Stop
            }
            mt::GET_TIME_REQUEST => {
                let epoch_seconds = std::time::SystemTime::now()
                    .duration_since(std::time::UNIX_EPOCH)
                    .map(|d| d.as_secs() as u32)
                    .unwrap_or(0);
                let response = crate::wire::messages::GetTimeResponse { epoch_seconds };
                let _ = transport.send(mt::GET_TIME_RESPONSE as u64, Bytes::from(response.encode())).await;
                InboundOutcome::Consumed
            }
            _ => {
                let _ = payload;
                InboundOutcome::Forward
            }
        }
    }

    async fn end_session(&self) {
        *self.cmd_tx.write().await = None;
        let reason = if self.expected_disconnect.load(Ordering::SeqCst) { None } else { Some("connection lost".to_string()) };
        let was_authenticated_and_asleep = self.deep_sleep.load(Ordering::SeqCst) && self.expected_disconnect.load(Ordering::SeqCst);

        if matches!(self.phase().await, ConnectionPhase::Destroyed) {
            *self.state.write().await = ConnectionState::default();
            let _ = self.events.send(ConnectionEvent::Disconnected { reason });
            return;
        }

        *self.state.write().await = ConnectionState::default();
        self.set_phase(ConnectionPhase::Idle).await;
        let _ = self.events.send(ConnectionEvent::Disconnected { reason });

        let reconnect_suppressed = self.suppress_reconnect.swap(false, Ordering::SeqCst);
        if self.config.reconnect.enabled && !was_authenticated_and_asleep && !reconnect_suppressed {
            self.spawn_reconnect_loop();
        }
    }

    /// Frames and transmits `payload` under `message_type`. Requires `Open`.
    pub async fn send(&self, message_type: u64, payload: Bytes) -> Result<(), ConnectionError> {
        let tx = self.cmd_tx.read().await.clone().ok_or(ConnectionError::NotConnected)?;
        let (ack_tx, ack_rx) = oneshot::channel();
        tx.send(Command::Send { message_type, payload, ack: ack_tx }).await.map_err(|_| ConnectionError::NotConnected)?;
        ack_rx.await.map_err(|_| ConnectionError::ConnectionLost)?
    }

    /// Orderly local teardown. Idempotent: calling it with nothing to tear
    /// down is a no-op.
    pub async fn disconnect(&self) {
        if let Some(tx) = self.cmd_tx.read().await.clone() {
            let _ = tx.send(Command::Disconnect).await;
        }
    }

    /// Tears the connection down the same way `disconnect()` does, but
    /// suppresses the one reconnect attempt that would otherwise follow.
    /// Used by the handshake/auth driver: a version-mismatch or
    /// invalid-password failure must reject the caller's `connect()`
    /// outright rather than silently retrying behind its back.
    pub(crate) async fn disconnect_without_reconnect(&self) {
        self.suppress_reconnect.store(true, Ordering::SeqCst);
        self.disconnect().await;
    }

    /// Permanent shutdown; subsequent `connect()` calls fail.
    pub async fn destroy(&self) {
        if let Some(tx) = self.cmd_tx.read().await.clone() {
            let _ = tx.send(Command::Destroy).await;
        } else {
            self.set_phase(ConnectionPhase::Destroyed).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noise_data_message_round_trips_through_the_fixed_header() {
        let encoded = encode_noise_message(42, b"state update");
        let (message_type, payload) = decode_noise_message(&encoded).unwrap();
        assert_eq!(message_type, 42);
        assert_eq!(&payload[..], b"state update");
    }

    #[test]
    fn noise_data_message_rejects_plaintext_shorter_than_the_header() {
        let err = decode_noise_message(&[0x00, 0x01]).unwrap_err();
        assert!(matches!(err, ConnectionError::Codec(CodecError::Truncated(2))));
    }
}
