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

//! Noise transport: `Noise_NNpsk0_25519_ChaChaPoly_SHA256` handshake and
//! per-record encrypt/decrypt. The envelope each record travels in —
//! `NOISE_HELLO`, the `[0x01, len_hi, len_lo]` record framing, the
//! `ServerHello` step, and the fixed 4-byte type+length header wrapped
//! inside the data-phase plaintext — lives in `connection.rs`; this module
//! only ever sees raw handshake messages and raw plaintext/ciphertext.
//!
//! Modeled on `node/messages/src/helpers/noise_codec.rs`, which drives a
//! `snow` handshake/transport split behind a small state
//! enum; adapted from its 3-message `Noise_XX` pattern (mutual, no PSK) to
//! this protocol's 2-message `Noise_NNpsk0` (responder authenticated only
//! by knowledge of the PSK, no static keys at all).

use snow::{Builder, TransportState};

use crate::error::NoiseError;

const NOISE_PATTERN: &str = "Noise_NNpsk0_25519_ChaChaPoly_SHA256";

/// Fixed prologue mixed into the handshake transcript so a client speaking
/// a different protocol (or protocol version) cannot complete a handshake
/// against an ESPHome device, and vice versa.
pub const PROLOGUE: &[u8] = b"NoiseAPIInit\x00\x00";

/// Drives the two-message `Noise_NNpsk0` handshake, then hands back a
/// [`NoiseTransport`] for the data phase. The client is always the Noise
/// initiator; the device is always the responder.
pub struct NoiseHandshake {
    state: snow::HandshakeState,
}

impl NoiseHandshake {
    /// Starts a new handshake as initiator, given the 32-byte PSK decoded
    /// from the device's `noise_psk` configuration.
    pub fn new_initiator(psk: &[u8; 32]) -> Result<Self, NoiseError> {
        let params = NOISE_PATTERN.parse().map_err(|e| NoiseError::HandshakeFailed(format!("{e}")))?;
        let state = Builder::new(params)
            .psk(0, psk)
            .prologue(PROLOGUE)
            .build_initiator()
            .map_err(|e| NoiseError::HandshakeFailed(e.to_string()))?;
        Ok(Self { state })
    }

    /// Produces the first handshake message (`-> e`) to send to the device.
    pub fn write_first_message(&mut self) -> Result<Vec<u8>, NoiseError> {
        let mut buf = vec![0u8; 128];
        let len = self
            .state
            .write_message(&[], &mut buf)
            .map_err(|e| NoiseError::HandshakeFailed(e.to_string()))?;
        buf.truncate(len);
        Ok(buf)
    }

    /// Consumes the device's response (`<- e, ee`) and completes the
    /// handshake, splitting into a [`NoiseTransport`].
    pub fn read_final_message(mut self, message: &[u8]) -> Result<NoiseTransport, NoiseError> {
        let mut payload = vec![0u8; message.len()];
        self.state
            .read_message(message, &mut payload)
            .map_err(|e| NoiseError::HandshakeFailed(e.to_string()))?;
        if !self.state.is_handshake_finished() {
            return Err(NoiseError::HandshakeFailed("handshake did not complete after two messages".into()));
        }
        let transport =
            self.state.into_transport_mode().map_err(|e| NoiseError::HandshakeFailed(e.to_string()))?;
        Ok(NoiseTransport { transport })
    }
}

/// Post-handshake encrypt/decrypt state. Each call encrypts or decrypts
/// exactly one record; nonce bookkeeping is internal to `snow`'s
/// `TransportState` and advances with every call in lockstep with the peer.
pub struct NoiseTransport {
    transport: TransportState,
}

/// Noise has a 65535-byte ciphertext limit per message; frames larger than
/// this must be split into multiple Noise records before reaching the
/// frame codec. In practice ESPHome payloads stay well under this, but the
/// transport enforces it rather than silently truncating.
pub const MAX_NOISE_MESSAGE_LEN: usize = 65535;

impl NoiseTransport {
    /// Encrypts `plaintext` into a single Noise record.
    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, NoiseError> {
        if plaintext.len() > MAX_NOISE_MESSAGE_LEN - 16 {
            return Err(NoiseError::CryptoFailed(format!(
                "plaintext of {} bytes exceeds the {}-byte noise record limit",
                plaintext.len(),
                MAX_NOISE_MESSAGE_LEN - 16
            )));
        }
        let mut out = vec![0u8; plaintext.len() + 16];
        let len = self
            .transport
            .write_message(plaintext, &mut out)
            .map_err(|e| NoiseError::CryptoFailed(e.to_string()))?;
        out.truncate(len);
        Ok(out)
    }

    /// Decrypts a single Noise record back into plaintext.
    pub fn decrypt(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>, NoiseError> {
        let mut out = vec![0u8; ciphertext.len()];
        let len = self
            .transport
            .read_message(ciphertext, &mut out)
            .map_err(|e| NoiseError::CryptoFailed(e.to_string()))?;
        out.truncate(len);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handshake_pair(psk: &[u8; 32]) -> (NoiseTransport, NoiseTransport) {
        let params: snow::params::NoiseParams = NOISE_PATTERN.parse().unwrap();
        let mut initiator = Builder::new(params.clone())
            .psk(0, psk)
            .prologue(PROLOGUE)
            .build_initiator()
            .unwrap();
        let mut responder = Builder::new(params).psk(0, psk).prologue(PROLOGUE).build_responder().unwrap();

        let mut buf = [0u8; 128];
        let len = initiator.write_message(&[], &mut buf).unwrap();
        let mut payload = [0u8; 128];
        responder.read_message(&buf[..len], &mut payload).unwrap();

        let len = responder.write_message(&[], &mut buf).unwrap();
        initiator.read_message(&buf[..len], &mut payload).unwrap();

        (
            NoiseTransport { transport: initiator.into_transport_mode().unwrap() },
            NoiseTransport { transport: responder.into_transport_mode().unwrap() },
        )
    }

    #[test]
    fn handshake_round_trip_via_public_api() {
        let psk = [7u8; 32];
        let mut client = NoiseHandshake::new_initiator(&psk).unwrap();
        let msg1 = client.write_first_message().unwrap();

        let params: snow::params::NoiseParams = NOISE_PATTERN.parse().unwrap();
        let mut server = Builder::new(params).psk(0, &psk).prologue(PROLOGUE).build_responder().unwrap();
        let mut scratch = [0u8; 128];
        server.read_message(&msg1, &mut scratch).unwrap();
        let mut buf = [0u8; 128];
        let len = server.write_message(&[], &mut buf).unwrap();

        let mut transport = client.read_final_message(&buf[..len]).unwrap();
        let mut server_transport = server.into_transport_mode().unwrap();

        let ciphertext = transport.encrypt(b"hello device").unwrap();
        let mut out = vec![0u8; ciphertext.len()];
        let n = server_transport.read_message(&ciphertext, &mut out).unwrap();
        assert_eq!(&out[..n], b"hello device");
    }

    #[test]
    fn mismatched_psk_fails_handshake() {
        let mut client = NoiseHandshake::new_initiator(&[1u8; 32]).unwrap();
        let msg1 = client.write_first_message().unwrap();

        let params: snow::params::NoiseParams = NOISE_PATTERN.parse().unwrap();
        let mut server = Builder::new(params).psk(0, &[2u8; 32]).prologue(PROLOGUE).build_responder().unwrap();
        let mut scratch = [0u8; 128];
        assert!(server.read_message(&msg1, &mut scratch).is_err());
    }

    #[test]
    fn encrypted_records_round_trip() {
        let (mut a, mut b) = handshake_pair(&[9u8; 32]);
        let ciphertext = a.encrypt(b"state update payload").unwrap();
        let plaintext = b.decrypt(&ciphertext).unwrap();
        assert_eq!(plaintext, b"state update payload");
    }

    #[test]
    fn oversized_plaintext_is_rejected() {
        let (mut a, _b) = handshake_pair(&[3u8; 32]);
        let huge = vec![0u8; MAX_NOISE_MESSAGE_LEN];
        assert!(matches!(a.encrypt(&huge), Err(NoiseError::CryptoFailed(_))));
    }
}
