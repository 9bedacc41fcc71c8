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

//! Noise handshake and transport, driven against a real `snow` responder
//! standing in for the device side.

use esphome_native_api::noise::{NoiseHandshake, PROLOGUE};

const PATTERN: &str = "Noise_NNpsk0_25519_ChaChaPoly_SHA256";

fn responder(psk: &[u8; 32]) -> snow::HandshakeState {
    snow::Builder::new(PATTERN.parse().unwrap()).psk(0, psk).prologue(PROLOGUE).build_responder().unwrap()
}

#[test]
fn handshake_and_data_round_trip_against_a_real_responder() {
    let psk = [7u8; 32];
    let mut initiator = NoiseHandshake::new_initiator(&psk).unwrap();
    let mut device = responder(&psk);

    let msg1 = initiator.write_first_message().unwrap();
    let mut scratch = vec![0u8; 256];
    device.read_message(&msg1, &mut scratch).unwrap();

    let mut msg2 = vec![0u8; 256];
    let len = device.write_message(&[], &mut msg2).unwrap();
    msg2.truncate(len);

    let mut client_transport = initiator.read_final_message(&msg2).unwrap();
    let mut device_transport = device.into_transport_mode().unwrap();

    // Client -> device: data-phase plaintext is a fixed 4-byte
    // [type_hi, type_lo, len_hi, len_lo] header ahead of the payload,
    // distinct from the plaintext wire's varint-based frame codec.
    let data = b"hello device";
    let mut frame = Vec::with_capacity(4 + data.len());
    let message_type = message_type_id();
    frame.push(((message_type >> 8) & 0xff) as u8);
    frame.push((message_type & 0xff) as u8);
    frame.push(((data.len() >> 8) & 0xff) as u8);
    frame.push((data.len() & 0xff) as u8);
    frame.extend_from_slice(data);

    let ciphertext = client_transport.encrypt(&frame).unwrap();
    let mut plaintext = vec![0u8; ciphertext.len()];
    let len = device_transport.read_message(&ciphertext, &mut plaintext).unwrap();
    plaintext.truncate(len);

    let decoded_type = ((plaintext[0] as u64) << 8) | plaintext[1] as u64;
    assert_eq!(decoded_type, message_type_id());
    assert_eq!(&plaintext[4..], b"hello device");

    // Device -> client, the other direction.
    let mut reply_cipher = vec![0u8; 256];
    let reply_len = device_transport.write_message(b"ack", &mut reply_cipher).unwrap();
    reply_cipher.truncate(reply_len);
    let decrypted = client_transport.decrypt(&reply_cipher).unwrap();
    assert_eq!(decrypted, b"ack");
}

fn message_type_id() -> u64 {
    10
}
