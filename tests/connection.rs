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

//! End-to-end scenarios driven against a hand-rolled fake device speaking
//! the plaintext wire protocol over a loopback `TcpListener`.

use std::time::Duration;

use bytes::Bytes;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

use esphome_native_api::client::Client;
use esphome_native_api::codec::{encode_frame, FrameDecoder};
use esphome_native_api::config::ConnectionConfig;
use esphome_native_api::error::Error;
use esphome_native_api::wire::messages::{
    message_type, ApiMessage, ConnectResponse, DeviceInfoResponse, DisconnectRequest, HelloResponse, PingRequest,
};
use esphome_native_api::ClientEvent;

async fn bind_loopback() -> (TcpListener, u16) {
    let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
    let port = listener.local_addr().unwrap().port();
    (listener, port)
}

async fn read_frame(stream: &mut TcpStream, decoder: &mut FrameDecoder) -> (u64, Bytes) {
    loop {
        let mut buf = [0u8; 4096];
        use tokio::io::AsyncReadExt;
        let n = stream.read(&mut buf).await.unwrap();
        assert!(n > 0, "peer closed before a frame arrived");
        let frames = decoder.feed(&buf[..n]).unwrap();
        if let Some(frame) = frames.into_iter().next() {
            return frame;
        }
    }
}

async fn write_frame(stream: &mut TcpStream, message_type: u64, payload: &[u8]) {
    use tokio::io::AsyncWriteExt;
    stream.write_all(&encode_frame(message_type, payload)).await.unwrap();
}

/// Hello -> (Connect if password expected) -> DeviceInfo, the minimum a
/// fake device must do to let a client finish its handshake.
async fn serve_handshake(stream: &mut TcpStream, expect_password: Option<&str>, has_deep_sleep: bool) {
    let mut decoder = FrameDecoder::new();

    let (t, _payload) = read_frame(stream, &mut decoder).await;
    assert_eq!(t as u32, message_type::HELLO_REQUEST);
    let hello = HelloResponse { api_version_major: 1, api_version_minor: 9, server_info: "fake-device".into(), name: "kitchen".into() };
    write_frame(stream, message_type::HELLO_RESPONSE as u64, &hello.encode()).await;

    if let Some(expected) = expect_password {
        let (t, payload) = read_frame(stream, &mut decoder).await;
        assert_eq!(t as u32, message_type::CONNECT_REQUEST);
        let req = esphome_native_api::wire::messages::ConnectRequest::decode(&payload).unwrap();
        let invalid_password = req.password != expected;
        let resp = ConnectResponse { invalid_password };
        write_frame(stream, message_type::CONNECT_RESPONSE as u64, &resp.encode()).await;
        if invalid_password {
            return;
        }
    }

    let (t, _payload) = read_frame(stream, &mut decoder).await;
    assert_eq!(t as u32, message_type::DEVICE_INFO_REQUEST);
    let info = DeviceInfoResponse { name: "kitchen".into(), has_deep_sleep, friendly_name: "Kitchen Sensor".into(), ..Default::default() };
    write_frame(stream, message_type::DEVICE_INFO_RESPONSE as u64, &info.encode()).await;
}

#[tokio::test]
async fn connects_and_authenticates_with_correct_password() {
    let (listener, port) = bind_loopback().await;

    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        serve_handshake(&mut stream, Some("hunter2"), false).await;
        stream
    });

    let client = Client::new(ConnectionConfig::new("127.0.0.1").with_port(port).with_password("hunter2"));
    let mut events = client.events();

    client.connect().await.unwrap();
    assert!(client.is_authenticated().await);
    assert_eq!(client.device_info().await.unwrap().friendly_name, "Kitchen Sensor");

    let event = timeout(Duration::from_secs(1), events.recv()).await.unwrap().unwrap();
    assert!(matches!(event, ClientEvent::Connected));

    server.await.unwrap();
}

#[tokio::test]
async fn rejects_wrong_password() {
    let (listener, port) = bind_loopback().await;

    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        serve_handshake(&mut stream, Some("correct-horse"), false).await;
        stream
    });

    let mut config = ConnectionConfig::new("127.0.0.1").with_port(port).with_password("wrong-guess");
    config.reconnect.interval = Duration::from_millis(50);
    let client = Client::new(config);
    let err = client.connect().await.unwrap_err();
    assert!(matches!(err, Error::Handshake(_)));
    assert!(!client.is_authenticated().await);

    server.await.unwrap();

    // An invalid-password failure must not trigger a silent reconnect
    // attempt behind the caller's back.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!client.is_connected().await);
}

#[tokio::test]
async fn automatic_reconnect_reauthenticates_without_a_fresh_connect_call() {
    let (listener, port) = bind_loopback().await;

    let server = tokio::spawn(async move {
        // First session: handshake, then the peer vanishes mid-session.
        let (mut stream, _) = listener.accept().await.unwrap();
        serve_handshake(&mut stream, None, false).await;
        drop(stream);

        // Second session: the reconnect loop should dial back in and the
        // handshake driver should re-run on its own.
        let (mut stream, _) = listener.accept().await.unwrap();
        serve_handshake(&mut stream, None, false).await;
        stream
    });

    let mut config = ConnectionConfig::new("127.0.0.1").with_port(port);
    config.reconnect.interval = Duration::from_millis(50);
    let client = Client::new(config);

    client.connect().await.unwrap();
    assert!(client.is_authenticated().await);

    // Wait for the server to close, the client to notice, and the
    // reconnect + re-handshake cycle to complete — all without calling
    // `client.connect()` again.
    let mut events = client.events();
    let reauthenticated = async {
        loop {
            if matches!(events.recv().await.unwrap(), ClientEvent::Connected) {
                return;
            }
        }
    };
    timeout(Duration::from_secs(5), reauthenticated).await.unwrap();

    assert!(client.is_authenticated().await);
    assert!(client.is_connected().await);

    server.await.unwrap();
}

#[tokio::test]
async fn deep_sleep_device_disconnect_is_not_followed_by_reconnect() {
    let (listener, port) = bind_loopback().await;

    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        serve_handshake(&mut stream, None, true).await;

        let mut decoder = FrameDecoder::new();
        write_frame(&mut stream, message_type::DISCONNECT_REQUEST as u64, &DisconnectRequest.encode()).await;
        let (t, _) = read_frame(&mut stream, &mut decoder).await;
        assert_eq!(t as u32, message_type::DISCONNECT_RESPONSE);
    });

    let mut config = ConnectionConfig::new("127.0.0.1").with_port(port);
    config.reconnect.interval = Duration::from_millis(50);
    let client = Client::new(config);
    let mut events = client.events();

    client.connect().await.unwrap();
    server.await.unwrap();

    let event = timeout(Duration::from_secs(1), events.recv()).await.unwrap().unwrap();
    assert!(matches!(event, ClientEvent::Disconnected { .. }));

    // No reconnect attempt should land on a fresh listener at the same port
    // within the reconnect interval, since the device is asleep.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!client.is_connected().await);
}

#[tokio::test]
async fn idempotent_disconnect_does_not_panic() {
    let (listener, port) = bind_loopback().await;

    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        serve_handshake(&mut stream, None, false).await;
        // Keep the socket open until the client disconnects.
        let mut buf = [0u8; 16];
        use tokio::io::AsyncReadExt;
        let _ = stream.read(&mut buf).await;
    });

    let client = Client::new(ConnectionConfig::new("127.0.0.1").with_port(port));
    client.connect().await.unwrap();

    client.disconnect().await;
    client.disconnect().await;

    server.await.unwrap();
}

#[tokio::test]
async fn ping_request_from_device_gets_a_reply() {
    let (listener, port) = bind_loopback().await;

    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        serve_handshake(&mut stream, None, false).await;

        let mut decoder = FrameDecoder::new();
        write_frame(&mut stream, message_type::PING_REQUEST as u64, &PingRequest.encode()).await;
        let (t, _) = read_frame(&mut stream, &mut decoder).await;
        assert_eq!(t as u32, message_type::PING_RESPONSE);
    });

    let client = Client::new(ConnectionConfig::new("127.0.0.1").with_port(port));
    client.connect().await.unwrap();

    server.await.unwrap();
}

#[tokio::test]
async fn hello_response_with_unsupported_major_version_is_rejected() {
    let (listener, port) = bind_loopback().await;

    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut decoder = FrameDecoder::new();
        let (t, _) = read_frame(&mut stream, &mut decoder).await;
        assert_eq!(t as u32, message_type::HELLO_REQUEST);
        let hello = HelloResponse { api_version_major: 2, api_version_minor: 0, server_info: "future-device".into(), name: "future".into() };
        write_frame(&mut stream, message_type::HELLO_RESPONSE as u64, &hello.encode()).await;
    });

    let mut config = ConnectionConfig::new("127.0.0.1").with_port(port);
    config.reconnect.interval = Duration::from_millis(50);
    let client = Client::new(config);
    let err = client.connect().await.unwrap_err();
    assert!(matches!(err, Error::Handshake(_)));

    server.await.unwrap();
}

#[tokio::test]
async fn concurrent_connect_calls_are_rejected() {
    let (listener, port) = bind_loopback().await;

    let server = tokio::spawn(async move {
        // Accept and never answer Hello, keeping the first connect() in flight.
        let (stream, _) = listener.accept().await.unwrap();
        stream
    });

    let client = Client::new(ConnectionConfig::new("127.0.0.1").with_port(port));
    let first = {
        let client = client.clone();
        tokio::spawn(async move { client.connect().await })
    };

    tokio::time::sleep(Duration::from_millis(100)).await;
    let second = client.connect().await.unwrap_err();
    assert!(matches!(second, Error::AuthenticationInProgress));

    first.abort();
    server.await.unwrap();
}
