//! Integration tests for the websocket transport: auth handshake, chunk
//! streaming, and acknowledged delivery.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use interpreter_relay::config::GlobalConfig;
use interpreter_relay::server::{http, AppState};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use super::test_helpers::{assistant, test_config, ScriptedGenerator};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn spawn_server(config: GlobalConfig) -> (SocketAddr, Arc<AppState>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral");
    let addr = listener.local_addr().expect("local addr");
    let generator = ScriptedGenerator::replying(vec![assistant("ok")]);
    let state = AppState::new(config, generator);

    let server_state = Arc::clone(&state);
    tokio::spawn(async move {
        let _ = http::serve_with_listener(listener, server_state).await;
    });
    (addr, state)
}

async fn connect(addr: SocketAddr) -> Client {
    let (client, _) = connect_async(format!("ws://{addr}/"))
        .await
        .expect("websocket connect");
    client
}

async fn send(client: &mut Client, value: Value) {
    client
        .send(Message::Text(value.to_string().into()))
        .await
        .expect("send");
}

async fn recv(client: &mut Client) -> Value {
    loop {
        let message = tokio::time::timeout(Duration::from_secs(5), client.next())
            .await
            .expect("reply in time")
            .expect("stream open")
            .expect("valid frame");
        if let Message::Text(text) = message {
            return serde_json::from_str(text.as_str()).expect("json reply");
        }
    }
}

async fn authenticate(client: &mut Client, key: &str) -> Value {
    send(client, json!({ "auth": key })).await;
    recv(client).await
}

fn user_turn(text: &str) -> Value {
    json!({
        "role": "user",
        "type": "message",
        "content": text,
        "start": true,
        "end": true
    })
}

#[tokio::test]
async fn handshake_accepts_any_key_without_configured_key() {
    let (addr, state) = spawn_server(test_config()).await;
    let mut client = connect(addr).await;

    assert_eq!(authenticate(&mut client, "anything").await, json!({ "auth": true }));

    state.shutdown.cancel();
}

#[tokio::test]
async fn handshake_rejects_wrong_key_then_accepts_right_one() {
    let mut config = test_config();
    config.server.api_key = Some("secret".into());
    let (addr, state) = spawn_server(config).await;
    let mut client = connect(addr).await;

    assert_eq!(authenticate(&mut client, "guess").await, json!({ "auth": false }));
    assert_eq!(authenticate(&mut client, "secret").await, json!({ "auth": true }));

    state.shutdown.cancel();
}

#[tokio::test]
async fn chunks_before_auth_are_refused() {
    let (addr, state) = spawn_server(test_config()).await;
    let mut client = connect(addr).await;

    send(&mut client, user_turn("hi")).await;
    assert_eq!(recv(&mut client).await, json!({ "auth": false }));
    assert!(state.agent.lock().await.messages().is_empty());

    state.shutdown.cancel();
}

#[tokio::test]
async fn turn_is_answered_over_the_socket() {
    let (addr, state) = spawn_server(test_config()).await;
    let mut client = connect(addr).await;
    authenticate(&mut client, "k").await;

    send(&mut client, user_turn("hi")).await;

    assert_eq!(
        recv(&mut client).await,
        json!({ "role": "assistant", "type": "message", "content": "ok" })
    );
    assert_eq!(
        recv(&mut client).await,
        json!({ "role": "server", "type": "status", "content": "complete" })
    );

    state.shutdown.cancel();
}

#[tokio::test]
async fn protocol_error_is_reported_and_connection_survives() {
    let (addr, state) = spawn_server(test_config()).await;
    let mut client = connect(addr).await;
    authenticate(&mut client, "k").await;

    send(&mut client, json!({ "role": "user", "content": "orphan" })).await;

    let error = recv(&mut client).await;
    assert_eq!(error["role"], "server");
    assert_eq!(error["type"], "error");
    assert!(error["content"]
        .as_str()
        .expect("diagnostic")
        .starts_with("protocol:"));
    assert_eq!(recv(&mut client).await["content"], "complete");

    send(&mut client, user_turn("hi")).await;
    assert_eq!(recv(&mut client).await["content"], "ok");
    assert_eq!(recv(&mut client).await["content"], "complete");

    state.shutdown.cancel();
}

#[tokio::test]
async fn acknowledged_delivery_waits_for_acks() {
    let mut config = test_config();
    config.agent.require_acknowledge = true;
    let (addr, state) = spawn_server(config).await;
    let mut client = connect(addr).await;
    authenticate(&mut client, "k").await;

    send(&mut client, user_turn("hi")).await;

    let reply = recv(&mut client).await;
    assert_eq!(reply["content"], "ok");
    let id = reply["id"].as_str().expect("tagged id").to_owned();
    send(&mut client, json!({ "ack": id })).await;

    let sentinel = recv(&mut client).await;
    assert_eq!(sentinel["content"], "complete");
    let sentinel_id = sentinel["id"].as_str().expect("tagged id").to_owned();
    assert_ne!(sentinel_id, id);
    send(&mut client, json!({ "ack": sentinel_id })).await;

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(state.acks.pending(), 0);

    state.shutdown.cancel();
}

#[tokio::test]
async fn unacknowledged_item_is_resent_then_reported() {
    let mut config = test_config();
    config.agent.require_acknowledge = true;
    let (addr, state) = spawn_server(config).await;
    let mut client = connect(addr).await;
    authenticate(&mut client, "k").await;

    send(&mut client, user_turn("hi")).await;

    // Three attempts of the same tagged chunk, never acknowledged.
    let first = recv(&mut client).await;
    assert_eq!(recv(&mut client).await, first);
    assert_eq!(recv(&mut client).await, first);

    let failure = recv(&mut client).await;
    assert_eq!(failure["type"], "error");
    assert!(failure["content"]
        .as_str()
        .expect("diagnostic")
        .starts_with("delivery:"));
    assert_eq!(recv(&mut client).await["content"], "complete");

    state.shutdown.cancel();
}
