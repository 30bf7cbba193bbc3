//! Websocket connection handling.
//!
//! Each connection runs two halves:
//!
//! - the receive loop, which performs the `{"auth": key}` handshake, records
//!   `{"ack": id}` messages, and feeds every other frame to the agent;
//! - the send loop (started after authentication), which takes items from
//!   the shared output queue and delivers them in order.
//!
//! Failures on either side are reported to the peer as an error chunk
//! followed by the completion sentinel, and the connection keeps serving.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures_util::stream::{SplitSink, StreamExt};
use futures_util::SinkExt;
use serde_json::json;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::state::AppState;
use crate::delivery::{deliver, FrameSink};
use crate::models::chunk::{Chunk, Frame, Inbound};
use crate::{AppError, Result};

type SharedSink = Arc<Mutex<SplitSink<WebSocket, Message>>>;

/// Outbound half of a websocket, locked per frame so the receive loop can
/// interleave handshake replies with delivery.
#[derive(Clone)]
struct WsSink {
    inner: SharedSink,
}

impl WsSink {
    async fn send(&self, message: Message) -> Result<()> {
        self.inner
            .lock()
            .await
            .send(message)
            .await
            .map_err(|err| AppError::Io(format!("websocket send failed: {err}")))
    }

    async fn send_json(&self, value: &serde_json::Value) -> Result<()> {
        self.send(Message::Text(value.to_string().into())).await
    }

    /// Best-effort error chunk plus completion sentinel, without ack.
    async fn send_failure(&self, err: &AppError) {
        for chunk in [Chunk::error(err.to_string()), Chunk::complete()] {
            let text = match serde_json::to_string(&chunk) {
                Ok(text) => text,
                Err(err) => {
                    warn!(%err, "failed to encode failure chunk");
                    return;
                }
            };
            if let Err(err) = self.send(Message::Text(text.into())).await {
                debug!(%err, "could not report failure to peer");
                return;
            }
        }
    }
}

impl FrameSink for WsSink {
    fn send_text(&mut self, text: String) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(self.send(Message::Text(text.into())))
    }

    fn send_binary(
        &mut self,
        bytes: Vec<u8>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(self.send(Message::Binary(bytes.into())))
    }
}

/// Handler for `GET /` websocket upgrades.
pub async fn upgrade(State(state): State<Arc<AppState>>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| {
        let connection_id = Uuid::new_v4().to_string();
        handle_socket(socket, state).instrument(info_span!("ws_connection", %connection_id))
    })
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    info!("websocket connected");
    let (sink, mut stream) = socket.split();
    let sink = WsSink {
        inner: Arc::new(Mutex::new(sink)),
    };
    let mut connection = Connection {
        state,
        sink,
        sender: None,
    };

    loop {
        let message = tokio::select! {
            biased;

            () = connection.state.shutdown.cancelled() => {
                debug!("shutdown requested; closing websocket");
                break;
            }

            message = stream.next() => message,
        };

        match message {
            None => {
                info!("websocket disconnected");
                break;
            }
            Some(Err(err)) => {
                warn!(%err, "websocket receive failed");
                break;
            }
            Some(Ok(Message::Close(_))) => {
                info!("websocket closed by peer");
                break;
            }
            Some(Ok(Message::Text(text))) => connection.on_text(text.as_str()).await,
            Some(Ok(Message::Binary(bytes))) => connection.on_binary(bytes.to_vec()).await,
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
        }
    }

    if let Some(sender) = connection.sender.take() {
        sender.abort();
    }
    let closed = connection.sink.inner.lock().await.close().await;
    if let Err(err) = closed {
        debug!(%err, "websocket close failed");
    }
}

struct Connection {
    state: Arc<AppState>,
    sink: WsSink,
    sender: Option<JoinHandle<()>>,
}

impl Connection {
    fn is_authenticated(&self) -> bool {
        self.sender.is_some()
    }

    async fn on_text(&mut self, text: &str) {
        let inbound = match Inbound::from_text(text) {
            Ok(inbound) => inbound,
            Err(err) => {
                if self.is_authenticated() {
                    warn!(%err, "malformed inbound message");
                    self.sink.send_failure(&err).await;
                } else {
                    self.reply_auth(false).await;
                }
                return;
            }
        };

        if !self.is_authenticated() {
            let accepted = match inbound {
                Inbound::Auth(key) => self.state.config.ensure_authorized(key.as_deref()).is_ok(),
                _ => false,
            };
            if accepted {
                info!("websocket authenticated");
                self.sender = Some(spawn_sender(Arc::clone(&self.state), self.sink.clone()));
            }
            self.reply_auth(accepted).await;
            return;
        }

        match inbound {
            Inbound::Auth(_) => debug!("ignoring repeated auth message"),
            Inbound::Ack(id) => {
                if self.state.require_acknowledge() {
                    if !self.state.acks.acknowledge(id.as_str()) {
                        debug!(%id, "ignoring ack for an item nobody is waiting on");
                    }
                } else {
                    debug!(%id, "ignoring ack while acknowledgment mode is off");
                }
            }
            Inbound::Chunk(chunk) => self.feed(Frame::Chunk(chunk)).await,
        }
    }

    async fn on_binary(&mut self, bytes: Vec<u8>) {
        if self.is_authenticated() {
            self.feed(Frame::Binary(bytes)).await;
        } else {
            self.reply_auth(false).await;
        }
    }

    async fn feed(&self, frame: Frame) {
        let result = self.state.agent.lock().await.input(frame).await;
        if let Err(err) = result {
            warn!(%err, "inbound frame rejected");
            self.sink.send_failure(&err).await;
        }
    }

    async fn reply_auth(&self, accepted: bool) {
        if let Err(err) = self.sink.send_json(&json!({ "auth": accepted })).await {
            debug!(%err, "failed to send auth reply");
        }
    }
}

fn spawn_sender(state: Arc<AppState>, mut sink: WsSink) -> JoinHandle<()> {
    tokio::spawn(
        async move {
            loop {
                let frame = tokio::select! {
                    biased;

                    () = state.shutdown.cancelled() => break,

                    frame = state.output.get() => frame,
                };
                let Some(frame) = frame else {
                    debug!("output queue closed; sender exiting");
                    break;
                };
                let policy = state.delivery_policy();
                if let Err(err) = deliver(&mut sink, frame, &state.acks, &policy).await {
                    warn!(%err, "outbound delivery failed");
                    sink.send_failure(&err).await;
                }
            }
        }
        .instrument(info_span!("ws_sender")),
    )
}
