//! HTTP surface: websocket upgrade, REST routes, and API-key middleware.
//!
//! | Route                  | Purpose                                   |
//! |------------------------|-------------------------------------------|
//! | `GET /` (upgrade)      | Websocket chunk stream                    |
//! | `POST /`               | Feed one chunk to the agent               |
//! | `GET /heartbeat`       | Liveness check                            |
//! | `POST /settings`       | Typed settings update                     |
//! | `GET /settings/{name}` | Read one setting                          |
//! | `GET /messages`        | Conversation history                      |
//! | `DELETE /messages`     | Stop any cycle and clear history          |
//!
//! REST routes require a matching `X-API-KEY` header when an API key is
//! configured. The websocket authenticates in-band instead.

use std::sync::Arc;

use axum::extract::{Path, Request, State};
use axum::http::{header, Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Map, Value};
use tokio::net::TcpListener;
use tracing::{info, warn};

use super::state::AppState;
use super::ws;
use crate::models::chunk::{Chunk, Frame};
use crate::models::message::Message;
use crate::settings;
use crate::{AppError, Result};

/// Header carrying the API key on REST requests.
pub const API_KEY_HEADER: &str = "x-api-key";

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::Protocol(_) | Self::Settings(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Unauthorized(_) => StatusCode::FORBIDDEN,
            Self::Config(_) | Self::Delivery(_) | Self::Generation(_) | Self::Io(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// Build the application router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(ws::upgrade).post(post_input))
        .route("/heartbeat", get(heartbeat))
        .route("/settings", post(set_settings))
        .route("/settings/{setting}", get(get_setting))
        .route("/messages", get(get_messages).delete(reset_messages))
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            require_api_key,
        ))
        .with_state(state)
}

/// Bind `config.server.host:port` and serve until `state.shutdown` fires.
///
/// # Errors
///
/// Returns `AppError::Config` if the listener cannot bind.
pub async fn serve(state: Arc<AppState>) -> Result<()> {
    let bind = format!("{}:{}", state.config.server.host, state.config.server.port);
    let listener = TcpListener::bind(&bind)
        .await
        .map_err(|err| AppError::Config(format!("failed to bind {bind}: {err}")))?;
    serve_with_listener(listener, state).await
}

/// Serve on an already-bound listener until `state.shutdown` fires.
///
/// # Errors
///
/// Returns `AppError::Io` if the server fails while running.
pub async fn serve_with_listener(listener: TcpListener, state: Arc<AppState>) -> Result<()> {
    let addr = listener.local_addr()?;
    if addr.ip().is_unspecified() {
        warn!(%addr, "listening on all interfaces; the agent is reachable from the network");
    }
    info!(%addr, "HTTP/websocket transport listening");

    let ct = state.shutdown.clone();
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { ct.cancelled().await })
        .await
        .map_err(|err| AppError::Io(format!("server error: {err}")))?;

    info!("HTTP/websocket transport shut down");
    Ok(())
}

async fn require_api_key(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    if is_websocket_upgrade(&request) {
        return next.run(request).await;
    }

    let key = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|value| value.to_str().ok());
    match state.config.ensure_authorized(key) {
        Ok(()) => next.run(request).await,
        Err(err) => {
            warn!(%err, path = %request.uri().path(), "rejected request");
            (
                StatusCode::FORBIDDEN,
                Json(json!({ "detail": "Authentication failed" })),
            )
                .into_response()
        }
    }
}

/// Websocket upgrades on `/` authenticate in-band after the handshake.
fn is_websocket_upgrade(request: &Request) -> bool {
    request.method() == Method::GET
        && request.uri().path() == "/"
        && request
            .headers()
            .get(header::UPGRADE)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.eq_ignore_ascii_case("websocket"))
}

async fn heartbeat() -> Json<Value> {
    Json(json!({ "status": "alive" }))
}

async fn post_input(
    State(state): State<Arc<AppState>>,
    Json(chunk): Json<Chunk>,
) -> Result<Json<Value>> {
    state.agent.lock().await.input(Frame::Chunk(chunk)).await?;
    Ok(Json(json!({ "status": "success" })))
}

async fn set_settings(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<Map<String, Value>>,
) -> Result<Json<Value>> {
    let updates = settings::apply_remote(&state.settings, &payload)?;
    for update in &updates {
        info!(?update, "setting updated");
    }
    Ok(Json(json!({ "status": "success" })))
}

async fn get_setting(
    State(state): State<Arc<AppState>>,
    Path(setting): Path<String>,
) -> Result<Json<Value>> {
    let value = settings::current(&state.settings).get(&setting)?;
    let mut body = Map::new();
    body.insert(setting, value);
    Ok(Json(Value::Object(body)))
}

async fn get_messages(State(state): State<Arc<AppState>>) -> Json<Vec<Message>> {
    Json(state.agent.lock().await.messages())
}

async fn reset_messages(State(state): State<Arc<AppState>>) -> Json<Value> {
    state.agent.lock().await.reset().await;
    Json(json!({ "status": "success" }))
}
