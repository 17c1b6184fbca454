//! Relay server: accepts state from any client and rebroadcasts to all
//! others, with HTTP fallbacks for polling and log upload.
//!
//! The relay keeps one latest-state document. Incoming state payloads are
//! shallow-merged into it key by key and stamped with the server clock, then
//! rebroadcast to every connected WebSocket peer except the sender. New peers
//! receive the latest state immediately on connect.

pub mod static_files;

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Map, Value};
use tokio::sync::{broadcast, RwLock};
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::config::RelayConfig;
use crate::error::{MeterError, Result};

const BROADCAST_CAPACITY: usize = 100;

/// A frame queued for fan-out, tagged with its originating client so the
/// sender can be excluded.
#[derive(Debug, Clone)]
struct Outbound {
    sender: String,
    text: String,
}

/// Shared relay state, injected into handlers rather than held globally.
pub struct AppState {
    latest: RwLock<Map<String, Value>>,
    tx: broadcast::Sender<Outbound>,
    logs_dir: PathBuf,
}

impl AppState {
    pub fn new(logs_dir: impl Into<PathBuf>) -> Self {
        let (tx, _rx) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            latest: RwLock::new(default_state()),
            tx,
            logs_dir: logs_dir.into(),
        }
    }

    /// Number of WebSocket peers currently subscribed to the broadcast.
    pub fn client_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// Seed state served before any client has published.
fn default_state() -> Map<String, Value> {
    let mut map = Map::new();
    map.insert(
        "values".to_string(),
        json!([20, 45, 75, 45, null, null]),
    );
    map.insert("names".to_string(), json!([]));
    map.insert("icons".to_string(), json!([]));
    map.insert("ts".to_string(), json!(chrono::Utc::now().timestamp_millis()));
    map
}

/// Create the relay application with all routes and middleware.
///
/// The health fallback also covers wrong methods on routed paths, so every
/// request outside the three supported operations answers plain `OK`.
pub fn create_app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/state", get(get_state).fallback(ok_fallback))
        .route("/save-log", post(save_log).fallback(ok_fallback))
        .route("/ws", get(websocket_handler).fallback(ok_fallback))
        .fallback(ok_fallback)
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(
                    CorsLayer::new()
                        .allow_origin(Any)
                        .allow_methods(Any)
                        .allow_headers(Any),
                )
                .layer(SetResponseHeaderLayer::overriding(
                    header::CACHE_CONTROL,
                    HeaderValue::from_static("no-store"),
                )),
        )
}

/// Start the relay server with the provided configuration.
pub async fn serve(config: RelayConfig) -> Result<()> {
    let addr = config
        .bind_address()
        .parse::<SocketAddr>()
        .map_err(|e| MeterError::config_error(format!("Invalid bind address: {}", e)))?;
    let state = Arc::new(AppState::new(config.logs_dir.clone()));
    let app = create_app(state);

    info!("Relay listening on http://{}", addr);
    info!("WebSocket endpoint: ws://{}/ws", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| MeterError::relay_error(format!("Failed to bind to address: {}", e)))?;
    axum::serve(listener, app)
        .await
        .map_err(|e| MeterError::relay_error(format!("Server error: {}", e)))?;
    Ok(())
}

/// HTTP fallback: the latest state as plain JSON for polling clients.
async fn get_state(State(state): State<Arc<AppState>>) -> Json<Value> {
    let latest = state.latest.read().await;
    Json(Value::Object(latest.clone()))
}

/// Anything unrouted answers 200 so health checks stay simple.
async fn ok_fallback() -> &'static str {
    "OK"
}

/// Accept an uploaded session log and write it into the logs directory.
async fn save_log(State(state): State<Arc<AppState>>, body: String) -> Response {
    let data: Value = match serde_json::from_str(&body) {
        Ok(data) => data,
        Err(e) => {
            warn!("Rejected log upload with malformed JSON: {}", e);
            return (StatusCode::BAD_REQUEST, Json(json!({"error": "Invalid JSON"})))
                .into_response();
        }
    };
    let Some(records) = data.get("records").filter(|r| r.is_array()) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "Invalid data format"})),
        )
            .into_response();
    };

    let filename = data
        .get("filename")
        .and_then(Value::as_str)
        .map(sanitize_filename)
        .unwrap_or_else(|| {
            format!("meter-log-{}.json", chrono::Utc::now().timestamp_millis())
        });
    let filepath = state.logs_dir.join(&filename);
    let content = serde_json::to_string_pretty(records).unwrap_or_default();

    if let Err(e) = write_log_file(&state.logs_dir, &filepath, &content).await {
        warn!("Failed to save log {}: {}", filepath.display(), e);
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": "Failed to save log file"})),
        )
            .into_response();
    }

    info!("Log saved: {}", filepath.display());
    Json(json!({"success": true, "filename": filename})).into_response()
}

async fn write_log_file(dir: &Path, path: &Path, content: &str) -> std::io::Result<()> {
    tokio::fs::create_dir_all(dir).await?;
    tokio::fs::write(path, content).await
}

/// Keep only the final path component so uploads cannot escape the logs
/// directory.
fn sanitize_filename(name: &str) -> String {
    let base = name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(name)
        .trim()
        .to_string();
    if base.is_empty() || base == "." || base == ".." {
        format!("meter-log-{}.json", chrono::Utc::now().timestamp_millis())
    } else {
        base
    }
}

/// WebSocket upgrade handler.
async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> Response {
    ws.on_upgrade(move |socket| handle_websocket(socket, state))
}

/// Handle one WebSocket peer for its whole lifetime.
async fn handle_websocket(socket: WebSocket, state: Arc<AppState>) {
    let client_id = uuid::Uuid::new_v4().to_string();
    info!("Relay client connected: {}", client_id);

    let (mut sender, mut receiver) = socket.split();

    // Push the latest state immediately so new peers converge without
    // waiting for the next publish.
    let initial = {
        let latest = state.latest.read().await;
        json!({"type": "state", "payload": Value::Object(latest.clone())}).to_string()
    };
    if sender.send(Message::Text(initial)).await.is_err() {
        return;
    }

    let mut rx = state.tx.subscribe();

    let send_id = client_id.clone();
    let mut send_task = tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(frame) => {
                    if frame.sender == send_id {
                        continue;
                    }
                    if sender.send(Message::Text(frame.text)).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!("client {} lagged, skipped {} frames", send_id, skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let recv_state = Arc::clone(&state);
    let recv_id = client_id.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(message) = receiver.next().await {
            match message {
                Ok(Message::Text(text)) => {
                    handle_state_frame(&recv_state, &recv_id, &text).await;
                }
                Ok(Message::Close(_)) | Err(_) => break,
                Ok(_) => {}
            }
        }
    });

    // Whichever side finishes first, tear the other down so the peer's
    // broadcast receiver is released immediately.
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }
    info!("Relay client disconnected: {}", client_id);
}

/// Merge an inbound state frame into the latest document and rebroadcast.
/// Malformed frames and frames that are not state envelopes are ignored.
async fn handle_state_frame(state: &AppState, client_id: &str, text: &str) {
    let Ok(data) = serde_json::from_str::<Value>(text) else {
        return;
    };
    if data.get("type").and_then(Value::as_str) != Some("state") {
        return;
    }
    let Some(payload) = data.get("payload").and_then(Value::as_object) else {
        return;
    };

    let merged = {
        let mut latest = state.latest.write().await;
        // Shallow merge: each incoming key overwrites wholesale.
        for (key, value) in payload {
            latest.insert(key.clone(), value.clone());
        }
        latest.insert("ts".to_string(), json!(chrono::Utc::now().timestamp_millis()));
        latest.clone()
    };

    let frame = json!({"type": "state", "payload": Value::Object(merged)}).to_string();
    // No receivers is not an error.
    let _ = state.tx.send(Outbound {
        sender: client_id.to_string(),
        text: frame,
    });
}
