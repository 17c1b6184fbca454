//! End-to-end tests against a relay bound to a real socket.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use meterbridge::relay::{create_app, AppState};
use serde_json::{json, Value};
use tokio_tungstenite::tungstenite::Message;

/// Bind the relay on an ephemeral port and return its address and state.
async fn spawn_relay() -> (std::net::SocketAddr, Arc<AppState>, tempdir::TempDirGuard) {
    let guard = tempdir::TempDirGuard::new();
    let state = Arc::new(AppState::new(guard.path().to_path_buf()));
    let app = create_app(Arc::clone(&state));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, state, guard)
}

/// Minimal scoped temp directory so log uploads in tests do not collide.
mod tempdir {
    use std::path::{Path, PathBuf};

    pub struct TempDirGuard {
        path: PathBuf,
    }

    impl TempDirGuard {
        pub fn new() -> Self {
            let path = std::env::temp_dir()
                .join(format!("meterbridge-it-{}", uuid::Uuid::new_v4()));
            std::fs::create_dir_all(&path).unwrap();
            Self { path }
        }

        pub fn path(&self) -> &Path {
            &self.path
        }
    }

    impl Drop for TempDirGuard {
        fn drop(&mut self) {
            std::fs::remove_dir_all(&self.path).ok();
        }
    }
}

async fn next_text(
    stream: &mut (impl futures_util::Stream<
        Item = Result<Message, tokio_tungstenite::tungstenite::Error>,
    > + Unpin),
) -> Option<String> {
    loop {
        let message = tokio::time::timeout(Duration::from_secs(2), stream.next())
            .await
            .ok()??;
        match message.ok()? {
            Message::Text(text) => return Some(text),
            Message::Close(_) => return None,
            _ => continue,
        }
    }
}

#[tokio::test]
async fn state_endpoint_and_fallback_respond() {
    let (addr, _state, _guard) = spawn_relay().await;
    let client = reqwest::Client::new();

    let response = client
        .get(format!("http://{addr}/state"))
        .send()
        .await
        .unwrap();
    assert!(response.status().is_success());
    let body: Value = response.json().await.unwrap();
    assert!(body["values"].is_array());
    assert!(body["ts"].is_i64());

    let response = client
        .get(format!("http://{addr}/nonexistent"))
        .send()
        .await
        .unwrap();
    assert!(response.status().is_success());
    assert_eq!(response.text().await.unwrap(), "OK");
}

#[tokio::test]
async fn save_log_roundtrip_over_http() {
    let (addr, _state, guard) = spawn_relay().await;
    let client = reqwest::Client::new();
    let url = format!("http://{addr}/save-log");

    // Invalid shape answers 400 with an error body.
    let response = client
        .post(&url)
        .body(r#"{"records": 5}"#)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 400);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "Invalid data format");

    // A valid upload lands on disk under the returned filename.
    let response = client
        .post(&url)
        .body(json!({"records": [{"id": 1, "value": 60, "ts": 0}]}).to_string())
        .send()
        .await
        .unwrap();
    assert!(response.status().is_success());
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["success"], true);
    let filename = body["filename"].as_str().unwrap().to_string();
    let saved = std::fs::read_to_string(guard.path().join(&filename)).unwrap();
    let records: Value = serde_json::from_str(&saved).unwrap();
    assert_eq!(records[0]["id"], 1);
}

#[tokio::test]
async fn broadcast_excludes_sender_and_seeds_new_peers() {
    let (addr, _state, _guard) = spawn_relay().await;
    let url = format!("ws://{addr}/ws");

    let (mut sender, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
    let (mut receiver, _) = tokio_tungstenite::connect_async(&url).await.unwrap();

    // Both peers get the latest state pushed on connect.
    let seed = next_text(&mut sender).await.unwrap();
    let seed: Value = serde_json::from_str(&seed).unwrap();
    assert_eq!(seed["type"], "state");
    assert!(seed["payload"]["values"].is_array());
    next_text(&mut receiver).await.unwrap();

    let frame = json!({
        "type": "state",
        "payload": {"values": [11, 22, 33, null, null, null], "unit": "psi"}
    });
    sender.send(Message::Text(frame.to_string())).await.unwrap();

    // The other peer receives the merged, restamped state.
    let received = next_text(&mut receiver).await.unwrap();
    let received: Value = serde_json::from_str(&received).unwrap();
    assert_eq!(received["payload"]["values"][0], json!(11));
    assert_eq!(received["payload"]["unit"], "psi");
    assert!(received["payload"]["ts"].is_i64());

    // The sender must not hear its own frame back. Publish from the other
    // side; the next frame the sender sees is that one, not an echo.
    let counter_frame = json!({
        "type": "state",
        "payload": {"values": [99, null, null, null, null, null]}
    });
    receiver
        .send(Message::Text(counter_frame.to_string()))
        .await
        .unwrap();
    let next: Value = serde_json::from_str(&next_text(&mut sender).await.unwrap()).unwrap();
    assert_eq!(next["payload"]["values"][0], json!(99));

    // A peer joining late converges immediately from the merged state.
    let (mut late, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
    let seed: Value = serde_json::from_str(&next_text(&mut late).await.unwrap()).unwrap();
    assert_eq!(seed["payload"]["values"][0], json!(99));
    assert_eq!(seed["payload"]["unit"], "psi");
}

#[tokio::test]
async fn disconnecting_peer_releases_its_subscription() {
    let (addr, state, _guard) = spawn_relay().await;
    let url = format!("ws://{addr}/ws");

    let (mut peer, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
    next_text(&mut peer).await.unwrap();
    assert_eq!(state.client_count(), 1);

    // Closing the socket must tear down both relay-side tasks so the
    // peer's broadcast subscription is dropped, not left pending.
    peer.close(None).await.unwrap();
    drop(peer);

    let mut released = false;
    for _ in 0..40 {
        if state.client_count() == 0 {
            released = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(released, "disconnected peer still holds a subscription");
}

#[tokio::test]
async fn polling_client_follows_relay_state() {
    let (addr, _state, _guard) = spawn_relay().await;

    // Push a state frame so polling sees non-seed values.
    let url = format!("ws://{addr}/ws");
    let (mut publisher, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
    next_text(&mut publisher).await.unwrap();
    let frame = json!({
        "type": "state",
        "payload": {"values": [70, null, null, null, null, null]}
    });
    publisher
        .send(Message::Text(frame.to_string()))
        .await
        .unwrap();

    let vm = meterbridge::MeterViewModel::new();
    let sink = vm.clone();
    let client = meterbridge::PollingClient::new(format!("http://{addr}/state"))
        .with_poll_interval(Duration::from_millis(50));
    let sub = client.start(Arc::new(move |payload| {
        sink.apply_state_payload(&payload);
    }));

    // Interpolation needs a moment to converge after the first poll.
    let mut converged = false;
    for _ in 0..40 {
        tokio::time::sleep(Duration::from_millis(50)).await;
        if vm.snapshot().values[0] == Some(70.0) {
            converged = true;
            break;
        }
    }
    sub.stop();
    assert!(converged, "polled state never reached the view model");
}
