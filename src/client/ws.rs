//! WebSocket client for the relay, with indefinite automatic reconnect.

use std::time::Duration;

use futures_util::StreamExt;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::debug;

use super::{StateHandler, Subscription};
use crate::payload::parse_frame;

/// Delay before reconnecting after a failed or closed connection.
const RECONNECT_DELAY: Duration = Duration::from_millis(1200);

/// Subscribes to the relay WebSocket and delivers parsed state payloads.
///
/// Connection failures and malformed frames are never surfaced; the client
/// reconnects after a fixed backoff from any terminal state, indefinitely,
/// until the subscription is stopped.
pub struct BridgeClient {
    url: String,
    reconnect_delay: Duration,
}

impl BridgeClient {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            reconnect_delay: RECONNECT_DELAY,
        }
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Start receiving. The returned subscription cancels the connection and
    /// any pending reconnect when stopped or dropped.
    pub fn subscribe(&self, handler: StateHandler) -> Subscription {
        let url = self.url.clone();
        let delay = self.reconnect_delay;
        Subscription::new(tokio::spawn(async move {
            loop {
                match connect_async(&url).await {
                    Ok((stream, _)) => {
                        debug!(%url, "bridge connected");
                        let (_, mut read) = stream.split();
                        while let Some(message) = read.next().await {
                            match message {
                                Ok(Message::Text(text)) => {
                                    if let Some(payload) = parse_frame(&text) {
                                        handler(payload);
                                    }
                                }
                                Ok(Message::Close(_)) | Err(_) => break,
                                Ok(_) => {}
                            }
                        }
                        debug!(%url, "bridge connection closed");
                    }
                    Err(e) => {
                        debug!(%url, error = %e, "bridge connect failed");
                    }
                }
                tokio::time::sleep(delay).await;
            }
        }))
    }
}
