//! HTTP polling client: a fixed-interval best-effort pull of relay state.

use std::time::Duration;

use tokio::time::{interval, MissedTickBehavior};
use tracing::debug;

use super::{StateHandler, Subscription};
use crate::payload::StatePayload;

/// Interval between polls. Failures do not grow the backoff; the next tick
/// simply retries.
const POLL_INTERVAL: Duration = Duration::from_millis(1500);

/// Polls the relay's state endpoint and delivers each snapshot as a payload.
/// Network errors and non-2xx responses are silently skipped.
pub struct PollingClient {
    endpoint: String,
    poll_interval: Duration,
    client: reqwest::Client,
}

impl PollingClient {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            poll_interval: POLL_INTERVAL,
            client: reqwest::Client::new(),
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Start polling. The returned subscription cancels the timer when
    /// stopped or dropped.
    pub fn start(&self, handler: StateHandler) -> Subscription {
        let endpoint = self.endpoint.clone();
        let client = self.client.clone();
        let poll_interval = self.poll_interval;
        Subscription::new(tokio::spawn(async move {
            let mut ticker = interval(poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                match client.get(&endpoint).send().await {
                    Ok(response) if response.status().is_success() => {
                        if let Ok(payload) = response.json::<StatePayload>().await {
                            handler(payload);
                        }
                    }
                    Ok(response) => {
                        debug!(status = %response.status(), "poll skipped");
                    }
                    Err(e) => {
                        debug!(error = %e, "poll failed");
                    }
                }
            }
        }))
    }
}
