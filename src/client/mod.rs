//! Client-side transports feeding state payloads into a callback.
//!
//! The WebSocket and polling clients may run concurrently as independent
//! best-effort paths into the same callback; the view model keeps the
//! callback idempotent under duplicate or out-of-order delivery.

pub mod poll;
pub mod ws;

pub use poll::PollingClient;
pub use ws::BridgeClient;

use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::payload::StatePayload;

/// Callback invoked with each received state payload.
pub type StateHandler = Arc<dyn Fn(StatePayload) + Send + Sync>;

/// A running background subscription. Stopping cancels the task, including
/// any pending reconnect or poll timer; stopping twice is safe, and dropping
/// the subscription stops it as well.
pub struct Subscription {
    task: JoinHandle<()>,
}

impl Subscription {
    pub(crate) fn new(task: JoinHandle<()>) -> Self {
        Self { task }
    }

    pub fn stop(&self) {
        self.task.abort();
    }

    pub fn is_active(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}
