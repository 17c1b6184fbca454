//! Fan-out of view-model snapshots to other rendering contexts.
//!
//! One publish/subscribe surface with two transports: an in-memory broadcast
//! channel for same-process contexts and a key-value-store polling fallback
//! for contexts that only share storage. The transport is selected once at
//! construction. There is no cross-context ordering guarantee; subscribers
//! treat each snapshot as authoritative at receipt.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::{interval, MissedTickBehavior};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tracing::debug;

use crate::client::Subscription;
use crate::settings::KeyValueStore;
use crate::view_model::MeterSnapshot;

/// Storage key for the mirrored overlay state.
pub const OVERLAY_STATE_KEY: &str = "overlay-state";

const STORE_POLL_INTERVAL: Duration = Duration::from_millis(300);
const CHANNEL_CAPACITY: usize = 32;

/// Callback invoked with each received snapshot.
pub type SnapshotHandler = Arc<dyn Fn(MeterSnapshot) + Send + Sync>;

enum Transport {
    Memory(broadcast::Sender<MeterSnapshot>),
    Store(Arc<dyn KeyValueStore>),
}

/// Broadcast channel between the main page and overlay contexts.
pub struct OverlayChannel {
    transport: Transport,
}

impl OverlayChannel {
    /// In-memory transport for contexts living in the same process.
    pub fn in_memory() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            transport: Transport::Memory(tx),
        }
    }

    /// Store-backed transport: snapshots are written to the shared store and
    /// subscribers poll for changes.
    pub fn with_store(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            transport: Transport::Store(store),
        }
    }

    /// Pick a transport by capability: a shared store when one is available
    /// to bridge processes, the in-memory channel otherwise.
    pub fn detect(store: Option<Arc<dyn KeyValueStore>>) -> Self {
        match store {
            Some(store) => Self::with_store(store),
            None => Self::in_memory(),
        }
    }

    /// Publish a snapshot to all subscribers, best effort.
    pub fn publish(&self, snapshot: &MeterSnapshot) {
        match &self.transport {
            Transport::Memory(tx) => {
                // No subscribers is not an error.
                let _ = tx.send(snapshot.clone());
            }
            Transport::Store(store) => {
                let text = serde_json::to_string(snapshot).expect("snapshot serializes");
                if let Err(e) = store.set(OVERLAY_STATE_KEY, &text) {
                    debug!(error = %e, "overlay state write skipped");
                }
            }
        }
    }

    /// Subscribe to published snapshots. The store transport replays the
    /// cached value once on subscribe, so late-joining overlays converge
    /// without waiting for the next change.
    pub fn subscribe(&self, handler: SnapshotHandler) -> Subscription {
        match &self.transport {
            Transport::Memory(tx) => {
                let mut stream = BroadcastStream::new(tx.subscribe());
                Subscription::new(tokio::spawn(async move {
                    while let Some(item) = stream.next().await {
                        // Lagged receivers skip ahead; stale frames are fine.
                        if let Ok(snapshot) = item {
                            handler(snapshot);
                        }
                    }
                }))
            }
            Transport::Store(store) => {
                let store = Arc::clone(store);
                Subscription::new(tokio::spawn(async move {
                    let mut last = None;
                    if let Some(text) = store.get(OVERLAY_STATE_KEY) {
                        if let Ok(snapshot) = serde_json::from_str::<MeterSnapshot>(&text) {
                            handler(snapshot);
                        }
                        last = Some(text);
                    }
                    let mut ticker = interval(STORE_POLL_INTERVAL);
                    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                    loop {
                        ticker.tick().await;
                        let Some(text) = store.get(OVERLAY_STATE_KEY) else {
                            continue;
                        };
                        if last.as_deref() == Some(&text) {
                            continue;
                        }
                        if let Ok(snapshot) = serde_json::from_str::<MeterSnapshot>(&text) {
                            handler(snapshot);
                        }
                        last = Some(text);
                    }
                }))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ValueRange;
    use crate::settings::MemoryStore;
    use std::sync::Mutex;

    fn snapshot_with_value(v: f64) -> MeterSnapshot {
        MeterSnapshot {
            values: vec![Some(v), None, None, None, None, None],
            actual_values: vec![Some(v), None, None, None, None, None],
            names: vec![String::new(); 6],
            icons: vec![None; 6],
            value_range: ValueRange::default(),
        }
    }

    #[tokio::test]
    async fn in_memory_delivers_published_snapshots() {
        let channel = OverlayChannel::in_memory();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _sub = channel.subscribe(Arc::new(move |snap: MeterSnapshot| {
            sink.lock().unwrap().push(snap.values[0]);
        }));
        tokio::task::yield_now().await;

        channel.publish(&snapshot_with_value(12.0));
        channel.publish(&snapshot_with_value(34.0));
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(*seen.lock().unwrap(), vec![Some(12.0), Some(34.0)]);
    }

    #[tokio::test]
    async fn publishing_without_subscribers_is_fine() {
        let channel = OverlayChannel::in_memory();
        channel.publish(&snapshot_with_value(1.0));
    }

    #[tokio::test(start_paused = true)]
    async fn store_transport_replays_cache_and_polls_changes() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let channel = OverlayChannel::with_store(Arc::clone(&store));
        channel.publish(&snapshot_with_value(5.0));

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _sub = channel.subscribe(Arc::new(move |snap: MeterSnapshot| {
            sink.lock().unwrap().push(snap.values[0]);
        }));

        // Cached value is replayed once on subscribe.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(*seen.lock().unwrap(), vec![Some(5.0)]);

        channel.publish(&snapshot_with_value(6.0));
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(*seen.lock().unwrap(), vec![Some(5.0), Some(6.0)]);

        // Unchanged state is not re-delivered.
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(seen.lock().unwrap().len(), 2);
    }
}
