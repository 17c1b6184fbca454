//! Live monitoring: wires the transport clients into a view model.

use std::sync::{Arc, Mutex};

use tracing::info;

use crate::client::{BridgeClient, PollingClient, StateHandler, Subscription};
use crate::view_model::MeterViewModel;

/// Feeds live relay state into a view model over both transports at once.
///
/// The WebSocket and polling paths are independent and best-effort; whichever
/// delivers first wins, and the view model absorbs duplicate payloads. The
/// monitor owns the subscriptions, so dropping it (or calling [`stop`])
/// silences both paths.
///
/// [`stop`]: LiveMonitor::stop
pub struct LiveMonitor {
    vm: MeterViewModel,
    bridge: BridgeClient,
    poller: PollingClient,
    subscriptions: Mutex<Vec<Subscription>>,
}

impl LiveMonitor {
    pub fn new(vm: MeterViewModel, ws_url: impl Into<String>, poll_url: impl Into<String>) -> Self {
        Self {
            vm,
            bridge: BridgeClient::new(ws_url),
            poller: PollingClient::new(poll_url),
            subscriptions: Mutex::new(Vec::new()),
        }
    }

    pub fn view_model(&self) -> &MeterViewModel {
        &self.vm
    }

    /// Start both transports. Calling start while already running restarts
    /// the subscriptions.
    pub fn start(&self) {
        let mut subs = self.subscriptions.lock().unwrap();
        subs.clear();
        info!("starting live monitor");
        subs.push(self.bridge.subscribe(self.handler()));
        subs.push(self.poller.start(self.handler()));
    }

    pub fn stop(&self) {
        self.subscriptions.lock().unwrap().clear();
    }

    pub fn is_running(&self) -> bool {
        self.subscriptions
            .lock()
            .unwrap()
            .iter()
            .any(Subscription::is_active)
    }

    fn handler(&self) -> StateHandler {
        let vm = self.vm.clone();
        Arc::new(move |payload| vm.apply_state_payload(&payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stop_cancels_both_transports() {
        let monitor = LiveMonitor::new(
            MeterViewModel::new(),
            "ws://127.0.0.1:1/",
            "http://127.0.0.1:1/state",
        );
        assert!(!monitor.is_running());
        monitor.start();
        assert!(monitor.is_running());
        monitor.stop();
        tokio::task::yield_now().await;
        assert!(!monitor.is_running());
    }
}
