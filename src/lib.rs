//! # Meterbridge - Real-time Meter Visualization Bridge
//!
//! A relay, client, and state engine for visualizing up to six device
//! readings on a shared meter overlay. Device readings arrive over WebSocket
//! or HTTP polling, are normalized to a configurable value range, smoothed
//! through short interpolated transitions, and fanned out to renderers and
//! overlay contexts. Sessions can be recorded to JSON logs and replayed.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use meterbridge::{serve_relay, RelayConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Start the relay on the default bridge address
//!     serve_relay(RelayConfig::default()).await?;
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod config;
pub mod domain;
pub mod error;
pub mod generator;
pub mod interpolate;
pub mod monitor;
pub mod payload;
pub mod recording;
pub mod relay;
pub mod render;
pub mod replay;
pub mod settings;
pub mod sync;
pub mod view_model;

// Re-export public API
pub use client::{BridgeClient, PollingClient, Subscription};
pub use config::{RelayConfig, StaticConfig};
pub use domain::{
    parse_log, DeviceConfig, DeviceState, LogEntry, LogRecord, SessionLog, ValueRange,
    DEVICE_SLOTS,
};
pub use error::{MeterError, Result};
pub use monitor::LiveMonitor;
pub use payload::{parse_frame, StateEnvelope, StatePayload};
pub use recording::{FileLogSink, HttpLogSink, LogSink, RecordingEngine, RecordingStatus};
pub use relay::serve as serve_relay;
pub use relay::static_files::serve as serve_static;
pub use replay::ReplayEngine;
pub use settings::{FileStore, KeyValueStore, MemoryStore, SettingsService};
pub use sync::OverlayChannel;
pub use view_model::{MeterSnapshot, MeterViewModel};

/// The default host both servers bind to
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// The default relay server port
pub const DEFAULT_RELAY_PORT: u16 = 8123;

/// The default static file server port
pub const DEFAULT_STATIC_PORT: u16 = 8000;
