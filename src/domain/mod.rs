//! Domain types: value ranges, per-device snapshots, and session logs.

pub mod device;
pub mod log;
pub mod range;

pub use device::{DeviceConfig, DeviceState};
pub use log::{parse_log, LogEntry, LogRecord, SessionLog};
pub use range::ValueRange;

/// Number of device slots. Index into any values/names/icons array is the
/// sole identity of a device; there is no separate join key.
pub const DEVICE_SLOTS: usize = 6;
