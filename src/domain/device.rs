//! Per-device immutable snapshots: live state and user configuration.

use serde::{Deserialize, Serialize};

use super::range::ValueRange;

/// Live state of one device slot.
///
/// Replaced, not mutated, on every value update. `connected` is derived:
/// a device is connected iff it has a normalized reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceState {
    pub id: u8,
    pub normalized: Option<f64>,
    pub actual: Option<f64>,
    pub connected: bool,
}

impl DeviceState {
    /// An empty (disconnected) slot.
    pub fn empty(id: u8) -> Self {
        Self {
            id,
            normalized: None,
            actual: None,
            connected: false,
        }
    }

    /// Produce the next state from a normalized reading, re-deriving the
    /// actual-unit value through the *current* range. A range change therefore
    /// updates the displayed value without needing a fresh sample.
    pub fn update_from_normalized(&self, value: Option<f64>, range: &ValueRange) -> Self {
        let normalized = value
            .filter(|v| !v.is_nan())
            .map(|v| v.clamp(0.0, 100.0));
        let actual = normalized.and_then(|n| range.denormalize(n));
        Self {
            id: self.id,
            normalized,
            actual,
            connected: normalized.is_some(),
        }
    }
}

/// User-editable configuration of one device slot, persisted to local
/// key-value storage keyed by device id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceConfig {
    pub id: u8,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub ip: String,
    #[serde(default)]
    pub icon_url: Option<String>,
}

impl DeviceConfig {
    /// A default configuration for the given slot.
    pub fn new(id: u8) -> Self {
        Self {
            id,
            name: String::new(),
            ip: String::new(),
            icon_url: None,
        }
    }

    /// Copy with a new display name.
    pub fn with_name(&self, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..self.clone()
        }
    }

    /// Copy with a new icon URL (or none).
    pub fn with_icon(&self, icon_url: Option<String>) -> Self {
        Self {
            icon_url,
            ..self.clone()
        }
    }

    /// Copy with a new device address.
    pub fn with_ip(&self, ip: impl Into<String>) -> Self {
        Self {
            ip: ip.into(),
            ..self.clone()
        }
    }
}
