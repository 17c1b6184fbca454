//! Wire-format state payloads and defensive frame parsing.
//!
//! Every transport path (relay WebSocket, HTTP poll, overlay channel) carries
//! the same payload shape: an object with any subset of values, names, icons
//! and range fields. Absent fields leave existing state untouched.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::{ValueRange, DEVICE_SLOTS};

/// A partial state update. Consumers treat each payload as
/// authoritative-at-receipt; there is no cross-transport ordering guarantee.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StatePayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub values: Option<Vec<Option<f64>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub names: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icons: Option<Vec<Option<String>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_range: Option<ValueRange>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_value: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_value: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ts: Option<i64>,
}

impl StatePayload {
    /// A payload carrying only device values.
    pub fn from_values(values: Vec<Option<f64>>) -> Self {
        Self {
            values: Some(values),
            ..Default::default()
        }
    }
}

/// The `{type: "state", payload}` envelope used on the relay WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateEnvelope {
    #[serde(rename = "type")]
    pub kind: String,
    pub payload: Value,
}

impl StateEnvelope {
    pub fn state(payload: Value) -> Self {
        Self {
            kind: "state".to_string(),
            payload,
        }
    }
}

/// Parse one inbound frame into a payload.
///
/// Recognizes the `{type:"state", payload}` envelope, a raw `{values: [...]}`
/// object, and the legacy array-of-device-reports format. Anything else,
/// including malformed JSON, yields `None` — transport parse failures are
/// swallowed, never surfaced.
pub fn parse_frame(raw: &str) -> Option<StatePayload> {
    let data: Value = serde_json::from_str(raw).ok()?;

    if data.get("type").and_then(Value::as_str) == Some("state") {
        let payload = data.get("payload")?;
        if payload.is_object() {
            return serde_json::from_value(payload.clone()).ok();
        }
        return None;
    }

    if data.get("values").map(Value::is_array) == Some(true) {
        return serde_json::from_value(data).ok();
    }

    if let Some(reports) = data.as_array() {
        return Some(payload_from_reports(reports));
    }

    None
}

/// Map a legacy array of `{device_id|id, value}` reports onto value slots.
/// Unparseable ids are dropped silently.
fn payload_from_reports(reports: &[Value]) -> StatePayload {
    let mut values: Vec<Option<f64>> = vec![None; DEVICE_SLOTS];
    for report in reports {
        let id = report.get("device_id").or_else(|| report.get("id"));
        let Some(index) = id.and_then(device_index) else {
            continue;
        };
        if let Some(value) = report.get("value").and_then(Value::as_f64) {
            if value.is_finite() {
                values[index] = Some(value.clamp(0.0, 100.0));
            }
        }
    }
    StatePayload::from_values(values)
}

/// Resolve a device identifier to a slot index.
///
/// Numeric ids map directly (`3` → slot 2, clamped into range); string ids
/// contribute their trailing digits (`"lever3"` → slot 2). Ids without a
/// usable number resolve to `None`.
pub fn device_index(id: &Value) -> Option<usize> {
    if let Some(n) = id.as_i64() {
        let idx = (n - 1).clamp(0, DEVICE_SLOTS as i64 - 1);
        return Some(idx as usize);
    }
    let text = id.as_str()?;
    let digits: String = text
        .chars()
        .rev()
        .take_while(|c| c.is_ascii_digit())
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    let n: usize = digits.parse().ok()?;
    if (1..=DEVICE_SLOTS).contains(&n) {
        Some(n - 1)
    } else {
        None
    }
}
