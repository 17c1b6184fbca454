//! Time-stamped multi-device snapshots for recording and replay.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::DEVICE_SLOTS;
use crate::error::{MeterError, Result};

/// One multi-device snapshot at a timestamp relative to the session start.
///
/// Values outside `[0, 100]` are clamped on construction and arrays shorter
/// than six slots are padded with `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub timestamp: u64,
    pub normalized_values: Vec<Option<f64>>,
}

impl LogEntry {
    pub fn new(timestamp: u64, values: &[Option<f64>]) -> Self {
        let mut normalized: Vec<Option<f64>> = values
            .iter()
            .take(DEVICE_SLOTS)
            .map(|v| v.filter(|x| !x.is_nan()).map(|x| x.clamp(0.0, 100.0)))
            .collect();
        normalized.resize(DEVICE_SLOTS, None);
        Self {
            timestamp,
            normalized_values: normalized,
        }
    }
}

/// A flat `{id, value, ts}` record, the on-disk interchange format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub id: u8,
    pub value: f64,
    pub ts: u64,
}

/// A recorded session: created at recording start, appended to in arrival
/// order, finalized once and immutable afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionLog {
    pub id: String,
    pub name: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub entries: Vec<LogEntry>,
}

impl SessionLog {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            started_at: Utc::now(),
            ended_at: None,
            entries: Vec::new(),
        }
    }

    pub fn add_entry(&mut self, entry: LogEntry) {
        self.entries.push(entry);
    }

    /// Finalize the session. Further entries are a caller bug; the recording
    /// engine drops its handle after calling this.
    pub fn finish(&mut self) {
        self.ended_at = Some(Utc::now());
    }

    /// Flatten to interchange records, skipping empty slots and rounding
    /// values to whole percents.
    pub fn to_records(&self) -> Vec<LogRecord> {
        let mut records = Vec::new();
        for entry in &self.entries {
            for (idx, value) in entry.normalized_values.iter().enumerate() {
                if let Some(v) = value {
                    records.push(LogRecord {
                        id: (idx + 1) as u8,
                        value: v.round().clamp(0.0, 100.0),
                        ts: entry.timestamp,
                    });
                }
            }
        }
        records
    }
}

/// Parse a log file in any of the accepted shapes:
/// a flat array of `{id, value, ts}` records, `{"records": [...]}`, or
/// pre-shaped `{"entries": [{timestamp, normalizedValues}]}`.
///
/// Flat records are grouped by timestamp, sorted ascending, re-based so the
/// first timestamp is zero, and each device's last known value is carried
/// forward across timestamps it is not mentioned at. Devices never mentioned
/// stay null throughout. Individually malformed records are dropped.
pub fn parse_log(text: &str) -> Result<Vec<LogEntry>> {
    let raw: Value = serde_json::from_str(text)
        .map_err(|e| MeterError::parse_error(format!("invalid log JSON: {e}")))?;

    if let Some(records) = raw.as_array() {
        return Ok(entries_from_records(records));
    }
    if let Some(records) = raw.get("records").and_then(Value::as_array) {
        return Ok(entries_from_records(records));
    }
    if let Some(entries) = raw.get("entries").and_then(Value::as_array) {
        let parsed = entries
            .iter()
            .filter_map(|e| serde_json::from_value::<LogEntry>(e.clone()).ok())
            .map(|e| LogEntry::new(e.timestamp, &e.normalized_values))
            .collect();
        return Ok(parsed);
    }
    Err(MeterError::parse_error("unrecognized log format"))
}

fn entries_from_records(records: &[Value]) -> Vec<LogEntry> {
    let mut by_ts: std::collections::BTreeMap<u64, Vec<Option<f64>>> =
        std::collections::BTreeMap::new();
    for record in records {
        let (Some(id), Some(value), Some(ts)) = (
            record.get("id").and_then(Value::as_i64),
            record.get("value").and_then(Value::as_f64),
            record.get("ts").and_then(Value::as_u64),
        ) else {
            continue;
        };
        if !(1..=DEVICE_SLOTS as i64).contains(&id) || !value.is_finite() {
            continue;
        }
        let slot = by_ts.entry(ts).or_insert_with(|| vec![None; DEVICE_SLOTS]);
        slot[(id - 1) as usize] = Some(value.clamp(0.0, 100.0));
    }

    let first_ts = by_ts.keys().next().copied().unwrap_or(0);
    let mut carried: Vec<Option<f64>> = vec![None; DEVICE_SLOTS];
    by_ts
        .into_iter()
        .map(|(ts, values)| {
            for (idx, value) in values.into_iter().enumerate() {
                if value.is_some() {
                    carried[idx] = value;
                }
            }
            LogEntry::new(ts - first_ts, &carried)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_clamps_and_pads() {
        let entry = LogEntry::new(10, &[Some(130.0), Some(-5.0), None]);
        assert_eq!(entry.normalized_values.len(), DEVICE_SLOTS);
        assert_eq!(entry.normalized_values[0], Some(100.0));
        assert_eq!(entry.normalized_values[1], Some(0.0));
        assert_eq!(entry.normalized_values[2], None);
        assert_eq!(entry.normalized_values[5], None);
    }

    #[test]
    fn parse_flat_records_carries_forward_and_rebases() {
        let text = r#"[
            {"id": 1, "value": 10, "ts": 1000},
            {"id": 2, "value": 40, "ts": 1000},
            {"id": 1, "value": 60, "ts": 1400}
        ]"#;
        let entries = parse_log(text).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].timestamp, 0);
        assert_eq!(entries[1].timestamp, 400);
        // Device 2 is not mentioned at ts=1400 but its value carries forward.
        assert_eq!(entries[1].normalized_values[0], Some(60.0));
        assert_eq!(entries[1].normalized_values[1], Some(40.0));
        // Devices never mentioned stay null throughout.
        assert_eq!(entries[0].normalized_values[3], None);
        assert_eq!(entries[1].normalized_values[3], None);
    }

    #[test]
    fn parse_wrapped_and_shaped_formats() {
        let wrapped = r#"{"records": [{"id": 3, "value": 55, "ts": 0}]}"#;
        let entries = parse_log(wrapped).unwrap();
        assert_eq!(entries[0].normalized_values[2], Some(55.0));

        let shaped = r#"{"entries": [
            {"timestamp": 0, "normalizedValues": [25, null, null, null, null, null]}
        ]}"#;
        let entries = parse_log(shaped).unwrap();
        assert_eq!(entries[0].normalized_values[0], Some(25.0));
    }

    #[test]
    fn parse_drops_malformed_records_silently() {
        let text = r#"[
            {"id": 1, "value": 50, "ts": 0},
            {"id": "broken"},
            {"id": 99, "value": 50, "ts": 0},
            {"value": 20, "ts": 100}
        ]"#;
        let entries = parse_log(text).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].normalized_values[0], Some(50.0));
    }

    #[test]
    fn parse_rejects_bad_json_and_unknown_shape() {
        assert!(parse_log("not json").is_err());
        assert!(parse_log(r#"{"values": [1, 2, 3]}"#).is_err());
    }

    #[test]
    fn session_records_skip_nulls_and_round() {
        let mut session = SessionLog::new("test");
        session.add_entry(LogEntry::new(0, &[Some(10.4), None, Some(99.6)]));
        session.finish();
        assert!(session.ended_at.is_some());

        let records = session.to_records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0], LogRecord { id: 1, value: 10.0, ts: 0 });
        assert_eq!(records[1], LogRecord { id: 3, value: 100.0, ts: 0 });
    }
}
