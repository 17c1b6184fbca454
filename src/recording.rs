//! Session recording: sampling view-model changes into a log.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::domain::{LogEntry, SessionLog};
use crate::error::{MeterError, Result};

/// Accumulates a session log while armed. One entry is appended per view
/// model change notification, stamped with elapsed milliseconds since the
/// recording started. Nulls are preserved as-is.
pub struct RecordingEngine {
    session: Option<SessionLog>,
    started: Option<Instant>,
}

/// A projection of the recorder state for status displays.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordingStatus {
    pub is_recording: bool,
    pub entry_count: usize,
    pub started_at: Option<DateTime<Utc>>,
}

impl Default for RecordingEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingEngine {
    pub fn new() -> Self {
        Self {
            session: None,
            started: None,
        }
    }

    /// Arm the recorder. A previous unfinished session is discarded.
    pub fn start(&mut self, name: impl Into<String>) {
        self.session = Some(SessionLog::new(name));
        self.started = Some(Instant::now());
        info!("recording started");
    }

    pub fn is_recording(&self) -> bool {
        self.session.is_some()
    }

    /// Append one entry from the current normalized values. No-op while idle.
    pub fn record(&mut self, values: &[Option<f64>]) {
        let (Some(session), Some(started)) = (self.session.as_mut(), self.started) else {
            return;
        };
        let elapsed = started.elapsed().as_millis() as u64;
        session.add_entry(LogEntry::new(elapsed, values));
    }

    /// Disarm and finalize. Returns the finished, immutable session, or
    /// `None` when nothing was being recorded.
    pub fn stop(&mut self) -> Option<SessionLog> {
        self.started = None;
        let mut session = self.session.take()?;
        session.finish();
        info!(entries = session.entries.len(), "recording stopped");
        Some(session)
    }

    pub fn status(&self) -> RecordingStatus {
        RecordingStatus {
            is_recording: self.session.is_some(),
            entry_count: self.session.as_ref().map_or(0, |s| s.entries.len()),
            started_at: self.session.as_ref().map(|s| s.started_at),
        }
    }
}

/// Persistence collaborator for finished sessions. File writing and filename
/// formatting live here, not in the recorder.
#[async_trait]
pub trait LogSink: Send + Sync {
    /// Persist a session, returning the filename actually used.
    async fn save(&self, session: &SessionLog, filename: Option<&str>) -> Result<String>;
}

/// Writes sessions as flat-record JSON files into a directory.
pub struct FileLogSink {
    dir: PathBuf,
}

impl FileLogSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl LogSink for FileLogSink {
    async fn save(&self, session: &SessionLog, filename: Option<&str>) -> Result<String> {
        let filename = filename
            .map(str::to_string)
            .unwrap_or_else(|| default_filename(session));
        let body = serde_json::json!({
            "name": session.name,
            "records": session.to_records(),
        });
        let text = serde_json::to_string_pretty(&body)
            .map_err(|e| MeterError::storage_error(e.to_string()))?;
        tokio::fs::create_dir_all(&self.dir).await?;
        tokio::fs::write(self.dir.join(&filename), text).await?;
        info!(%filename, "session log written");
        Ok(filename)
    }
}

/// Posts sessions to the relay's save-log endpoint as a best-effort backup.
pub struct HttpLogSink {
    endpoint: String,
    client: reqwest::Client,
}

impl HttpLogSink {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl LogSink for HttpLogSink {
    async fn save(&self, session: &SessionLog, filename: Option<&str>) -> Result<String> {
        let filename = filename
            .map(str::to_string)
            .unwrap_or_else(|| default_filename(session));
        let body = serde_json::json!({
            "records": session.to_records(),
            "filename": filename,
        });
        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| MeterError::network_error(e.to_string()))?;
        if !response.status().is_success() {
            return Err(MeterError::network_error(format!(
                "save-log returned {}",
                response.status()
            )));
        }
        debug!(%filename, "session log backed up to relay");
        Ok(filename)
    }
}

fn default_filename(session: &SessionLog) -> String {
    format!(
        "meter-log-{}.json",
        session.started_at.format("%Y-%m-%dT%H-%M-%S")
    )
}
