//! Session-partitioned append-only event log.
//!
//! One JSONL file per session under `.orchestrator/events/`. Files are
//! never rewritten; a corrupt line never breaks queries for the lines
//! after it.

use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};

use bv_domain::config::EventsConfig;
use bv_domain::error::Result;
use bv_domain::ids::{event_id, sanitize_session_id};
use bv_domain::trace::TraceEvent;

use crate::fsutil::{read_lines, JsonlAppender};
use crate::payload::sanitize_payload;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Event record
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One persisted runtime event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRecord {
    pub id: String,
    pub session_id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    /// Unix millis.
    pub timestamp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub turn: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

/// Input to [`EventStore::append`].
#[derive(Debug, Clone)]
pub struct EventAppend {
    pub session_id: String,
    pub event_type: String,
    pub turn: Option<u64>,
    pub payload: Option<serde_json::Value>,
    /// Unix millis; defaults to now.
    pub timestamp: Option<i64>,
}

impl EventAppend {
    pub fn new(session_id: &str, event_type: &str) -> Self {
        Self {
            session_id: session_id.to_owned(),
            event_type: event_type.to_owned(),
            turn: None,
            payload: None,
            timestamp: None,
        }
    }

    pub fn with_turn(mut self, turn: u64) -> Self {
        self.turn = Some(turn);
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }
}

/// Filters for [`EventStore::query`].
#[derive(Debug, Clone, Default)]
pub struct EventQuery {
    pub event_type: Option<String>,
    /// Keep only the last N matching records.
    pub last: Option<usize>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Event store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Append-only per-session event files.
pub struct EventStore {
    dir: PathBuf,
    persist: bool,
    appender: JsonlAppender,
}

impl EventStore {
    /// `orchestrator_dir` is `<workspace>/.orchestrator`.
    pub fn new(orchestrator_dir: &Path, config: &EventsConfig) -> Self {
        Self {
            dir: orchestrator_dir.join("events"),
            persist: config.persist,
            appender: JsonlAppender::new(),
        }
    }

    fn path_for(&self, session_id: &str) -> PathBuf {
        self.dir
            .join(format!("{}.jsonl", sanitize_session_id(session_id)))
    }

    /// Persist one event. Returns `None` iff persistence is disabled.
    pub fn append(&self, input: EventAppend) -> Result<Option<EventRecord>> {
        if !self.persist {
            return Ok(None);
        }

        let record = EventRecord {
            id: event_id(),
            session_id: input.session_id.clone(),
            event_type: input.event_type.clone(),
            timestamp: input.timestamp.unwrap_or_else(|| Utc::now().timestamp_millis()),
            turn: input.turn,
            payload: input.payload.map(sanitize_payload),
        };

        let json = serde_json::to_string(&record)?;
        self.appender.append(&self.path_for(&input.session_id), &json)?;

        TraceEvent::EventAppended {
            session_id: input.session_id,
            event_type: input.event_type,
        }
        .emit();

        Ok(Some(record))
    }

    /// Read a session's events, skipping unparseable lines.
    pub fn query(&self, session_id: &str, query: &EventQuery) -> Result<Vec<EventRecord>> {
        let path = self.path_for(session_id);
        let mut records = Vec::new();
        for line in read_lines(&path)? {
            match serde_json::from_str::<EventRecord>(&line) {
                Ok(record) => {
                    if let Some(wanted) = &query.event_type {
                        if &record.event_type != wanted {
                            continue;
                        }
                    }
                    records.push(record);
                }
                Err(e) => {
                    tracing::debug!(
                        session_id,
                        error = %e,
                        "skipping malformed event line"
                    );
                }
            }
        }
        if let Some(last) = query.last {
            if last > 0 && records.len() > last {
                records.drain(..records.len() - last);
            }
        }
        Ok(records)
    }

    /// Sessions with non-empty event files, most recently written first.
    pub fn list_session_ids(&self) -> Result<Vec<String>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut entries: Vec<(String, std::time::SystemTime)> = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
                continue;
            }
            let meta = entry.metadata()?;
            if meta.len() == 0 {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                let mtime = meta.modified().unwrap_or(std::time::UNIX_EPOCH);
                entries.push((stem.to_owned(), mtime));
            }
        }
        entries.sort_by(|a, b| b.1.cmp(&a.1));
        Ok(entries.into_iter().map(|(id, _)| id).collect())
    }

    /// Drop the cached non-emptiness bit for a session's file.
    pub fn clear_session_cache(&self, session_id: &str) {
        self.appender.invalidate(&self.path_for(session_id));
    }
}
