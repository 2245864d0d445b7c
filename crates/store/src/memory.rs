//! Workspace-local memory stores.
//!
//! Append-only JSONL files under `.orchestrator/memory/` (plus a
//! `global/` pair shared across workspaces' sessions) feeding the
//! working-memory and recall context zones. Reads are fail-open like
//! the event store.

use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};

use bv_domain::error::Result;
use bv_domain::ids::event_id;

use crate::fsutil::{read_lines, JsonlAppender};
use crate::redact::redact_secrets;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Memory record families, one JSONL file each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryKind {
    Unit,
    Crystal,
    Insight,
    Evolve,
}

impl MemoryKind {
    fn file_name(self) -> &'static str {
        match self {
            MemoryKind::Unit => "units.jsonl",
            MemoryKind::Crystal => "crystals.jsonl",
            MemoryKind::Insight => "insights.jsonl",
            MemoryKind::Evolve => "evolves.jsonl",
        }
    }

    /// Only units and crystals have a global counterpart.
    fn has_global(self) -> bool {
        matches!(self, MemoryKind::Unit | MemoryKind::Crystal)
    }
}

/// One memory record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryEntry {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub kind: MemoryKind,
    pub content: String,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Unix millis.
    pub created_at: i64,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct MemoryStore {
    dir: PathBuf,
    appender: JsonlAppender,
}

impl MemoryStore {
    /// `orchestrator_dir` is `<workspace>/.orchestrator`.
    pub fn new(orchestrator_dir: &Path) -> Self {
        Self {
            dir: orchestrator_dir.join("memory"),
            appender: JsonlAppender::new(),
        }
    }

    fn path(&self, kind: MemoryKind, global: bool) -> PathBuf {
        if global {
            self.dir.join("global").join(kind.file_name())
        } else {
            self.dir.join(kind.file_name())
        }
    }

    /// Persist one memory record.
    pub fn append(
        &self,
        kind: MemoryKind,
        session_id: Option<&str>,
        content: &str,
        tags: Vec<String>,
        global: bool,
    ) -> Result<MemoryEntry> {
        let entry = MemoryEntry {
            id: event_id(),
            session_id: session_id.map(str::to_owned),
            kind,
            content: redact_secrets(content),
            tags,
            created_at: Utc::now().timestamp_millis(),
        };
        let json = serde_json::to_string(&entry)?;
        self.appender
            .append(&self.path(kind, global && kind.has_global()), &json)?;
        Ok(entry)
    }

    /// A session's most recent unit entries, oldest first.
    pub fn working(&self, session_id: &str, last: usize) -> Result<Vec<MemoryEntry>> {
        let mut entries: Vec<MemoryEntry> = self
            .load(MemoryKind::Unit, false)?
            .into_iter()
            .filter(|e| e.session_id.as_deref() == Some(session_id))
            .collect();
        if entries.len() > last {
            entries.drain(..entries.len() - last);
        }
        Ok(entries)
    }

    /// Keyword recall over units and crystals (local + global),
    /// recency-weighted, best `k` matches.
    pub fn recall(&self, query: &str, k: usize) -> Result<Vec<MemoryEntry>> {
        let needles: Vec<String> = query
            .to_lowercase()
            .split_whitespace()
            .filter(|w| w.len() > 2)
            .map(str::to_owned)
            .collect();
        if needles.is_empty() {
            return Ok(Vec::new());
        }

        let mut scored: Vec<(usize, MemoryEntry)> = Vec::new();
        for (kind, global) in [
            (MemoryKind::Unit, false),
            (MemoryKind::Crystal, false),
            (MemoryKind::Unit, true),
            (MemoryKind::Crystal, true),
        ] {
            for entry in self.load(kind, global)? {
                let haystack = entry.content.to_lowercase();
                let score = needles.iter().filter(|n| haystack.contains(n.as_str())).count();
                if score > 0 {
                    scored.push((score, entry));
                }
            }
        }

        scored.sort_by(|a, b| b.0.cmp(&a.0).then(b.1.created_at.cmp(&a.1.created_at)));
        Ok(scored.into_iter().take(k).map(|(_, e)| e).collect())
    }

    fn load(&self, kind: MemoryKind, global: bool) -> Result<Vec<MemoryEntry>> {
        let mut entries = Vec::new();
        for line in read_lines(&self.path(kind, global))? {
            match serde_json::from_str::<MemoryEntry>(&line) {
                Ok(entry) => entries.push(entry),
                Err(e) => {
                    tracing::debug!(error = %e, "skipping malformed memory line");
                }
            }
        }
        Ok(entries)
    }
}
