//! Hash-chained evidence ledger.
//!
//! A single append-only JSONL file shared by every session. Rows for
//! one session form an unbroken hash chain starting at the literal
//! `"root"`; each row's `hash` covers the serialized row body, so the
//! file is self-verifying. Compaction folds a session's oldest rows
//! into a `ledger_checkpoint` pseudo-row and restarts that session's
//! chain.

use std::collections::HashMap;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use bv_domain::error::{Error, Result};
use bv_domain::ids::evidence_id;
use bv_domain::trace::TraceEvent;

use crate::fsutil::{read_lines, write_file_atomic, JsonlAppender};
use crate::redact::redact_secrets;

/// Chain origin marker for a session's first row.
pub const ROOT_HASH: &str = "root";

/// Tool name of the pseudo-row synthesized by compaction.
pub const CHECKPOINT_TOOL: &str = "ledger_checkpoint";

/// Ledger rows with this tool tag are cost records, excluded from
/// digests.
pub const COST_TOOL: &str = "brewva_cost";

const SUMMARY_MAX_CHARS: usize = 200;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Row types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Pass,
    Fail,
    Inconclusive,
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Verdict::Pass => write!(f, "pass"),
            Verdict::Fail => write!(f, "fail"),
            Verdict::Inconclusive => write!(f, "inconclusive"),
        }
    }
}

/// One persisted evidence row. Field order matters: `hash` covers the
/// serialization of every field before it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvidenceRow {
    pub id: String,
    pub timestamp: i64,
    pub turn: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skill: Option<String>,
    pub tool: String,
    pub args_summary: String,
    pub output_summary: String,
    pub output_hash: String,
    pub verdict: Verdict,
    pub session_id: String,
    pub previous_hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    pub hash: String,
}

/// The hashed portion of a row: every field except `hash`, in the same
/// order.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RowBody<'a> {
    id: &'a str,
    timestamp: i64,
    turn: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    skill: Option<&'a str>,
    tool: &'a str,
    args_summary: &'a str,
    output_summary: &'a str,
    output_hash: &'a str,
    verdict: Verdict,
    session_id: &'a str,
    previous_hash: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    metadata: Option<&'a serde_json::Value>,
}

fn body_hash(row: &EvidenceRow) -> Result<String> {
    let body = RowBody {
        id: &row.id,
        timestamp: row.timestamp,
        turn: row.turn,
        skill: row.skill.as_deref(),
        tool: &row.tool,
        args_summary: &row.args_summary,
        output_summary: &row.output_summary,
        output_hash: &row.output_hash,
        verdict: row.verdict,
        session_id: &row.session_id,
        previous_hash: &row.previous_hash,
        metadata: row.metadata.as_ref(),
    };
    let json = serde_json::to_string(&body)?;
    Ok(sha256_hex(json.as_bytes()))
}

fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Input to [`EvidenceLedger::append`].
#[derive(Debug, Clone)]
pub struct EvidenceInput {
    pub session_id: String,
    pub turn: u64,
    pub skill: Option<String>,
    pub tool: String,
    pub args_summary: String,
    pub output_summary: String,
    /// Full tool output; hashed (after redaction), never stored.
    pub output: String,
    pub verdict: Verdict,
    pub metadata: Option<serde_json::Value>,
}

impl EvidenceInput {
    pub fn new(session_id: &str, tool: &str, output_summary: &str) -> Self {
        Self {
            session_id: session_id.to_owned(),
            turn: 0,
            skill: None,
            tool: tool.to_owned(),
            args_summary: String::new(),
            output_summary: output_summary.to_owned(),
            output: output_summary.to_owned(),
            verdict: Verdict::Pass,
            metadata: None,
        }
    }

    pub fn with_turn(mut self, turn: u64) -> Self {
        self.turn = turn;
        self
    }

    pub fn with_verdict(mut self, verdict: Verdict) -> Self {
        self.verdict = verdict;
        self
    }

    pub fn with_args(mut self, args_summary: &str) -> Self {
        self.args_summary = args_summary.to_owned();
        self
    }

    pub fn with_output(mut self, output: &str) -> Self {
        self.output = output.to_owned();
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Result of [`EvidenceLedger::verify_chain`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainVerification {
    pub valid: bool,
    pub reason: Option<String>,
}

impl ChainVerification {
    fn ok() -> Self {
        Self {
            valid: true,
            reason: None,
        }
    }

    fn broken(reason: String) -> Self {
        Self {
            valid: false,
            reason: Some(reason),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Ledger
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Byte range of one row in the ledger file.
#[derive(Debug, Clone, Copy)]
struct RowSpan {
    offset: u64,
    len: usize,
}

#[derive(Default)]
struct LedgerState {
    last_hash_by_session: HashMap<String, String>,
    /// Lazily-built session → row-span index, so verifying one session
    /// does not re-parse the whole shared file on every call.
    index: Option<HashMap<String, Vec<RowSpan>>>,
}

/// Append-only, hash-chained evidence store.
///
/// All mutation and index state sits behind one mutex, so an `append`
/// racing a `compact_session` in this process blocks until the rewrite
/// lands.
pub struct EvidenceLedger {
    path: PathBuf,
    appender: JsonlAppender,
    state: Mutex<LedgerState>,
}

impl EvidenceLedger {
    /// `orchestrator_dir` is `<workspace>/.orchestrator`.
    pub fn new(orchestrator_dir: &Path) -> Self {
        Self {
            path: orchestrator_dir.join("ledger").join("evidence.jsonl"),
            appender: JsonlAppender::new(),
            state: Mutex::new(LedgerState::default()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one evidence row, chaining it to the session's last row.
    pub fn append(&self, input: EvidenceInput) -> Result<EvidenceRow> {
        let mut state = self.state.lock();

        let previous_hash = match state.last_hash_by_session.get(&input.session_id) {
            Some(hash) => hash.clone(),
            None => self
                .last_row_for_session(&mut state, &input.session_id)?
                .map(|row| row.hash)
                .unwrap_or_else(|| ROOT_HASH.to_owned()),
        };

        let mut row = EvidenceRow {
            id: evidence_id(),
            timestamp: Utc::now().timestamp_millis(),
            turn: input.turn,
            skill: input.skill,
            tool: input.tool,
            args_summary: truncate_summary(&redact_secrets(&input.args_summary)),
            output_summary: truncate_summary(&redact_secrets(&input.output_summary)),
            output_hash: sha256_hex(redact_secrets(&input.output).as_bytes()),
            verdict: input.verdict,
            session_id: input.session_id.clone(),
            previous_hash,
            metadata: input.metadata,
            hash: String::new(),
        };
        row.hash = body_hash(&row)?;

        let json = serde_json::to_string(&row)?;
        let offset = self.appender.append(&self.path, &json)?;

        state
            .last_hash_by_session
            .insert(input.session_id.clone(), row.hash.clone());
        if let Some(index) = state.index.as_mut() {
            index.entry(input.session_id).or_default().push(RowSpan {
                offset,
                len: json.len(),
            });
        }

        TraceEvent::LedgerAppended {
            session_id: row.session_id.clone(),
            tool: row.tool.clone(),
            verdict: row.verdict.to_string(),
        }
        .emit();

        Ok(row)
    }

    /// All rows for a session, in file order.
    pub fn rows_for_session(&self, session_id: &str) -> Result<Vec<EvidenceRow>> {
        let mut state = self.state.lock();
        self.read_session_rows(&mut state, session_id)
    }

    /// Walk a session's chain, checking linkage and recomputed hashes.
    pub fn verify_chain(&self, session_id: &str) -> Result<ChainVerification> {
        let rows = self.rows_for_session(session_id)?;
        let mut prev = ROOT_HASH.to_owned();
        for row in &rows {
            if body_hash(row)? != row.hash {
                return Ok(ChainVerification::broken(format!(
                    "invalid hash at {}",
                    row.id
                )));
            }
            if row.previous_hash != prev {
                return Ok(ChainVerification::broken(format!(
                    "broken chain at {}",
                    row.id
                )));
            }
            prev = row.hash.clone();
        }
        Ok(ChainVerification::ok())
    }

    /// Compact a session's history down to its `keep_last` newest rows
    /// plus a checkpoint pseudo-row. Rows for other sessions keep their
    /// positions.
    pub fn compact_session(
        &self,
        session_id: &str,
        keep_last: usize,
        reason: &str,
    ) -> Result<bool> {
        let mut state = self.state.lock();

        let lines = read_lines(&self.path)?;
        let mut parsed: Vec<(String, Option<EvidenceRow>)> = lines
            .into_iter()
            .map(|line| {
                let row = serde_json::from_str::<EvidenceRow>(&line).ok();
                (line, row)
            })
            .collect();

        let session_positions: Vec<usize> = parsed
            .iter()
            .enumerate()
            .filter(|(_, (_, row))| {
                row.as_ref().is_some_and(|r| r.session_id == session_id)
            })
            .map(|(i, _)| i)
            .collect();

        if session_positions.len() <= keep_last {
            return Ok(false);
        }

        let split = session_positions.len() - keep_last;
        let compacted_positions = &session_positions[..split];
        let kept_positions = &session_positions[split..];
        let splice_at = *compacted_positions.last().unwrap_or(&0);

        let compacted: Vec<EvidenceRow> = compacted_positions
            .iter()
            .filter_map(|&i| parsed[i].1.clone())
            .collect();
        let kept: Vec<EvidenceRow> = kept_positions
            .iter()
            .filter_map(|&i| parsed[i].1.clone())
            .collect();

        // Checkpoint summarizing the compacted range.
        let from_turn = compacted.iter().map(|r| r.turn).min().unwrap_or(0);
        let to_turn = compacted.iter().map(|r| r.turn).max().unwrap_or(0);
        let from_ts = compacted.iter().map(|r| r.timestamp).min().unwrap_or(0);
        let to_ts = compacted.iter().map(|r| r.timestamp).max().unwrap_or(0);
        let summary = format!(
            "compacted {} rows (turns {from_turn}-{to_turn})",
            compacted.len()
        );
        let mut checkpoint = EvidenceRow {
            id: evidence_id(),
            timestamp: Utc::now().timestamp_millis(),
            turn: to_turn,
            skill: None,
            tool: CHECKPOINT_TOOL.to_owned(),
            args_summary: reason.to_owned(),
            output_summary: summary.clone(),
            output_hash: sha256_hex(summary.as_bytes()),
            verdict: Verdict::Pass,
            session_id: session_id.to_owned(),
            previous_hash: ROOT_HASH.to_owned(),
            metadata: Some(serde_json::json!({
                "count": compacted.len(),
                "fromTurn": from_turn,
                "toTurn": to_turn,
                "fromTimestamp": from_ts,
                "toTimestamp": to_ts,
                "reason": reason,
            })),
            hash: String::new(),
        };
        checkpoint.hash = body_hash(&checkpoint)?;

        // Re-hash the kept rows onto the restarted chain.
        let mut rehashed = Vec::with_capacity(kept.len() + 1);
        let mut prev = checkpoint.hash.clone();
        rehashed.push(checkpoint);
        for mut row in kept {
            row.previous_hash = prev;
            row.hash = body_hash(&row)?;
            prev = row.hash.clone();
            rehashed.push(row);
        }
        let new_last_hash = prev;

        // Rebuild: other rows keep their order; the session's rows are
        // replaced by [checkpoint, …kept] at the last compacted slot.
        let mut out_lines: Vec<String> = Vec::with_capacity(parsed.len());
        for (i, (raw, row)) in parsed.iter_mut().enumerate() {
            let is_session_row = row
                .as_ref()
                .is_some_and(|r| r.session_id == session_id);
            if !is_session_row {
                out_lines.push(std::mem::take(raw));
                continue;
            }
            if i == splice_at {
                for replacement in &rehashed {
                    out_lines.push(serde_json::to_string(replacement)?);
                }
            }
        }

        write_file_atomic(&self.path, out_lines.join("\n").as_bytes())?;
        self.appender.invalidate(&self.path);
        state
            .last_hash_by_session
            .insert(session_id.to_owned(), new_last_hash);
        state.index = None;

        TraceEvent::LedgerCompacted {
            session_id: session_id.to_owned(),
            compacted_rows: compacted.len(),
            kept_rows: rehashed.len() - 1,
            reason: reason.to_owned(),
        }
        .emit();

        Ok(true)
    }

    /// Compact textual summary of a session's recent evidence for
    /// prompt inclusion. Cost rows are excluded.
    pub fn digest(&self, session_id: &str, max_rows: usize) -> Result<String> {
        let rows = self.rows_for_session(session_id)?;
        let mut lines: Vec<String> = rows
            .iter()
            .filter(|r| r.tool != COST_TOOL)
            .map(|r| {
                format!(
                    "turn {} {} [{}] {}",
                    r.turn, r.tool, r.verdict, r.output_summary
                )
            })
            .collect();
        if lines.len() > max_rows {
            lines.drain(..lines.len() - max_rows);
        }
        Ok(lines.join("\n"))
    }

    /// Drop cached hashes and index (e.g. after an external rewrite).
    pub fn clear_cache(&self) {
        let mut state = self.state.lock();
        state.last_hash_by_session.clear();
        state.index = None;
        self.appender.invalidate(&self.path);
    }

    // ── internals ───────────────────────────────────────────────────

    fn ensure_index(&self, state: &mut LedgerState) -> Result<()> {
        if state.index.is_some() {
            return Ok(());
        }
        let mut index: HashMap<String, Vec<RowSpan>> = HashMap::new();
        if self.path.exists() {
            let raw = std::fs::read_to_string(&self.path).map_err(Error::Io)?;
            let mut offset = 0u64;
            for line in raw.split('\n') {
                let len = line.len();
                if !line.trim().is_empty() {
                    if let Ok(row) = serde_json::from_str::<EvidenceRow>(line) {
                        index
                            .entry(row.session_id)
                            .or_default()
                            .push(RowSpan { offset, len });
                    }
                }
                offset += len as u64 + 1;
            }
        }
        state.index = Some(index);
        Ok(())
    }

    fn read_session_rows(
        &self,
        state: &mut LedgerState,
        session_id: &str,
    ) -> Result<Vec<EvidenceRow>> {
        self.ensure_index(state)?;
        let spans = match state.index.as_ref().and_then(|i| i.get(session_id)) {
            Some(spans) if !spans.is_empty() => spans.clone(),
            _ => return Ok(Vec::new()),
        };

        let mut file = std::fs::File::open(&self.path).map_err(Error::Io)?;
        let mut rows = Vec::with_capacity(spans.len());
        for span in spans {
            file.seek(SeekFrom::Start(span.offset)).map_err(Error::Io)?;
            let mut buf = vec![0u8; span.len];
            file.read_exact(&mut buf).map_err(Error::Io)?;
            let line = String::from_utf8_lossy(&buf);
            match serde_json::from_str::<EvidenceRow>(&line) {
                Ok(row) => rows.push(row),
                Err(e) => {
                    // Index out of date (external rewrite): fail closed
                    // and let the caller retry with a fresh index.
                    state.index = None;
                    return Err(Error::Integrity(format!(
                        "stale ledger index at offset {}: {e}",
                        span.offset
                    )));
                }
            }
        }
        Ok(rows)
    }

    fn last_row_for_session(
        &self,
        state: &mut LedgerState,
        session_id: &str,
    ) -> Result<Option<EvidenceRow>> {
        let mut rows = self.read_session_rows(state, session_id)?;
        Ok(rows.pop())
    }
}

fn truncate_summary(text: &str) -> String {
    if text.chars().count() <= SUMMARY_MAX_CHARS {
        return text.to_owned();
    }
    text.chars().take(SUMMARY_MAX_CHARS).collect()
}
