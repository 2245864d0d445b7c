//! Turn write-ahead log.
//!
//! Each scope (one per channel adapter, plus `gateway`, `schedule`,
//! `heartbeat`) owns an append-only JSONL file under
//! `.orchestrator/turn-wal/`. Status transitions append a new row; the
//! *latest* row for a `wal_id` is authoritative and earlier rows are
//! history. A crash mid-write tears at most the trailing line, which
//! readers skip.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use bv_domain::config::WalConfig;
use bv_domain::envelope::TurnEnvelope;
use bv_domain::error::{Error, Result};
use bv_domain::ids::{sanitize_session_id, wal_id};
use bv_domain::trace::TraceEvent;

use crate::fsutil::{read_lines, write_file_atomic, JsonlAppender};

/// Schema tag stamped on every WAL row.
pub const WAL_SCHEMA: &str = "turn-wal.v1";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Record types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WalStatus {
    Pending,
    Inflight,
    Done,
    Failed,
    Expired,
}

impl WalStatus {
    /// Terminal rows never transition again and age out via `compact`.
    pub fn is_terminal(self) -> bool {
        matches!(self, WalStatus::Done | WalStatus::Failed | WalStatus::Expired)
    }

    /// Recoverable rows are replayed after a crash.
    pub fn is_recoverable(self) -> bool {
        matches!(self, WalStatus::Pending | WalStatus::Inflight)
    }
}

impl std::fmt::Display for WalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            WalStatus::Pending => "pending",
            WalStatus::Inflight => "inflight",
            WalStatus::Done => "done",
            WalStatus::Failed => "failed",
            WalStatus::Expired => "expired",
        };
        write!(f, "{name}")
    }
}

/// Where an inbound turn came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WalSource {
    Channel,
    Schedule,
    Gateway,
    Heartbeat,
}

/// One WAL row.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnWalRecord {
    pub schema: String,
    pub wal_id: String,
    pub turn_id: String,
    pub session_id: String,
    pub channel: String,
    pub conversation_id: String,
    pub status: WalStatus,
    pub envelope: TurnEnvelope,
    /// Unix millis.
    pub created_at: i64,
    pub updated_at: i64,
    pub attempts: u32,
    pub source: WalSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dedupe_key: Option<String>,
}

impl TurnWalRecord {
    fn expired_by_ttl(&self, now: i64) -> bool {
        match self.ttl_ms {
            Some(ttl) => self.created_at + ttl as i64 <= now,
            None => false,
        }
    }
}

/// Options for [`TurnWal::append_pending`].
#[derive(Debug, Clone, Default)]
pub struct WalAppendOptions {
    pub ttl_ms: Option<u64>,
    pub dedupe_key: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// TurnWal
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct WalInner {
    appender: JsonlAppender,
    /// Latest row per wal_id, folded lazily from the file.
    latest: Option<HashMap<String, TurnWalRecord>>,
}

/// One scope's write-ahead log.
pub struct TurnWal {
    scope: String,
    path: PathBuf,
    config: WalConfig,
    inner: Mutex<WalInner>,
}

impl TurnWal {
    /// `orchestrator_dir` is `<workspace>/.orchestrator`.
    pub fn open(orchestrator_dir: &Path, scope: &str, config: WalConfig) -> Self {
        let path = orchestrator_dir
            .join("turn-wal")
            .join(format!("{}.jsonl", sanitize_session_id(scope)));
        Self {
            scope: scope.to_owned(),
            path,
            config,
            inner: Mutex::new(WalInner {
                appender: JsonlAppender::new(),
                latest: None,
            }),
        }
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// Record a newly-arrived turn as `pending`.
    ///
    /// When a matching non-terminal `dedupe_key` row exists, that row is
    /// returned instead of appending a duplicate.
    pub fn append_pending(
        &self,
        envelope: TurnEnvelope,
        source: WalSource,
        opts: WalAppendOptions,
    ) -> Result<TurnWalRecord> {
        let mut inner = self.inner.lock();
        self.ensure_latest(&mut inner)?;

        if let Some(key) = &opts.dedupe_key {
            let existing = inner
                .latest
                .as_ref()
                .and_then(|latest| {
                    latest
                        .values()
                        .find(|r| r.dedupe_key.as_deref() == Some(key) && !r.status.is_terminal())
                })
                .cloned();
            if let Some(record) = existing {
                return Ok(record);
            }
        }

        let now = Utc::now().timestamp_millis();
        let ttl_ms = opts.ttl_ms.or(Some(match source {
            WalSource::Schedule => self.config.schedule_turn_ttl_ms,
            _ => self.config.turn_ttl_ms,
        }));
        let record = TurnWalRecord {
            schema: WAL_SCHEMA.to_owned(),
            wal_id: wal_id(),
            turn_id: envelope.turn_id.clone(),
            session_id: envelope.session_id.clone(),
            channel: envelope.channel.clone(),
            conversation_id: envelope.conversation_id.clone(),
            status: WalStatus::Pending,
            envelope,
            created_at: now,
            updated_at: now,
            attempts: 0,
            source,
            ttl_ms,
            error: None,
            dedupe_key: opts.dedupe_key,
        };
        self.append_row(&mut inner, &record)?;
        Ok(record)
    }

    /// Transition a record to `inflight`, bumping `attempts`.
    pub fn mark_inflight(&self, wal_id: &str) -> Result<TurnWalRecord> {
        self.transition(wal_id, |record| {
            record.status = WalStatus::Inflight;
            record.attempts += 1;
        })
    }

    pub fn mark_done(&self, wal_id: &str) -> Result<TurnWalRecord> {
        self.transition(wal_id, |record| {
            record.status = WalStatus::Done;
        })
    }

    pub fn mark_failed(&self, wal_id: &str, error: Option<&str>) -> Result<TurnWalRecord> {
        self.transition(wal_id, |record| {
            record.status = WalStatus::Failed;
            record.error = error.map(str::to_owned);
        })
    }

    pub fn mark_expired(&self, wal_id: &str) -> Result<TurnWalRecord> {
        self.transition(wal_id, |record| {
            record.status = WalStatus::Expired;
        })
    }

    /// Recoverable records in `(created_at, updated_at)` order.
    ///
    /// Records past their TTL are marked expired as a side effect and
    /// not returned.
    pub fn list_pending(&self) -> Result<Vec<TurnWalRecord>> {
        let mut inner = self.inner.lock();
        self.ensure_latest(&mut inner)?;
        let now = Utc::now().timestamp_millis();

        let candidates: Vec<TurnWalRecord> = inner
            .latest
            .as_ref()
            .map(|latest| {
                latest
                    .values()
                    .filter(|r| r.status.is_recoverable())
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        let mut pending = Vec::new();
        for mut record in candidates {
            if record.expired_by_ttl(now) {
                record.status = WalStatus::Expired;
                record.updated_at = now;
                self.append_row(&mut inner, &record)?;
                continue;
            }
            pending.push(record);
        }
        pending.sort_by_key(|r| (r.created_at, r.updated_at));
        Ok(pending)
    }

    /// Drop history: keep only latest rows that are non-terminal or
    /// younger than `compact_after_ms`.
    pub fn compact(&self) -> Result<usize> {
        let mut inner = self.inner.lock();
        self.ensure_latest(&mut inner)?;
        let now = Utc::now().timestamp_millis();

        let mut keep: Vec<TurnWalRecord> = inner
            .latest
            .as_ref()
            .map(|latest| {
                latest
                    .values()
                    .filter(|r| {
                        !r.status.is_terminal()
                            || r.updated_at + self.config.compact_after_ms as i64 > now
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        keep.sort_by_key(|r| (r.created_at, r.updated_at));

        let lines: Vec<String> = keep
            .iter()
            .map(serde_json::to_string)
            .collect::<std::result::Result<_, _>>()?;
        write_file_atomic(&self.path, lines.join("\n").as_bytes())?;
        inner.appender.invalidate(&self.path);

        let kept = keep.len();
        inner.latest = Some(keep.into_iter().map(|r| (r.wal_id.clone(), r)).collect());
        Ok(kept)
    }

    // ── internals ───────────────────────────────────────────────────

    fn transition(
        &self,
        wal_id: &str,
        apply: impl FnOnce(&mut TurnWalRecord),
    ) -> Result<TurnWalRecord> {
        let mut inner = self.inner.lock();
        self.ensure_latest(&mut inner)?;

        let mut record = inner
            .latest
            .as_ref()
            .and_then(|latest| latest.get(wal_id))
            .cloned()
            .ok_or_else(|| Error::Other(format!("unknown wal id: {wal_id}")))?;
        apply(&mut record);
        record.updated_at = Utc::now().timestamp_millis();
        self.append_row(&mut inner, &record)?;
        Ok(record)
    }

    fn append_row(&self, inner: &mut WalInner, record: &TurnWalRecord) -> Result<()> {
        let json = serde_json::to_string(record)?;
        inner.appender.append(&self.path, &json)?;
        if let Some(latest) = inner.latest.as_mut() {
            latest.insert(record.wal_id.clone(), record.clone());
        }
        TraceEvent::WalAppended {
            scope: self.scope.clone(),
            wal_id: record.wal_id.clone(),
            status: record.status.to_string(),
        }
        .emit();
        Ok(())
    }

    fn ensure_latest(&self, inner: &mut WalInner) -> Result<()> {
        if inner.latest.is_some() {
            return Ok(());
        }
        let mut latest: HashMap<String, TurnWalRecord> = HashMap::new();
        for line in read_lines(&self.path)? {
            match serde_json::from_str::<TurnWalRecord>(&line) {
                // Later rows overwrite earlier ones: latest wins.
                Ok(record) => {
                    latest.insert(record.wal_id.clone(), record);
                }
                Err(e) => {
                    tracing::debug!(scope = %self.scope, error = %e, "skipping torn wal line");
                }
            }
        }
        inner.latest = Some(latest);
        Ok(())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Recovery
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Replays one recoverable record, typically by re-enqueueing its
/// envelope with the same `wal_id`.
#[async_trait::async_trait]
pub trait WalReplayHandler: Send + Sync {
    async fn replay(&self, record: TurnWalRecord) -> Result<()>;
}

/// Per-scope totals from one recovery pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecoveryReport {
    pub recovered: usize,
    pub expired: usize,
    pub failed: usize,
}

/// Scans every WAL scope on startup and hands recoverable records to
/// the handler registered for their source.
pub struct WalRecovery {
    orchestrator_dir: PathBuf,
    config: WalConfig,
    handlers: HashMap<WalSource, Arc<dyn WalReplayHandler>>,
    scope_filter: Option<Box<dyn Fn(&str) -> bool + Send + Sync>>,
}

impl WalRecovery {
    pub fn new(orchestrator_dir: &Path, config: WalConfig) -> Self {
        Self {
            orchestrator_dir: orchestrator_dir.to_path_buf(),
            config,
            handlers: HashMap::new(),
            scope_filter: None,
        }
    }

    pub fn register_handler(
        &mut self,
        source: WalSource,
        handler: Arc<dyn WalReplayHandler>,
    ) -> &mut Self {
        self.handlers.insert(source, handler);
        self
    }

    /// Restrict recovery to scopes matching `filter`.
    pub fn with_scope_filter(
        mut self,
        filter: impl Fn(&str) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.scope_filter = Some(Box::new(filter));
        self
    }

    /// List the scopes with WAL files on disk that pass the filter.
    pub fn scopes(&self) -> Result<Vec<String>> {
        let dir = self.orchestrator_dir.join("turn-wal");
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut scopes = Vec::new();
        for entry in std::fs::read_dir(&dir).map_err(Error::Io)? {
            let path = entry.map_err(Error::Io)?.path();
            if path.extension().and_then(|e| e.to_str()) == Some("jsonl") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    let keep = match &self.scope_filter {
                        Some(filter) => filter(stem),
                        None => true,
                    };
                    if keep {
                        scopes.push(stem.to_owned());
                    }
                }
            }
        }
        scopes.sort();
        Ok(scopes)
    }

    /// Replay every recoverable record across all scopes.
    ///
    /// Records from a source with no registered handler are marked
    /// expired; records out of retry budget are marked failed.
    pub async fn recover(&self) -> Result<RecoveryReport> {
        let mut report = RecoveryReport::default();
        for scope in self.scopes()? {
            let wal = TurnWal::open(&self.orchestrator_dir, &scope, self.config.clone());
            let mut scope_report = RecoveryReport::default();

            for record in wal.list_pending()? {
                if record.attempts >= self.config.max_retries {
                    wal.mark_failed(&record.wal_id, Some("max retries exceeded"))?;
                    scope_report.failed += 1;
                    continue;
                }
                let Some(handler) = self.handlers.get(&record.source) else {
                    tracing::warn!(
                        scope = %scope,
                        wal_id = %record.wal_id,
                        source = ?record.source,
                        "no replay handler for source; marking expired"
                    );
                    wal.mark_expired(&record.wal_id)?;
                    scope_report.expired += 1;
                    continue;
                };
                let wal_id = record.wal_id.clone();
                match handler.replay(record).await {
                    Ok(()) => scope_report.recovered += 1,
                    Err(e) => {
                        wal.mark_failed(&wal_id, Some(&e.to_string()))?;
                        scope_report.failed += 1;
                    }
                }
            }

            TraceEvent::WalRecovered {
                scope,
                recovered: scope_report.recovered,
                expired: scope_report.expired,
                failed: scope_report.failed,
            }
            .emit();
            report.recovered += scope_report.recovered;
            report.expired += scope_report.expired;
            report.failed += scope_report.failed;
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bv_domain::envelope::TurnEnvelope;

    fn envelope(conv: &str) -> TurnEnvelope {
        TurnEnvelope::user_text("s1", "telegram", conv, "hello")
    }

    fn wal(dir: &Path) -> TurnWal {
        TurnWal::open(dir, "telegram", WalConfig::default())
    }

    #[test]
    fn latest_row_wins() {
        let tmp = tempfile::tempdir().unwrap();
        let wal = wal(tmp.path());

        let record = wal
            .append_pending(envelope("c1"), WalSource::Channel, WalAppendOptions::default())
            .unwrap();
        wal.mark_inflight(&record.wal_id).unwrap();
        wal.mark_done(&record.wal_id).unwrap();

        // Three rows on disk, zero pending.
        let path = tmp.path().join("turn-wal").join("telegram.jsonl");
        let lines = read_lines(&path).unwrap();
        assert_eq!(lines.len(), 3);
        assert!(wal.list_pending().unwrap().is_empty());
    }

    #[test]
    fn pending_and_inflight_are_recoverable_in_order() {
        let tmp = tempfile::tempdir().unwrap();
        let wal = wal(tmp.path());

        let first = wal
            .append_pending(envelope("c1"), WalSource::Channel, WalAppendOptions::default())
            .unwrap();
        let second = wal
            .append_pending(envelope("c2"), WalSource::Channel, WalAppendOptions::default())
            .unwrap();
        wal.mark_inflight(&first.wal_id).unwrap();

        // Reopen to prove the fold comes from disk.
        let reopened = TurnWal::open(tmp.path(), "telegram", WalConfig::default());
        let pending = reopened.list_pending().unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].wal_id, first.wal_id);
        assert_eq!(pending[0].status, WalStatus::Inflight);
        assert_eq!(pending[0].attempts, 1);
        assert_eq!(pending[1].wal_id, second.wal_id);
    }

    #[test]
    fn ttl_expiry_removes_from_pending() {
        let tmp = tempfile::tempdir().unwrap();
        let wal = wal(tmp.path());
        wal.append_pending(
            envelope("c1"),
            WalSource::Channel,
            WalAppendOptions {
                ttl_ms: Some(0),
                dedupe_key: None,
            },
        )
        .unwrap();

        assert!(wal.list_pending().unwrap().is_empty());
    }

    #[test]
    fn dedupe_key_returns_existing_record() {
        let tmp = tempfile::tempdir().unwrap();
        let wal = wal(tmp.path());
        let opts = WalAppendOptions {
            ttl_ms: None,
            dedupe_key: Some("hb:morning".into()),
        };
        let first = wal
            .append_pending(envelope("c1"), WalSource::Heartbeat, opts.clone())
            .unwrap();
        let second = wal
            .append_pending(envelope("c1"), WalSource::Heartbeat, opts)
            .unwrap();
        assert_eq!(first.wal_id, second.wal_id);
    }

    #[test]
    fn compact_drops_old_terminal_rows() {
        let tmp = tempfile::tempdir().unwrap();
        let config = WalConfig {
            compact_after_ms: 0,
            ..WalConfig::default()
        };
        let wal = TurnWal::open(tmp.path(), "telegram", config);

        let done = wal
            .append_pending(envelope("c1"), WalSource::Channel, WalAppendOptions::default())
            .unwrap();
        wal.mark_done(&done.wal_id).unwrap();
        let open = wal
            .append_pending(envelope("c2"), WalSource::Channel, WalAppendOptions::default())
            .unwrap();

        assert_eq!(wal.compact().unwrap(), 1);
        let pending = wal.list_pending().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].wal_id, open.wal_id);
    }

    #[test]
    fn torn_trailing_line_is_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        let wal = wal(tmp.path());
        let record = wal
            .append_pending(envelope("c1"), WalSource::Channel, WalAppendOptions::default())
            .unwrap();

        let path = tmp.path().join("turn-wal").join("telegram.jsonl");
        let mut raw = std::fs::read_to_string(&path).unwrap();
        raw.push_str("\n{\"schema\":\"turn-wal.v1\",\"walId\":\"wal_torn");
        std::fs::write(&path, raw).unwrap();

        let reopened = TurnWal::open(tmp.path(), "telegram", WalConfig::default());
        let pending = reopened.list_pending().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].wal_id, record.wal_id);
    }
}
