//! Crash-recovery behaviour of the turn WAL: a pending/inflight record
//! survives a restart, is replayed exactly once, and a terminal mark
//! makes it ineligible for future recovery.

use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;

use bv_domain::config::WalConfig;
use bv_domain::envelope::TurnEnvelope;
use bv_domain::error::Result;
use bv_store::{
    TurnWal, TurnWalRecord, WalAppendOptions, WalRecovery, WalReplayHandler, WalSource,
};

/// Replay handler that immediately marks the record done, recording
/// which wal ids it saw.
struct DoneHandler {
    orchestrator_dir: PathBuf,
    seen: Mutex<Vec<String>>,
}

#[async_trait::async_trait]
impl WalReplayHandler for DoneHandler {
    async fn replay(&self, record: TurnWalRecord) -> Result<()> {
        let wal = TurnWal::open(&self.orchestrator_dir, &record.channel, WalConfig::default());
        wal.mark_done(&record.wal_id)?;
        self.seen.lock().push(record.wal_id);
        Ok(())
    }
}

#[tokio::test]
async fn inflight_record_is_replayed_exactly_once() {
    let tmp = tempfile::tempdir().unwrap();

    // Simulated pre-crash process: append + mark inflight, no terminal.
    let record = {
        let wal = TurnWal::open(tmp.path(), "telegram", WalConfig::default());
        let envelope = TurnEnvelope::user_text("s1", "telegram", "chat-1", "hello");
        let record = wal
            .append_pending(envelope, WalSource::Channel, WalAppendOptions::default())
            .unwrap();
        wal.mark_inflight(&record.wal_id).unwrap();
        record
    };

    // Restart: the record is recoverable.
    let wal = TurnWal::open(tmp.path(), "telegram", WalConfig::default());
    let pending = wal.list_pending().unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].wal_id, record.wal_id);
    drop(wal);

    let handler = Arc::new(DoneHandler {
        orchestrator_dir: tmp.path().to_path_buf(),
        seen: Mutex::new(Vec::new()),
    });
    let mut recovery = WalRecovery::new(tmp.path(), WalConfig::default());
    recovery.register_handler(WalSource::Channel, handler.clone());

    let report = recovery.recover().await.unwrap();
    assert_eq!(report.recovered, 1);
    assert_eq!(handler.seen.lock().as_slice(), &[record.wal_id.clone()]);

    // The handler marked it done; a second pass finds nothing.
    let report = recovery.recover().await.unwrap();
    assert_eq!(report.recovered, 0);
    assert!(handler.seen.lock().len() == 1);
}

#[tokio::test]
async fn unknown_source_is_marked_expired() {
    let tmp = tempfile::tempdir().unwrap();
    {
        let wal = TurnWal::open(tmp.path(), "heartbeat", WalConfig::default());
        let envelope = TurnEnvelope::user_text("s1", "heartbeat", "hb", "tick");
        wal.append_pending(envelope, WalSource::Heartbeat, WalAppendOptions::default())
            .unwrap();
    }

    // No handler registered for heartbeat.
    let recovery = WalRecovery::new(tmp.path(), WalConfig::default());
    let report = recovery.recover().await.unwrap();
    assert_eq!(report.expired, 1);

    let wal = TurnWal::open(tmp.path(), "heartbeat", WalConfig::default());
    assert!(wal.list_pending().unwrap().is_empty());
}

#[tokio::test]
async fn retry_budget_exhaustion_marks_failed() {
    let tmp = tempfile::tempdir().unwrap();
    let config = WalConfig {
        max_retries: 2,
        ..WalConfig::default()
    };
    {
        let wal = TurnWal::open(tmp.path(), "telegram", config.clone());
        let envelope = TurnEnvelope::user_text("s1", "telegram", "chat-1", "hello");
        let record = wal
            .append_pending(envelope, WalSource::Channel, WalAppendOptions::default())
            .unwrap();
        wal.mark_inflight(&record.wal_id).unwrap();
        wal.mark_inflight(&record.wal_id).unwrap();
    }

    let handler = Arc::new(DoneHandler {
        orchestrator_dir: tmp.path().to_path_buf(),
        seen: Mutex::new(Vec::new()),
    });
    let mut recovery = WalRecovery::new(tmp.path(), config.clone());
    recovery.register_handler(WalSource::Channel, handler.clone());

    let report = recovery.recover().await.unwrap();
    assert_eq!(report.failed, 1);
    assert!(handler.seen.lock().is_empty());

    let wal = TurnWal::open(tmp.path(), "telegram", config);
    assert!(wal.list_pending().unwrap().is_empty());
}
