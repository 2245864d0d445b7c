//! Persistence substrate for the Brewva orchestrator.
//!
//! Everything here is append-only JSONL under `.orchestrator/` with two
//! cross-process-safe mutation shapes: incremental O_APPEND additions
//! and whole-file temp-write-then-rename rewrites. Readers tolerate a
//! torn trailing line.

pub mod events;
pub mod fsutil;
pub mod ledger;
pub mod memory;
pub mod payload;
pub mod redact;
pub mod wal;

pub use events::{EventAppend, EventQuery, EventRecord, EventStore};
pub use ledger::{
    ChainVerification, EvidenceInput, EvidenceLedger, EvidenceRow, Verdict, CHECKPOINT_TOOL,
    COST_TOOL, ROOT_HASH,
};
pub use memory::{MemoryEntry, MemoryKind, MemoryStore};
pub use wal::{
    RecoveryReport, TurnWal, TurnWalRecord, WalAppendOptions, WalRecovery, WalReplayHandler,
    WalSource, WalStatus,
};
