use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Turn WAL
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalConfig {
    /// Default TTL for channel-sourced turns.
    #[serde(default = "d_turn_ttl_ms")]
    pub turn_ttl_ms: u64,
    /// TTL for schedule-sourced turns (fire-or-forget reminders age out
    /// faster than operator messages).
    #[serde(default = "d_schedule_turn_ttl_ms")]
    pub schedule_turn_ttl_ms: u64,
    /// Terminal records older than this are dropped by `compact()`.
    #[serde(default = "d_compact_after_ms")]
    pub compact_after_ms: u64,
    /// Give up replaying a record after this many attempts.
    #[serde(default = "d_max_retries")]
    pub max_retries: u32,
}

impl Default for WalConfig {
    fn default() -> Self {
        Self {
            turn_ttl_ms: d_turn_ttl_ms(),
            schedule_turn_ttl_ms: d_schedule_turn_ttl_ms(),
            compact_after_ms: d_compact_after_ms(),
            max_retries: d_max_retries(),
        }
    }
}

fn d_turn_ttl_ms() -> u64 {
    24 * 60 * 60 * 1_000
}
fn d_schedule_turn_ttl_ms() -> u64 {
    15 * 60 * 1_000
}
fn d_compact_after_ms() -> u64 {
    60 * 60 * 1_000
}
fn d_max_retries() -> u32 {
    3
}
