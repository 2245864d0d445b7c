use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Channel bridge
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// How long shutdown waits for in-flight conversation turns.
    #[serde(default = "d_graceful_timeout_ms")]
    pub graceful_timeout_ms: u64,
    /// Bound on each conversation's pending turn queue.
    #[serde(default = "d_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            graceful_timeout_ms: d_graceful_timeout_ms(),
            queue_capacity: d_queue_capacity(),
        }
    }
}

fn d_graceful_timeout_ms() -> u64 {
    10_000
}
fn d_queue_capacity() -> usize {
    32
}
