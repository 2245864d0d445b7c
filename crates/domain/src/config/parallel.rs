use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Parallel I/O
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParallelConfig {
    /// Batch size for parallel multi-file reads.
    #[serde(default = "d_max_concurrent")]
    pub max_concurrent: usize,
    /// Hard cap on files per multi-file operation.
    #[serde(default = "d_max_total")]
    pub max_total: usize,
}

impl Default for ParallelConfig {
    fn default() -> Self {
        Self {
            max_concurrent: d_max_concurrent(),
            max_total: d_max_total(),
        }
    }
}

fn d_max_concurrent() -> usize {
    8
}
fn d_max_total() -> usize {
    64
}
