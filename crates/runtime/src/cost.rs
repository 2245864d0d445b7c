//! Assistant usage accounting.
//!
//! Every LLM round-trip lands as a `brewva_cost` ledger row and its
//! cost is attributed proportionally to the tool calls made in the
//! same turn, so per-tool spend can be reported later.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Usage reported by the agent session for one assistant message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssistantUsage {
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    #[serde(default)]
    pub cache_read: u64,
    #[serde(default)]
    pub cache_write: u64,
    pub total_tokens: u64,
    pub cost_usd: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<String>,
}

/// Split `cost_usd` across tools proportionally to their call counts.
///
/// With no calls recorded the whole cost lands on the synthetic
/// `"assistant"` bucket.
pub fn allocate_proportional(cost_usd: f64, calls: &HashMap<String, u64>) -> HashMap<String, f64> {
    let total: u64 = calls.values().sum();
    if total == 0 {
        let mut out = HashMap::new();
        out.insert("assistant".to_owned(), cost_usd);
        return out;
    }
    calls
        .iter()
        .map(|(tool, count)| (tool.clone(), cost_usd * (*count as f64) / (total as f64)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_proportionally() {
        let mut calls = HashMap::new();
        calls.insert("read".to_owned(), 3u64);
        calls.insert("edit".to_owned(), 1u64);

        let split = allocate_proportional(0.40, &calls);
        assert!((split["read"] - 0.30).abs() < 1e-9);
        assert!((split["edit"] - 0.10).abs() < 1e-9);
    }

    #[test]
    fn no_calls_goes_to_assistant_bucket() {
        let split = allocate_proportional(0.25, &HashMap::new());
        assert!((split["assistant"] - 0.25).abs() < 1e-9);
    }
}
