//! Per-session mutable state.
//!
//! Owned exclusively by the runtime façade behind a per-session mutex;
//! no two core operations for the same session progress concurrently.

use std::collections::{HashMap, HashSet};

use crate::task::TaskState;
use crate::truth::TruthState;
use crate::verification::CheckRun;

/// Everything the runtime tracks for one session.
#[derive(Debug, Default)]
pub struct SessionState {
    pub session_id: String,
    /// Monotonic turn index; 0 before the first turn.
    pub turn: u64,

    // Skill lifecycle.
    pub active_skill: Option<String>,
    pub skill_tool_calls: u64,
    pub skill_tokens: u64,

    // Tool accounting for the current turn (drives cost allocation).
    pub turn_tool_calls: HashMap<String, u64>,
    /// Live parallel slots per tool.
    pub parallel_slots: HashMap<String, u64>,

    // Cost accounting.
    pub total_cost_usd: f64,
    pub total_tokens: u64,
    pub cost_by_tool: HashMap<String, f64>,
    pub blocked_by_cost: bool,

    // Tool-gate warning dedup, persisted via the event store.
    pub warned_keys: HashSet<String>,

    // Verification.
    pub check_runs: HashMap<String, CheckRun>,
    /// Unix millis of the last mutation-tool call; 0 = untouched.
    pub last_write_at: i64,

    // Task + truth.
    pub task_state: TaskState,
    pub truth: TruthState,
}

impl SessionState {
    pub fn new(session_id: &str) -> Self {
        Self {
            session_id: session_id.to_owned(),
            ..Self::default()
        }
    }

    /// Record one tool call for the current turn.
    pub fn note_tool_call(&mut self, tool: &str) {
        *self.turn_tool_calls.entry(tool.to_owned()).or_insert(0) += 1;
        if self.active_skill.is_some() {
            self.skill_tool_calls += 1;
        }
    }

    /// Reset per-turn accounting at turn end.
    pub fn finish_turn(&mut self) {
        self.turn_tool_calls.clear();
    }

    /// Reset skill-scoped budgets on activation.
    pub fn start_skill(&mut self, name: &str) {
        self.active_skill = Some(name.to_owned());
        self.skill_tool_calls = 0;
        self.skill_tokens = 0;
    }

    pub fn end_skill(&mut self) -> Option<String> {
        self.active_skill.take()
    }
}
