use std::fmt;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Zones & priorities
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Named partition of the context window, in fixed priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Zone {
    Identity,
    Truth,
    TaskState,
    ToolFailures,
    MemoryWorking,
    MemoryRecall,
    RagExternal,
}

impl Zone {
    /// All zones, highest allocation priority first.
    pub const ORDERED: [Zone; 7] = [
        Zone::Identity,
        Zone::Truth,
        Zone::TaskState,
        Zone::ToolFailures,
        Zone::MemoryWorking,
        Zone::MemoryRecall,
        Zone::RagExternal,
    ];
}

impl fmt::Display for Zone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Zone::Identity => "identity",
            Zone::Truth => "truth",
            Zone::TaskState => "task_state",
            Zone::ToolFailures => "tool_failures",
            Zone::MemoryWorking => "memory_working",
            Zone::MemoryRecall => "memory_recall",
            Zone::RagExternal => "rag_external",
        };
        write!(f, "{name}")
    }
}

/// Injection priority for an arena entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Normal,
    High,
    Critical,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Zone budgets
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Floor/ceiling token budget for one zone.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ZoneBudget {
    pub min: usize,
    pub max: usize,
}

/// Per-zone budgets keyed by the fixed zone order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZoneBudgets {
    #[serde(default = "d_identity")]
    pub identity: ZoneBudget,
    #[serde(default = "d_truth")]
    pub truth: ZoneBudget,
    #[serde(default = "d_task_state")]
    pub task_state: ZoneBudget,
    #[serde(default = "d_tool_failures")]
    pub tool_failures: ZoneBudget,
    #[serde(default = "d_memory_working")]
    pub memory_working: ZoneBudget,
    #[serde(default = "d_memory_recall")]
    pub memory_recall: ZoneBudget,
    #[serde(default = "d_rag_external")]
    pub rag_external: ZoneBudget,
}

impl ZoneBudgets {
    pub fn get(&self, zone: Zone) -> ZoneBudget {
        match zone {
            Zone::Identity => self.identity,
            Zone::Truth => self.truth,
            Zone::TaskState => self.task_state,
            Zone::ToolFailures => self.tool_failures,
            Zone::MemoryWorking => self.memory_working,
            Zone::MemoryRecall => self.memory_recall,
            Zone::RagExternal => self.rag_external,
        }
    }

    /// Iterate `(zone, budget)` in allocation order.
    pub fn iter(&self) -> impl Iterator<Item = (Zone, ZoneBudget)> + '_ {
        Zone::ORDERED.iter().map(move |z| (*z, self.get(*z)))
    }
}

impl Default for ZoneBudgets {
    fn default() -> Self {
        Self {
            identity: d_identity(),
            truth: d_truth(),
            task_state: d_task_state(),
            tool_failures: d_tool_failures(),
            memory_working: d_memory_working(),
            memory_recall: d_memory_recall(),
            rag_external: d_rag_external(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Arena SLO
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Degradation policy applied when a session's arena is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArenaPolicy {
    DropRecall,
    DropLowPriority,
    ForceCompact,
}

impl fmt::Display for ArenaPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ArenaPolicy::DropRecall => "drop_recall",
            ArenaPolicy::DropLowPriority => "drop_low_priority",
            ArenaPolicy::ForceCompact => "force_compact",
        };
        write!(f, "{name}")
    }
}

/// How an oversize `memory_recall` block is cut down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecallTruncation {
    Tail,
    Summarize,
    DropEntry,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Compaction signalling
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompactionConfig {
    /// Usage percent at which compaction is requested.
    #[serde(default = "d_threshold")]
    pub threshold_percent: u8,
    /// Minimum turns between two compaction requests.
    #[serde(default = "d_min_turns")]
    pub min_turns_between: u64,
    /// Usage percent that bypasses the min-turns spacing.
    #[serde(default = "d_bypass")]
    pub pressure_bypass_percent: u8,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            threshold_percent: d_threshold(),
            min_turns_between: d_min_turns(),
            pressure_bypass_percent: d_bypass(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Context config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Master switch for the injection token budget. When false, the
    /// `max_injection_tokens` cap is not applied; everything else is.
    #[serde(default = "d_true")]
    pub enabled: bool,
    #[serde(default = "d_max_injection")]
    pub max_injection_tokens: usize,
    /// Reject injections once usage passes this percent of the window.
    #[serde(default = "d_hard_limit")]
    pub hard_limit_percent: u8,
    #[serde(default = "d_max_entries")]
    pub max_entries_per_session: usize,
    #[serde(default = "d_policy")]
    pub arena_policy: ArenaPolicy,
    #[serde(default = "d_recall_truncation")]
    pub recall_truncation: RecallTruncation,
    #[serde(default)]
    pub zones: ZoneBudgets,
    #[serde(default)]
    pub compaction: CompactionConfig,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_injection_tokens: d_max_injection(),
            hard_limit_percent: d_hard_limit(),
            max_entries_per_session: d_max_entries(),
            arena_policy: d_policy(),
            recall_truncation: d_recall_truncation(),
            zones: ZoneBudgets::default(),
            compaction: CompactionConfig::default(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_true() -> bool {
    true
}
fn d_max_injection() -> usize {
    6_000
}
fn d_hard_limit() -> u8 {
    92
}
fn d_max_entries() -> usize {
    64
}
fn d_policy() -> ArenaPolicy {
    ArenaPolicy::DropRecall
}
fn d_recall_truncation() -> RecallTruncation {
    RecallTruncation::Tail
}
fn d_threshold() -> u8 {
    75
}
fn d_min_turns() -> u64 {
    4
}
fn d_bypass() -> u8 {
    90
}
fn d_identity() -> ZoneBudget {
    ZoneBudget { min: 200, max: 800 }
}
fn d_truth() -> ZoneBudget {
    ZoneBudget { min: 100, max: 1_200 }
}
fn d_task_state() -> ZoneBudget {
    ZoneBudget { min: 100, max: 1_200 }
}
fn d_tool_failures() -> ZoneBudget {
    ZoneBudget { min: 0, max: 800 }
}
fn d_memory_working() -> ZoneBudget {
    ZoneBudget { min: 0, max: 1_000 }
}
fn d_memory_recall() -> ZoneBudget {
    ZoneBudget { min: 0, max: 1_500 }
}
fn d_rag_external() -> ZoneBudget {
    ZoneBudget { min: 0, max: 1_000 }
}
