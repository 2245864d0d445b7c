//! Context injection pipeline.
//!
//! Turns the arena's candidate entries into one budget-capped text
//! block per turn. Planning *reserves* tokens; committing consumes the
//! reservation and records the content fingerprint so identical
//! content is not injected twice in a session. Compaction clears the
//! fingerprints and re-opens previously-deduplicated content.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use sha2::{Digest, Sha256};

use bv_domain::config::{ContextConfig, Zone};
use bv_domain::error::Result;
use bv_domain::trace::TraceEvent;
use bv_store::{EvidenceInput, EvidenceLedger};

use crate::arena::ContextArena;
use crate::blocks::{format_zone_section, truncate_head, truncate_recall};
use crate::tokens::estimate_tokens;
use crate::zones::allocate;

const DEFAULT_SCOPE: &str = "default";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Public types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Context-window usage reported by the agent session.
#[derive(Debug, Clone, Copy)]
pub struct UsageSnapshot {
    pub used_tokens: u64,
    pub max_tokens: u64,
}

impl UsageSnapshot {
    pub fn percent(&self) -> u8 {
        if self.max_tokens == 0 {
            return 0;
        }
        ((self.used_tokens * 100 / self.max_tokens).min(100)) as u8
    }
}

/// Outcome of a plan: a reserved (not yet committed) injection.
#[derive(Debug, Clone)]
pub struct InjectionPlan {
    pub accepted: bool,
    pub text: String,
    pub original_tokens: usize,
    pub final_tokens: usize,
    pub truncated: bool,
    pub dropped_reason: Option<&'static str>,
}

impl InjectionPlan {
    fn rejected(reason: &'static str) -> Self {
        Self {
            accepted: false,
            text: String::new(),
            original_tokens: 0,
            final_tokens: 0,
            truncated: false,
            dropped_reason: Some(reason),
        }
    }
}

/// Input to [`InjectionPipeline::mark_compacted`].
#[derive(Debug, Clone, Default)]
pub struct CompactionNote {
    pub from_tokens: usize,
    pub to_tokens: usize,
    pub entry_id: Option<String>,
    pub summary: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session state
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
struct ScopeState {
    /// Fingerprints of committed injections; dedup key for replans.
    committed: HashSet<String>,
    /// Primary plan reservation; a replan replaces it.
    pending_primary: Option<(String, usize)>,
    /// Supplemental reservations keyed by fingerprint.
    pending_supplemental: HashMap<String, usize>,
    /// Tokens committed in the current turn.
    committed_this_turn: usize,
}

impl ScopeState {
    fn reserved(&self) -> usize {
        self.pending_primary.as_ref().map(|(_, t)| *t).unwrap_or(0)
            + self.pending_supplemental.values().sum::<usize>()
    }
}

#[derive(Default)]
struct SessionState {
    scopes: HashMap<String, ScopeState>,
    turns_since_compaction: u64,
}

impl SessionState {
    fn spent(&self) -> usize {
        self.scopes
            .values()
            .map(|s| s.committed_this_turn + s.reserved())
            .sum()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Pipeline
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct InjectionPipeline {
    config: ContextConfig,
    arena: Arc<ContextArena>,
    ledger: Arc<EvidenceLedger>,
    sessions: Mutex<HashMap<String, SessionState>>,
}

impl InjectionPipeline {
    pub fn new(
        config: ContextConfig,
        arena: Arc<ContextArena>,
        ledger: Arc<EvidenceLedger>,
    ) -> Self {
        Self {
            config,
            arena,
            ledger,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn arena(&self) -> &ContextArena {
        &self.arena
    }

    /// Assemble the primary injection for one turn and reserve its
    /// tokens. Nothing is remembered for dedup until [`commit`].
    ///
    /// [`commit`]: Self::commit
    pub fn plan(
        &self,
        session_id: &str,
        prompt: &str,
        usage: Option<UsageSnapshot>,
        scope_id: Option<&str>,
    ) -> InjectionPlan {
        let scope = scope_id.unwrap_or(DEFAULT_SCOPE);
        tracing::debug!(session_id, scope, prompt_chars = prompt.len(), "planning injection");

        if let Some(usage) = usage {
            if usage.percent() > self.config.hard_limit_percent {
                return InjectionPlan::rejected("hard_limit");
            }
        }

        // Group arena entries by zone.
        let entries = self.arena.entries(session_id);
        let mut zone_content: HashMap<Zone, String> = HashMap::new();
        for entry in &entries {
            let slot = zone_content.entry(entry.zone).or_default();
            if !slot.is_empty() {
                slot.push('\n');
            }
            slot.push_str(&entry.content);
        }
        let demands: HashMap<Zone, usize> = zone_content
            .iter()
            .map(|(zone, content)| (*zone, estimate_tokens(content)))
            .collect();
        let original_tokens: usize = demands.values().sum();

        if original_tokens == 0 {
            return InjectionPlan {
                accepted: true,
                text: String::new(),
                original_tokens: 0,
                final_tokens: 0,
                truncated: false,
                dropped_reason: None,
            };
        }

        let mut sessions = self.sessions.lock();
        let session = sessions.entry(session_id.to_owned()).or_default();
        // The replan for this scope replaces its own prior reservation,
        // so that reservation stays spendable.
        let available = self.available_budget(session)
            + session
                .scopes
                .get(scope)
                .and_then(|s| s.pending_primary.as_ref())
                .map(|(_, t)| *t)
                .unwrap_or(0);

        let allocation = allocate(available, &demands, &self.config.zones);
        if !allocation.accepted {
            return InjectionPlan::rejected(allocation.reason.unwrap_or("floor_unmet"));
        }

        // Assemble zone sections in fixed order.
        let mut text = String::new();
        let mut final_tokens = 0usize;
        let mut truncated = false;
        for zone in Zone::ORDERED {
            let Some(content) = zone_content.get(&zone) else {
                continue;
            };
            let demand = demands[&zone];
            let alloc = allocation.get(zone);
            if alloc == 0 {
                truncated = true;
                continue;
            }
            let (body, cut) = if alloc >= demand {
                (content.clone(), false)
            } else if zone == Zone::MemoryRecall {
                truncate_recall(content, alloc, self.config.recall_truncation)
            } else {
                truncate_head(content, alloc)
            };
            truncated |= cut;
            if body.is_empty() {
                continue;
            }
            final_tokens += estimate_tokens(&body).min(alloc.max(1));
            text.push_str(&format_zone_section(zone, &body));
        }

        // Dedup against committed content for this scope.
        let fingerprint = content_fingerprint(&text);
        let scope_state = session.scopes.entry(scope.to_owned()).or_default();
        if scope_state.committed.contains(&fingerprint) {
            TraceEvent::InjectionPlanned {
                session_id: session_id.to_owned(),
                scope: scope.to_owned(),
                original_tokens,
                final_tokens: 0,
                truncated: false,
                accepted: false,
            }
            .emit();
            return InjectionPlan::rejected("duplicate_content");
        }

        scope_state.pending_primary = Some((fingerprint, final_tokens));

        TraceEvent::InjectionPlanned {
            session_id: session_id.to_owned(),
            scope: scope.to_owned(),
            original_tokens,
            final_tokens,
            truncated,
            accepted: true,
        }
        .emit();

        InjectionPlan {
            accepted: true,
            text,
            original_tokens,
            final_tokens,
            truncated,
            dropped_reason: None,
        }
    }

    /// Plan a non-primary injection (extension content, memory
    /// handoffs). Shares the turn budget with the primary plan on the
    /// same scope.
    pub fn plan_supplemental_injection(
        &self,
        session_id: &str,
        content: &str,
        usage: Option<UsageSnapshot>,
        scope_id: Option<&str>,
    ) -> InjectionPlan {
        let scope = scope_id.unwrap_or(DEFAULT_SCOPE);

        if let Some(usage) = usage {
            if usage.percent() > self.config.hard_limit_percent {
                return InjectionPlan::rejected("hard_limit");
            }
        }

        let original_tokens = estimate_tokens(content);
        if original_tokens == 0 {
            return InjectionPlan {
                accepted: true,
                text: String::new(),
                original_tokens: 0,
                final_tokens: 0,
                truncated: false,
                dropped_reason: None,
            };
        }

        let mut sessions = self.sessions.lock();
        let session = sessions.entry(session_id.to_owned()).or_default();
        let available = self.available_budget(session);
        if available == 0 {
            return InjectionPlan::rejected("budget_exhausted");
        }

        let (text, truncated) = if original_tokens > available {
            truncate_head(content, available)
        } else {
            (content.to_owned(), false)
        };
        let final_tokens = estimate_tokens(&text).min(available);

        let fingerprint = content_fingerprint(&text);
        let scope_state = session.scopes.entry(scope.to_owned()).or_default();
        if scope_state.committed.contains(&fingerprint) {
            return InjectionPlan::rejected("duplicate_content");
        }
        scope_state
            .pending_supplemental
            .insert(fingerprint, final_tokens);

        InjectionPlan {
            accepted: true,
            text,
            original_tokens,
            final_tokens,
            truncated,
            dropped_reason: None,
        }
    }

    /// Consume the scope's reservations: fingerprints become dedup
    /// keys and `tokens` counts against the turn budget.
    pub fn commit(&self, session_id: &str, tokens: usize, scope_id: Option<&str>) {
        let scope = scope_id.unwrap_or(DEFAULT_SCOPE);
        let mut sessions = self.sessions.lock();
        let Some(session) = sessions.get_mut(session_id) else {
            return;
        };
        let Some(scope_state) = session.scopes.get_mut(scope) else {
            return;
        };
        if let Some((fingerprint, _)) = scope_state.pending_primary.take() {
            scope_state.committed.insert(fingerprint);
        }
        for (fingerprint, _) in scope_state.pending_supplemental.drain() {
            scope_state.committed.insert(fingerprint);
        }
        scope_state.committed_this_turn += tokens;
    }

    /// Release uncommitted reservations (turn abort).
    pub fn clear_pending(&self, session_id: &str) {
        let mut sessions = self.sessions.lock();
        if let Some(session) = sessions.get_mut(session_id) {
            for scope_state in session.scopes.values_mut() {
                scope_state.pending_primary = None;
                scope_state.pending_supplemental.clear();
            }
        }
    }

    /// Start a new turn: the per-turn budget resets and stale
    /// reservations are dropped. Committed fingerprints survive.
    pub fn note_turn(&self, session_id: &str) {
        let mut sessions = self.sessions.lock();
        let session = sessions.entry(session_id.to_owned()).or_default();
        session.turns_since_compaction += 1;
        for scope_state in session.scopes.values_mut() {
            scope_state.committed_this_turn = 0;
            scope_state.pending_primary = None;
            scope_state.pending_supplemental.clear();
        }
    }

    /// The agent session compacted its window: forget dedup state so
    /// content may be re-injected, and record the compaction as
    /// evidence.
    pub fn mark_compacted(&self, session_id: &str, note: CompactionNote) -> Result<()> {
        {
            let mut sessions = self.sessions.lock();
            if let Some(session) = sessions.get_mut(session_id) {
                session.scopes.clear();
                session.turns_since_compaction = 0;
            }
        }

        let summary = note.summary.clone().unwrap_or_else(|| {
            format!(
                "context compacted {} -> {} tokens",
                note.from_tokens, note.to_tokens
            )
        });
        let mut metadata = serde_json::json!({
            "fromTokens": note.from_tokens,
            "toTokens": note.to_tokens,
        });
        if let Some(entry_id) = &note.entry_id {
            metadata["entryId"] = serde_json::Value::String(entry_id.clone());
        }
        self.ledger.append(
            EvidenceInput::new(session_id, "context_compacted", &summary)
                .with_metadata(metadata),
        )?;

        TraceEvent::ContextCompacted {
            session_id: session_id.to_owned(),
            from_tokens: note.from_tokens,
            to_tokens: note.to_tokens,
        }
        .emit();
        Ok(())
    }

    /// Whether the runtime should ask the agent session to compact.
    pub fn should_request_compaction(&self, session_id: &str, usage: UsageSnapshot) -> bool {
        let compaction = &self.config.compaction;
        if usage.percent() < compaction.threshold_percent {
            return false;
        }
        let sessions = self.sessions.lock();
        let turns = sessions
            .get(session_id)
            .map(|s| s.turns_since_compaction)
            .unwrap_or(0);
        turns >= compaction.min_turns_between || usage.percent() >= compaction.pressure_bypass_percent
    }

    /// Drop all pipeline state for a session.
    pub fn dispose_session(&self, session_id: &str) {
        self.sessions.lock().remove(session_id);
        self.arena.clear(session_id);
    }

    // ── internals ───────────────────────────────────────────────────

    fn turn_budget(&self) -> usize {
        if self.config.enabled {
            self.config.max_injection_tokens
        } else {
            usize::MAX / 2
        }
    }

    /// Budget left this turn: the cap minus every scope's committed
    /// tokens and live reservations.
    fn available_budget(&self, session: &SessionState) -> usize {
        self.turn_budget().saturating_sub(session.spent())
    }
}

fn content_fingerprint(text: &str) -> String {
    hex::encode(Sha256::digest(text.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bv_domain::config::Priority;

    use crate::arena::ArenaEntry;

    fn pipeline(dir: &std::path::Path, config: ContextConfig) -> InjectionPipeline {
        let arena = Arc::new(ContextArena::new(&config));
        let ledger = Arc::new(EvidenceLedger::new(dir));
        InjectionPipeline::new(config, arena, ledger)
    }

    fn task_entry(content: &str) -> ArenaEntry {
        ArenaEntry {
            source: "task_state".into(),
            id: "task".into(),
            priority: Priority::High,
            zone: Zone::TaskState,
            content: content.into(),
            estimated_tokens: estimate_tokens(content),
            once_per_session: false,
        }
    }

    #[test]
    fn dedup_across_turns_until_compaction() {
        let tmp = tempfile::tempdir().unwrap();
        let pipeline = pipeline(tmp.path(), ContextConfig::default());
        let block = "item: fix the login bug (open)";
        pipeline.arena().insert("s1", task_entry(block));

        // Turn 1: plan + commit.
        pipeline.note_turn("s1");
        let plan = pipeline.plan("s1", "fix bug", None, Some("leaf-a"));
        assert!(plan.accepted);
        assert!(plan.text.contains(block));
        pipeline.commit("s1", plan.final_tokens, Some("leaf-a"));

        // Turn 2: identical inputs are deduplicated.
        pipeline.note_turn("s1");
        let replan = pipeline.plan("s1", "fix bug", None, Some("leaf-a"));
        assert!(!replan.accepted);
        assert_eq!(replan.dropped_reason, Some("duplicate_content"));

        // Compaction re-opens the content.
        pipeline
            .mark_compacted(
                "s1",
                CompactionNote {
                    from_tokens: 1500,
                    to_tokens: 500,
                    ..CompactionNote::default()
                },
            )
            .unwrap();
        pipeline.note_turn("s1");
        let after = pipeline.plan("s1", "fix bug", None, Some("leaf-a"));
        assert!(after.accepted);
        assert!(after.text.contains(block));
    }

    #[test]
    fn replan_before_commit_returns_identical_tokens() {
        let tmp = tempfile::tempdir().unwrap();
        let pipeline = pipeline(tmp.path(), ContextConfig::default());
        pipeline.arena().insert("s1", task_entry("open items: 3"));

        let first = pipeline.plan("s1", "p", None, None);
        let second = pipeline.plan("s1", "p", None, None);
        assert!(second.accepted);
        assert_eq!(first.final_tokens, second.final_tokens);
        assert_eq!(first.text, second.text);
    }

    #[test]
    fn hard_limit_rejects() {
        let tmp = tempfile::tempdir().unwrap();
        let pipeline = pipeline(tmp.path(), ContextConfig::default());
        pipeline.arena().insert("s1", task_entry("block"));

        let usage = UsageSnapshot {
            used_tokens: 95,
            max_tokens: 100,
        };
        let plan = pipeline.plan("s1", "p", Some(usage), None);
        assert!(!plan.accepted);
        assert_eq!(plan.dropped_reason, Some("hard_limit"));
    }

    #[test]
    fn supplemental_shares_turn_budget() {
        let tmp = tempfile::tempdir().unwrap();
        let config = ContextConfig {
            max_injection_tokens: 50,
            ..ContextConfig::default()
        };
        let pipeline = pipeline(tmp.path(), config);

        let big = "x".repeat(400);
        let plan = pipeline.plan_supplemental_injection("s1", &big, None, None);
        assert!(plan.accepted);
        assert!(plan.truncated);
        assert!(plan.final_tokens <= 50);
        pipeline.commit("s1", plan.final_tokens, None);

        // Budget is spent for the rest of the turn.
        let second = pipeline.plan_supplemental_injection("s1", "more content here", None, None);
        assert!(!second.accepted);
        assert_eq!(second.dropped_reason, Some("budget_exhausted"));

        // A fresh turn resets the budget.
        pipeline.note_turn("s1");
        let third = pipeline.plan_supplemental_injection("s1", "more content here", None, None);
        assert!(third.accepted);
    }

    #[test]
    fn disabled_budget_keeps_dedup_semantics() {
        let tmp = tempfile::tempdir().unwrap();
        let config = ContextConfig {
            enabled: false,
            max_injection_tokens: 1,
            ..ContextConfig::default()
        };
        let pipeline = pipeline(tmp.path(), config);
        pipeline.arena().insert("s1", task_entry(&"big ".repeat(100)));

        let plan = pipeline.plan("s1", "p", None, None);
        assert!(plan.accepted);
        assert!(!plan.truncated);
        pipeline.commit("s1", plan.final_tokens, None);

        let replan = pipeline.plan("s1", "p", None, None);
        assert_eq!(replan.dropped_reason, Some("duplicate_content"));
    }

    #[test]
    fn compaction_request_honours_spacing_and_bypass() {
        let tmp = tempfile::tempdir().unwrap();
        let pipeline = pipeline(tmp.path(), ContextConfig::default());
        // Defaults: threshold 75, min turns 4, bypass 90.
        let at = |p: u64| UsageSnapshot {
            used_tokens: p,
            max_tokens: 100,
        };

        pipeline.note_turn("s1");
        assert!(!pipeline.should_request_compaction("s1", at(60)));
        // Over threshold but inside the spacing window.
        assert!(!pipeline.should_request_compaction("s1", at(80)));
        // Pressure bypass ignores spacing.
        assert!(pipeline.should_request_compaction("s1", at(95)));

        for _ in 0..4 {
            pipeline.note_turn("s1");
        }
        assert!(pipeline.should_request_compaction("s1", at(80)));
    }
}
