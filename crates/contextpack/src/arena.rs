//! Per-session context arena.
//!
//! A bounded buffer of injection candidates. When a session's arena is
//! full, the configured degradation policy evicts (or rejects) entries
//! so the hot path never grows without bound.

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use bv_domain::config::{ArenaPolicy, ContextConfig, Priority, Zone};
use bv_domain::trace::TraceEvent;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Entry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One injection candidate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArenaEntry {
    /// Producer tag (e.g. `"truth_digest"`, `"memory_recall"`).
    pub source: String,
    pub id: String,
    pub priority: Priority,
    pub zone: Zone,
    pub content: String,
    pub estimated_tokens: usize,
    /// Inject at most once per session, keyed by `id`.
    #[serde(default)]
    pub once_per_session: bool,
}

/// Outcome of an SLO enforcement, for event emission by the caller.
#[derive(Debug, Clone)]
pub struct SloEnforcement {
    pub policy: ArenaPolicy,
    pub entries_before: usize,
    pub entries_after: usize,
    pub dropped: usize,
    /// Source of the entry that triggered enforcement.
    pub source: String,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Arena
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct ContextArena {
    max_entries: usize,
    policy: ArenaPolicy,
    sessions: RwLock<HashMap<String, Vec<ArenaEntry>>>,
}

impl ContextArena {
    pub fn new(config: &ContextConfig) -> Self {
        Self {
            max_entries: config.max_entries_per_session,
            policy: config.arena_policy,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Insert an entry, enforcing the per-session bound.
    ///
    /// Returns the enforcement record when the degradation policy
    /// fired, so the caller can persist a `context_arena_slo_enforced`
    /// event.
    pub fn insert(&self, session_id: &str, entry: ArenaEntry) -> Option<SloEnforcement> {
        let mut sessions = self.sessions.write();
        let entries = sessions.entry(session_id.to_owned()).or_default();

        if entry.once_per_session && entries.iter().any(|e| e.id == entry.id) {
            return None;
        }

        if entries.len() < self.max_entries {
            entries.push(entry);
            return None;
        }

        let before = entries.len();
        let mut evicted = 0usize;
        let mut accepted = true;
        match self.policy {
            ArenaPolicy::DropRecall => {
                if let Some(pos) = entries.iter().position(|e| e.zone == Zone::MemoryRecall) {
                    entries.remove(pos);
                    evicted += 1;
                } else if entry.zone == Zone::MemoryRecall {
                    accepted = false;
                } else if let Some(pos) =
                    entries.iter().position(|e| e.priority != Priority::Critical)
                {
                    entries.remove(pos);
                    evicted += 1;
                } else {
                    accepted = false;
                }
            }
            ArenaPolicy::DropLowPriority => {
                let victim = [Priority::Low, Priority::Normal, Priority::High]
                    .iter()
                    .find_map(|p| entries.iter().position(|e| e.priority == *p));
                match victim {
                    Some(pos) => {
                        entries.remove(pos);
                        evicted += 1;
                    }
                    None => accepted = false,
                }
            }
            ArenaPolicy::ForceCompact => {
                evicted = entries.len();
                entries.clear();
            }
        }

        let source = entry.source.clone();
        if accepted {
            entries.push(entry);
        }
        let enforcement = SloEnforcement {
            policy: self.policy,
            entries_before: before,
            entries_after: entries.len(),
            dropped: evicted + usize::from(!accepted),
            source,
        };

        TraceEvent::ArenaSloEnforced {
            session_id: session_id.to_owned(),
            policy: enforcement.policy.to_string(),
            entries_before: enforcement.entries_before,
            entries_after: enforcement.entries_after,
            dropped: enforcement.dropped,
        }
        .emit();

        Some(enforcement)
    }

    /// Snapshot a session's entries in insertion order.
    pub fn entries(&self, session_id: &str) -> Vec<ArenaEntry> {
        self.sessions
            .read()
            .get(session_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Remove every entry with the given source.
    pub fn remove_source(&self, session_id: &str, source: &str) {
        if let Some(entries) = self.sessions.write().get_mut(session_id) {
            entries.retain(|e| e.source != source);
        }
    }

    /// Drop all entries for a session.
    pub fn clear(&self, session_id: &str) {
        self.sessions.write().remove(session_id);
    }

    pub fn len(&self, session_id: &str) -> usize {
        self.sessions
            .read()
            .get(session_id)
            .map(Vec::len)
            .unwrap_or(0)
    }

    pub fn is_empty(&self, session_id: &str) -> bool {
        self.len(session_id) == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str, zone: Zone, priority: Priority) -> ArenaEntry {
        ArenaEntry {
            source: "test".into(),
            id: id.into(),
            priority,
            zone,
            content: format!("content {id}"),
            estimated_tokens: 4,
            once_per_session: false,
        }
    }

    fn arena(max: usize, policy: ArenaPolicy) -> ContextArena {
        let config = ContextConfig {
            max_entries_per_session: max,
            arena_policy: policy,
            ..ContextConfig::default()
        };
        ContextArena::new(&config)
    }

    #[test]
    fn drop_recall_evicts_oldest_recall_first() {
        let arena = arena(2, ArenaPolicy::DropRecall);
        arena.insert("s1", entry("r1", Zone::MemoryRecall, Priority::Normal));
        arena.insert("s1", entry("t1", Zone::Truth, Priority::High));

        let slo = arena
            .insert("s1", entry("t2", Zone::TaskState, Priority::Normal))
            .expect("policy fires");
        assert_eq!(slo.dropped, 1);
        assert_eq!(slo.entries_after, 2);

        let ids: Vec<String> = arena.entries("s1").into_iter().map(|e| e.id).collect();
        assert_eq!(ids, vec!["t1".to_owned(), "t2".to_owned()]);
    }

    #[test]
    fn drop_recall_rejects_incoming_recall_when_none_held() {
        let arena = arena(1, ArenaPolicy::DropRecall);
        arena.insert("s1", entry("c1", Zone::Identity, Priority::Critical));

        let slo = arena
            .insert("s1", entry("r1", Zone::MemoryRecall, Priority::Low))
            .expect("policy fires");
        assert_eq!(slo.entries_after, 1);
        assert_eq!(arena.entries("s1")[0].id, "c1");
    }

    #[test]
    fn drop_low_priority_never_evicts_critical() {
        let arena = arena(2, ArenaPolicy::DropLowPriority);
        arena.insert("s1", entry("c1", Zone::Identity, Priority::Critical));
        arena.insert("s1", entry("n1", Zone::Truth, Priority::Normal));

        arena
            .insert("s1", entry("h1", Zone::TaskState, Priority::High))
            .expect("policy fires");

        let ids: Vec<String> = arena.entries("s1").into_iter().map(|e| e.id).collect();
        assert_eq!(ids, vec!["c1".to_owned(), "h1".to_owned()]);
    }

    #[test]
    fn force_compact_clears_and_accepts() {
        let arena = arena(2, ArenaPolicy::ForceCompact);
        arena.insert("s1", entry("a", Zone::Truth, Priority::Normal));
        arena.insert("s1", entry("b", Zone::Truth, Priority::Normal));

        let slo = arena
            .insert("s1", entry("c", Zone::Truth, Priority::Normal))
            .expect("policy fires");
        assert_eq!(slo.entries_after, 1);
        assert_eq!(arena.entries("s1")[0].id, "c");
    }

    #[test]
    fn once_per_session_skips_duplicates() {
        let arena = arena(8, ArenaPolicy::DropRecall);
        let mut e = entry("once", Zone::Identity, Priority::Critical);
        e.once_per_session = true;
        arena.insert("s1", e.clone());
        arena.insert("s1", e);
        assert_eq!(arena.len("s1"), 1);
    }
}
