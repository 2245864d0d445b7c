//! Truth state: durable facts about the session's world.
//!
//! Facts are upserted by id and flipped to resolved rather than
//! deleted, so the record of what went wrong (and when it was fixed)
//! survives. The verification gate mirrors failing checks in here
//! under `truth:verifier:<check>` ids.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FactStatus {
    Active,
    Resolved,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TruthFact {
    pub id: String,
    pub kind: String,
    pub severity: Severity,
    pub summary: String,
    pub status: FactStatus,
    #[serde(default)]
    pub evidence_ids: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// Session-scoped fact set keyed by id.
#[derive(Debug, Clone, Default)]
pub struct TruthState {
    facts: HashMap<String, TruthFact>,
}

impl TruthState {
    /// Insert or replace a fact by id. An upsert of a resolved id
    /// re-activates it.
    pub fn upsert(&mut self, fact: TruthFact) {
        self.facts.insert(fact.id.clone(), fact);
    }

    /// Flip a fact to resolved. Returns false for unknown ids.
    pub fn resolve(&mut self, id: &str) -> bool {
        match self.facts.get_mut(id) {
            Some(fact) => {
                fact.status = FactStatus::Resolved;
                true
            }
            None => false,
        }
    }

    pub fn get(&self, id: &str) -> Option<&TruthFact> {
        self.facts.get(id)
    }

    /// Active facts, most severe first.
    pub fn active(&self) -> Vec<&TruthFact> {
        let mut facts: Vec<&TruthFact> = self
            .facts
            .values()
            .filter(|f| f.status == FactStatus::Active)
            .collect();
        facts.sort_by(|a, b| severity_rank(b.severity).cmp(&severity_rank(a.severity)));
        facts
    }

    /// Render the truth context block.
    pub fn digest(&self) -> String {
        self.active()
            .iter()
            .map(|f| format!("[{:?}] {}", f.severity, f.summary).to_lowercase())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn severity_rank(severity: Severity) -> u8 {
    match severity {
        Severity::Info => 0,
        Severity::Warn => 1,
        Severity::Error => 2,
    }
}

/// Fact id mirroring a verification check.
pub fn verifier_fact_id(check: &str) -> String {
    format!("truth:verifier:{check}")
}

/// Blocker id mirroring a verification check.
pub fn verifier_blocker_id(check: &str) -> String {
    format!("verifier:{check}")
}
