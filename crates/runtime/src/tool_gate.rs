//! Tool access gate.
//!
//! Evaluates every tool call against the active skill's contract and
//! the session's budgets. `standard` mode warns (once per dedup key)
//! and allows; `strict` mode blocks everything except the reserved
//! lifecycle tools. The cost cap, when configured to block, overrides
//! both modes.

use bv_domain::config::{SecurityMode, SkillContract};

use crate::session::SessionState;

/// Tools that must stay callable even under strict blocking, so a
/// session can always wind down, inspect cost, and compact.
pub const LIFECYCLE_TOOLS: [&str; 8] = [
    "skill_complete",
    "skill_load",
    "cost_view",
    "tape_handoff",
    "tape_info",
    "tape_search",
    "session_compact",
    "rollback_last_patch",
];

pub fn is_lifecycle_tool(tool: &str) -> bool {
    LIFECYCLE_TOOLS.contains(&tool)
}

/// The answer handed back to the tool dispatcher.
#[derive(Debug, Clone)]
pub struct AccessDecision {
    pub allowed: bool,
    pub reason: Option<String>,
}

impl AccessDecision {
    fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }
}

/// A contract violation noticed during a check, regardless of whether
/// the call was allowed through.
#[derive(Debug, Clone)]
pub struct Violation {
    pub reason: String,
    /// Stable key preventing repeated warning events for the same
    /// violation shape.
    pub dedupe_key: String,
}

/// Outcome of one gate check.
#[derive(Debug, Clone)]
pub struct GateOutcome {
    pub decision: AccessDecision,
    pub violation: Option<Violation>,
}

pub struct ToolGate {
    mode: SecurityMode,
}

impl ToolGate {
    pub fn new(mode: SecurityMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> SecurityMode {
        self.mode
    }

    /// Evaluate a tool call for the given session.
    pub fn check(
        &self,
        session: &SessionState,
        contract: Option<&SkillContract>,
        tool: &str,
    ) -> GateOutcome {
        // Cost cap blocks non-lifecycle tools in every mode.
        if session.blocked_by_cost && !is_lifecycle_tool(tool) {
            return GateOutcome {
                decision: AccessDecision {
                    allowed: false,
                    reason: Some("session cost cap exceeded".to_owned()),
                },
                violation: None,
            };
        }

        let Some(contract) = contract else {
            // No active skill contract: nothing to enforce.
            return GateOutcome {
                decision: AccessDecision::allow(),
                violation: None,
            };
        };

        let violation = self.find_violation(session, contract, tool);
        let Some(violation) = violation else {
            return GateOutcome {
                decision: AccessDecision::allow(),
                violation: None,
            };
        };

        match self.mode {
            SecurityMode::Standard => GateOutcome {
                decision: AccessDecision::allow(),
                violation: Some(violation),
            },
            SecurityMode::Strict => {
                if is_lifecycle_tool(tool) {
                    GateOutcome {
                        decision: AccessDecision::allow(),
                        violation: Some(violation),
                    }
                } else {
                    GateOutcome {
                        decision: AccessDecision {
                            allowed: false,
                            reason: Some(violation.reason.clone()),
                        },
                        violation: Some(violation),
                    }
                }
            }
        }
    }

    fn find_violation(
        &self,
        session: &SessionState,
        contract: &SkillContract,
        tool: &str,
    ) -> Option<Violation> {
        let skill = &contract.name;

        if contract.tools.denied.iter().any(|t| t == tool) {
            return Some(Violation {
                reason: format!("tool {tool} is denied by skill {skill}"),
                dedupe_key: format!("{skill}:denied:{tool}"),
            });
        }

        let in_contract = is_lifecycle_tool(tool)
            || contract.tools.required.iter().any(|t| t == tool)
            || contract.tools.optional.iter().any(|t| t == tool);
        if !in_contract {
            return Some(Violation {
                reason: format!("tool {tool} is outside skill {skill}'s contract"),
                dedupe_key: format!("{skill}:uncontracted:{tool}"),
            });
        }

        if session.skill_tool_calls >= contract.budget.max_tool_calls {
            return Some(Violation {
                reason: format!(
                    "skill {skill} exceeded max_tool_calls ({})",
                    contract.budget.max_tool_calls
                ),
                dedupe_key: format!("{skill}:max_tool_calls"),
            });
        }

        if session.skill_tokens >= contract.budget.max_tokens {
            return Some(Violation {
                reason: format!(
                    "skill {skill} exceeded max_tokens ({})",
                    contract.budget.max_tokens
                ),
                dedupe_key: format!("{skill}:max_tokens"),
            });
        }

        if let Some(max_parallel) = contract.max_parallel {
            let live: u64 = session.parallel_slots.values().sum();
            if live >= max_parallel {
                return Some(Violation {
                    reason: format!("skill {skill} exceeded max_parallel ({max_parallel})"),
                    dedupe_key: format!("{skill}:max_parallel"),
                });
            }
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bv_domain::config::{SkillBudget, SkillTools};

    fn contract() -> SkillContract {
        SkillContract {
            name: "refactor".into(),
            tools: SkillTools {
                required: vec!["read".into(), "edit".into()],
                optional: vec!["grep".into()],
                denied: vec!["exec".into()],
            },
            budget: SkillBudget {
                max_tool_calls: 3,
                max_tokens: 1_000,
            },
            max_parallel: Some(2),
            required_outputs: vec![],
        }
    }

    #[test]
    fn standard_mode_warns_and_allows() {
        let gate = ToolGate::new(SecurityMode::Standard);
        let session = SessionState::new("s1");

        let outcome = gate.check(&session, Some(&contract()), "browse");
        assert!(outcome.decision.allowed);
        let violation = outcome.violation.unwrap();
        assert!(violation.reason.contains("outside skill"));
        assert_eq!(violation.dedupe_key, "refactor:uncontracted:browse");
    }

    #[test]
    fn strict_mode_blocks_but_spares_lifecycle_tools() {
        let gate = ToolGate::new(SecurityMode::Strict);
        let session = SessionState::new("s1");

        let outcome = gate.check(&session, Some(&contract()), "exec");
        assert!(!outcome.decision.allowed);

        let outcome = gate.check(&session, Some(&contract()), "skill_complete");
        assert!(outcome.decision.allowed);
    }

    #[test]
    fn budget_exhaustion_is_a_violation() {
        let gate = ToolGate::new(SecurityMode::Strict);
        let mut session = SessionState::new("s1");
        session.start_skill("refactor");
        session.skill_tool_calls = 3;

        let outcome = gate.check(&session, Some(&contract()), "read");
        assert!(!outcome.decision.allowed);
        assert!(outcome.violation.unwrap().reason.contains("max_tool_calls"));
    }

    #[test]
    fn parallel_slots_count_toward_max_parallel() {
        let gate = ToolGate::new(SecurityMode::Strict);
        let mut session = SessionState::new("s1");
        session.parallel_slots.insert("read".into(), 2);

        let outcome = gate.check(&session, Some(&contract()), "read");
        assert!(!outcome.decision.allowed);
        assert!(outcome.violation.unwrap().reason.contains("max_parallel"));
    }

    #[test]
    fn cost_block_overrides_everything_but_lifecycle() {
        let gate = ToolGate::new(SecurityMode::Standard);
        let mut session = SessionState::new("s1");
        session.blocked_by_cost = true;

        assert!(!gate.check(&session, None, "read").decision.allowed);
        assert!(gate.check(&session, None, "cost_view").decision.allowed);
    }

    #[test]
    fn no_contract_means_no_enforcement() {
        let gate = ToolGate::new(SecurityMode::Strict);
        let session = SessionState::new("s1");
        assert!(gate.check(&session, None, "anything").decision.allowed);
    }
}
