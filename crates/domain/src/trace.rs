use serde::Serialize;

/// Structured trace events emitted across all Brewva crates.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    EventAppended {
        session_id: String,
        event_type: String,
    },
    LedgerAppended {
        session_id: String,
        tool: String,
        verdict: String,
    },
    LedgerCompacted {
        session_id: String,
        compacted_rows: usize,
        kept_rows: usize,
        reason: String,
    },
    WalAppended {
        scope: String,
        wal_id: String,
        status: String,
    },
    WalRecovered {
        scope: String,
        recovered: usize,
        expired: usize,
        failed: usize,
    },
    ArenaSloEnforced {
        session_id: String,
        policy: String,
        entries_before: usize,
        entries_after: usize,
        dropped: usize,
    },
    InjectionPlanned {
        session_id: String,
        scope: String,
        original_tokens: usize,
        final_tokens: usize,
        truncated: bool,
        accepted: bool,
    },
    ContextCompacted {
        session_id: String,
        from_tokens: usize,
        to_tokens: usize,
    },
    SkillActivated {
        session_id: String,
        skill: String,
    },
    SkillCompleted {
        session_id: String,
        skill: String,
        ok: bool,
    },
    ToolAccessViolation {
        session_id: String,
        tool: String,
        reason: String,
        blocked: bool,
    },
    CostRecorded {
        session_id: String,
        model: String,
        total_tokens: u64,
        cost_usd: f64,
    },
    VerificationEvaluated {
        session_id: String,
        level: String,
        passed: bool,
        missing: usize,
    },
    TurnStarted {
        session_id: String,
        turn: u64,
    },
    TurnFinished {
        session_id: String,
        turn: u64,
    },
    ConversationQueued {
        channel: String,
        conversation_id: String,
        wal_id: String,
    },
    ConversationDispatched {
        channel: String,
        conversation_id: String,
        outbound_turns: usize,
    },
    GatewayConnected {
        client_id: String,
        client_version: String,
    },
    GatewayRequest {
        method: String,
        ok: bool,
        duration_ms: u64,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "bv_event");
    }
}
