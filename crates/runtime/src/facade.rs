//! The runtime façade.
//!
//! Owns the per-session state map and wires the stores, the context
//! pipeline, and the managers into one surface. Every public method
//! takes the session's mutex for the duration of its synchronous
//! critical section; async work (verification commands) runs before
//! the lock is taken.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};

use bv_contextpack::{
    ArenaEntry, CompactionNote, ContextArena, InjectionPipeline, InjectionPlan, UsageSnapshot,
};
use bv_domain::config::{
    orchestrator_dir, Config, ConfigSeverity, CostAction, Priority, Zone,
};
use bv_domain::error::{Error, Result};
use bv_domain::trace::TraceEvent;
use bv_store::{
    ChainVerification, EvidenceInput, EvidenceLedger, EventAppend, EventQuery, EventRecord,
    EventStore, MemoryStore, Verdict, COST_TOOL,
};

use crate::cost::{allocate_proportional, AssistantUsage};
use crate::parallel;
use crate::session::SessionState;
use crate::skills::{OutputValidation, SkillManager};
use crate::task::TaskEvent;
use crate::tool_gate::{AccessDecision, ToolGate};
use crate::truth::{
    verifier_blocker_id, verifier_fact_id, FactStatus, Severity, TruthFact,
};
use crate::verification::{CheckRun, VerificationGate, VerificationReport};

// Event types the façade emits.
const EVT_TURN_STARTED: &str = "turn_started";
const EVT_TURN_FINISHED: &str = "turn_finished";
const EVT_TASK: &str = "task_event";
const EVT_TOOL_WARNING: &str = "tool_warning";
const EVT_SKILL_ACTIVATED: &str = "skill_activated";
const EVT_SKILL_COMPLETED: &str = "skill_completed";
const EVT_ARENA_SLO: &str = "context_arena_slo_enforced";
const EVT_VERIFICATION: &str = "verification_evaluated";
const EVT_SESSION_SHUTDOWN: &str = "session_shutdown";
const EVT_SESSION_INTERRUPTED: &str = "session_interrupted";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Runtime
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct Runtime {
    config: Config,
    workspace_root: PathBuf,
    events: Arc<EventStore>,
    ledger: Arc<EvidenceLedger>,
    memory: Arc<MemoryStore>,
    pipeline: Arc<InjectionPipeline>,
    skills: SkillManager,
    gate: ToolGate,
    verification: VerificationGate,
    sessions: RwLock<HashMap<String, Arc<Mutex<SessionState>>>>,
}

impl Runtime {
    /// Build a runtime bound to one workspace.
    pub fn new(workspace_root: &Path, config: Config) -> Result<Self> {
        let errors: Vec<String> = config
            .validate()
            .into_iter()
            .filter(|i| i.severity == ConfigSeverity::Error)
            .map(|i| i.to_string())
            .collect();
        if !errors.is_empty() {
            return Err(Error::Config(errors.join("; ")));
        }

        let dir = orchestrator_dir(workspace_root);
        std::fs::create_dir_all(&dir).map_err(Error::Io)?;

        let events = Arc::new(EventStore::new(&dir, &config.events));
        let ledger = Arc::new(EvidenceLedger::new(&dir));
        let memory = Arc::new(MemoryStore::new(&dir));
        let arena = Arc::new(ContextArena::new(&config.context));
        let pipeline = Arc::new(InjectionPipeline::new(
            config.context.clone(),
            arena,
            ledger.clone(),
        ));
        let skills = SkillManager::new(&config.skills);
        let gate = ToolGate::new(config.security.mode);
        let verification = VerificationGate::new(config.verification.clone());

        Ok(Self {
            config,
            workspace_root: workspace_root.to_path_buf(),
            events,
            ledger,
            memory,
            pipeline,
            skills,
            gate,
            verification,
            sessions: RwLock::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn workspace_root(&self) -> &Path {
        &self.workspace_root
    }

    pub fn events(&self) -> &EventStore {
        &self.events
    }

    pub fn ledger(&self) -> &EvidenceLedger {
        &self.ledger
    }

    pub fn memory(&self) -> &MemoryStore {
        &self.memory
    }

    // ── session lifecycle ───────────────────────────────────────────

    /// Get or create the session's state handle, hydrating durable
    /// pieces (turn index, warning dedup keys, task state) from the
    /// event store on first reference.
    pub fn session(&self, session_id: &str) -> Arc<Mutex<SessionState>> {
        if let Some(handle) = self.sessions.read().get(session_id) {
            return handle.clone();
        }

        let mut state = SessionState::new(session_id);
        self.hydrate(&mut state);
        let handle = Arc::new(Mutex::new(state));
        let mut sessions = self.sessions.write();
        sessions
            .entry(session_id.to_owned())
            .or_insert(handle)
            .clone()
    }

    fn hydrate(&self, state: &mut SessionState) {
        let records = self
            .events
            .query(&state.session_id, &EventQuery::default())
            .unwrap_or_default();
        for record in &records {
            if let Some(turn) = record.turn {
                state.turn = state.turn.max(turn);
            }
            match record.event_type.as_str() {
                EVT_TASK => {
                    if let Some(payload) = &record.payload {
                        if let Ok(event) =
                            serde_json::from_value::<TaskEvent>(payload.clone())
                        {
                            state.task_state.apply(&event, record.timestamp);
                        }
                    }
                }
                EVT_TOOL_WARNING => {
                    if let Some(key) = record
                        .payload
                        .as_ref()
                        .and_then(|p| p.get("dedupeKey"))
                        .and_then(|k| k.as_str())
                    {
                        state.warned_keys.insert(key.to_owned());
                    }
                }
                _ => {}
            }
        }
    }

    /// Dispose a session, recording a shutdown event.
    pub fn dispose_session(&self, session_id: &str, reason: &str) {
        let _ = self.events.append(
            EventAppend::new(session_id, EVT_SESSION_SHUTDOWN)
                .with_payload(serde_json::json!({ "reason": reason })),
        );
        self.sessions.write().remove(session_id);
        self.pipeline.dispose_session(session_id);
        self.events.clear_session_cache(session_id);
    }

    /// Record interruption for every live session (SIGINT path).
    pub fn interrupt_all(&self, reason: &str) {
        let ids: Vec<String> = self.sessions.read().keys().cloned().collect();
        for session_id in ids {
            let _ = self.events.append(
                EventAppend::new(&session_id, EVT_SESSION_INTERRUPTED)
                    .with_payload(serde_json::json!({ "reason": reason })),
            );
        }
    }

    pub fn list_sessions(&self) -> Result<Vec<String>> {
        self.events.list_session_ids()
    }

    // ── turn lifecycle ──────────────────────────────────────────────

    /// Advance the turn index and open a new turn.
    pub fn begin_turn(&self, session_id: &str) -> u64 {
        let handle = self.session(session_id);
        let turn = {
            let mut state = handle.lock();
            state.turn += 1;
            state.turn
        };
        self.pipeline.note_turn(session_id);
        let _ = self
            .events
            .append(EventAppend::new(session_id, EVT_TURN_STARTED).with_turn(turn));
        TraceEvent::TurnStarted {
            session_id: session_id.to_owned(),
            turn,
        }
        .emit();
        turn
    }

    /// Close the current turn and reset per-turn accounting.
    pub fn end_turn(&self, session_id: &str) {
        let handle = self.session(session_id);
        let turn = {
            let mut state = handle.lock();
            state.finish_turn();
            state.turn
        };
        let _ = self
            .events
            .append(EventAppend::new(session_id, EVT_TURN_FINISHED).with_turn(turn));
        TraceEvent::TurnFinished {
            session_id: session_id.to_owned(),
            turn,
        }
        .emit();
    }

    pub fn current_turn(&self, session_id: &str) -> u64 {
        self.session(session_id).lock().turn
    }

    /// Raw event append for embedders and ports.
    pub fn append_event(&self, input: EventAppend) -> Result<Option<EventRecord>> {
        self.events.append(input)
    }

    /// Full event replay for a session.
    pub fn replay(&self, session_id: &str) -> Result<Vec<EventRecord>> {
        self.events.query(session_id, &EventQuery::default())
    }

    // ── task + truth ────────────────────────────────────────────────

    /// Fold a task event into the session and persist it.
    pub fn apply_task_event(&self, session_id: &str, event: TaskEvent) -> Result<()> {
        let handle = self.session(session_id);
        let mut state = handle.lock();
        self.record_task_event(&mut state, event)
    }

    fn record_task_event(&self, state: &mut SessionState, event: TaskEvent) -> Result<()> {
        let timestamp = Utc::now().timestamp_millis();
        state.task_state.apply(&event, timestamp);
        self.events.append(
            EventAppend::new(&state.session_id, EVT_TASK)
                .with_turn(state.turn)
                .with_payload(serde_json::to_value(&event)?),
        )?;
        Ok(())
    }

    pub fn task_state(&self, session_id: &str) -> crate::task::TaskState {
        self.session(session_id).lock().task_state.clone()
    }

    pub fn upsert_truth_fact(&self, session_id: &str, fact: TruthFact) {
        self.session(session_id).lock().truth.upsert(fact);
    }

    pub fn resolve_truth_fact(&self, session_id: &str, id: &str) -> bool {
        self.session(session_id).lock().truth.resolve(id)
    }

    pub fn truth_digest(&self, session_id: &str) -> String {
        self.session(session_id).lock().truth.digest()
    }

    // ── context injection ───────────────────────────────────────────

    /// Pin the identity block for a session (injected once).
    pub fn set_identity(&self, session_id: &str, content: &str) {
        self.insert_arena_entry(
            session_id,
            ArenaEntry {
                source: "identity".into(),
                id: "identity".into(),
                priority: Priority::Critical,
                zone: Zone::Identity,
                content: content.to_owned(),
                estimated_tokens: bv_contextpack::tokens::estimate_tokens(content),
                once_per_session: true,
            },
        );
    }

    /// Plan the primary injection for a prompt, refreshing the derived
    /// context blocks first.
    pub fn plan_injection(
        &self,
        session_id: &str,
        prompt: &str,
        usage: Option<UsageSnapshot>,
        scope_id: Option<&str>,
    ) -> InjectionPlan {
        self.refresh_context_blocks(session_id, prompt);
        self.pipeline.plan(session_id, prompt, usage, scope_id)
    }

    pub fn plan_supplemental_injection(
        &self,
        session_id: &str,
        content: &str,
        usage: Option<UsageSnapshot>,
        scope_id: Option<&str>,
    ) -> InjectionPlan {
        self.pipeline
            .plan_supplemental_injection(session_id, content, usage, scope_id)
    }

    pub fn commit_injection(&self, session_id: &str, tokens: usize, scope_id: Option<&str>) {
        self.pipeline.commit(session_id, tokens, scope_id);
    }

    pub fn clear_pending_injection(&self, session_id: &str) {
        self.pipeline.clear_pending(session_id);
    }

    pub fn mark_compacted(&self, session_id: &str, note: CompactionNote) -> Result<()> {
        self.pipeline.mark_compacted(session_id, note)
    }

    pub fn should_request_compaction(&self, session_id: &str, usage: UsageSnapshot) -> bool {
        self.pipeline.should_request_compaction(session_id, usage)
    }

    /// Rebuild the derived arena blocks (truth digest, task state,
    /// tool failures, memory) from current session state.
    fn refresh_context_blocks(&self, session_id: &str, prompt: &str) {
        let (truth_digest, task_render) = {
            let handle = self.session(session_id);
            let state = handle.lock();
            (state.truth.digest(), state.task_state.render())
        };
        let arena = self.pipeline.arena();

        arena.remove_source(session_id, "truth_digest");
        if !truth_digest.is_empty() {
            self.insert_arena_entry(
                session_id,
                ArenaEntry {
                    source: "truth_digest".into(),
                    id: "truth_digest".into(),
                    priority: Priority::High,
                    zone: Zone::Truth,
                    estimated_tokens: bv_contextpack::tokens::estimate_tokens(&truth_digest),
                    content: truth_digest,
                    once_per_session: false,
                },
            );
        }

        arena.remove_source(session_id, "task_state");
        if !task_render.is_empty() {
            self.insert_arena_entry(
                session_id,
                ArenaEntry {
                    source: "task_state".into(),
                    id: "task_state".into(),
                    priority: Priority::High,
                    zone: Zone::TaskState,
                    estimated_tokens: bv_contextpack::tokens::estimate_tokens(&task_render),
                    content: task_render,
                    once_per_session: false,
                },
            );
        }

        arena.remove_source(session_id, "tool_failures");
        if let Ok(rows) = self.ledger.rows_for_session(session_id) {
            let failures: Vec<String> = rows
                .iter()
                .rev()
                .filter(|r| r.verdict == Verdict::Fail && r.tool != COST_TOOL)
                .take(5)
                .map(|r| format!("{} failed: {}", r.tool, r.output_summary))
                .collect();
            if !failures.is_empty() {
                let content = failures.join("\n");
                self.insert_arena_entry(
                    session_id,
                    ArenaEntry {
                        source: "tool_failures".into(),
                        id: "tool_failures".into(),
                        priority: Priority::Normal,
                        zone: Zone::ToolFailures,
                        estimated_tokens: bv_contextpack::tokens::estimate_tokens(&content),
                        content,
                        once_per_session: false,
                    },
                );
            }
        }

        arena.remove_source(session_id, "memory_working");
        if let Ok(entries) = self.memory.working(session_id, 8) {
            if !entries.is_empty() {
                let content = entries
                    .iter()
                    .map(|e| format!("- {}", e.content))
                    .collect::<Vec<_>>()
                    .join("\n");
                self.insert_arena_entry(
                    session_id,
                    ArenaEntry {
                        source: "memory_working".into(),
                        id: "memory_working".into(),
                        priority: Priority::Normal,
                        zone: Zone::MemoryWorking,
                        estimated_tokens: bv_contextpack::tokens::estimate_tokens(&content),
                        content,
                        once_per_session: false,
                    },
                );
            }
        }

        arena.remove_source(session_id, "memory_recall");
        if let Ok(hits) = self.memory.recall(prompt, 5) {
            if !hits.is_empty() {
                let content = hits
                    .iter()
                    .map(|e| format!("- {}", e.content))
                    .collect::<Vec<_>>()
                    .join("\n");
                self.insert_arena_entry(
                    session_id,
                    ArenaEntry {
                        source: "memory_recall".into(),
                        id: "memory_recall".into(),
                        priority: Priority::Low,
                        zone: Zone::MemoryRecall,
                        estimated_tokens: bv_contextpack::tokens::estimate_tokens(&content),
                        content,
                        once_per_session: false,
                    },
                );
            }
        }
    }

    fn insert_arena_entry(&self, session_id: &str, entry: ArenaEntry) {
        if let Some(slo) = self.pipeline.arena().insert(session_id, entry) {
            let _ = self.events.append(
                EventAppend::new(session_id, EVT_ARENA_SLO).with_payload(serde_json::json!({
                    "policy": slo.policy.to_string(),
                    "entriesBefore": slo.entries_before,
                    "entriesAfter": slo.entries_after,
                    "dropped": slo.dropped,
                    "source": slo.source,
                })),
            );
        }
    }

    // ── skills ──────────────────────────────────────────────────────

    /// Activate a skill for a session. Unknown names are an error.
    pub fn activate_skill(&self, session_id: &str, name: &str) -> Result<()> {
        if self.skills.contract(name).is_none() {
            return Err(Error::SkillNotFound(name.to_owned()));
        }
        let handle = self.session(session_id);
        let turn = {
            let mut state = handle.lock();
            state.start_skill(name);
            state.turn
        };
        self.events.append(
            EventAppend::new(session_id, EVT_SKILL_ACTIVATED)
                .with_turn(turn)
                .with_payload(serde_json::json!({ "skill": name })),
        )?;
        TraceEvent::SkillActivated {
            session_id: session_id.to_owned(),
            skill: name.to_owned(),
        }
        .emit();
        Ok(())
    }

    /// Validate a completing skill's outputs; on success the active
    /// skill is cleared.
    pub fn complete_skill(
        &self,
        session_id: &str,
        outputs: &serde_json::Value,
    ) -> Result<OutputValidation> {
        let handle = self.session(session_id);
        let mut state = handle.lock();
        let Some(skill) = state.active_skill.clone() else {
            return Err(Error::Other("no active skill to complete".to_owned()));
        };

        let validation = self.skills.validate_outputs(&skill, outputs);
        if validation.ok {
            state.end_skill();
        }
        let turn = state.turn;
        drop(state);

        self.events.append(
            EventAppend::new(session_id, EVT_SKILL_COMPLETED)
                .with_turn(turn)
                .with_payload(serde_json::json!({
                    "skill": skill,
                    "ok": validation.ok,
                    "missing": validation.missing,
                })),
        )?;
        TraceEvent::SkillCompleted {
            session_id: session_id.to_owned(),
            skill,
            ok: validation.ok,
        }
        .emit();
        Ok(validation)
    }

    pub fn active_skill(&self, session_id: &str) -> Option<String> {
        self.session(session_id).lock().active_skill.clone()
    }

    // ── tool gate & accounting ──────────────────────────────────────

    /// Evaluate tool access, emitting a dedup-keyed warning event on
    /// contract violations.
    pub fn check_tool_access(&self, session_id: &str, tool: &str) -> AccessDecision {
        let handle = self.session(session_id);
        let mut state = handle.lock();
        let contract = state
            .active_skill
            .as_deref()
            .and_then(|name| self.skills.contract(name));
        let outcome = self.gate.check(&state, contract, tool);

        if let Some(violation) = &outcome.violation {
            TraceEvent::ToolAccessViolation {
                session_id: session_id.to_owned(),
                tool: tool.to_owned(),
                reason: violation.reason.clone(),
                blocked: !outcome.decision.allowed,
            }
            .emit();
            if state.warned_keys.insert(violation.dedupe_key.clone()) {
                let turn = state.turn;
                let _ = self.events.append(
                    EventAppend::new(session_id, EVT_TOOL_WARNING)
                        .with_turn(turn)
                        .with_payload(serde_json::json!({
                            "dedupeKey": violation.dedupe_key,
                            "tool": tool,
                            "reason": violation.reason,
                            "blocked": !outcome.decision.allowed,
                        })),
                );
            }
        }

        outcome.decision
    }

    /// Record one tool call; mutation tools dirty the session for the
    /// verification gate.
    pub fn mark_call(&self, session_id: &str, tool: &str) {
        let handle = self.session(session_id);
        let mut state = handle.lock();
        state.note_tool_call(tool);
        if self.verification.is_mutation_tool(tool) {
            state.last_write_at = Utc::now().timestamp_millis();
        }
    }

    /// Count tokens against the active skill's budget.
    pub fn add_skill_tokens(&self, session_id: &str, tokens: u64) {
        self.session(session_id).lock().skill_tokens += tokens;
    }

    pub fn acquire_parallel_slot(&self, session_id: &str, tool: &str) {
        let handle = self.session(session_id);
        let mut state = handle.lock();
        *state.parallel_slots.entry(tool.to_owned()).or_insert(0) += 1;
    }

    pub fn release_parallel_slot(&self, session_id: &str, tool: &str) {
        let handle = self.session(session_id);
        let mut state = handle.lock();
        if let Some(count) = state.parallel_slots.get_mut(tool) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                state.parallel_slots.remove(tool);
            }
        }
    }

    /// Bounded-concurrency multi-file read for tools.
    pub async fn read_files_batched(
        &self,
        paths: Vec<PathBuf>,
    ) -> Result<Vec<parallel::FileReadResult>> {
        parallel::read_files(paths, &self.config.parallel).await
    }

    /// Persist one tool result as evidence.
    pub fn record_tool_result(
        &self,
        session_id: &str,
        tool: &str,
        args_summary: &str,
        output: &str,
        verdict: Verdict,
    ) -> Result<bv_store::EvidenceRow> {
        let (turn, skill) = {
            let handle = self.session(session_id);
            let state = handle.lock();
            (state.turn, state.active_skill.clone())
        };
        let summary: String = output.chars().take(200).collect();
        let mut input = EvidenceInput::new(session_id, tool, &summary)
            .with_turn(turn)
            .with_args(args_summary)
            .with_output(output)
            .with_verdict(verdict);
        input.skill = skill;
        self.ledger.append(input)
    }

    // ── cost ────────────────────────────────────────────────────────

    /// Record one assistant round-trip: a cost ledger row, per-tool
    /// attribution, and the session cap check.
    pub fn record_assistant_usage(
        &self,
        session_id: &str,
        usage: AssistantUsage,
    ) -> Result<()> {
        let handle = self.session(session_id);
        let mut state = handle.lock();

        state.total_cost_usd += usage.cost_usd;
        state.total_tokens += usage.total_tokens;
        for (tool, share) in allocate_proportional(usage.cost_usd, &state.turn_tool_calls) {
            *state.cost_by_tool.entry(tool).or_insert(0.0) += share;
        }
        if state.active_skill.is_some() {
            state.skill_tokens += usage.total_tokens;
        }

        let cap = self.config.cost.max_cost_usd_per_session;
        if cap > 0.0
            && state.total_cost_usd > cap
            && self.config.cost.action_on_exceed == CostAction::BlockTools
        {
            state.blocked_by_cost = true;
        }

        let turn = state.turn;
        drop(state);

        self.ledger.append(
            EvidenceInput::new(
                session_id,
                COST_TOOL,
                &format!(
                    "{}: in {} out {} total {} (${:.4})",
                    usage.model,
                    usage.input_tokens,
                    usage.output_tokens,
                    usage.total_tokens,
                    usage.cost_usd
                ),
            )
            .with_turn(turn)
            .with_metadata(serde_json::to_value(&usage)?),
        )?;

        TraceEvent::CostRecorded {
            session_id: session_id.to_owned(),
            model: usage.model,
            total_tokens: usage.total_tokens,
            cost_usd: usage.cost_usd,
        }
        .emit();
        Ok(())
    }

    pub fn total_cost_usd(&self, session_id: &str) -> f64 {
        self.session(session_id).lock().total_cost_usd
    }

    // ── verification ────────────────────────────────────────────────

    /// Record an externally-produced check run (e.g. LSP diagnostics
    /// surfaced by a tool).
    pub fn record_check_run(
        &self,
        session_id: &str,
        check: &str,
        ok: bool,
        output: &str,
    ) -> Result<()> {
        let row = self.record_tool_result(
            session_id,
            check,
            "",
            output,
            if ok { Verdict::Pass } else { Verdict::Fail },
        )?;
        let handle = self.session(session_id);
        let mut state = handle.lock();
        self.verification.record_run(
            &mut state,
            CheckRun {
                check: check.to_owned(),
                ok,
                timestamp: row.timestamp,
                evidence_id: Some(row.id),
            },
        );
        Ok(())
    }

    /// Evaluate the verification gate, optionally producing fresh
    /// evidence by running the configured commands first. Failing
    /// checks are mirrored into truth facts and task blockers.
    pub async fn evaluate_verification(
        &self,
        session_id: &str,
        level: &str,
        require_commands: bool,
    ) -> Result<VerificationReport> {
        if require_commands {
            let outcomes = self.verification.run_commands(&self.workspace_root).await;
            for outcome in outcomes {
                let verdict = if outcome.ok { Verdict::Pass } else { Verdict::Fail };
                let row = self.ledger.append(
                    EvidenceInput::new(session_id, &outcome.check, &outcome.output)
                        .with_turn(self.current_turn(session_id))
                        .with_args(&outcome.command)
                        .with_output(&outcome.output)
                        .with_verdict(verdict)
                        .with_metadata(serde_json::json!({
                            "durationMs": outcome.duration_ms,
                            "timedOut": outcome.timed_out,
                        })),
                )?;
                let handle = self.session(session_id);
                let mut state = handle.lock();
                self.verification.record_run(
                    &mut state,
                    CheckRun {
                        check: outcome.check,
                        ok: outcome.ok,
                        timestamp: row.timestamp,
                        evidence_id: Some(row.id),
                    },
                );
            }
        }

        let handle = self.session(session_id);
        let mut state = handle.lock();
        let report = self.verification.evaluate(&state, level);
        self.reconcile_verification(&mut state, &report)?;
        let turn = state.turn;
        drop(state);

        self.events.append(
            EventAppend::new(session_id, EVT_VERIFICATION)
                .with_turn(turn)
                .with_payload(serde_json::json!({
                    "level": level,
                    "passed": report.passed,
                    "missingEvidence": report.missing_evidence,
                })),
        )?;
        TraceEvent::VerificationEvaluated {
            session_id: session_id.to_owned(),
            level: level.to_owned(),
            passed: report.passed,
            missing: report.missing_evidence.len(),
        }
        .emit();
        Ok(report)
    }

    /// Mirror failing checks into truth facts and task blockers, and
    /// resolve both when a check returns to ok.
    fn reconcile_verification(
        &self,
        state: &mut SessionState,
        report: &VerificationReport,
    ) -> Result<()> {
        for check in &report.checks {
            let fact_id = verifier_fact_id(&check.check);
            let blocker_id = verifier_blocker_id(&check.check);
            if check.satisfied {
                let was_active = state
                    .truth
                    .get(&fact_id)
                    .map(|f| f.status == FactStatus::Active)
                    .unwrap_or(false);
                if was_active {
                    state.truth.resolve(&fact_id);
                }
                if state.task_state.has_blocker(&blocker_id) {
                    self.record_task_event(
                        state,
                        TaskEvent::BlockerResolved {
                            id: blocker_id.clone(),
                        },
                    )?;
                }
            } else {
                let summary = format!("verification check {} is not satisfied", check.check);
                state.truth.upsert(TruthFact {
                    id: fact_id,
                    kind: "verifier".to_owned(),
                    severity: Severity::Error,
                    summary: summary.clone(),
                    status: FactStatus::Active,
                    evidence_ids: check
                        .last_run
                        .as_ref()
                        .and_then(|r| r.evidence_id.clone())
                        .into_iter()
                        .collect(),
                    details: None,
                });
                if !state.task_state.has_blocker(&blocker_id) {
                    self.record_task_event(
                        state,
                        TaskEvent::BlockerRecorded {
                            id: blocker_id,
                            summary,
                        },
                    )?;
                }
            }
        }
        Ok(())
    }

    // ── evidence passthrough ────────────────────────────────────────

    pub fn verify_chain(&self, session_id: &str) -> Result<ChainVerification> {
        self.ledger.verify_chain(session_id)
    }

    pub fn evidence_digest(&self, session_id: &str, max_rows: usize) -> Result<String> {
        self.ledger.digest(session_id, max_rows)
    }
}
