//! Verification gate.
//!
//! Mutation tools stamp a dirty timestamp on the session; evidence is
//! only fresh when its check ran at or after that stamp. `evaluate`
//! compares the required check set for a level against the session's
//! latest runs, and the command runner produces fresh evidence by
//! executing configured shell commands with a hard timeout.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use bv_domain::config::{VerificationCommand, VerificationConfig};

use crate::session::SessionState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Latest run of one check.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckRun {
    pub check: String,
    pub ok: bool,
    /// Unix millis.
    pub timestamp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evidence_id: Option<String>,
}

/// Per-check verdict inside a report.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckStatus {
    pub check: String,
    pub satisfied: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_run: Option<CheckRun>,
}

/// Result of [`VerificationGate::evaluate`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationReport {
    pub passed: bool,
    pub missing_evidence: Vec<String>,
    pub checks: Vec<CheckStatus>,
}

/// Outcome of one verification command.
#[derive(Debug, Clone)]
pub struct CommandOutcome {
    pub check: String,
    pub command: String,
    pub ok: bool,
    pub timed_out: bool,
    pub duration_ms: u64,
    /// Combined stdout + stderr (partial on timeout).
    pub output: String,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Gate
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct VerificationGate {
    config: VerificationConfig,
}

impl VerificationGate {
    pub fn new(config: VerificationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &VerificationConfig {
        &self.config
    }

    pub fn is_mutation_tool(&self, tool: &str) -> bool {
        self.config.mutation_tools.iter().any(|t| t == tool)
    }

    /// Store the latest run for a check on the session.
    pub fn record_run(&self, session: &mut SessionState, run: CheckRun) {
        session.check_runs.insert(run.check.clone(), run);
    }

    /// Compare the level's required checks against the session's runs.
    ///
    /// A session with no writes since its last clean evaluation passes
    /// trivially; once a mutation tool ran, every required check needs
    /// an ok run at or after the write stamp.
    pub fn evaluate(&self, session: &SessionState, level: &str) -> VerificationReport {
        let required = self
            .config
            .levels
            .get(level)
            .cloned()
            .unwrap_or_default();

        if session.last_write_at == 0 {
            return VerificationReport {
                passed: true,
                missing_evidence: Vec::new(),
                checks: required
                    .into_iter()
                    .map(|check| {
                        let last_run = session.check_runs.get(&check).cloned();
                        CheckStatus {
                            check,
                            satisfied: true,
                            last_run,
                        }
                    })
                    .collect(),
            };
        }

        let mut checks = Vec::with_capacity(required.len());
        let mut missing = Vec::new();
        for check in required {
            let last_run = session.check_runs.get(&check).cloned();
            let satisfied = last_run
                .as_ref()
                .map(|run| run.ok && run.timestamp >= session.last_write_at)
                .unwrap_or(false);
            if !satisfied {
                missing.push(check.clone());
            }
            checks.push(CheckStatus {
                check,
                satisfied,
                last_run,
            });
        }

        VerificationReport {
            passed: missing.is_empty(),
            missing_evidence: missing,
            checks,
        }
    }

    /// Run every configured verification command in the workspace.
    ///
    /// Timeouts are hard: the child is killed and the partial output is
    /// captured with `ok = false`.
    pub async fn run_commands(&self, workspace_root: &Path) -> Vec<CommandOutcome> {
        let mut outcomes = Vec::with_capacity(self.config.commands.len());
        for command in &self.config.commands {
            outcomes.push(run_one(workspace_root, command).await);
        }
        outcomes
    }
}

async fn run_one(workspace_root: &Path, spec: &VerificationCommand) -> CommandOutcome {
    let started = std::time::Instant::now();
    let mut child = match tokio::process::Command::new("sh")
        .arg("-c")
        .arg(&spec.command)
        .current_dir(workspace_root)
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .kill_on_drop(true)
        .spawn()
    {
        Ok(child) => child,
        Err(e) => {
            return CommandOutcome {
                check: spec.check.clone(),
                command: spec.command.clone(),
                ok: false,
                timed_out: false,
                duration_ms: 0,
                output: format!("spawn failed: {e}"),
            };
        }
    };

    let timeout = Duration::from_millis(spec.timeout_ms);
    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => {
            let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
            combined.push_str(&String::from_utf8_lossy(&output.stderr));
            CommandOutcome {
                check: spec.check.clone(),
                command: spec.command.clone(),
                ok: output.status.success(),
                timed_out: false,
                duration_ms: started.elapsed().as_millis() as u64,
                output: combined,
            }
        }
        Ok(Err(e)) => CommandOutcome {
            check: spec.check.clone(),
            command: spec.command.clone(),
            ok: false,
            timed_out: false,
            duration_ms: started.elapsed().as_millis() as u64,
            output: format!("wait failed: {e}"),
        },
        Err(_) => CommandOutcome {
            check: spec.check.clone(),
            command: spec.command.clone(),
            ok: false,
            timed_out: true,
            duration_ms: spec.timeout_ms,
            output: "terminated: timeout".to_owned(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate() -> VerificationGate {
        VerificationGate::new(VerificationConfig::default())
    }

    fn run(check: &str, ok: bool, timestamp: i64) -> CheckRun {
        CheckRun {
            check: check.into(),
            ok,
            timestamp,
            evidence_id: None,
        }
    }

    #[test]
    fn untouched_session_passes() {
        let gate = gate();
        let session = SessionState::new("s1");
        let report = gate.evaluate(&session, "standard");
        assert!(report.passed);
    }

    #[test]
    fn write_without_evidence_fails() {
        let gate = gate();
        let mut session = SessionState::new("s1");
        session.last_write_at = 100;

        let report = gate.evaluate(&session, "standard");
        assert!(!report.passed);
        assert!(report
            .missing_evidence
            .contains(&"lsp_diagnostics".to_owned()));
        assert!(report
            .missing_evidence
            .contains(&"test_or_build".to_owned()));
    }

    #[test]
    fn stale_evidence_does_not_satisfy() {
        let gate = gate();
        let mut session = SessionState::new("s1");
        gate.record_run(&mut session, run("lsp_diagnostics", true, 50));
        session.last_write_at = 100;

        let report = gate.evaluate(&session, "standard");
        assert!(!report.passed);
        assert!(report
            .missing_evidence
            .contains(&"lsp_diagnostics".to_owned()));
    }

    #[test]
    fn fresh_ok_evidence_satisfies() {
        let gate = gate();
        let mut session = SessionState::new("s1");
        session.last_write_at = 100;
        gate.record_run(&mut session, run("lsp_diagnostics", true, 150));
        gate.record_run(&mut session, run("test_or_build", true, 150));

        let report = gate.evaluate(&session, "standard");
        assert!(report.passed);
        assert!(report.missing_evidence.is_empty());
    }

    #[test]
    fn failing_run_never_satisfies() {
        let gate = gate();
        let mut session = SessionState::new("s1");
        session.last_write_at = 100;
        gate.record_run(&mut session, run("lsp_diagnostics", false, 150));
        gate.record_run(&mut session, run("test_or_build", true, 150));

        let report = gate.evaluate(&session, "standard");
        assert!(!report.passed);
        assert_eq!(report.missing_evidence, vec!["lsp_diagnostics".to_owned()]);
    }

    #[tokio::test]
    async fn commands_run_and_time_out() {
        let tmp = tempfile::tempdir().unwrap();
        let config = VerificationConfig {
            commands: vec![
                VerificationCommand {
                    check: "echo".into(),
                    command: "echo hello".into(),
                    timeout_ms: 5_000,
                },
                VerificationCommand {
                    check: "sleepy".into(),
                    command: "sleep 5".into(),
                    timeout_ms: 100,
                },
            ],
            ..VerificationConfig::default()
        };
        let gate = VerificationGate::new(config);

        let outcomes = gate.run_commands(tmp.path()).await;
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes[0].ok);
        assert!(outcomes[0].output.contains("hello"));
        assert!(!outcomes[1].ok);
        assert!(outcomes[1].timed_out);
    }
}
