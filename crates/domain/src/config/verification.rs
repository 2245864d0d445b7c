use std::collections::HashMap;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Verification gate
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One shell command run by `run_verification_commands`, recorded as a
/// ledger row under the given check name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationCommand {
    pub check: String,
    pub command: String,
    #[serde(default = "d_command_timeout_ms")]
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationConfig {
    /// Required check names per level (e.g. `"standard"` →
    /// `["lsp_diagnostics", "test_or_build"]`).
    #[serde(default = "d_levels")]
    pub levels: HashMap<String, Vec<String>>,
    #[serde(default)]
    pub commands: Vec<VerificationCommand>,
    /// Tools whose execution marks the session as dirty.
    #[serde(default = "d_mutation_tools")]
    pub mutation_tools: Vec<String>,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            levels: d_levels(),
            commands: Vec::new(),
            mutation_tools: d_mutation_tools(),
        }
    }
}

fn d_levels() -> HashMap<String, Vec<String>> {
    let mut levels = HashMap::new();
    levels.insert(
        "standard".to_owned(),
        vec!["lsp_diagnostics".to_owned(), "test_or_build".to_owned()],
    );
    levels
}

fn d_mutation_tools() -> Vec<String> {
    ["edit", "multi_edit", "write", "apply_patch", "exec_write"]
        .into_iter()
        .map(str::to_owned)
        .collect()
}

fn d_command_timeout_ms() -> u64 {
    120_000
}
