use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Security
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Enforcement mode for the tool access gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecurityMode {
    /// Violations warn once per dedup key and allow the call.
    Standard,
    /// Violations block the call, except lifecycle tools.
    Strict,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    #[serde(default = "d_mode")]
    pub mode: SecurityMode,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self { mode: d_mode() }
    }
}

fn d_mode() -> SecurityMode {
    SecurityMode::Standard
}
