use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Cost accounting
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// What happens when a session exceeds its cost cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CostAction {
    /// Record the overrun and keep going.
    Warn,
    /// Block non-lifecycle tool calls for the rest of the session.
    BlockTools,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostConfig {
    /// USD ceiling per session. 0 disables the cap.
    #[serde(default = "d_max_cost")]
    pub max_cost_usd_per_session: f64,
    #[serde(default = "d_action")]
    pub action_on_exceed: CostAction,
}

impl Default for CostConfig {
    fn default() -> Self {
        Self {
            max_cost_usd_per_session: d_max_cost(),
            action_on_exceed: d_action(),
        }
    }
}

fn d_max_cost() -> f64 {
    0.0
}
fn d_action() -> CostAction {
    CostAction::Warn
}
