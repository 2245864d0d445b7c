use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Event store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventsConfig {
    /// When false, `append` becomes a no-op returning `None`.
    #[serde(default = "d_true")]
    pub persist: bool,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self { persist: true }
    }
}

fn d_true() -> bool {
    true
}
