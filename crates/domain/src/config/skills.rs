use std::collections::HashMap;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Skill contracts
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Tool lists a skill may use.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SkillTools {
    #[serde(default)]
    pub required: Vec<String>,
    #[serde(default)]
    pub optional: Vec<String>,
    #[serde(default)]
    pub denied: Vec<String>,
}

/// Per-skill spend limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillBudget {
    #[serde(default = "d_max_tool_calls")]
    pub max_tool_calls: u64,
    #[serde(default = "d_max_tokens")]
    pub max_tokens: u64,
}

impl Default for SkillBudget {
    fn default() -> Self {
        Self {
            max_tool_calls: d_max_tool_calls(),
            max_tokens: d_max_tokens(),
        }
    }
}

/// Contract governing one skill's tool usage and budget.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillContract {
    pub name: String,
    #[serde(default)]
    pub tools: SkillTools,
    #[serde(default)]
    pub budget: SkillBudget,
    /// Maximum parallel slots this skill may hold.
    #[serde(default)]
    pub max_parallel: Option<u64>,
    /// Output keys `complete` requires to be present.
    #[serde(default)]
    pub required_outputs: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SkillsConfig {
    /// Contracts keyed by skill name.
    #[serde(default)]
    pub contracts: HashMap<String, SkillContract>,
}

fn d_max_tool_calls() -> u64 {
    200
}
fn d_max_tokens() -> u64 {
    400_000
}
