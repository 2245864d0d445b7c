mod channel;
mod context;
mod cost;
mod events;
mod gateway;
mod parallel;
mod security;
mod skills;
mod verification;
mod wal;
mod workspace;

pub use channel::*;
pub use context::*;
pub use cost::*;
pub use events::*;
pub use gateway::*;
pub use parallel::*;
pub use security::*;
pub use skills::*;
pub use verification::*;
pub use wal::*;
pub use workspace::*;

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub workspace: WorkspaceConfig,
    #[serde(default)]
    pub events: EventsConfig,
    #[serde(default)]
    pub context: ContextConfig,
    #[serde(default)]
    pub skills: SkillsConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub cost: CostConfig,
    #[serde(default)]
    pub verification: VerificationConfig,
    #[serde(default)]
    pub wal: WalConfig,
    #[serde(default)]
    pub channel: ChannelConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub parallel: ParallelConfig,
}

impl Config {
    /// Load `.brewva/brewva.json` under the given workspace root.
    ///
    /// A missing file yields the defaulted config; a malformed file is a
    /// hard error (the operator should know their config was ignored).
    pub fn load(workspace_root: &Path) -> Result<Self> {
        let path = workspace_root.join(".brewva").join("brewva.json");
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(&path).map_err(Error::Io)?;
        let config: Config = serde_json::from_str(&raw)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
        Ok(config)
    }

    /// Validate cross-field constraints, returning every issue found.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        if self.context.hard_limit_percent > 100 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "context.hard_limit_percent".into(),
                message: "must be ≤ 100".into(),
            });
        }
        if self.context.compaction.pressure_bypass_percent
            < self.context.compaction.threshold_percent
        {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                field: "context.compaction.pressure_bypass_percent".into(),
                message: "below threshold_percent; bypass will always apply".into(),
            });
        }
        for (zone, budget) in self.context.zones.iter() {
            if budget.min > budget.max {
                issues.push(ConfigIssue {
                    severity: ConfigSeverity::Error,
                    field: format!("context.zones.{zone}"),
                    message: format!("min {} exceeds max {}", budget.min, budget.max),
                });
            }
        }
        if self.gateway.port == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                field: "gateway.port".into(),
                message: "port 0 selects an ephemeral port".into(),
            });
        }

        issues
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}
