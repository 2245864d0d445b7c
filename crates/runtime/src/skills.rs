//! Skill contract registry and output validation.
//!
//! Activation state lives on the session; this module owns the static
//! contract set loaded from config.

use std::collections::HashMap;

use bv_domain::config::{SkillContract, SkillsConfig};

/// Result of validating a completing skill's outputs.
#[derive(Debug, Clone)]
pub struct OutputValidation {
    pub ok: bool,
    pub missing: Vec<String>,
}

pub struct SkillManager {
    contracts: HashMap<String, SkillContract>,
}

impl SkillManager {
    pub fn new(config: &SkillsConfig) -> Self {
        Self {
            contracts: config.contracts.clone(),
        }
    }

    pub fn contract(&self, name: &str) -> Option<&SkillContract> {
        self.contracts.get(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.contracts.keys().map(String::as_str).collect()
    }

    /// Check that every required output key is present and non-null.
    pub fn validate_outputs(
        &self,
        skill: &str,
        outputs: &serde_json::Value,
    ) -> OutputValidation {
        let required = self
            .contract(skill)
            .map(|c| c.required_outputs.as_slice())
            .unwrap_or_default();
        let missing: Vec<String> = required
            .iter()
            .filter(|key| outputs.get(key.as_str()).map(|v| v.is_null()).unwrap_or(true))
            .cloned()
            .collect();
        OutputValidation {
            ok: missing.is_empty(),
            missing,
        }
    }
}
