//! Façade-level flows: skill lifecycle, tool-gate warning dedup
//! across restarts, cost cap enforcement, and context dedup.

use std::collections::HashMap;

use bv_domain::config::{
    Config, CostAction, SecurityMode, SkillBudget, SkillContract, SkillTools,
};
use bv_runtime::{AssistantUsage, Runtime, TaskEvent};

fn config_with_skill(mode: SecurityMode) -> Config {
    let mut contracts = HashMap::new();
    contracts.insert(
        "refactor".to_owned(),
        SkillContract {
            name: "refactor".into(),
            tools: SkillTools {
                required: vec!["read".into(), "edit".into()],
                optional: vec![],
                denied: vec![],
            },
            budget: SkillBudget::default(),
            max_parallel: None,
            required_outputs: vec!["summary".into()],
        },
    );
    let mut config = Config::default();
    config.skills.contracts = contracts;
    config.security.mode = mode;
    config
}

#[test]
fn skill_lifecycle_and_output_validation() {
    let tmp = tempfile::tempdir().unwrap();
    let runtime = Runtime::new(tmp.path(), config_with_skill(SecurityMode::Standard)).unwrap();

    runtime.begin_turn("s1");
    runtime.activate_skill("s1", "refactor").unwrap();
    assert_eq!(runtime.active_skill("s1").as_deref(), Some("refactor"));

    // Missing required output keeps the skill active.
    let validation = runtime
        .complete_skill("s1", &serde_json::json!({}))
        .unwrap();
    assert!(!validation.ok);
    assert_eq!(validation.missing, vec!["summary".to_owned()]);
    assert!(runtime.active_skill("s1").is_some());

    let validation = runtime
        .complete_skill("s1", &serde_json::json!({"summary": "renamed module"}))
        .unwrap();
    assert!(validation.ok);
    assert!(runtime.active_skill("s1").is_none());

    assert!(runtime.activate_skill("s1", "nope").is_err());
}

#[test]
fn warning_dedup_survives_restart() {
    let tmp = tempfile::tempdir().unwrap();
    {
        let runtime =
            Runtime::new(tmp.path(), config_with_skill(SecurityMode::Standard)).unwrap();
        runtime.begin_turn("s1");
        runtime.activate_skill("s1", "refactor").unwrap();

        // Uncontracted tool: allowed in standard mode, one warning.
        assert!(runtime.check_tool_access("s1", "browse").allowed);
        assert!(runtime.check_tool_access("s1", "browse").allowed);
        let warnings: Vec<_> = runtime
            .replay("s1")
            .unwrap()
            .into_iter()
            .filter(|e| e.event_type == "tool_warning")
            .collect();
        assert_eq!(warnings.len(), 1);
    }

    // A fresh process hydrates the dedup keys and stays quiet.
    {
        let runtime =
            Runtime::new(tmp.path(), config_with_skill(SecurityMode::Standard)).unwrap();
        runtime.activate_skill("s1", "refactor").unwrap();
        assert!(runtime.check_tool_access("s1", "browse").allowed);
        let warnings: Vec<_> = runtime
            .replay("s1")
            .unwrap()
            .into_iter()
            .filter(|e| e.event_type == "tool_warning")
            .collect();
        assert_eq!(warnings.len(), 1);
    }
}

#[test]
fn strict_mode_blocks_uncontracted_tools() {
    let tmp = tempfile::tempdir().unwrap();
    let runtime = Runtime::new(tmp.path(), config_with_skill(SecurityMode::Strict)).unwrap();
    runtime.activate_skill("s1", "refactor").unwrap();

    assert!(!runtime.check_tool_access("s1", "browse").allowed);
    assert!(runtime.check_tool_access("s1", "read").allowed);
    assert!(runtime.check_tool_access("s1", "skill_complete").allowed);
}

#[test]
fn cost_cap_blocks_tools() {
    let tmp = tempfile::tempdir().unwrap();
    let mut config = config_with_skill(SecurityMode::Standard);
    config.cost.max_cost_usd_per_session = 0.10;
    config.cost.action_on_exceed = CostAction::BlockTools;
    let runtime = Runtime::new(tmp.path(), config).unwrap();

    runtime.begin_turn("s1");
    runtime.mark_call("s1", "read");
    runtime
        .record_assistant_usage(
            "s1",
            AssistantUsage {
                model: "test/model".into(),
                input_tokens: 1_000,
                output_tokens: 500,
                cache_read: 0,
                cache_write: 0,
                total_tokens: 1_500,
                cost_usd: 0.25,
                stop_reason: None,
            },
        )
        .unwrap();

    assert!(!runtime.check_tool_access("s1", "read").allowed);
    assert!(runtime.check_tool_access("s1", "cost_view").allowed);
    assert!((runtime.total_cost_usd("s1") - 0.25).abs() < 1e-9);

    // The cost row is excluded from the digest.
    assert!(!runtime.evidence_digest("s1", 10).unwrap().contains("test/model"));
}

#[test]
fn context_dedup_until_compaction() {
    let tmp = tempfile::tempdir().unwrap();
    let runtime = Runtime::new(tmp.path(), Config::default()).unwrap();

    runtime
        .apply_task_event(
            "s1",
            TaskEvent::ItemAdded {
                id: "i1".into(),
                title: "fix login bug".into(),
            },
        )
        .unwrap();

    runtime.begin_turn("s1");
    let plan = runtime.plan_injection("s1", "fix bug", None, Some("leaf-a"));
    assert!(plan.accepted);
    assert!(plan.text.contains("fix login bug"));
    runtime.commit_injection("s1", plan.final_tokens, Some("leaf-a"));

    runtime.begin_turn("s1");
    let replan = runtime.plan_injection("s1", "fix bug", None, Some("leaf-a"));
    assert!(!replan.accepted);
    assert_eq!(replan.dropped_reason, Some("duplicate_content"));

    runtime
        .mark_compacted(
            "s1",
            bv_contextpack::CompactionNote {
                from_tokens: 1500,
                to_tokens: 500,
                ..Default::default()
            },
        )
        .unwrap();
    runtime.begin_turn("s1");
    let after = runtime.plan_injection("s1", "fix bug", None, Some("leaf-a"));
    assert!(after.accepted);
    assert!(after.text.contains("fix login bug"));
}

#[test]
fn turn_index_survives_restart() {
    let tmp = tempfile::tempdir().unwrap();
    {
        let runtime = Runtime::new(tmp.path(), Config::default()).unwrap();
        assert_eq!(runtime.begin_turn("s1"), 1);
        assert_eq!(runtime.begin_turn("s1"), 2);
        runtime.end_turn("s1");
    }
    {
        let runtime = Runtime::new(tmp.path(), Config::default()).unwrap();
        assert_eq!(runtime.begin_turn("s1"), 3);
    }
}
