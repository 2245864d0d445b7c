//! Verification gate end-to-end: a mutation call demands fresh
//! evidence, recorded check runs satisfy it, and failing checks are
//! mirrored as truth facts and task blockers.

use bv_domain::config::Config;
use bv_runtime::Runtime;

fn runtime(dir: &std::path::Path) -> Runtime {
    Runtime::new(dir, Config::default()).unwrap()
}

#[tokio::test]
async fn evidence_gate_after_write() {
    let tmp = tempfile::tempdir().unwrap();
    let runtime = runtime(tmp.path());

    runtime.begin_turn("s1");
    runtime.mark_call("s1", "edit");

    let report = runtime
        .evaluate_verification("s1", "standard", false)
        .await
        .unwrap();
    assert!(!report.passed);
    assert!(report
        .missing_evidence
        .contains(&"lsp_diagnostics".to_owned()));
    assert!(report
        .missing_evidence
        .contains(&"test_or_build".to_owned()));

    // The failing checks surface as blockers and truth facts.
    let task = runtime.task_state("s1");
    assert!(task.has_blocker("verifier:lsp_diagnostics"));
    assert!(task.has_blocker("verifier:test_or_build"));
    assert!(runtime.truth_digest("s1").contains("lsp_diagnostics"));

    // Fresh passing evidence flips the gate.
    runtime
        .record_check_run("s1", "lsp_diagnostics", true, "no diagnostics")
        .unwrap();
    runtime
        .record_check_run("s1", "test_or_build", true, "all tests passed")
        .unwrap();

    let report = runtime
        .evaluate_verification("s1", "standard", false)
        .await
        .unwrap();
    assert!(report.passed);
    assert!(report.missing_evidence.is_empty());

    let task = runtime.task_state("s1");
    assert!(!task.has_blocker("verifier:lsp_diagnostics"));
    assert!(!task.has_blocker("verifier:test_or_build"));
    assert!(runtime.truth_digest("s1").is_empty());
}

#[tokio::test]
async fn a_new_write_makes_evidence_stale_again() {
    let tmp = tempfile::tempdir().unwrap();
    let runtime = runtime(tmp.path());

    runtime.begin_turn("s1");
    runtime.mark_call("s1", "edit");
    runtime
        .record_check_run("s1", "lsp_diagnostics", true, "clean")
        .unwrap();
    runtime
        .record_check_run("s1", "test_or_build", true, "ok")
        .unwrap();
    assert!(runtime
        .evaluate_verification("s1", "standard", false)
        .await
        .unwrap()
        .passed);

    // Evidence timestamps now predate the new write.
    std::thread::sleep(std::time::Duration::from_millis(5));
    runtime.mark_call("s1", "write");
    let report = runtime
        .evaluate_verification("s1", "standard", false)
        .await
        .unwrap();
    assert!(!report.passed);
}
