//! End-to-end sessions: order files run against the in-memory runtime.

use std::sync::Arc;

use slipway_core::{ReportStatus, Slot, SlipwayConfig};
use slipway_runtime::{InMemoryRuntime, RuntimeCall};
use slipwayd::{load_config, run_orders, OrderFile};

async fn run(content: &str) -> (Arc<InMemoryRuntime>, slipwayd::RunSummary) {
    let runtime = Arc::new(InMemoryRuntime::new());
    let file = OrderFile::parse(content).unwrap();
    let summary = run_orders(&SlipwayConfig::default(), file, runtime.clone())
        .await
        .unwrap();
    (runtime, summary)
}

#[tokio::test(start_paused = true)]
async fn billing_blue_green_release_and_rollback() {
    let (runtime, summary) = run(r#"[
        {"id": "o-1", "command": "deploy",
         "parameters": {"application": "billing", "environment": "production", "image": "billing:v1"}},
        {"id": "o-2", "command": "deploy",
         "parameters": {"application": "billing", "environment": "production", "image": "billing:v2"}},
        {"id": "o-3", "command": "rollback", "priority": "critical",
         "parameters": {"application": "billing", "environment": "production"},
         "context": {"reason": "checkout errors", "requested_by": "oncall"}}
    ]"#)
    .await;

    assert!(summary.all_succeeded(), "{summary:#?}");
    assert_eq!(summary.reports.len(), 3);

    let second = summary.report("o-2").unwrap();
    assert_eq!(second.details["active_slot"], "green");
    assert_eq!(second.details["previous_image"], "billing:v1");

    let rollback = summary.report("o-3").unwrap();
    assert_eq!(rollback.deployment_id, second.deployment_id);
    assert_eq!(runtime.active_slot("billing", "production"), Some(Slot::Blue));
    assert_eq!(
        runtime.image("billing-blue", "production").as_deref(),
        Some("billing:v1")
    );
}

#[tokio::test(start_paused = true)]
async fn blocked_image_fails_and_dependents_follow() {
    let (runtime, summary) = run(r#"{
        "scans": [{"image": "api:v9", "vulnerabilities": {"critical": 2}}],
        "orders": [
            {"id": "o-1", "command": "deploy",
             "parameters": {"application": "api", "environment": "staging", "image": "api:v9"}},
            {"id": "o-2", "command": "deploy",
             "parameters": {"application": "web", "environment": "staging", "image": "web:v1"},
             "context": {"dependencies": ["o-1"]}}
        ]
    }"#)
    .await;

    let first = summary.report("o-1").unwrap();
    assert_eq!(first.status, ReportStatus::Failed);
    assert_eq!(first.failure.as_ref().unwrap().kind, "security_gate");
    assert_eq!(first.compliance_score, 40);

    let second = summary.report("o-2").unwrap();
    assert_eq!(second.status, ReportStatus::Failed);
    assert_eq!(second.failure.as_ref().unwrap().stage, "dependencies");
    assert!(runtime.mutating_calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn invalid_orders_are_rejected_not_run() {
    let (runtime, summary) = run(r#"[
        {"id": "o-1", "command": "deploy",
         "parameters": {"application": "billing", "environment": "staging"}},
        {"id": "o-2", "command": "scale",
         "parameters": {"application": "billing", "environment": "staging", "replicas": 500}}
    ]"#)
    .await;

    assert!(summary.reports.is_empty());
    let kinds: Vec<_> = summary.rejected.iter().map(|r| r.kind.as_str()).collect();
    assert_eq!(kinds, vec!["validation_error", "resource_exhaustion_error"]);
    assert!(runtime.calls().is_empty());
    assert!(!summary.all_succeeded());
}

#[tokio::test(start_paused = true)]
async fn seeded_primary_scales_and_reports_status() {
    let (runtime, summary) = run(r#"{
        "instances": [{"name": "worker", "environment": "staging", "image": "worker:v4", "replicas": 2}],
        "orders": [
            {"id": "o-1", "command": "scale",
             "parameters": {"application": "worker", "environment": "staging", "replicas": 6}},
            {"id": "o-2", "command": "status",
             "parameters": {"application": "worker", "environment": "staging"},
             "context": {"dependencies": ["o-1"]}}
        ]
    }"#)
    .await;

    assert!(summary.all_succeeded(), "{summary:#?}");
    assert_eq!(runtime.replicas("worker", "staging"), Some(6));
    assert!(runtime
        .calls()
        .iter()
        .any(|c| matches!(c, RuntimeCall::Scale { name, .. } if name == "worker")));
    assert!(summary.report("o-2").unwrap().details["deployment"].is_null());
}

#[tokio::test(start_paused = true)]
async fn canary_release_reports_analyses() {
    let (runtime, summary) = run(r#"[
        {"id": "o-1", "command": "deploy",
         "parameters": {"application": "search", "environment": "staging",
                        "image": "search:v2", "strategy": "canary"}}
    ]"#)
    .await;

    assert!(summary.all_succeeded(), "{summary:#?}");
    let report = summary.report("o-1").unwrap();
    let analyses = report.details["canary_analyses"].as_array().unwrap();
    assert_eq!(analyses.len(), 5);
    assert_eq!(runtime.canary_weight("search", "staging"), 0);
    assert_eq!(
        runtime.image("search", "staging").as_deref(),
        Some("search:v2")
    );
}

#[test]
fn config_file_overrides_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("slipway.toml");
    std::fs::write(
        &path,
        "[scheduler]\nmax_concurrent_orders = 1\n\n[orchestrator]\nwarmup_secs = 5\n",
    )
    .unwrap();

    let config = load_config(Some(&path)).unwrap();
    assert_eq!(config.scheduler.max_concurrent_orders, 1);
    assert_eq!(config.orchestrator.warmup_secs, 5);
    assert_eq!(config.rollback, SlipwayConfig::default().rollback);

    assert_eq!(load_config(None).unwrap(), SlipwayConfig::default());
}

#[test]
fn invalid_config_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("slipway.toml");
    std::fs::write(&path, "[orchestrator]\ncanary_steps = [50, 10]\n").unwrap();
    assert!(load_config(Some(&path)).is_err());
    assert!(load_config(Some(&dir.path().join("missing.toml"))).is_err());
}
