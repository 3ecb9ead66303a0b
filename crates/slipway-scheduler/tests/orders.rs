//! Order scheduler behaviour against the in-memory runtime.

use std::sync::Arc;
use std::time::Duration;

use slipway_core::event::Severity;
use slipway_core::*;
use slipway_rollback::{RollbackStatus, RollbackTrigger};
use slipway_runtime::{InMemoryRuntime, RuntimeCall, RuntimeMetrics, StaticScanner};
use slipway_scheduler::{CancelOutcome, EventBridge, OrderScheduler, OrderState, Services};

fn scheduler_with(
    runtime: Arc<InMemoryRuntime>,
    scanner: StaticScanner,
    settings: SchedulerSettings,
) -> OrderScheduler {
    let services = Services::new(runtime, Arc::new(scanner), &SlipwayConfig::default());
    OrderScheduler::new(services, settings)
}

fn scheduler() -> (Arc<InMemoryRuntime>, OrderScheduler) {
    let runtime = Arc::new(InMemoryRuntime::new());
    let scheduler = scheduler_with(
        runtime.clone(),
        StaticScanner::new(),
        SchedulerSettings::default(),
    );
    (runtime, scheduler)
}

fn single_lane() -> (Arc<InMemoryRuntime>, OrderScheduler) {
    let runtime = Arc::new(InMemoryRuntime::new());
    let settings = SchedulerSettings {
        max_concurrent_orders: 1,
        ..SchedulerSettings::default()
    };
    let scheduler = scheduler_with(runtime.clone(), StaticScanner::new(), settings);
    (runtime, scheduler)
}

async fn run(scheduler: &OrderScheduler, order: Order) -> Report {
    let id = order.id.clone();
    scheduler.receive_order(order).unwrap();
    scheduler.wait_for_report(&id).await.unwrap()
}

#[tokio::test(start_paused = true)]
async fn missing_parameters_never_reach_runtime() {
    let (runtime, scheduler) = scheduler();
    let mut order = Order::deploy("o-1", "billing", "production", "billing:v2");
    order.parameters.application = None;

    let err = scheduler.receive_order(order).unwrap_err();
    assert!(matches!(err, SlipwayError::Validation(_)));
    assert!(runtime.calls().is_empty());
    assert!(matches!(
        scheduler.get_order_status("o-1"),
        Err(SlipwayError::NotFound(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn billing_blue_green_deploy_succeeds() {
    let (runtime, scheduler) = scheduler();
    let report = run(
        &scheduler,
        Order::deploy("o-1", "billing", "production", "billing:v2"),
    )
    .await;

    assert_eq!(report.status, ReportStatus::Success);
    assert_eq!(report.quality_score, 100);
    assert_eq!(report.compliance_score, 100);
    assert!(report.deployment_id.is_some());
    assert_eq!(runtime.active_slot("billing", "production"), Some(Slot::Blue));

    let slots = scheduler
        .services()
        .state
        .slots("billing", "production")
        .unwrap();
    let active: Vec<_> = slots.iter().filter(|s| s.is_active).collect();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].slot, Slot::Blue);
    assert_eq!(active[0].traffic.percentage, 100);

    let first = scheduler.get_order_status("o-1").unwrap();
    let second = scheduler.get_order_status("o-1").unwrap();
    assert_eq!(first, second);
    assert!(matches!(first, OrderState::Finished(_)));
}

#[tokio::test(start_paused = true)]
async fn blocked_image_fails_security_gate() {
    let runtime = Arc::new(InMemoryRuntime::new());
    let scanner = StaticScanner::new().with_result(
        "billing:v2",
        SecurityScan {
            image: "billing:v2".into(),
            vulnerabilities: VulnerabilityCounts {
                critical: 1,
                ..Default::default()
            },
            ..Default::default()
        },
    );
    let scheduler = scheduler_with(runtime.clone(), scanner, SchedulerSettings::default());

    let report = run(
        &scheduler,
        Order::deploy("o-1", "billing", "production", "billing:v2"),
    )
    .await;
    assert_eq!(report.status, ReportStatus::Failed);
    assert_eq!(report.failure.as_ref().unwrap().kind, "security_gate");
    assert_eq!(report.compliance_score, 70);
    assert!(runtime.mutating_calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn at_most_three_orders_process_at_once() {
    let (_runtime, scheduler) = scheduler();
    for (i, app) in ["a", "b", "c", "d"].iter().enumerate() {
        scheduler
            .receive_order(Order::deploy(
                format!("o-{i}"),
                app,
                "staging",
                &format!("{app}:v1"),
            ))
            .unwrap();
    }

    let snapshot = scheduler.queue_snapshot();
    assert_eq!(snapshot.processing.len(), 3);
    assert_eq!(snapshot.queued.len(), 1);
    assert_eq!(snapshot.queued[0].order.id, "o-3");
    assert!(snapshot.queued[0].estimated_start >= snapshot.queued[0].queued_at);

    for i in 0..4 {
        let report = scheduler.wait_for_report(&format!("o-{i}")).await.unwrap();
        assert_eq!(report.status, ReportStatus::Success);
    }
    let snapshot = scheduler.queue_snapshot();
    assert!(snapshot.processing.is_empty() && snapshot.queued.is_empty());
}

#[tokio::test(start_paused = true)]
async fn critical_order_supersedes_queued_one() {
    let (_runtime, scheduler) = single_lane();
    scheduler
        .receive_order(Order::deploy("o-1", "api", "staging", "api:v1"))
        .unwrap();
    scheduler
        .receive_order(Order::deploy("o-2", "billing", "staging", "billing:v2"))
        .unwrap();

    // Non-critical orders on a queued pair are rejected.
    let err = scheduler
        .receive_order(Order::deploy("o-3", "billing", "staging", "billing:v3"))
        .unwrap_err();
    assert!(matches!(err, SlipwayError::Conflict(_)));

    scheduler
        .receive_order(
            Order::rollback("o-4", "billing", "staging").with_priority(Priority::Critical),
        )
        .unwrap();
    match scheduler.get_order_status("o-2").unwrap() {
        OrderState::Finished(report) => assert_eq!(report.status, ReportStatus::Cancelled),
        other => panic!("expected cancelled report, got {other:?}"),
    }

    // Active orders are never superseded.
    let err = scheduler
        .receive_order(Order::rollback("o-5", "api", "staging").with_priority(Priority::Critical))
        .unwrap_err();
    assert!(matches!(err, SlipwayError::Conflict(_)));

    // Nothing was ever deployed for billing, so the rollback has no target.
    let report = scheduler.wait_for_report("o-4").await.unwrap();
    assert_eq!(report.status, ReportStatus::Failed);
    assert_eq!(report.failure.unwrap().kind, "not_found");
}

#[tokio::test(start_paused = true)]
async fn dependent_order_waits_for_dependency() {
    let (_runtime, scheduler) = scheduler();
    let mut events = scheduler.services().events.subscribe();

    scheduler
        .receive_order(Order::deploy("o-1", "api", "staging", "api:v1"))
        .unwrap();
    scheduler
        .receive_order(
            Order::deploy("o-2", "billing", "staging", "billing:v1").with_dependencies(&["o-1"]),
        )
        .unwrap();
    let snapshot = scheduler.queue_snapshot();
    assert_eq!(snapshot.processing, vec!["o-1".to_string()]);
    assert_eq!(snapshot.queued.len(), 1);

    let report = scheduler.wait_for_report("o-2").await.unwrap();
    assert_eq!(report.status, ReportStatus::Success);

    let mut order = Vec::new();
    while let Ok(event) = events.try_recv() {
        match event {
            Event::OrderCompleted { order_id, .. } => order.push(format!("done:{order_id}")),
            Event::OrderStarted { order_id } => order.push(format!("start:{order_id}")),
            _ => {}
        }
    }
    let done_1 = order.iter().position(|e| e == "done:o-1").unwrap();
    let start_2 = order.iter().position(|e| e == "start:o-2").unwrap();
    assert!(done_1 < start_2);
}

#[tokio::test(start_paused = true)]
async fn failed_dependency_fails_dependent() {
    let runtime = Arc::new(InMemoryRuntime::new());
    let scanner = StaticScanner::new().with_result(
        "api:v1",
        SecurityScan {
            image: "api:v1".into(),
            secrets: SecretsScan {
                exposed: true,
                findings: vec!["token in env".into()],
            },
            ..Default::default()
        },
    );
    let scheduler = scheduler_with(runtime.clone(), scanner, SchedulerSettings::default());

    scheduler
        .receive_order(Order::deploy("o-1", "api", "staging", "api:v1"))
        .unwrap();
    scheduler
        .receive_order(
            Order::deploy("o-2", "billing", "staging", "billing:v1").with_dependencies(&["o-1"]),
        )
        .unwrap();

    let report = scheduler.wait_for_report("o-2").await.unwrap();
    assert_eq!(report.status, ReportStatus::Failed);
    assert_eq!(report.failure.unwrap().stage, "dependencies");
    assert!(!runtime
        .calls()
        .iter()
        .any(|c| matches!(c, RuntimeCall::Deploy { name, .. } if name.starts_with("billing"))));
}

#[tokio::test(start_paused = true)]
async fn unknown_dependency_is_rejected() {
    let (_runtime, scheduler) = scheduler();
    let err = scheduler
        .receive_order(
            Order::deploy("o-1", "billing", "staging", "billing:v1").with_dependencies(&["nope"]),
        )
        .unwrap_err();
    assert!(matches!(err, SlipwayError::Validation(_)));
}

#[tokio::test(start_paused = true)]
async fn cancelling_queued_order_is_immediate() {
    let (_runtime, scheduler) = single_lane();
    scheduler
        .receive_order(Order::deploy("o-1", "api", "staging", "api:v1"))
        .unwrap();
    scheduler
        .receive_order(Order::deploy("o-2", "billing", "staging", "billing:v1"))
        .unwrap();

    match scheduler.cancel_order("o-2", "not needed").await.unwrap() {
        CancelOutcome::Dequeued(report) => assert_eq!(report.status, ReportStatus::Cancelled),
        other => panic!("expected dequeue, got {other:?}"),
    }
    assert!(matches!(
        scheduler.get_order_status("o-2").unwrap(),
        OrderState::Finished(ref r) if r.status == ReportStatus::Cancelled
    ));
    assert!(scheduler.queue_snapshot().queued.is_empty());
}

#[tokio::test(start_paused = true)]
async fn cancelling_active_order_aborts_it() {
    let (runtime, scheduler) = scheduler();
    scheduler
        .receive_order(Order::deploy("o-1", "billing", "staging", "billing:v2"))
        .unwrap();
    // Into the warmup pause.
    tokio::time::sleep(Duration::from_secs(5)).await;

    match scheduler.cancel_order("o-1", "operator stop").await.unwrap() {
        CancelOutcome::AbortRequested(report) => {
            assert_eq!(report.status, ReportStatus::Success);
            assert_eq!(report.command, Command::Abort);
        }
        other => panic!("expected abort, got {other:?}"),
    }

    let report = scheduler.wait_for_report("o-1").await.unwrap();
    assert_eq!(report.status, ReportStatus::Failed);
    assert_eq!(report.failure.unwrap().kind, "aborted");
    assert_eq!(runtime.active_slot("billing", "staging"), None);

    assert!(matches!(
        scheduler.cancel_order("o-1", "again").await,
        Err(SlipwayError::NotFound(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn rollback_order_restores_previous_version() {
    let (runtime, scheduler) = scheduler();
    run(&scheduler, Order::deploy("o-1", "billing", "staging", "billing:v1")).await;
    let second = run(&scheduler, Order::deploy("o-2", "billing", "staging", "billing:v2")).await;
    assert_eq!(runtime.active_slot("billing", "staging"), Some(Slot::Green));

    let report = run(&scheduler, Order::rollback("o-3", "billing", "staging")).await;
    assert_eq!(report.status, ReportStatus::Success, "{:?}", report.failure);
    assert_eq!(report.deployment_id, second.deployment_id);
    assert_eq!(report.details["status"], "completed");

    assert_eq!(runtime.active_slot("billing", "staging"), Some(Slot::Blue));
    assert_eq!(
        runtime.image("billing-blue", "staging").as_deref(),
        Some("billing:v1")
    );
    let id = second.deployment_id.unwrap();
    let deployment = scheduler
        .services()
        .state
        .get_deployment(&id)
        .unwrap()
        .unwrap();
    assert_eq!(deployment.status, DeploymentStatus::RolledBack);
    assert!(!scheduler.services().rollback.has_automatic_triggers(&id).await);
}

#[tokio::test(start_paused = true)]
async fn scale_and_status_orders() {
    let (runtime, scheduler) = scheduler();
    let deployed = run(&scheduler, Order::deploy("o-1", "billing", "staging", "billing:v1")).await;

    let mut scale = Order::new("o-2", Command::Scale);
    scale.parameters.application = Some("billing".into());
    scale.parameters.environment = Some("staging".into());
    scale.parameters.replicas = Some(5);
    let report = run(&scheduler, scale).await;
    assert_eq!(report.status, ReportStatus::Success);
    assert_eq!(report.details["previous_replicas"], 2);
    assert_eq!(runtime.replicas("billing-blue", "staging"), Some(5));

    let mut status = Order::new("o-3", Command::Status);
    status.parameters.application = Some("billing".into());
    status.parameters.environment = Some("staging".into());
    let report = run(&scheduler, status).await;
    assert_eq!(report.status, ReportStatus::Success);
    assert_eq!(
        report.details["deployment"]["id"],
        deployed.deployment_id.unwrap().as_str()
    );
    assert_eq!(report.details["deployment"]["replicas"], 5);
    assert_eq!(report.details["automatic_triggers"], true);
}

#[tokio::test(start_paused = true)]
async fn promote_deploys_source_image() {
    let (runtime, scheduler) = scheduler();
    run(&scheduler, Order::deploy("o-1", "billing", "staging", "billing:v3")).await;

    let mut promote = Order::new("o-2", Command::Promote);
    promote.parameters.application = Some("billing".into());
    promote.parameters.source_environment = Some("staging".into());
    promote.parameters.environment = Some("production".into());
    let report = run(&scheduler, promote).await;

    assert_eq!(report.status, ReportStatus::Success);
    assert_eq!(
        runtime.image("billing-blue", "production").as_deref(),
        Some("billing:v3")
    );
}

#[tokio::test(start_paused = true)]
async fn rollback_request_event_becomes_order() {
    let (_runtime, scheduler) = scheduler();
    let bridge = EventBridge::spawn(scheduler.clone());
    let mut events = scheduler.services().events.subscribe();

    run(&scheduler, Order::deploy("o-1", "billing", "staging", "billing:v1")).await;
    let second = run(&scheduler, Order::deploy("o-2", "billing", "staging", "billing:v2")).await;
    let id = second.deployment_id.unwrap();

    scheduler.services().events.publish(Event::RollbackRequested {
        deployment_id: id.clone(),
        reason: "high error rate".into(),
        severity: Severity::Critical,
    });

    loop {
        match events.recv().await {
            Some(Event::DeploymentRolledBack { deployment_id, .. }) if deployment_id == id => break,
            Some(_) => {}
            None => panic!("event bus closed"),
        }
    }
    let deployment = scheduler
        .services()
        .state
        .get_deployment(&id)
        .unwrap()
        .unwrap();
    assert_eq!(deployment.status, DeploymentStatus::RolledBack);
    bridge.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn replaced_release_never_rolls_back_the_live_one() {
    let (runtime, scheduler) = scheduler();
    let mut ids = Vec::new();
    for (n, image) in ["billing:v0", "billing:v1", "billing:v2"].into_iter().enumerate() {
        let report = run(
            &scheduler,
            Order::deploy(format!("o-{n}"), "billing", "staging", image),
        )
        .await;
        assert_eq!(report.status, ReportStatus::Success, "{:?}", report.failure);
        ids.push(report.deployment_id.unwrap());
    }
    assert_eq!(runtime.active_slot("billing", "staging"), Some(Slot::Blue));

    let services = scheduler.services();
    for earlier in &ids[..2] {
        assert!(!services.rollback.has_automatic_triggers(earlier).await);
        assert!(!services.metrics.is_monitoring(earlier).await);
    }
    assert!(services.rollback.has_automatic_triggers(&ids[2]).await);

    // v1 still runs in green until its scale-down; make it look broken.
    runtime.set_metrics("billing-green", "staging", RuntimeMetrics::with_error_rate(0.5));
    tokio::time::sleep(Duration::from_secs(400)).await;

    assert_eq!(runtime.active_slot("billing", "staging"), Some(Slot::Blue));
    assert_eq!(
        runtime.image("billing-blue", "staging").as_deref(),
        Some("billing:v2")
    );
    let replaced = services.state.get_deployment(&ids[1]).unwrap().unwrap();
    assert_eq!(replaced.status, DeploymentStatus::Success);
    assert!(services.rollback.history(&ids[1]).await.is_empty());

    // A direct request is refused as well.
    let err = services
        .rollback
        .execute_rollback(&ids[1], RollbackTrigger::manual("late", "ops"))
        .await
        .unwrap_err();
    assert!(matches!(err, SlipwayError::Conflict(_)));
}

#[tokio::test(start_paused = true)]
async fn expired_deadline_leaves_a_failed_deployment() {
    let (runtime, scheduler) = scheduler();
    run(&scheduler, Order::deploy("o-1", "billing", "staging", "billing:v1")).await;
    let mut events = scheduler.services().events.subscribe();

    let mut order = Order::deploy("o-2", "billing", "staging", "billing:v2");
    // Warmup is 30s and verification 120s: the deadline lands mid-verification.
    order.constraints.deadline = Some(epoch_millis() + 90_000);
    let report = run(&scheduler, order).await;

    assert_eq!(report.status, ReportStatus::Failed);
    let failure = report.failure.as_ref().unwrap();
    assert_eq!(failure.kind, "timeout_error");
    assert_eq!(failure.stage, "deadline");

    let id = report.deployment_id.unwrap();
    let deployment = scheduler
        .services()
        .state
        .get_deployment(&id)
        .unwrap()
        .unwrap();
    assert_eq!(deployment.status, DeploymentStatus::Failed);
    assert_eq!(runtime.active_slot("billing", "staging"), Some(Slot::Blue));
    assert!(!scheduler.services().rollback.has_automatic_triggers(&id).await);

    let mut failed = false;
    while let Ok(event) = events.try_recv() {
        if let Event::DeploymentFailed { deployment_id, .. } = event {
            failed |= deployment_id == id;
        }
    }
    assert!(failed);
}

#[tokio::test(start_paused = true)]
async fn rollback_time_limit_fails_history_and_escalates() {
    let (runtime, scheduler) = scheduler();
    run(&scheduler, Order::deploy("o-1", "billing", "staging", "billing:v1")).await;
    let second = run(&scheduler, Order::deploy("o-2", "billing", "staging", "billing:v2")).await;
    let id = second.deployment_id.unwrap();
    runtime.set_healthy("billing-blue", "staging", false);
    let mut events = scheduler.services().events.subscribe();

    let mut order = Order::rollback("o-3", "billing", "staging");
    order.constraints.max_rollback_time_secs = Some(10);
    let report = run(&scheduler, order).await;

    assert_eq!(report.status, ReportStatus::Failed);
    assert_eq!(report.failure.as_ref().unwrap().kind, "timeout_error");

    let history = scheduler.services().rollback.history(&id).await;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, RollbackStatus::Failed);
    assert!(history[0].error.as_deref().unwrap().contains("time limit"));
    assert!(!scheduler.services().rollback.is_rolling_back(&id));

    let mut escalated = false;
    while let Ok(event) = events.try_recv() {
        if let Event::RollbackEscalated { deployment_id, .. } = event {
            escalated |= deployment_id == id;
        }
    }
    assert!(escalated);
}
