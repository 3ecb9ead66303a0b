//! Deployment orchestrator — owns deployment records around a strategy run.
//!
//! `deploy` creates the deployment record, runs the strategy executor,
//! and records the outcome (status, slots, timings) plus the lifecycle
//! events. The phase of every deployment stays observable through
//! [`DeploymentOrchestrator::phase`].

use std::sync::Arc;

use tokio::time::Instant;
use tracing::{error, info};

use slipway_core::*;
use slipway_runtime::ContainerRuntime;
use slipway_state::{EventBus, StateStore};

use crate::context::{GraceTasks, RolloutContext, RolloutOutcome};
use crate::phase::{DeploymentPhase, PhaseBoard};
use crate::strategy::executor_for;

/// A finished, successful deployment.
#[derive(Debug, Clone)]
pub struct DeployResult {
    pub deployment: Deployment,
    pub outcome: RolloutOutcome,
}

#[derive(Clone)]
pub struct DeploymentOrchestrator {
    runtime: Arc<dyn ContainerRuntime>,
    state: StateStore,
    events: EventBus,
    settings: OrchestratorSettings,
    phases: PhaseBoard,
    grace: GraceTasks,
}

impl DeploymentOrchestrator {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        state: StateStore,
        events: EventBus,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            runtime,
            state,
            events,
            settings,
            phases: PhaseBoard::new(),
            grace: GraceTasks::default(),
        }
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    /// A strategy input with this orchestrator's timing defaults.
    pub fn config_for(
        &self,
        deployment_id: &str,
        application: &str,
        environment: &str,
        image: &str,
        strategy: Strategy,
    ) -> DeploymentConfig {
        let s = &self.settings;
        DeploymentConfig {
            strategy,
            health_check: HealthCheck::at(&s.health_check_path),
            rollback_threshold: s.rollback_threshold,
            test_duration_secs: s.test_duration_secs,
            health_check_interval_secs: s.health_check_interval_secs,
            warmup_secs: s.warmup_secs,
            ..DeploymentConfig::new(deployment_id, application, environment, image)
        }
    }

    pub fn phase(&self, deployment_id: &str) -> Option<DeploymentPhase> {
        self.phases.get(deployment_id)
    }

    /// Image the pair runs right now, if known.
    fn current_image(&self, config: &DeploymentConfig) -> SlipwayResult<Option<String>> {
        let app = config.application.as_str();
        let env = config.environment.as_str();
        if let Some(image) = self
            .state
            .slots(app, env)?
            .into_iter()
            .find(|s| s.is_active)
            .and_then(|s| s.image)
        {
            return Ok(Some(image));
        }
        Ok(self
            .state
            .latest_successful_deployment(app, env)?
            .map(|d| d.image))
    }

    /// Roll `config.image` out with `config.strategy`.
    ///
    /// The deployment record exists (status `in_progress`) before the
    /// runtime is touched and is updated whatever the outcome.
    pub async fn deploy(
        &self,
        config: &DeploymentConfig,
        traffic: TrafficLevel,
        signal: AbortSignal,
    ) -> SlipwayResult<DeployResult> {
        let id = config.deployment_id.as_str();
        let now = epoch_millis();
        let deployment = Deployment {
            id: id.to_string(),
            application: config.application.clone(),
            environment: config.environment.clone(),
            strategy: config.strategy,
            image: config.image.clone(),
            previous_image: self.current_image(config)?,
            active_slot: None,
            previous_slot: None,
            replicas: config.replicas,
            traffic,
            status: DeploymentStatus::InProgress,
            metrics: DeploymentMetrics::default(),
            security_scan: None,
            health_check: config.health_check.clone(),
            created_at: now,
            updated_at: now,
        };
        self.state.put_deployment(&deployment)?;
        self.phases.set(id, DeploymentPhase::Idle);
        self.events.publish(Event::DeploymentStarted {
            deployment_id: id.to_string(),
            application: config.application.clone(),
            environment: config.environment.clone(),
            strategy: config.strategy,
        });

        let executor = executor_for(config.strategy);
        info!(
            deployment_id = %id,
            strategy = executor.name(),
            application = %config.application,
            environment = %config.environment,
            image = %config.image,
            "deployment started"
        );

        let ctx = RolloutContext {
            runtime: self.runtime.clone(),
            state: self.state.clone(),
            settings: self.settings.clone(),
            signal,
            phases: self.phases.clone(),
            grace: self.grace.clone(),
        };
        let started = Instant::now();
        let result = executor.execute(config, &ctx).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(outcome) => {
                let deployment = self.state.update_deployment(id, |d| {
                    d.status = DeploymentStatus::Success;
                    d.active_slot = outcome.active_slot;
                    d.previous_slot = outcome.previous_slot;
                    d.metrics.deployment_time_ms = elapsed_ms;
                    d.metrics.health_check_time_ms = outcome.health_check_time_ms;
                })?;
                self.phases.set(id, DeploymentPhase::Succeeded);
                self.events.publish(Event::DeploymentCompleted {
                    deployment_id: id.to_string(),
                });
                info!(deployment_id = %id, elapsed_ms, "deployment succeeded");
                Ok(DeployResult {
                    deployment,
                    outcome,
                })
            }
            Err(err) => {
                let stage = err.stage().to_string();
                if let Err(e) = self.state.update_deployment(id, |d| {
                    d.status = DeploymentStatus::Failed;
                    d.metrics.deployment_time_ms = elapsed_ms;
                }) {
                    error!(deployment_id = %id, error = %e, "failed to record deployment failure");
                }
                if self.phases.get(id) != Some(DeploymentPhase::RolledBack) {
                    self.phases.set(id, DeploymentPhase::Failed { stage: stage.clone() });
                }
                self.events.publish(Event::DeploymentFailed {
                    deployment_id: id.to_string(),
                    stage: stage.clone(),
                    cause: err.to_string(),
                });
                error!(deployment_id = %id, %stage, error = %err, "deployment failed");
                Err(err)
            }
        }
    }

    /// Delayed scale-downs still pending.
    pub fn pending_scale_downs(&self) -> usize {
        self.grace.pending()
    }

    /// Drop the pending scale-down of `instance`, if one is waiting.
    pub fn cancel_scale_down(&self, instance: &str, environment: &str) -> bool {
        self.grace.cancel(instance, environment)
    }

    /// Cancel background work (pending scale-downs).
    pub fn shutdown(&self) {
        let cancelled = self.grace.cancel_all();
        info!(cancelled, "orchestrator shut down");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use slipway_runtime::{InMemoryRuntime, RuntimeMetrics};

    fn setup() -> (Arc<InMemoryRuntime>, StateStore, EventBus, DeploymentOrchestrator) {
        let runtime = Arc::new(InMemoryRuntime::new());
        let state = StateStore::new();
        let events = EventBus::new();
        let orchestrator = DeploymentOrchestrator::new(
            runtime.clone(),
            state.clone(),
            events.clone(),
            OrchestratorSettings::default(),
        );
        (runtime, state, events, orchestrator)
    }

    #[tokio::test(start_paused = true)]
    async fn billing_blue_green_deploy_succeeds() {
        let (runtime, state, events, orchestrator) = setup();
        let mut rx = events.subscribe();
        let config = orchestrator.config_for(
            "d-1",
            "billing",
            "production",
            "billing:v2",
            Strategy::BlueGreen,
        );

        let result = orchestrator
            .deploy(&config, TrafficLevel::High, AbortSignal::never())
            .await
            .unwrap();

        assert_eq!(result.deployment.status, DeploymentStatus::Success);
        assert_eq!(result.deployment.active_slot, Some(Slot::Blue));
        assert_eq!(orchestrator.phase("d-1"), Some(DeploymentPhase::Succeeded));
        assert_eq!(runtime.active_slot("billing", "production"), Some(Slot::Blue));

        let slots = state.slots("billing", "production").unwrap();
        assert_eq!(slots.iter().filter(|s| s.is_active).count(), 1);
        assert_eq!(slots[0].traffic.percentage, 100);

        assert_eq!(rx.recv().await.unwrap().name(), "deployment_started");
        assert_eq!(rx.recv().await.unwrap().name(), "deployment_completed");
    }

    #[tokio::test(start_paused = true)]
    async fn second_deploy_records_previous_version() {
        let (_runtime, state, _events, orchestrator) = setup();
        let first = orchestrator.config_for("d-1", "billing", "production", "billing:v1", Strategy::BlueGreen);
        orchestrator
            .deploy(&first, TrafficLevel::Medium, AbortSignal::never())
            .await
            .unwrap();
        let second = orchestrator.config_for("d-2", "billing", "production", "billing:v2", Strategy::BlueGreen);
        let result = orchestrator
            .deploy(&second, TrafficLevel::Medium, AbortSignal::never())
            .await
            .unwrap();

        assert_eq!(result.deployment.previous_image.as_deref(), Some("billing:v1"));
        assert_eq!(result.deployment.previous_slot, Some(Slot::Blue));
        assert_eq!(result.deployment.active_slot, Some(Slot::Green));
        assert_eq!(orchestrator.pending_scale_downs(), 1);

        orchestrator.shutdown();
        assert_eq!(orchestrator.pending_scale_downs(), 0);
        let stored = state.get_deployment("d-2").unwrap().unwrap();
        assert_eq!(stored.status, DeploymentStatus::Success);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_deploy_is_recorded_with_stage() {
        let (runtime, state, events, orchestrator) = setup();
        let mut rx = events.subscribe();
        runtime.script_metrics(
            "billing-blue",
            "production",
            vec![RuntimeMetrics::with_error_rate(0.5); 12],
        );
        let config = orchestrator.config_for("d-1", "billing", "production", "billing:v2", Strategy::BlueGreen);

        let err = orchestrator
            .deploy(&config, TrafficLevel::Medium, AbortSignal::never())
            .await
            .unwrap_err();
        assert!(matches!(err, SlipwayError::HealthCheckFailure { passed: 0, total: 12 }));

        let stored = state.get_deployment("d-1").unwrap().unwrap();
        assert_eq!(stored.status, DeploymentStatus::Failed);
        assert_eq!(
            orchestrator.phase("d-1"),
            Some(DeploymentPhase::Failed {
                stage: "health_verification".into()
            })
        );

        assert_eq!(rx.recv().await.unwrap().name(), "deployment_started");
        match rx.recv().await.unwrap() {
            Event::DeploymentFailed { stage, .. } => assert_eq!(stage, "health_verification"),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn config_uses_orchestrator_timings() {
        let runtime = Arc::new(InMemoryRuntime::new());
        let settings = OrchestratorSettings {
            warmup_secs: 5,
            test_duration_secs: 30,
            health_check_path: "/ready".into(),
            ..OrchestratorSettings::default()
        };
        let orchestrator =
            DeploymentOrchestrator::new(runtime, StateStore::new(), EventBus::new(), settings);
        let config = orchestrator.config_for("d-1", "api", "staging", "api:v3", Strategy::Rolling);

        assert_eq!(config.warmup_secs, 5);
        assert_eq!(config.sample_count(), 3);
        assert_eq!(config.health_check.path, "/ready");
        assert_eq!(config.strategy, Strategy::Rolling);

        let started = Instant::now();
        orchestrator
            .deploy(&config, TrafficLevel::Low, AbortSignal::never())
            .await
            .unwrap();
        assert!(started.elapsed() < Duration::from_secs(60));
    }
}
