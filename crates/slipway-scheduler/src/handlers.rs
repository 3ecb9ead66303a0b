//! Command handlers — what each order actually does.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tracing::{info, warn};

use slipway_core::*;
use slipway_metrics::MetricsEngine;
use slipway_rollback::{RollbackEngine, RollbackTrigger};
use slipway_rollout::DeploymentOrchestrator;
use slipway_runtime::{ContainerRuntime, SecurityScanner};
use slipway_state::{EventBus, StateStore};

/// The subsystems an order can drive, shared by every handler.
#[derive(Clone)]
pub struct Services {
    pub runtime: Arc<dyn ContainerRuntime>,
    pub scanner: Arc<dyn SecurityScanner>,
    pub state: StateStore,
    pub events: EventBus,
    pub orchestrator: DeploymentOrchestrator,
    pub rollback: RollbackEngine,
    pub metrics: MetricsEngine,
}

impl Services {
    /// Assemble every subsystem around one runtime, scanner, store and bus.
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        scanner: Arc<dyn SecurityScanner>,
        config: &SlipwayConfig,
    ) -> Self {
        let state = StateStore::new();
        let events = EventBus::new();
        Self {
            orchestrator: DeploymentOrchestrator::new(
                runtime.clone(),
                state.clone(),
                events.clone(),
                config.orchestrator.clone(),
            ),
            rollback: RollbackEngine::new(
                runtime.clone(),
                state.clone(),
                events.clone(),
                config.rollback.clone(),
            ),
            metrics: MetricsEngine::new(runtime.clone(), events.clone(), config.metrics.clone()),
            runtime,
            scanner,
            state,
            events,
        }
    }

    /// Stop background work owned by the subsystems.
    pub async fn shutdown(&self) {
        self.metrics.stop_all().await;
        self.rollback.clear_all_triggers().await;
        self.orchestrator.shutdown();
    }

    /// Run a non-abort order. Abort orders are handled by the scheduler,
    /// which owns the active-order registry.
    pub(crate) async fn handle(
        &self,
        order: &Order,
        report: &mut Report,
        signal: AbortSignal,
    ) -> SlipwayResult<()> {
        match order.command {
            Command::Deploy => self.deploy(order, report, signal).await,
            Command::Promote => self.promote(order, report, signal).await,
            Command::Rollback => self.rollback(order, report).await,
            Command::Scale => self.scale(order, report).await,
            Command::Status => self.status(order, report).await,
            Command::Abort => Err(SlipwayError::Validation(
                "abort orders are handled by the scheduler".into(),
            )),
        }
    }

    async fn deploy(&self, order: &Order, report: &mut Report, signal: AbortSignal) -> SlipwayResult<()> {
        let image = param(&order.parameters.image, "image")?;
        self.roll_out(order, image, order.parameters.strategy.unwrap_or_default(), report, signal)
            .await
    }

    async fn promote(&self, order: &Order, report: &mut Report, signal: AbortSignal) -> SlipwayResult<()> {
        let app = param(&order.parameters.application, "application")?;
        let source_env = param(&order.parameters.source_environment, "source_environment")?;
        let source = self
            .state
            .latest_successful_deployment(app, source_env)?
            .ok_or_else(|| {
                SlipwayError::NotFound(format!("no successful deployment of {app} in {source_env}"))
            })?;
        report.record(
            EventLevel::Info,
            "promote",
            format!("promoting {} from {source_env}", source.image),
        );
        let strategy = order.parameters.strategy.unwrap_or(source.strategy);
        self.roll_out(order, &source.image, strategy, report, signal).await
    }

    /// Security gate, strategy run, then monitoring and automatic triggers.
    async fn roll_out(
        &self,
        order: &Order,
        image: &str,
        strategy: Strategy,
        report: &mut Report,
        signal: AbortSignal,
    ) -> SlipwayResult<()> {
        let p = &order.parameters;
        let app = param(&p.application, "application")?;
        let env = param(&p.environment, "environment")?;

        let scan = self
            .scanner
            .scan_image(image)
            .await
            .map_err(|e| e.during("security_scan"))?;
        report.security_scan = Some(scan.clone());
        let level = order.constraints.compliance_level.unwrap_or(if is_production(env) {
            ComplianceLevel::Standard
        } else {
            ComplianceLevel::Basic
        });
        let violations = scan.violations(level);
        if !violations.is_empty() {
            return Err(SlipwayError::SecurityGate {
                image: image.to_string(),
                reasons: violations,
            });
        }
        report.record(EventLevel::Info, "security_scan", format!("{image} passed the {level:?} gate"));

        let deployment_id = format!("dep-{}", uuid::Uuid::new_v4());
        report.deployment_id = Some(deployment_id.clone());
        let mut config = self
            .orchestrator
            .config_for(&deployment_id, app, env, image, strategy);
        if let Some(replicas) = p.replicas {
            config.replicas = replicas;
        }
        if let Some(path) = &p.health_check_path {
            config.health_check = HealthCheck::at(path);
        }
        if let Some(threshold) = p.rollback_threshold {
            config.rollback_threshold = threshold;
        }

        report.record(
            EventLevel::Info,
            "deploy",
            format!("{strategy} rollout of {image} to {app}/{env}"),
        );
        let result = self
            .orchestrator
            .deploy(&config, p.traffic.unwrap_or_default(), signal)
            .await?;

        let deployment = self.state.update_deployment(&deployment_id, |d| {
            d.security_scan = Some(scan);
        })?;
        if result.outcome.health_check_time_ms > 300_000 {
            report.record(
                EventLevel::Warning,
                "health_verification",
                format!(
                    "health verification took {}s",
                    result.outcome.health_check_time_ms / 1000
                ),
            );
        }

        self.retire_earlier(&deployment_id).await?;
        self.metrics
            .start_monitoring(&deployment_id, &deployment.live_instance(), env)
            .await;
        self.rollback
            .setup_automatic_rollback_triggers(
                &deployment_id,
                p.auto_rollback.clone().unwrap_or_default(),
            )
            .await;

        report.details = json!({
            "deployment_id": deployment_id,
            "strategy": strategy,
            "image": image,
            "active_slot": result.outcome.active_slot,
            "previous_slot": result.outcome.previous_slot,
            "previous_image": deployment.previous_image,
            "deployment_time_ms": deployment.metrics.deployment_time_ms,
            "health_check_time_ms": result.outcome.health_check_time_ms,
            "canary_analyses": result.outcome.canary_analyses,
        });
        info!(order_id = %order.id, %deployment_id, %image, "rollout finished");
        Ok(())
    }

    /// Stop watching deployments the new release of the pair replaced.
    async fn retire_earlier(&self, deployment_id: &str) -> SlipwayResult<()> {
        for earlier in self.state.earlier_deployments(deployment_id)? {
            let had_triggers = self.rollback.clear_automatic_triggers(&earlier.id).await;
            self.metrics.stop_monitoring(&earlier.id).await;
            if had_triggers {
                info!(deployment_id = %earlier.id, superseded_by = %deployment_id, "monitoring retired");
            }
        }
        Ok(())
    }

    fn target_deployment(&self, order: &Order) -> SlipwayResult<Deployment> {
        let p = &order.parameters;
        if let Some(id) = &p.deployment_id {
            return self
                .state
                .get_deployment(id)?
                .ok_or_else(|| SlipwayError::NotFound(format!("deployment {id}")));
        }
        let app = param(&p.application, "application")?;
        let env = param(&p.environment, "environment")?;
        self.state
            .latest_deployment(app, env)?
            .ok_or_else(|| SlipwayError::NotFound(format!("no deployment of {app} in {env}")))
    }

    async fn rollback(&self, order: &Order, report: &mut Report) -> SlipwayResult<()> {
        let deployment = self.target_deployment(order)?;
        report.deployment_id = Some(deployment.id.clone());
        let reason = order
            .context
            .reason
            .as_deref()
            .unwrap_or("manual rollback order");
        let by = order.context.requested_by.as_deref().unwrap_or("scheduler");
        let trigger = RollbackTrigger::manual(reason, by);
        report.record(
            EventLevel::Warning,
            "rollback",
            format!("rolling {} back: {reason}", deployment.id),
        );

        let restore = deployment.previous_target().instance_name(&deployment.application);
        if self
            .orchestrator
            .cancel_scale_down(&restore, &deployment.environment)
        {
            info!(%restore, "pending scale-down of the rollback target cancelled");
        }

        let history = match order.constraints.max_rollback_time_secs {
            Some(limit) => {
                self.rollback
                    .execute_rollback_within(&deployment.id, trigger, Duration::from_secs(limit))
                    .await?
            }
            None => self.rollback.execute_rollback(&deployment.id, trigger).await?,
        };

        self.rollback.clear_automatic_triggers(&deployment.id).await;
        self.metrics.stop_monitoring(&deployment.id).await;
        report.details = serde_json::to_value(&history).unwrap_or_default();
        Ok(())
    }

    async fn scale(&self, order: &Order, report: &mut Report) -> SlipwayResult<()> {
        let p = &order.parameters;
        let app = param(&p.application, "application")?;
        let env = param(&p.environment, "environment")?;
        let replicas = p
            .replicas
            .ok_or_else(|| SlipwayError::Validation("scale order requires replicas".into()))?;

        let deployment = match &p.deployment_id {
            Some(_) => Some(self.target_deployment(order)?),
            None => self.state.latest_successful_deployment(app, env)?,
        };
        let instance = match &deployment {
            Some(d) => d.live_instance(),
            None => DeployTarget::Primary.instance_name(app),
        };

        let result = self
            .runtime
            .scale(&instance, env, replicas)
            .await
            .map_err(|e| e.during("scale"))?;
        if let Some(d) = &deployment {
            report.deployment_id = Some(d.id.clone());
            self.state.update_deployment(&d.id, |d| d.replicas = replicas)?;
        }
        if replicas == 0 {
            warn!(order_id = %order.id, %instance, "scaled to zero");
            report.record(EventLevel::Warning, "scale", format!("{instance} scaled to zero"));
        } else {
            report.record(
                EventLevel::Info,
                "scale",
                format!("{instance} scaled {} → {replicas}", result.previous_replicas),
            );
        }
        report.details = serde_json::to_value(&result).unwrap_or_default();
        Ok(())
    }

    async fn status(&self, order: &Order, report: &mut Report) -> SlipwayResult<()> {
        let p = &order.parameters;
        let app = param(&p.application, "application")?;

        let deployment = match (&p.deployment_id, p.environment.as_deref()) {
            (Some(_), _) => Some(self.target_deployment(order)?),
            (None, Some(env)) => self.state.latest_deployment(app, env)?,
            (None, None) => self
                .state
                .list_deployments()?
                .into_iter()
                .rev()
                .find(|d| d.application == app),
        };
        let Some(deployment) = deployment else {
            report.record(EventLevel::Info, "status", format!("no deployments of {app}"));
            report.details = json!({ "application": app, "deployment": null });
            return Ok(());
        };

        report.deployment_id = Some(deployment.id.clone());
        let id = deployment.id.as_str();
        let slots = self.state.slots(app, &deployment.environment)?;
        report.details = json!({
            "application": app,
            "deployment": deployment,
            "phase": self.orchestrator.phase(id),
            "slots": slots,
            "latest_snapshot": self.metrics.latest_snapshot(id).await,
            "alerts": self.metrics.alert_history(id).await,
            "rollbacks": self.rollback.history(id).await,
            "automatic_triggers": self.rollback.has_automatic_triggers(id).await,
            "monitoring": self.metrics.is_monitoring(id).await,
        });
        Ok(())
    }
}

fn param<'a>(value: &'a Option<String>, field: &str) -> SlipwayResult<&'a str> {
    value
        .as_deref()
        .ok_or_else(|| SlipwayError::Validation(format!("missing parameters.{field}")))
}
