//! Rolling and recreate updates of the primary instance.

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{debug, info};

use slipway_core::*;
use slipway_runtime::RuntimeError;

use crate::context::{RolloutContext, RolloutOutcome};
use crate::phase::{batch_count, DeploymentPhase};
use crate::strategy::StrategyExecutor;

/// Replace the primary's replicas `batch_size` at a time, gating each
/// batch on readiness and health.
pub struct RollingExecutor;

#[async_trait]
impl StrategyExecutor for RollingExecutor {
    async fn execute(
        &self,
        config: &DeploymentConfig,
        ctx: &RolloutContext,
    ) -> SlipwayResult<RolloutOutcome> {
        let id = config.deployment_id.as_str();
        let primary = DeployTarget::Primary.instance_name(&config.application);
        let batch_size = config.batch_size.max(1);
        let total = batch_count(config.replicas, batch_size);
        let started = Instant::now();

        ctx.enter(id, DeploymentPhase::DeployingInactiveSlot)?;
        info!(
            deployment_id = %id,
            batches = total,
            batch_size,
            image = %config.image,
            "rolling update starting"
        );

        for current in 1..=total {
            ctx.enter(id, DeploymentPhase::RollingBatch { current, total })?;
            let stage = format!("rolling_batch_{current}");

            // The runtime converges `replicas` instances onto the new image.
            let batch = DeploymentConfig {
                replicas: (current * batch_size).min(config.replicas),
                ..config.clone()
            };
            ctx.runtime
                .deploy(&batch, DeployTarget::Primary)
                .await
                .map_err(|e| e.during(&stage))?;
            ctx.wait_until_ready(&primary, config).await?;
            ctx.health_gate(&primary, config).await.map_err(|_| {
                SlipwayError::HealthCheckFailure {
                    passed: current - 1,
                    total,
                }
            })?;
            debug!(deployment_id = %id, batch = current, total, replicas = batch.replicas, "batch healthy");
        }

        ctx.enter(id, DeploymentPhase::Finalizing)?;
        info!(deployment_id = %id, "rolling update completed");
        Ok(RolloutOutcome {
            health_check_time_ms: started.elapsed().as_millis() as u64,
            ..RolloutOutcome::default()
        })
    }

    fn name(&self) -> &str {
        "rolling"
    }
}

/// Stop the primary, start the new version, gate on health.
pub struct RecreateExecutor;

#[async_trait]
impl StrategyExecutor for RecreateExecutor {
    async fn execute(
        &self,
        config: &DeploymentConfig,
        ctx: &RolloutContext,
    ) -> SlipwayResult<RolloutOutcome> {
        let id = config.deployment_id.as_str();
        let env = config.environment.as_str();
        let primary = DeployTarget::Primary.instance_name(&config.application);

        ctx.enter(id, DeploymentPhase::DeployingInactiveSlot)?;
        match ctx.runtime.scale(&primary, env, 0).await {
            Ok(result) => {
                info!(deployment_id = %id, stopped = result.previous_replicas, "primary stopped")
            }
            Err(RuntimeError::NotFound(_)) => debug!(deployment_id = %id, "no primary to stop"),
            Err(e) => return Err(e.during("deploy")),
        }

        let started = Instant::now();
        ctx.runtime
            .deploy(config, DeployTarget::Primary)
            .await
            .map_err(|e| e.during("deploy"))?;
        ctx.wait_until_ready(&primary, config).await?;

        ctx.enter(id, DeploymentPhase::HealthVerifying)?;
        ctx.health_gate(&primary, config).await?;

        ctx.enter(id, DeploymentPhase::Finalizing)?;
        info!(deployment_id = %id, image = %config.image, "recreate completed");
        Ok(RolloutOutcome {
            health_check_time_ms: started.elapsed().as_millis() as u64,
            ..RolloutOutcome::default()
        })
    }

    fn name(&self) -> &str {
        "recreate"
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use slipway_runtime::{InMemoryRuntime, RuntimeCall, RuntimeMetrics};
    use slipway_state::StateStore;

    fn setup() -> (Arc<InMemoryRuntime>, RolloutContext) {
        let runtime = Arc::new(InMemoryRuntime::new());
        let ctx = RolloutContext::new(
            runtime.clone(),
            StateStore::new(),
            OrchestratorSettings::default(),
            AbortSignal::never(),
        );
        (runtime, ctx)
    }

    fn config(strategy: Strategy) -> DeploymentConfig {
        let mut config = DeploymentConfig::new("d-1", "billing", "staging", "billing:v2");
        config.strategy = strategy;
        config.replicas = 5;
        config.batch_size = 2;
        config
    }

    fn deployed_replicas(runtime: &InMemoryRuntime) -> Vec<u32> {
        runtime
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                RuntimeCall::Deploy { replicas, .. } => Some(replicas),
                _ => None,
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn rolling_deploys_in_batches() {
        let (runtime, ctx) = setup();
        RollingExecutor
            .execute(&config(Strategy::Rolling), &ctx)
            .await
            .unwrap();
        assert_eq!(deployed_replicas(&runtime), vec![2, 4, 5]);
        assert_eq!(runtime.replicas("billing", "staging"), Some(5));
    }

    #[tokio::test(start_paused = true)]
    async fn rolling_stops_at_unhealthy_batch() {
        let (runtime, ctx) = setup();
        runtime.script_metrics(
            "billing",
            "staging",
            [RuntimeMetrics::healthy(), RuntimeMetrics::with_error_rate(0.3)],
        );

        match RollingExecutor.execute(&config(Strategy::Rolling), &ctx).await {
            Err(SlipwayError::HealthCheckFailure { passed, total }) => {
                assert_eq!((passed, total), (1, 3));
            }
            other => panic!("expected health failure, got {other:?}"),
        }
        assert_eq!(deployed_replicas(&runtime), vec![2, 4]);
        assert_eq!(
            ctx.phase("d-1"),
            Some(DeploymentPhase::RollingBatch { current: 2, total: 3 })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn recreate_stops_before_starting() {
        let (runtime, ctx) = setup();
        runtime.seed_instance("billing", "staging", "billing:v1", 5);

        RecreateExecutor
            .execute(&config(Strategy::Recreate), &ctx)
            .await
            .unwrap();

        let mutating = runtime.mutating_calls();
        assert!(matches!(mutating[0], RuntimeCall::Scale { replicas: 0, .. }));
        assert!(matches!(mutating[1], RuntimeCall::Deploy { .. }));
        assert_eq!(runtime.image("billing", "staging").as_deref(), Some("billing:v2"));
    }

    #[tokio::test(start_paused = true)]
    async fn recreate_tolerates_missing_primary() {
        let (runtime, ctx) = setup();
        RecreateExecutor
            .execute(&config(Strategy::Recreate), &ctx)
            .await
            .unwrap();
        assert_eq!(runtime.replicas("billing", "staging"), Some(5));
    }
}
