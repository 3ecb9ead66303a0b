//! Blue-green: deploy into the idle slot, verify it, then move all
//! traffic across at once.

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use slipway_core::*;

use crate::context::{record_slot_sample, RolloutContext, RolloutOutcome};
use crate::phase::DeploymentPhase;
use crate::strategy::StrategyExecutor;

pub struct BlueGreenExecutor;

/// Slot serving traffic: the recorded one, else whichever slot answers
/// its health check (blue first).
async fn detect_active(ctx: &RolloutContext, config: &DeploymentConfig) -> SlipwayResult<Option<Slot>> {
    if let Some(slot) = ctx.state.active_slot(&config.application, &config.environment)? {
        return Ok(Some(slot));
    }
    for slot in [Slot::Blue, Slot::Green] {
        let name = DeployTarget::Slot(slot).instance_name(&config.application);
        let healthy = ctx
            .runtime
            .check_health(&name, &config.environment, &config.health_check)
            .await
            .unwrap_or(false);
        if healthy {
            return Ok(Some(slot));
        }
    }
    Ok(None)
}

/// Send traffic back to `previous` after a failed switch. Failures here
/// are logged; the caller still returns the original error.
async fn restore_traffic(
    ctx: &RolloutContext,
    config: &DeploymentConfig,
    previous: Option<Slot>,
    target: Slot,
) {
    let deployment_id = &config.deployment_id;
    let Some(previous) = previous else {
        warn!(%deployment_id, "no previous slot to return traffic to");
        return;
    };
    match ctx.runtime.switch_traffic(config, target, previous).await {
        Ok(()) => {
            if let Err(e) =
                ctx.state
                    .activate_slot(&config.application, &config.environment, previous, None)
            {
                warn!(%deployment_id, error = %e, "failed to record restored slot");
            }
            ctx.mark(deployment_id, DeploymentPhase::RolledBack);
            info!(%deployment_id, slot = %previous, "traffic returned to previous slot");
        }
        Err(e) => {
            error!(%deployment_id, error = %e, "traffic rollback failed");
        }
    }
}

impl BlueGreenExecutor {
    async fn roll(
        &self,
        config: &DeploymentConfig,
        ctx: &RolloutContext,
        active: Option<Slot>,
        target: Slot,
        switched: &mut bool,
    ) -> SlipwayResult<RolloutOutcome> {
        let id = config.deployment_id.as_str();
        let app = config.application.as_str();
        let env = config.environment.as_str();
        let instance = DeployTarget::Slot(target).instance_name(app);
        let started = Instant::now();

        if ctx.grace.cancel(&instance, env) {
            debug!(%instance, "pending scale-down cancelled; slot is being redeployed");
        }
        ctx.runtime
            .deploy(config, DeployTarget::Slot(target))
            .await
            .map_err(|e| e.during("deploy"))?;
        ctx.state.record_slot_image(app, env, target, &config.image)?;
        ctx.wait_until_ready(&instance, config).await?;

        ctx.enter(id, DeploymentPhase::Warmup)?;
        ctx.pause("warmup", Duration::from_secs(config.warmup_secs))
            .await?;

        ctx.enter(id, DeploymentPhase::HealthVerifying)?;
        let sample = ctx.verify_health(&instance, config).await?;
        record_slot_sample(&ctx.state, config, target, &sample);
        let health_check_time_ms = started.elapsed().as_millis() as u64;

        ctx.enter(id, DeploymentPhase::TrafficSwitching)?;
        *switched = true;
        let from = active.unwrap_or(target.other());
        ctx.runtime
            .switch_traffic(config, from, target)
            .await
            .map_err(|e| e.during("traffic_switch"))?;
        ctx.state.activate_slot(app, env, target, Some(&config.image))?;
        info!(deployment_id = %id, %from, to = %target, "traffic switched");

        ctx.pause("traffic_switch", ctx.settings.switch_hold())
            .await?;
        let after = ctx.sample(&instance, config).await;
        record_slot_sample(&ctx.state, config, target, &after);
        // Missing metrics after the switch count as a failed switch.
        let error_rate = after.metrics.as_ref().map(|m| m.error_rate).unwrap_or(1.0);
        if error_rate > config.rollback_threshold {
            return Err(SlipwayError::TrafficSwitchFailure {
                error_rate,
                threshold: config.rollback_threshold,
            });
        }

        ctx.enter(id, DeploymentPhase::Finalizing)?;
        let healthy = ctx
            .runtime
            .check_health(&instance, env, &config.health_check)
            .await
            .map_err(|e| e.during("finalize"))?;
        if !healthy {
            return Err(SlipwayError::HealthCheckFailure {
                passed: 0,
                total: 1,
            });
        }
        if let Some(previous) = active {
            ctx.schedule_scale_down(app, env, previous);
        }

        Ok(RolloutOutcome {
            active_slot: Some(target),
            previous_slot: active,
            health_check_time_ms,
            canary_analyses: Vec::new(),
        })
    }
}

#[async_trait]
impl StrategyExecutor for BlueGreenExecutor {
    async fn execute(
        &self,
        config: &DeploymentConfig,
        ctx: &RolloutContext,
    ) -> SlipwayResult<RolloutOutcome> {
        ctx.enter(&config.deployment_id, DeploymentPhase::DeployingInactiveSlot)?;
        let active = detect_active(ctx, config).await?;
        let target = active.map(Slot::other).unwrap_or(Slot::Blue);
        info!(
            deployment_id = %config.deployment_id,
            active = ?active,
            %target,
            image = %config.image,
            "blue-green deployment starting"
        );

        let mut switched = false;
        match self.roll(config, ctx, active, target, &mut switched).await {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                if switched {
                    restore_traffic(ctx, config, active, target).await;
                }
                Err(err)
            }
        }
    }

    fn name(&self) -> &str {
        "blue-green"
    }
}
