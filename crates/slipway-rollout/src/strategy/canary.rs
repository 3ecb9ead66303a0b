//! Canary: ramp traffic onto a separate instance step by step, comparing
//! it against the stable primary at every step.

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use slipway_core::*;
use slipway_metrics::{analyze, CanaryAnalysis, MetricSnapshot, Verdict};

use crate::context::{RolloutContext, RolloutOutcome};
use crate::phase::DeploymentPhase;
use crate::strategy::StrategyExecutor;

pub struct CanaryExecutor;

/// Pair a canary snapshot with the stable one. Without a stable instance
/// the canary is compared with itself, so only its success rate counts.
async fn observe(
    ctx: &RolloutContext,
    config: &DeploymentConfig,
    percentage: u8,
    stage: &str,
) -> SlipwayResult<CanaryAnalysis> {
    let id = config.deployment_id.as_str();
    let env = config.environment.as_str();
    let now = epoch_millis();

    let canary_name = DeployTarget::Canary.instance_name(&config.application);
    let canary = ctx
        .runtime
        .get_metrics(&canary_name, env)
        .await
        .map_err(|e| e.during(stage))?;
    let canary = MetricSnapshot::from_runtime(id, &canary, now);

    let stable_name = DeployTarget::Primary.instance_name(&config.application);
    let stable = match ctx.runtime.get_metrics(&stable_name, env).await {
        Ok(m) => MetricSnapshot::from_runtime(id, &m, now),
        Err(e) => {
            debug!(deployment_id = %id, error = %e, "no stable baseline");
            canary.clone()
        }
    };
    Ok(analyze(percentage, canary, stable))
}

/// Pull all traffic off the canary and stop it. Best effort.
async fn withdraw_canary(ctx: &RolloutContext, config: &DeploymentConfig) {
    let deployment_id = &config.deployment_id;
    match ctx.runtime.route_canary(config, 0).await {
        Ok(()) => {
            ctx.mark(deployment_id, DeploymentPhase::RolledBack);
            info!(%deployment_id, "canary traffic withdrawn");
        }
        Err(e) => warn!(%deployment_id, error = %e, "failed to withdraw canary traffic"),
    }
    let canary_name = DeployTarget::Canary.instance_name(&config.application);
    if let Err(e) = ctx.runtime.scale(&canary_name, &config.environment, 0).await {
        warn!(%deployment_id, error = %e, "failed to stop canary");
    }
}

impl CanaryExecutor {
    async fn roll(
        &self,
        config: &DeploymentConfig,
        ctx: &RolloutContext,
        routed: &mut bool,
    ) -> SlipwayResult<RolloutOutcome> {
        let id = config.deployment_id.as_str();
        let env = config.environment.as_str();
        let canary_name = DeployTarget::Canary.instance_name(&config.application);
        let primary_name = DeployTarget::Primary.instance_name(&config.application);
        let started = Instant::now();

        ctx.runtime
            .deploy(config, DeployTarget::Canary)
            .await
            .map_err(|e| e.during("deploy"))?;
        ctx.wait_until_ready(&canary_name, config).await?;
        let health_check_time_ms = started.elapsed().as_millis() as u64;

        ctx.enter(id, DeploymentPhase::Warmup)?;
        ctx.pause("warmup", Duration::from_secs(config.warmup_secs))
            .await?;

        let hold = ctx.settings.canary_hold();
        let max_holds = ctx.settings.max_canary_holds.max(1);
        let mut analyses = Vec::new();

        for &percentage in &ctx.settings.canary_steps {
            let phase = DeploymentPhase::CanaryStep { percentage };
            let stage = phase.stage();
            ctx.enter(id, phase)?;
            *routed = true;
            ctx.runtime
                .route_canary(config, percentage)
                .await
                .map_err(|e| e.during(&stage))?;

            let mut holds = 0u32;
            loop {
                ctx.pause(&stage, hold).await?;
                let analysis = observe(ctx, config, percentage, &stage).await?;
                info!(
                    deployment_id = %id,
                    percentage,
                    verdict = ?analysis.verdict,
                    confidence = analysis.confidence,
                    "canary analysed"
                );
                let verdict = analysis.verdict;
                let reason = analysis.reason.clone();
                analyses.push(analysis);

                match verdict {
                    Verdict::Continue => break,
                    Verdict::Hold => {
                        holds += 1;
                        if holds >= max_holds {
                            return Err(SlipwayError::timeout(&stage, hold * holds));
                        }
                    }
                    Verdict::Rollback => {
                        return Err(SlipwayError::CanaryRejected { percentage, reason });
                    }
                }
            }
        }

        ctx.enter(id, DeploymentPhase::Finalizing)?;
        ctx.runtime
            .deploy(config, DeployTarget::Primary)
            .await
            .map_err(|e| e.during("promote"))?;
        ctx.wait_until_ready(&primary_name, config).await?;
        ctx.runtime
            .route_canary(config, 0)
            .await
            .map_err(|e| e.during("promote"))?;
        *routed = false;
        if let Err(e) = ctx.runtime.scale(&canary_name, env, 0).await {
            warn!(deployment_id = %id, error = %e, "failed to stop promoted canary");
        }
        info!(deployment_id = %id, image = %config.image, "canary promoted to primary");

        Ok(RolloutOutcome {
            health_check_time_ms,
            canary_analyses: analyses,
            ..RolloutOutcome::default()
        })
    }
}

#[async_trait]
impl StrategyExecutor for CanaryExecutor {
    async fn execute(
        &self,
        config: &DeploymentConfig,
        ctx: &RolloutContext,
    ) -> SlipwayResult<RolloutOutcome> {
        ctx.enter(&config.deployment_id, DeploymentPhase::DeployingInactiveSlot)?;
        info!(
            deployment_id = %config.deployment_id,
            image = %config.image,
            steps = ?ctx.settings.canary_steps,
            "canary deployment starting"
        );

        let mut routed = false;
        match self.roll(config, ctx, &mut routed).await {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                if routed {
                    withdraw_canary(ctx, config).await;
                }
                Err(err)
            }
        }
    }

    fn name(&self) -> &str {
        "canary"
    }
}
