//! Shared execution context and health gates used by every strategy.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use slipway_core::*;
use slipway_metrics::CanaryAnalysis;
use slipway_runtime::{ContainerRuntime, RuntimeMetrics};
use slipway_state::StateStore;

use crate::phase::{DeploymentPhase, PhaseBoard};

/// Delayed scale-downs still waiting out their grace period, keyed by
/// `instance@environment`.
#[derive(Clone, Default)]
pub struct GraceTasks {
    handles: Arc<Mutex<Vec<(String, JoinHandle<()>)>>>,
}

fn grace_key(instance: &str, environment: &str) -> String {
    format!("{instance}@{environment}")
}

impl GraceTasks {
    fn push(&self, key: String, handle: JoinHandle<()>) {
        let mut handles = self.handles.lock().unwrap_or_else(|p| p.into_inner());
        handles.retain(|(_, h)| !h.is_finished());
        handles.push((key, handle));
    }

    /// Scale-downs not yet run.
    pub fn pending(&self) -> usize {
        let mut handles = self.handles.lock().unwrap_or_else(|p| p.into_inner());
        handles.retain(|(_, h)| !h.is_finished());
        handles.len()
    }

    /// Abort the pending scale-down of one instance, if any.
    pub fn cancel(&self, instance: &str, environment: &str) -> bool {
        let key = grace_key(instance, environment);
        let mut handles = self.handles.lock().unwrap_or_else(|p| p.into_inner());
        let before = handles.len();
        handles.retain(|(k, h)| {
            if *k == key {
                h.abort();
                false
            } else {
                !h.is_finished()
            }
        });
        handles.len() < before
    }

    /// Abort every pending scale-down.
    pub fn cancel_all(&self) -> usize {
        let mut handles = self.handles.lock().unwrap_or_else(|p| p.into_inner());
        let count = handles.len();
        for (_, handle) in handles.drain(..) {
            handle.abort();
        }
        count
    }
}

/// What a successful strategy run leaves behind.
#[derive(Debug, Clone, Default)]
pub struct RolloutOutcome {
    /// Blue-green: slot now serving traffic.
    pub active_slot: Option<Slot>,
    /// Blue-green: slot that served traffic before.
    pub previous_slot: Option<Slot>,
    /// Time spent waiting for readiness and verifying health.
    pub health_check_time_ms: u64,
    /// Canary: one analysis per evaluation, in order.
    pub canary_analyses: Vec<CanaryAnalysis>,
}

/// One health sample of an instance.
#[derive(Debug, Clone)]
pub struct Sample {
    pub healthy: bool,
    pub metrics: Option<RuntimeMetrics>,
}

impl Sample {
    /// Healthy and erroring less than `threshold`.
    pub fn passed(&self, threshold: f64) -> bool {
        self.healthy
            && self
                .metrics
                .as_ref()
                .is_some_and(|m| m.error_rate < threshold)
    }
}

/// Everything a strategy executor may touch.
#[derive(Clone)]
pub struct RolloutContext {
    pub runtime: Arc<dyn ContainerRuntime>,
    pub state: StateStore,
    pub settings: OrchestratorSettings,
    pub signal: AbortSignal,
    pub(crate) phases: PhaseBoard,
    pub(crate) grace: GraceTasks,
}

impl RolloutContext {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        state: StateStore,
        settings: OrchestratorSettings,
        signal: AbortSignal,
    ) -> Self {
        Self {
            runtime,
            state,
            settings,
            signal,
            phases: PhaseBoard::new(),
            grace: GraceTasks::default(),
        }
    }

    pub fn phases(&self) -> &PhaseBoard {
        &self.phases
    }

    /// Move to `phase` unless an abort was requested.
    pub fn enter(&self, deployment_id: &str, phase: DeploymentPhase) -> SlipwayResult<()> {
        self.signal.check(&phase.stage())?;
        debug!(%deployment_id, phase = %phase.stage(), "entering phase");
        self.phases.set(deployment_id, phase);
        Ok(())
    }

    pub fn mark(&self, deployment_id: &str, phase: DeploymentPhase) {
        self.phases.set(deployment_id, phase);
    }

    pub fn phase(&self, deployment_id: &str) -> Option<DeploymentPhase> {
        self.phases.get(deployment_id)
    }

    /// Sleep for `duration`, ending early with `Aborted` if signalled.
    pub async fn pause(&self, stage: &str, duration: Duration) -> SlipwayResult<()> {
        let mut signal = self.signal.clone();
        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = signal.aborted() => {}
        }
        self.signal.check(stage)
    }

    /// Poll the instance's health until it passes or the ready timeout
    /// expires.
    pub async fn wait_until_ready(
        &self,
        instance: &str,
        config: &DeploymentConfig,
    ) -> SlipwayResult<()> {
        let limit = self.settings.slot_ready_timeout();
        let poll = self.settings.slot_ready_poll();
        let started = Instant::now();

        let ready = tokio::time::timeout(limit, async {
            loop {
                match self
                    .runtime
                    .check_health(instance, &config.environment, &config.health_check)
                    .await
                {
                    Ok(true) => return Ok::<(), SlipwayError>(()),
                    Ok(false) => debug!(%instance, "not ready yet"),
                    Err(e) => debug!(%instance, error = %e, "readiness probe failed"),
                }
                self.pause("slot_ready", poll).await?;
            }
        })
        .await;

        match ready {
            Ok(result) => {
                if result.is_ok() {
                    info!(%instance, waited_ms = started.elapsed().as_millis() as u64, "instance ready");
                }
                result
            }
            Err(_) => Err(SlipwayError::timeout("slot_ready", limit)),
        }
    }

    /// Probe health, then read metrics. Failures count as unhealthy.
    pub async fn sample(&self, instance: &str, config: &DeploymentConfig) -> Sample {
        let healthy = self
            .runtime
            .check_health(instance, &config.environment, &config.health_check)
            .await
            .unwrap_or(false);
        let metrics = match self.runtime.get_metrics(instance, &config.environment).await {
            Ok(m) => Some(m),
            Err(e) => {
                debug!(%instance, error = %e, "metrics unavailable during sample");
                None
            }
        };
        Sample { healthy, metrics }
    }

    /// Take `config.sample_count()` samples one interval apart; at least
    /// 80% must pass. Returns the last sample.
    pub async fn verify_health(
        &self,
        instance: &str,
        config: &DeploymentConfig,
    ) -> SlipwayResult<Sample> {
        let total = config.sample_count();
        let interval = Duration::from_secs(config.health_check_interval_secs.max(1));
        let mut passed = 0u32;
        let mut last = Sample {
            healthy: false,
            metrics: None,
        };

        for i in 0..total {
            if i > 0 {
                self.pause("health_verification", interval).await?;
            }
            let sample = self.sample(instance, config).await;
            if sample.passed(config.rollback_threshold) {
                passed += 1;
            } else {
                debug!(%instance, sample = i + 1, "health sample failed");
            }
            last = sample;
        }

        info!(%instance, passed, total, "health verification finished");
        if passed * 5 >= total * 4 {
            Ok(last)
        } else {
            Err(SlipwayError::HealthCheckFailure { passed, total })
        }
    }

    /// One sample that must pass.
    pub async fn health_gate(
        &self,
        instance: &str,
        config: &DeploymentConfig,
    ) -> SlipwayResult<Sample> {
        let sample = self.sample(instance, config).await;
        if sample.passed(config.rollback_threshold) {
            Ok(sample)
        } else {
            warn!(%instance, healthy = sample.healthy, "health gate failed");
            Err(SlipwayError::HealthCheckFailure {
                passed: 0,
                total: 1,
            })
        }
    }

    /// Scale the retired `slot` to zero once the grace period has passed.
    /// Skipped if the slot is live again by then.
    pub fn schedule_scale_down(&self, application: &str, environment: &str, slot: Slot) {
        let runtime = self.runtime.clone();
        let state = self.state.clone();
        let grace = self.settings.scale_down_grace();
        let application = application.to_string();
        let environment = environment.to_string();
        let instance = DeployTarget::Slot(slot).instance_name(&application);
        let key = grace_key(&instance, &environment);

        let handle = tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            if let Ok(Some(active)) = state.active_slot(&application, &environment) {
                if active == slot {
                    info!(%instance, %environment, "slot is live again; scale-down skipped");
                    return;
                }
            }
            match runtime.scale(&instance, &environment, 0).await {
                Ok(_) => info!(%instance, %environment, "previous slot scaled down"),
                Err(e) => warn!(%instance, %environment, error = %e, "previous slot scale-down failed"),
            }
        });
        self.grace.push(key, handle);
        debug!(?grace, "scale-down scheduled");
    }
}

/// Record a sample as the slot's observed health.
pub(crate) fn record_slot_sample(
    state: &StateStore,
    config: &DeploymentConfig,
    slot: Slot,
    sample: &Sample,
) {
    let (error_rate, response_time_ms, request_count) = sample
        .metrics
        .as_ref()
        .map(|m| (m.error_rate, m.response_time_ms, m.request_count))
        .unwrap_or_default();
    let health = SlotHealth {
        healthy: sample.healthy,
        error_rate,
        response_time_ms,
    };
    if let Err(e) = state.update_slot_health(
        &config.application,
        &config.environment,
        slot,
        health,
        request_count,
    ) {
        warn!(deployment_id = %config.deployment_id, error = %e, "failed to record slot health");
    }
}
