//! Automatic rollback triggers.
//!
//! One monitor task per deployment polls the live instance's metrics and
//! fires a single automatic rollback on the first threshold breach. A
//! monitor ends after firing, when the deployment reaches `rolled_back`
//! or `failed`, once a newer release of the pair replaces it, after its
//! maximum lifetime, or when cleared. Clearing only stops the polling: a
//! rollback the monitor already started runs to its recorded outcome.

use std::sync::atomic::Ordering;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use slipway_core::event::Severity;
use slipway_core::{DeploymentStatus, Event, RollbackThresholds};
use slipway_runtime::RuntimeMetrics;

use crate::engine::RollbackEngine;
use crate::history::RollbackTrigger;

pub(crate) struct TriggerSlot {
    handle: JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
    generation: u64,
}

impl TriggerSlot {
    /// Ask the task to stop at its next wait point.
    fn stop(self) -> JoinHandle<()> {
        let _ = self.shutdown_tx.send(true);
        self.handle
    }
}

/// First breached threshold, checked in a fixed order: error rate,
/// response time, CPU, memory.
pub fn evaluate_thresholds(
    thresholds: &RollbackThresholds,
    metrics: &RuntimeMetrics,
) -> Option<RollbackTrigger> {
    if metrics.error_rate > thresholds.error_rate {
        return Some(RollbackTrigger::automatic(
            &format!(
                "Error rate exceeded threshold: {:.4} > {:.4}",
                metrics.error_rate, thresholds.error_rate
            ),
            Severity::High,
        ));
    }
    if metrics.response_time_ms > thresholds.response_time_ms {
        return Some(RollbackTrigger::automatic(
            &format!(
                "Response time exceeded threshold: {:.0}ms > {:.0}ms",
                metrics.response_time_ms, thresholds.response_time_ms
            ),
            Severity::Medium,
        ));
    }
    if metrics.cpu_percent > thresholds.cpu_percent {
        return Some(RollbackTrigger::automatic(
            &format!(
                "CPU usage exceeded threshold: {:.1}% > {:.1}%",
                metrics.cpu_percent, thresholds.cpu_percent
            ),
            Severity::Medium,
        ));
    }
    if metrics.memory_percent > thresholds.memory_percent {
        return Some(RollbackTrigger::automatic(
            &format!(
                "Memory usage exceeded threshold: {:.1}% > {:.1}%",
                metrics.memory_percent, thresholds.memory_percent
            ),
            Severity::Medium,
        ));
    }
    None
}

impl RollbackEngine {
    /// Watch a deployment and roll it back automatically on a breach.
    ///
    /// Installing triggers for a deployment that already has them replaces
    /// the old monitor.
    pub async fn setup_automatic_rollback_triggers(
        &self,
        deployment_id: &str,
        thresholds: RollbackThresholds,
    ) {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        // Hold the map while spawning so a fast-exiting task cannot try to
        // remove its slot before it is inserted.
        let mut monitors = self.monitors.write().await;
        let engine = self.clone();
        let id = deployment_id.to_string();
        let handle = tokio::spawn(async move {
            engine
                .run_trigger_loop(&id, thresholds, shutdown_rx)
                .await;
            engine.release_slot(&id, generation).await;
        });

        if let Some(old) = monitors.insert(
            deployment_id.to_string(),
            TriggerSlot {
                handle,
                shutdown_tx,
                generation,
            },
        ) {
            old.stop();
            debug!(%deployment_id, "replaced automatic rollback monitor");
        }
        info!(%deployment_id, "automatic rollback triggers installed");
    }

    /// Stop a deployment's monitor. Returns whether one was running.
    pub async fn clear_automatic_triggers(&self, deployment_id: &str) -> bool {
        match self.monitors.write().await.remove(deployment_id) {
            Some(slot) => {
                slot.stop();
                info!(%deployment_id, "automatic rollback triggers cleared");
                true
            }
            None => false,
        }
    }

    pub async fn has_automatic_triggers(&self, deployment_id: &str) -> bool {
        self.monitors.read().await.contains_key(deployment_id)
    }

    /// Stop every monitor and wait for them, including any rollback one
    /// of them is executing.
    pub async fn clear_all_triggers(&self) {
        let handles: Vec<JoinHandle<()>> = {
            let mut monitors = self.monitors.write().await;
            monitors.drain().map(|(_, slot)| slot.stop()).collect()
        };
        let count = handles.len();
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "automatic rollback monitor ended abnormally");
            }
        }
        info!(count, "all automatic rollback triggers cleared");
    }

    async fn release_slot(&self, deployment_id: &str, generation: u64) {
        let mut monitors = self.monitors.write().await;
        if monitors
            .get(deployment_id)
            .is_some_and(|slot| slot.generation == generation)
        {
            monitors.remove(deployment_id);
            debug!(%deployment_id, "automatic rollback monitor released");
        }
    }

    async fn run_trigger_loop(
        &self,
        deployment_id: &str,
        thresholds: RollbackThresholds,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let interval = self.settings.monitor_interval();
        let deadline = Instant::now() + self.settings.monitor_max_lifetime();

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = tokio::time::sleep_until(deadline) => {
                    info!(%deployment_id, "automatic rollback monitor expired");
                    return;
                }
                _ = shutdown.changed() => {
                    debug!(%deployment_id, "automatic rollback monitor shutting down");
                    return;
                }
            }

            let deployment = match self.state.get_deployment(deployment_id) {
                Ok(Some(d)) => d,
                Ok(None) => {
                    warn!(%deployment_id, "deployment gone; stopping rollback monitor");
                    return;
                }
                Err(e) => {
                    warn!(%deployment_id, error = %e, "state read failed");
                    continue;
                }
            };
            if matches!(
                deployment.status,
                DeploymentStatus::RolledBack | DeploymentStatus::Failed
            ) {
                debug!(%deployment_id, status = ?deployment.status, "deployment settled; monitor exiting");
                return;
            }
            match self.state.superseding_deployment(deployment_id) {
                Ok(Some(newer)) => {
                    info!(%deployment_id, superseded_by = %newer.id, "deployment replaced; monitor exiting");
                    return;
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(%deployment_id, error = %e, "state read failed");
                    continue;
                }
            }

            let instance = deployment.live_instance();
            let metrics = match self
                .runtime
                .get_metrics(&instance, &deployment.environment)
                .await
            {
                Ok(m) => m,
                Err(e) => {
                    debug!(%deployment_id, %instance, error = %e, "metrics unavailable");
                    continue;
                }
            };

            let Some(trigger) = evaluate_thresholds(&thresholds, &metrics) else {
                continue;
            };
            if shutdown.has_changed().unwrap_or(true) {
                debug!(%deployment_id, "monitor cleared before rollback; not firing");
                return;
            }
            warn!(
                %deployment_id,
                reason = %trigger.reason,
                severity = trigger.severity.as_str(),
                "rollback threshold breached"
            );
            let reason = trigger.reason.clone();
            if let Err(e) = self.execute_rollback(deployment_id, trigger).await {
                error!(%deployment_id, error = %e, "automatic rollback failed; escalating");
                self.events.publish(Event::RollbackEscalated {
                    deployment_id: deployment_id.to_string(),
                    reason: format!("{reason}; rollback failed: {e}"),
                });
            }
            return;
        }
    }
}
