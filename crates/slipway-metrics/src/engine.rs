//! Metrics engine — per-deployment sampling loops feeding alert evaluation.
//!
//! Each monitored deployment gets a background task that captures a
//! snapshot every interval, appends it to the ring, and evaluates the
//! deployment's alert rules. Rollback and scale actions are published on
//! the event bus for the scheduler to consume; notification actions are
//! handed to the notifier callback on their own task.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use slipway_core::{epoch_millis, Event, MetricsSettings, SlipwayResult};
use slipway_runtime::ContainerRuntime;
use slipway_state::EventBus;

use crate::alerts::{default_rules, Alert, AlertAction, AlertBook, AlertRule};
use crate::snapshot::{MetricSnapshot, SnapshotRing};

type BoxFuture = std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>>;

/// Delivers webhook/email/slack actions.
pub type NotifyCallback = Arc<dyn Fn(Alert, AlertAction) -> BoxFuture + Send + Sync>;

/// Alert history entries kept across all deployments.
const ALERT_HISTORY_LIMIT: usize = 1000;

struct MonitorSlot {
    handle: JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
}

impl MonitorSlot {
    /// Stop the loop and wait until it can no longer record anything.
    async fn halt(self) {
        let _ = self.shutdown_tx.send(true);
        self.handle.abort();
        let _ = self.handle.await;
    }
}

/// What the sampling loop needs to address the runtime instance.
#[derive(Debug, Clone)]
struct Target {
    deployment_id: String,
    instance: String,
    environment: String,
}

#[derive(Clone)]
pub struct MetricsEngine {
    runtime: Arc<dyn ContainerRuntime>,
    events: EventBus,
    settings: MetricsSettings,
    snapshots: SnapshotRing,
    alerts: Arc<Mutex<AlertBook>>,
    notifier: Option<NotifyCallback>,
    monitors: Arc<RwLock<HashMap<String, MonitorSlot>>>,
}

impl MetricsEngine {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        events: EventBus,
        settings: MetricsSettings,
    ) -> Self {
        Self {
            snapshots: SnapshotRing::new(settings.max_snapshots),
            runtime,
            events,
            settings,
            alerts: Arc::new(Mutex::new(AlertBook::new(ALERT_HISTORY_LIMIT))),
            notifier: None,
            monitors: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn with_notifier(mut self, notifier: NotifyCallback) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn snapshots(&self) -> &SnapshotRing {
        &self.snapshots
    }

    /// Replace the alert rules of a deployment.
    pub async fn set_alert_rules(&self, deployment_id: &str, rules: Vec<AlertRule>) {
        self.alerts.lock().await.set_rules(deployment_id, rules);
    }

    pub async fn alert_rules(&self, deployment_id: &str) -> Vec<AlertRule> {
        self.alerts.lock().await.rules(deployment_id)
    }

    pub async fn alert_history(&self, deployment_id: &str) -> Vec<Alert> {
        self.alerts.lock().await.history(deployment_id)
    }

    pub async fn latest_snapshot(&self, deployment_id: &str) -> Option<MetricSnapshot> {
        self.snapshots.latest(deployment_id).await
    }

    /// Sample the runtime once and append the snapshot to the ring.
    pub async fn capture_snapshot(
        &self,
        deployment_id: &str,
        instance: &str,
        environment: &str,
    ) -> SlipwayResult<MetricSnapshot> {
        let metrics = self
            .runtime
            .get_metrics(instance, environment)
            .await
            .map_err(|e| e.during("metrics"))?;
        let snapshot = MetricSnapshot::from_runtime(deployment_id, &metrics, epoch_millis());
        self.snapshots.record(snapshot.clone()).await;
        debug!(
            %deployment_id,
            error_rate = snapshot.error_rate,
            p95_ms = snapshot.latency_p95_ms,
            health_score = snapshot.health_score,
            "snapshot captured"
        );
        Ok(snapshot)
    }

    /// Evaluate the deployment's rules against `snapshot` and run the
    /// actions of every rule that fires outside its cooldown.
    pub async fn evaluate_alert_rules(
        &self,
        deployment_id: &str,
        snapshot: &MetricSnapshot,
    ) -> Vec<Alert> {
        let fired = {
            let mut book = self.alerts.lock().await;
            book.evaluate(deployment_id, snapshot, tokio::time::Instant::now())
        };

        let mut alerts = Vec::with_capacity(fired.len());
        for (rule, alert) in fired {
            warn!(
                %deployment_id,
                rule_id = %rule.id,
                severity = rule.severity.as_str(),
                value = alert.value,
                threshold = alert.threshold,
                "alert triggered"
            );
            self.events.publish(Event::AlertTriggered {
                alert_id: alert.id.clone(),
                deployment_id: deployment_id.to_string(),
                rule_id: rule.id.clone(),
                severity: rule.severity,
                value: alert.value,
                threshold: alert.threshold,
            });
            for action in &rule.actions {
                self.run_action(&alert, action);
            }
            alerts.push(alert);
        }
        alerts
    }

    fn run_action(&self, alert: &Alert, action: &AlertAction) {
        match action {
            AlertAction::Rollback => {
                self.events.publish(Event::RollbackRequested {
                    deployment_id: alert.deployment_id.clone(),
                    reason: alert.message.clone(),
                    severity: alert.severity,
                });
            }
            AlertAction::Scale { replicas } => {
                self.events.publish(Event::ScaleRequested {
                    deployment_id: alert.deployment_id.clone(),
                    replicas: *replicas,
                });
            }
            notification => match &self.notifier {
                Some(notify) => {
                    let fut = notify(alert.clone(), notification.clone());
                    tokio::spawn(fut);
                }
                None => {
                    debug!(alert_id = %alert.id, ?notification, "no notifier configured");
                }
            },
        }
    }

    /// Start the sampling loop for a deployment, replacing any running one.
    ///
    /// Installs the stock rules if the deployment has none and the
    /// settings ask for them.
    pub async fn start_monitoring(&self, deployment_id: &str, instance: &str, environment: &str) {
        {
            let mut book = self.alerts.lock().await;
            if self.settings.default_rules && !book.has_rules(deployment_id) {
                book.set_rules(deployment_id, default_rules());
            }
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let target = Target {
            deployment_id: deployment_id.to_string(),
            instance: instance.to_string(),
            environment: environment.to_string(),
        };
        let engine = self.clone();
        let handle = tokio::spawn(async move {
            engine.run_sampling_loop(target, shutdown_rx).await;
        });

        let mut monitors = self.monitors.write().await;
        if let Some(old) = monitors.insert(
            deployment_id.to_string(),
            MonitorSlot {
                handle,
                shutdown_tx,
            },
        ) {
            let _ = old.shutdown_tx.send(true);
            old.handle.abort();
        }
        info!(%deployment_id, %instance, %environment, "metrics monitoring started");
    }

    /// Stop a deployment's sampling loop and drop its rules, cooldowns
    /// and snapshots. Alert history is kept.
    pub async fn stop_monitoring(&self, deployment_id: &str) {
        let slot = self.monitors.write().await.remove(deployment_id);
        if let Some(slot) = slot {
            slot.halt().await;
            info!(%deployment_id, "metrics monitoring stopped");
        }
        self.forget(deployment_id).await;
    }

    pub async fn stop_all(&self) {
        let slots: Vec<(String, MonitorSlot)> = self.monitors.write().await.drain().collect();
        for (id, slot) in slots {
            slot.halt().await;
            self.forget(&id).await;
            debug!(deployment_id = %id, "metrics monitoring stopped");
        }
        info!("all metrics monitors stopped");
    }

    pub async fn is_monitoring(&self, deployment_id: &str) -> bool {
        self.monitors.read().await.contains_key(deployment_id)
    }

    pub async fn active_monitors(&self) -> Vec<String> {
        self.monitors.read().await.keys().cloned().collect()
    }

    async fn run_sampling_loop(&self, target: Target, mut shutdown: watch::Receiver<bool>) {
        let interval = self.settings.snapshot_interval();
        let deployment_id = target.deployment_id.as_str();
        debug!(%deployment_id, ?interval, "sampling loop starting");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    match self
                        .capture_snapshot(deployment_id, &target.instance, &target.environment)
                        .await
                    {
                        Ok(snapshot) => {
                            self.evaluate_alert_rules(deployment_id, &snapshot).await;
                        }
                        Err(e) => {
                            warn!(%deployment_id, error = %e, "snapshot capture failed");
                        }
                    }
                }
                _ = shutdown.changed() => {
                    debug!(%deployment_id, "sampling loop shutting down");
                    break;
                }
            }
        }
    }

    async fn forget(&self, deployment_id: &str) {
        self.alerts.lock().await.forget(deployment_id);
        self.snapshots.remove(deployment_id).await;
    }
}
