//! Rollback engine — plan execution and history.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::AtomicU64;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use slipway_core::*;
use slipway_runtime::ContainerRuntime;
use slipway_state::{EventBus, StateStore};

use crate::history::{ChecklistItem, RollbackHistory, RollbackStatus, RollbackTrigger, StepOutcome};
use crate::monitor::TriggerSlot;
use crate::plan::{create_rollback_plan, RollbackPlan, RollbackStep, StepKind};

/// Releases a deployment's in-flight marker when dropped.
struct InFlight {
    set: Arc<Mutex<HashSet<String>>>,
    deployment_id: String,
}

impl InFlight {
    fn acquire(set: &Arc<Mutex<HashSet<String>>>, deployment_id: &str) -> Option<Self> {
        let mut guard = set.lock().unwrap_or_else(|p| p.into_inner());
        if !guard.insert(deployment_id.to_string()) {
            return None;
        }
        Some(Self {
            set: set.clone(),
            deployment_id: deployment_id.to_string(),
        })
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.set
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(&self.deployment_id);
    }
}

fn past(deadline: Option<Instant>) -> bool {
    deadline.is_some_and(|deadline| Instant::now() >= deadline)
}

#[derive(Clone)]
pub struct RollbackEngine {
    pub(crate) runtime: Arc<dyn ContainerRuntime>,
    pub(crate) state: StateStore,
    pub(crate) events: EventBus,
    pub(crate) settings: RollbackSettings,
    histories: Arc<RwLock<HashMap<String, Vec<RollbackHistory>>>>,
    in_flight: Arc<Mutex<HashSet<String>>>,
    pub(crate) monitors: Arc<RwLock<HashMap<String, TriggerSlot>>>,
    pub(crate) generation: Arc<AtomicU64>,
}

impl RollbackEngine {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        state: StateStore,
        events: EventBus,
        settings: RollbackSettings,
    ) -> Self {
        Self {
            runtime,
            state,
            events,
            settings,
            histories: Arc::new(RwLock::new(HashMap::new())),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            monitors: Arc::new(RwLock::new(HashMap::new())),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Plan for a stored deployment.
    pub fn create_rollback_plan(&self, deployment_id: &str) -> SlipwayResult<RollbackPlan> {
        let deployment = self.deployment(deployment_id)?;
        Ok(create_rollback_plan(&deployment))
    }

    /// Every rollback attempt of a deployment, oldest first.
    pub async fn history(&self, deployment_id: &str) -> Vec<RollbackHistory> {
        self.histories
            .read()
            .await
            .get(deployment_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn is_rolling_back(&self, deployment_id: &str) -> bool {
        self.in_flight
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .contains(deployment_id)
    }

    fn deployment(&self, deployment_id: &str) -> SlipwayResult<Deployment> {
        self.state
            .get_deployment(deployment_id)?
            .ok_or_else(|| SlipwayError::NotFound(format!("deployment {deployment_id}")))
    }

    async fn store(&self, history: &RollbackHistory) {
        let mut histories = self.histories.write().await;
        let entries = histories.entry(history.deployment_id.clone()).or_default();
        match entries.iter_mut().find(|h| h.id == history.id) {
            Some(existing) if existing.status.is_terminal() => {
                warn!(rollback_id = %history.id, "refusing to edit a finished rollback");
            }
            Some(existing) => *existing = history.clone(),
            None => entries.push(history.clone()),
        }
    }

    async fn finish_failed(
        &self,
        history: &mut RollbackHistory,
        started: Instant,
        step: &str,
        cause: String,
    ) -> SlipwayError {
        history.status = RollbackStatus::Failed;
        history.completed_at = Some(epoch_millis());
        history.duration_ms = Some(started.elapsed().as_millis() as u64);
        history.error = Some(cause.clone());
        self.store(history).await;
        error!(
            deployment_id = %history.deployment_id,
            rollback_id = %history.id,
            %step,
            %cause,
            "rollback failed"
        );
        SlipwayError::RollbackFailure {
            step: step.to_string(),
            cause,
        }
    }

    /// Fail a rollback that ran out of its time limit and escalate it.
    async fn out_of_time(
        &self,
        history: &mut RollbackHistory,
        started: Instant,
        step: &str,
        limit: Option<Duration>,
    ) -> SlipwayError {
        let limit = limit.unwrap_or_default();
        let cause = format!("rollback time limit of {}s exceeded during {step}", limit.as_secs());
        self.finish_failed(history, started, step, cause.clone()).await;
        self.events.publish(Event::RollbackEscalated {
            deployment_id: history.deployment_id.clone(),
            reason: cause,
        });
        SlipwayError::timeout("rollback", limit)
    }

    /// Return a deployment to its previous version.
    ///
    /// A second call for the same deployment while one is running fails
    /// with `Conflict`, as does a deployment a newer successful release of
    /// its pair has replaced. A deployment already rolled back returns its
    /// last completed history without touching the runtime.
    pub async fn execute_rollback(
        &self,
        deployment_id: &str,
        trigger: RollbackTrigger,
    ) -> SlipwayResult<RollbackHistory> {
        self.run_rollback(deployment_id, trigger, None).await
    }

    /// `execute_rollback` bounded by an overall time limit. Steps get what
    /// is left of `limit`; running out marks the history failed, escalates
    /// and returns `Timeout`.
    pub async fn execute_rollback_within(
        &self,
        deployment_id: &str,
        trigger: RollbackTrigger,
        limit: Duration,
    ) -> SlipwayResult<RollbackHistory> {
        self.run_rollback(deployment_id, trigger, Some(limit)).await
    }

    async fn run_rollback(
        &self,
        deployment_id: &str,
        trigger: RollbackTrigger,
        limit: Option<Duration>,
    ) -> SlipwayResult<RollbackHistory> {
        let Some(_in_flight) = InFlight::acquire(&self.in_flight, deployment_id) else {
            return Err(SlipwayError::Conflict(format!(
                "rollback of {deployment_id} already in progress"
            )));
        };

        let deployment = self.deployment(deployment_id)?;
        if deployment.status == DeploymentStatus::RolledBack {
            let completed = self
                .history(deployment_id)
                .await
                .into_iter()
                .rev()
                .find(|h| h.status == RollbackStatus::Completed);
            return completed.ok_or_else(|| {
                SlipwayError::Conflict(format!("{deployment_id} is already rolled back"))
            });
        }
        if let Some(newer) = self.state.superseding_deployment(deployment_id)? {
            return Err(SlipwayError::Conflict(format!(
                "{deployment_id} was superseded by {}",
                newer.id
            )));
        }

        let plan = create_rollback_plan(&deployment);
        let started = Instant::now();
        let deadline = limit.map(|limit| started + limit);
        let mut history = RollbackHistory {
            id: plan.id.clone(),
            deployment_id: deployment_id.to_string(),
            trigger,
            plan: plan.clone(),
            status: RollbackStatus::InProgress,
            steps: Vec::new(),
            checklist: Vec::new(),
            started_at: epoch_millis(),
            completed_at: None,
            duration_ms: None,
            error: None,
        };
        self.store(&history).await;
        info!(
            %deployment_id,
            rollback_id = %history.id,
            plan = ?plan.kind,
            trigger = ?history.trigger.kind,
            reason = %history.trigger.reason,
            "rollback started"
        );

        for step in plan.ordered_steps() {
            let step_started = Instant::now();
            let budget = match deadline {
                Some(deadline) => step.timeout().min(deadline.saturating_duration_since(step_started)),
                None => step.timeout(),
            };
            let result = match tokio::time::timeout(budget, self.run_step(&step, &deployment)).await {
                Ok(result) => result,
                Err(_) if past(deadline) => {
                    history.steps.push(StepOutcome {
                        kind: step.kind,
                        success: false,
                        message: "rollback time limit reached".to_string(),
                        duration_ms: step_started.elapsed().as_millis() as u64,
                    });
                    return Err(self
                        .out_of_time(&mut history, started, step.kind.as_str(), limit)
                        .await);
                }
                Err(_) => Err(format!("timed out after {}s", step.timeout_secs)),
            };
            let duration_ms = step_started.elapsed().as_millis() as u64;

            match result {
                Ok(message) => {
                    debug!(%deployment_id, step = step.kind.as_str(), "rollback step done");
                    history.steps.push(StepOutcome {
                        kind: step.kind,
                        success: true,
                        message,
                        duration_ms,
                    });
                    self.store(&history).await;
                }
                Err(cause) => {
                    history.steps.push(StepOutcome {
                        kind: step.kind,
                        success: false,
                        message: cause.clone(),
                        duration_ms,
                    });
                    return Err(self
                        .finish_failed(&mut history, started, step.kind.as_str(), cause)
                        .await);
                }
            }
        }

        if past(deadline) {
            return Err(self
                .out_of_time(&mut history, started, "final_checklist", limit)
                .await);
        }
        history.checklist = self.final_checklist(&deployment, &plan).await;
        let failed: Vec<&str> = history
            .checklist
            .iter()
            .filter(|c| !c.passed)
            .map(|c| c.name.as_str())
            .collect();
        if !failed.is_empty() {
            let cause = format!("final checks failed: {}", failed.join(", "));
            return Err(self
                .finish_failed(&mut history, started, "final_checklist", cause)
                .await);
        }

        let duration_ms = started.elapsed().as_millis() as u64;
        history.status = RollbackStatus::Completed;
        history.completed_at = Some(epoch_millis());
        history.duration_ms = Some(duration_ms);
        self.store(&history).await;

        self.state.update_deployment(deployment_id, |d| {
            d.status = DeploymentStatus::RolledBack;
            d.metrics.rollback_time_ms = Some(duration_ms);
            if d.strategy == Strategy::BlueGreen {
                std::mem::swap(&mut d.active_slot, &mut d.previous_slot);
            }
        })?;
        self.events.publish(Event::DeploymentRolledBack {
            deployment_id: deployment_id.to_string(),
            rollback_id: history.id.clone(),
        });
        info!(%deployment_id, rollback_id = %history.id, duration_ms, "rollback completed");
        Ok(history)
    }

    async fn run_step(&self, step: &RollbackStep, deployment: &Deployment) -> Result<String, String> {
        let env = deployment.environment.as_str();
        match step.kind {
            StepKind::VerifyPreviousVersion => match &deployment.previous_image {
                Some(_) if deployment.strategy == Strategy::BlueGreen
                    && (deployment.active_slot.is_none() || deployment.previous_slot.is_none()) =>
                {
                    Err("no previous slot recorded to switch traffic back to".to_string())
                }
                Some(image) => Ok(format!("previous version {image}")),
                None => Err("no previous version recorded".to_string()),
            },
            StepKind::ScaleDownCurrent => {
                let instance = deployment.live_instance();
                let result = self
                    .runtime
                    .scale(&instance, env, 0)
                    .await
                    .map_err(|e| e.to_string())?;
                Ok(format!(
                    "{instance} scaled from {} to 0",
                    result.previous_replicas
                ))
            }
            StepKind::RestorePrevious => self.restore_previous(deployment).await,
            StepKind::VerifyHealth => {
                let instance = deployment.previous_target().instance_name(&deployment.application);
                loop {
                    match self.runtime.check_health(&instance, env, &deployment.health_check).await {
                        Ok(true) => return Ok(format!("{instance} healthy")),
                        Ok(false) => debug!(%instance, "restored version not healthy yet"),
                        Err(e) => debug!(%instance, error = %e, "health probe failed"),
                    }
                    tokio::time::sleep(self.settings.health_poll()).await;
                }
            }
        }
    }

    async fn restore_previous(&self, deployment: &Deployment) -> Result<String, String> {
        let image = deployment
            .previous_image
            .as_deref()
            .ok_or_else(|| "no previous version recorded".to_string())?;
        let mut config = DeploymentConfig::new(
            &deployment.id,
            &deployment.application,
            &deployment.environment,
            image,
        );
        config.strategy = deployment.strategy;
        config.replicas = deployment.replicas;
        config.health_check = deployment.health_check.clone();

        let target = deployment.previous_target();
        self.runtime
            .deploy(&config, target)
            .await
            .map_err(|e| e.to_string())?;

        if let (Strategy::BlueGreen, Some(current), Some(previous)) = (
            deployment.strategy,
            deployment.active_slot,
            deployment.previous_slot,
        ) {
            self.runtime
                .switch_traffic(&config, current, previous)
                .await
                .map_err(|e| e.to_string())?;
            self.state
                .activate_slot(
                    &deployment.application,
                    &deployment.environment,
                    previous,
                    Some(image),
                )
                .map_err(|e| e.to_string())?;
        }
        Ok(format!(
            "{image} restored to {}",
            target.instance_name(&deployment.application)
        ))
    }

    async fn final_checklist(&self, deployment: &Deployment, plan: &RollbackPlan) -> Vec<ChecklistItem> {
        let env = deployment.environment.as_str();
        let instance = deployment.previous_target().instance_name(&deployment.application);

        let healthy = self
            .runtime
            .check_health(&instance, env, &deployment.health_check)
            .await
            .unwrap_or(false);
        let metrics = self.runtime.get_metrics(&instance, env).await.ok();
        let reachable = self
            .runtime
            .check_health(&instance, env, &HealthCheck::at("/"))
            .await
            .unwrap_or(false);

        let (integrity, integrity_detail) = match &metrics {
            Some(m) => (
                m.error_rate <= plan.thresholds.error_rate,
                format!("error rate {:.4} (limit {})", m.error_rate, plan.thresholds.error_rate),
            ),
            None => (false, "metrics unavailable".to_string()),
        };
        let (available, available_detail) = match &metrics {
            Some(m) => (
                m.response_time_ms <= plan.thresholds.response_time_ms,
                format!(
                    "response time {:.0}ms (limit {}ms)",
                    m.response_time_ms, plan.thresholds.response_time_ms
                ),
            ),
            None => (false, "metrics unavailable".to_string()),
        };

        vec![
            ChecklistItem {
                name: "application-health".into(),
                passed: healthy,
                detail: format!("{instance} health check"),
            },
            ChecklistItem {
                name: "data-integrity".into(),
                passed: integrity,
                detail: integrity_detail,
            },
            ChecklistItem {
                name: "service-availability".into(),
                passed: available,
                detail: available_detail,
            },
            ChecklistItem {
                name: "user-access".into(),
                passed: reachable,
                detail: format!("{instance} answers on /"),
            },
        ]
    }
}
