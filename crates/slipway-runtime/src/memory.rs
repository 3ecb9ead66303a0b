//! In-memory container runtime.
//!
//! Keeps instances, traffic routing and scripted health/metric answers in
//! a mutex-protected table. Every call is appended to a call log so
//! callers can assert on ordering and side effects.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

use slipway_core::{DeployTarget, DeploymentConfig, HealthCheck, Slot};

use crate::error::{RuntimeError, RuntimeResult};
use crate::runtime::{ContainerRuntime, RuntimeMetrics, ScalingResult};

/// A recorded runtime call.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "call", rename_all = "snake_case")]
pub enum RuntimeCall {
    Deploy {
        name: String,
        environment: String,
        image: String,
        replicas: u32,
    },
    CheckHealth {
        name: String,
        environment: String,
        path: String,
    },
    GetMetrics {
        name: String,
        environment: String,
    },
    SwitchTraffic {
        application: String,
        environment: String,
        from: Slot,
        to: Slot,
    },
    RouteCanary {
        application: String,
        environment: String,
        percentage: u8,
    },
    Scale {
        name: String,
        environment: String,
        replicas: u32,
    },
}

impl RuntimeCall {
    /// True for calls that change runtime state.
    pub fn is_mutating(&self) -> bool {
        !matches!(
            self,
            RuntimeCall::CheckHealth { .. } | RuntimeCall::GetMetrics { .. }
        )
    }
}

/// Calls that can be made to fail.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FailPoint {
    /// `deploy` of the named instance.
    Deploy(String),
    /// `scale` of the named instance.
    Scale(String),
    /// `get_metrics` of the named instance.
    Metrics(String),
    /// Every `switch_traffic` call.
    SwitchTraffic,
}

#[derive(Debug, Clone)]
struct Instance {
    image: String,
    replicas: u32,
}

#[derive(Debug, Default)]
struct Routing {
    active: Option<Slot>,
    canary_percent: u8,
}

type Key = (String, String);

#[derive(Default)]
struct Inner {
    instances: HashMap<Key, Instance>,
    routing: HashMap<Key, Routing>,
    health_overrides: HashMap<Key, bool>,
    health_scripts: HashMap<Key, VecDeque<bool>>,
    metric_overrides: HashMap<Key, RuntimeMetrics>,
    metric_scripts: HashMap<Key, VecDeque<RuntimeMetrics>>,
    failures: HashSet<FailPoint>,
    calls: Vec<RuntimeCall>,
    unhealthy_on_deploy: bool,
}

/// Thread-safe in-process [`ContainerRuntime`].
#[derive(Default)]
pub struct InMemoryRuntime {
    inner: Mutex<Inner>,
}

fn key(name: &str, environment: &str) -> Key {
    (name.to_string(), environment.to_string())
}

impl InMemoryRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A panic while holding the lock leaves plain data behind; keep going.
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Newly deployed instances report unhealthy until overridden.
    pub fn set_unhealthy_on_deploy(&self, unhealthy: bool) {
        self.lock().unhealthy_on_deploy = unhealthy;
    }

    /// Register an instance that is already running.
    pub fn seed_instance(&self, name: &str, environment: &str, image: &str, replicas: u32) {
        self.lock().instances.insert(
            key(name, environment),
            Instance {
                image: image.to_string(),
                replicas,
            },
        );
    }

    /// Mark `slot` as the one receiving traffic for `application`.
    pub fn seed_active_slot(&self, application: &str, environment: &str, slot: Slot) {
        self.lock()
            .routing
            .entry(key(application, environment))
            .or_default()
            .active = Some(slot);
    }

    /// Force the health answer for an instance.
    pub fn set_healthy(&self, name: &str, environment: &str, healthy: bool) {
        self.lock()
            .health_overrides
            .insert(key(name, environment), healthy);
    }

    /// Queue one-shot health answers consumed before any override.
    pub fn script_health(
        &self,
        name: &str,
        environment: &str,
        answers: impl IntoIterator<Item = bool>,
    ) {
        self.lock()
            .health_scripts
            .entry(key(name, environment))
            .or_default()
            .extend(answers);
    }

    /// Force the metrics answer for an instance.
    pub fn set_metrics(&self, name: &str, environment: &str, metrics: RuntimeMetrics) {
        self.lock()
            .metric_overrides
            .insert(key(name, environment), metrics);
    }

    /// Queue one-shot metrics answers consumed before any override.
    pub fn script_metrics(
        &self,
        name: &str,
        environment: &str,
        answers: impl IntoIterator<Item = RuntimeMetrics>,
    ) {
        self.lock()
            .metric_scripts
            .entry(key(name, environment))
            .or_default()
            .extend(answers);
    }

    pub fn fail(&self, point: FailPoint) {
        self.lock().failures.insert(point);
    }

    pub fn recover(&self, point: &FailPoint) {
        self.lock().failures.remove(point);
    }

    pub fn calls(&self) -> Vec<RuntimeCall> {
        self.lock().calls.clone()
    }

    pub fn mutating_calls(&self) -> Vec<RuntimeCall> {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.is_mutating())
            .cloned()
            .collect()
    }

    pub fn replicas(&self, name: &str, environment: &str) -> Option<u32> {
        self.lock()
            .instances
            .get(&key(name, environment))
            .map(|i| i.replicas)
    }

    pub fn image(&self, name: &str, environment: &str) -> Option<String> {
        self.lock()
            .instances
            .get(&key(name, environment))
            .map(|i| i.image.clone())
    }

    pub fn active_slot(&self, application: &str, environment: &str) -> Option<Slot> {
        self.lock()
            .routing
            .get(&key(application, environment))
            .and_then(|r| r.active)
    }

    pub fn canary_weight(&self, application: &str, environment: &str) -> u8 {
        self.lock()
            .routing
            .get(&key(application, environment))
            .map(|r| r.canary_percent)
            .unwrap_or(0)
    }
}

#[async_trait]
impl ContainerRuntime for InMemoryRuntime {
    async fn deploy(&self, config: &DeploymentConfig, target: DeployTarget) -> RuntimeResult<()> {
        let name = target.instance_name(&config.application);
        let mut inner = self.lock();
        inner.calls.push(RuntimeCall::Deploy {
            name: name.clone(),
            environment: config.environment.clone(),
            image: config.image.clone(),
            replicas: config.replicas,
        });
        if inner.failures.contains(&FailPoint::Deploy(name.clone())) {
            return Err(RuntimeError::Failed(format!("deploy of {name} failed")));
        }
        let k = key(&name, &config.environment);
        inner.instances.insert(
            k.clone(),
            Instance {
                image: config.image.clone(),
                replicas: config.replicas,
            },
        );
        if inner.unhealthy_on_deploy {
            inner.health_overrides.entry(k).or_insert(false);
        }
        debug!(%name, image = %config.image, "instance deployed");
        Ok(())
    }

    async fn check_health(
        &self,
        name: &str,
        environment: &str,
        check: &HealthCheck,
    ) -> RuntimeResult<bool> {
        let mut inner = self.lock();
        inner.calls.push(RuntimeCall::CheckHealth {
            name: name.to_string(),
            environment: environment.to_string(),
            path: check.path.clone(),
        });
        let k = key(name, environment);
        if let Some(answer) = inner.health_scripts.get_mut(&k).and_then(|q| q.pop_front()) {
            return Ok(answer);
        }
        if let Some(answer) = inner.health_overrides.get(&k) {
            return Ok(*answer);
        }
        Ok(inner
            .instances
            .get(&k)
            .map(|i| i.replicas > 0)
            .unwrap_or(false))
    }

    async fn get_metrics(&self, name: &str, environment: &str) -> RuntimeResult<RuntimeMetrics> {
        let mut inner = self.lock();
        inner.calls.push(RuntimeCall::GetMetrics {
            name: name.to_string(),
            environment: environment.to_string(),
        });
        if inner.failures.contains(&FailPoint::Metrics(name.to_string())) {
            return Err(RuntimeError::Unavailable(format!("metrics for {name}")));
        }
        let k = key(name, environment);
        if let Some(answer) = inner.metric_scripts.get_mut(&k).and_then(|q| q.pop_front()) {
            return Ok(answer);
        }
        if let Some(answer) = inner.metric_overrides.get(&k) {
            return Ok(answer.clone());
        }
        if inner.instances.contains_key(&k) {
            return Ok(RuntimeMetrics::healthy());
        }
        Err(RuntimeError::NotFound(format!("{name} in {environment}")))
    }

    async fn switch_traffic(
        &self,
        config: &DeploymentConfig,
        from: Slot,
        to: Slot,
    ) -> RuntimeResult<()> {
        let mut inner = self.lock();
        inner.calls.push(RuntimeCall::SwitchTraffic {
            application: config.application.clone(),
            environment: config.environment.clone(),
            from,
            to,
        });
        if inner.failures.contains(&FailPoint::SwitchTraffic) {
            return Err(RuntimeError::Failed("traffic switch rejected".into()));
        }
        inner
            .routing
            .entry(key(&config.application, &config.environment))
            .or_default()
            .active = Some(to);
        debug!(application = %config.application, %from, %to, "traffic switched");
        Ok(())
    }

    async fn route_canary(&self, config: &DeploymentConfig, percentage: u8) -> RuntimeResult<()> {
        let mut inner = self.lock();
        inner.calls.push(RuntimeCall::RouteCanary {
            application: config.application.clone(),
            environment: config.environment.clone(),
            percentage,
        });
        inner
            .routing
            .entry(key(&config.application, &config.environment))
            .or_default()
            .canary_percent = percentage.min(100);
        Ok(())
    }

    async fn scale(
        &self,
        name: &str,
        environment: &str,
        replicas: u32,
    ) -> RuntimeResult<ScalingResult> {
        let mut inner = self.lock();
        inner.calls.push(RuntimeCall::Scale {
            name: name.to_string(),
            environment: environment.to_string(),
            replicas,
        });
        if inner.failures.contains(&FailPoint::Scale(name.to_string())) {
            return Err(RuntimeError::Failed(format!("scale of {name} failed")));
        }
        let instance = inner
            .instances
            .get_mut(&key(name, environment))
            .ok_or_else(|| RuntimeError::NotFound(format!("{name} in {environment}")))?;
        let previous_replicas = instance.replicas;
        instance.replicas = replicas;
        debug!(%name, from = previous_replicas, to = replicas, "instance scaled");
        Ok(ScalingResult {
            name: name.to_string(),
            environment: environment.to_string(),
            previous_replicas,
            replicas,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> DeploymentConfig {
        DeploymentConfig::new("d-1", "billing", "production", "billing:v2")
    }

    #[tokio::test]
    async fn deploy_makes_instance_healthy() {
        let rt = InMemoryRuntime::new();
        let check = HealthCheck::default();
        assert!(!rt.check_health("billing-blue", "production", &check).await.unwrap());

        rt.deploy(&config(), DeployTarget::Slot(Slot::Blue)).await.unwrap();
        assert!(rt.check_health("billing-blue", "production", &check).await.unwrap());
        assert_eq!(rt.image("billing-blue", "production").as_deref(), Some("billing:v2"));
    }

    #[tokio::test]
    async fn scripts_take_precedence_then_fall_back() {
        let rt = InMemoryRuntime::new();
        rt.seed_instance("billing", "production", "billing:v1", 2);
        rt.script_health("billing", "production", [false, false]);
        let check = HealthCheck::default();

        assert!(!rt.check_health("billing", "production", &check).await.unwrap());
        assert!(!rt.check_health("billing", "production", &check).await.unwrap());
        assert!(rt.check_health("billing", "production", &check).await.unwrap());
    }

    #[tokio::test]
    async fn metrics_for_unknown_instance_fail() {
        let rt = InMemoryRuntime::new();
        let err = rt.get_metrics("ghost", "production").await.unwrap_err();
        assert!(matches!(err, RuntimeError::NotFound(_)));
    }

    #[tokio::test]
    async fn fail_points_fail_calls() {
        let rt = InMemoryRuntime::new();
        rt.fail(FailPoint::Deploy("billing-green".into()));
        let err = rt
            .deploy(&config(), DeployTarget::Slot(Slot::Green))
            .await
            .unwrap_err();
        assert!(matches!(err, RuntimeError::Failed(_)));

        rt.recover(&FailPoint::Deploy("billing-green".into()));
        rt.deploy(&config(), DeployTarget::Slot(Slot::Green)).await.unwrap();
    }

    #[tokio::test]
    async fn scale_reports_previous_count() {
        let rt = InMemoryRuntime::new();
        rt.seed_instance("billing", "staging", "billing:v1", 3);
        let result = rt.scale("billing", "staging", 0).await.unwrap();
        assert_eq!(result.previous_replicas, 3);
        assert_eq!(rt.replicas("billing", "staging"), Some(0));
        assert_eq!(rt.mutating_calls().len(), 1);
    }

    #[tokio::test]
    async fn switch_traffic_moves_active_slot() {
        let rt = InMemoryRuntime::new();
        rt.switch_traffic(&config(), Slot::Blue, Slot::Green).await.unwrap();
        assert_eq!(rt.active_slot("billing", "production"), Some(Slot::Green));
    }
}
