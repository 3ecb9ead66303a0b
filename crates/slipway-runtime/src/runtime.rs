//! The container runtime capability.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use slipway_core::{DeployTarget, DeploymentConfig, HealthCheck, Slot};

use crate::error::RuntimeResult;

/// Live metrics reported by the runtime for one instance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuntimeMetrics {
    /// CPU usage percentage (0–100).
    pub cpu_percent: f64,
    /// Memory usage percentage (0–100).
    pub memory_percent: f64,
    /// Error rate (0.0–1.0).
    pub error_rate: f64,
    /// Mean response time in milliseconds.
    pub response_time_ms: f64,
    pub response_time_p50_ms: f64,
    pub response_time_p95_ms: f64,
    pub response_time_p99_ms: f64,
    /// Requests per second.
    pub throughput_rps: f64,
    pub request_count: u64,
    pub error_count: u64,
    /// Fraction of successful availability probes (0.0–1.0).
    pub availability: f64,
}

impl RuntimeMetrics {
    /// A comfortably healthy baseline.
    pub fn healthy() -> Self {
        Self {
            cpu_percent: 35.0,
            memory_percent: 45.0,
            error_rate: 0.001,
            response_time_ms: 120.0,
            response_time_p50_ms: 100.0,
            response_time_p95_ms: 180.0,
            response_time_p99_ms: 250.0,
            throughput_rps: 150.0,
            request_count: 4500,
            error_count: 4,
            availability: 0.999,
        }
    }

    /// Baseline with a different error rate.
    pub fn with_error_rate(error_rate: f64) -> Self {
        let base = Self::healthy();
        Self {
            error_rate,
            error_count: (base.request_count as f64 * error_rate).round() as u64,
            ..base
        }
    }
}

/// Outcome of a scale request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScalingResult {
    pub name: String,
    pub environment: String,
    pub previous_replicas: u32,
    pub replicas: u32,
}

/// Abstract container orchestrator the core drives.
///
/// Instance names are derived with [`DeployTarget::instance_name`].
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Start `config.image` at `target`.
    async fn deploy(&self, config: &DeploymentConfig, target: DeployTarget) -> RuntimeResult<()>;

    async fn check_health(
        &self,
        name: &str,
        environment: &str,
        check: &HealthCheck,
    ) -> RuntimeResult<bool>;

    async fn get_metrics(&self, name: &str, environment: &str) -> RuntimeResult<RuntimeMetrics>;

    /// Move all traffic of `config.application` from one slot to the other.
    async fn switch_traffic(&self, config: &DeploymentConfig, from: Slot, to: Slot)
        -> RuntimeResult<()>;

    /// Route `percentage` of traffic to the canary instance.
    async fn route_canary(&self, config: &DeploymentConfig, percentage: u8) -> RuntimeResult<()>;

    async fn scale(&self, name: &str, environment: &str, replicas: u32)
        -> RuntimeResult<ScalingResult>;
}
