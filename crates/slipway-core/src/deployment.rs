//! Deployments, blue/green slots, and the config handed to a strategy.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::scan::SecurityScan;

/// Unique identifier for a deployment attempt.
pub type DeploymentId = String;

// ── Strategy ──────────────────────────────────────────────────────

/// How a new version reaches production traffic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    /// Deploy to the idle slot, verify, then switch all traffic. Default.
    #[default]
    BlueGreen,
    /// Ramp a canary through fixed traffic weights.
    Canary,
    /// Replace primary replicas batch by batch.
    Rolling,
    /// Stop everything, then start the new version.
    Recreate,
}

impl Strategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Strategy::BlueGreen => "blue-green",
            Strategy::Canary => "canary",
            Strategy::Rolling => "rolling",
            Strategy::Recreate => "recreate",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Expected request volume of an application, used for rollback planning.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrafficLevel {
    Low,
    #[default]
    Medium,
    High,
}

/// Criticality tier derived from an environment name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvironmentTier {
    Development,
    Staging,
    Production,
}

impl EnvironmentTier {
    pub fn of(environment: &str) -> Self {
        match environment.to_ascii_lowercase().as_str() {
            "production" | "prod" => EnvironmentTier::Production,
            "staging" | "stage" | "preprod" | "pre-production" => EnvironmentTier::Staging,
            _ => EnvironmentTier::Development,
        }
    }
}

pub fn is_production(environment: &str) -> bool {
    EnvironmentTier::of(environment) == EnvironmentTier::Production
}

// ── Slots ─────────────────────────────────────────────────────────

/// One of the two deployable units of a blue-green pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Slot {
    Blue,
    Green,
}

impl Slot {
    pub fn other(self) -> Self {
        match self {
            Slot::Blue => Slot::Green,
            Slot::Green => Slot::Blue,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Slot::Blue => "blue",
            Slot::Green => "green",
        }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the runtime should place a deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "slot", rename_all = "snake_case")]
pub enum DeployTarget {
    Slot(Slot),
    Canary,
    Primary,
}

impl DeployTarget {
    /// Runtime-level instance name for an application at this target.
    pub fn instance_name(self, application: &str) -> String {
        match self {
            DeployTarget::Slot(slot) => format!("{application}-{slot}"),
            DeployTarget::Canary => format!("{application}-canary"),
            DeployTarget::Primary => application.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SlotHealth {
    pub healthy: bool,
    pub error_rate: f64,
    pub response_time_ms: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SlotTraffic {
    /// Share of traffic routed to the slot (0–100).
    pub percentage: u8,
    pub request_count: u64,
}

/// Observed state of one blue-green slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotStatus {
    pub slot: Slot,
    pub is_active: bool,
    pub image: Option<String>,
    pub health: SlotHealth,
    pub traffic: SlotTraffic,
    /// Unix epoch millis of the last update.
    pub updated_at: u64,
}

impl SlotStatus {
    pub fn idle(slot: Slot) -> Self {
        Self {
            slot,
            is_active: false,
            image: None,
            health: SlotHealth::default(),
            traffic: SlotTraffic::default(),
            updated_at: 0,
        }
    }
}

// ── Deployment record ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    InProgress,
    Success,
    Failed,
    RolledBack,
}

impl DeploymentStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, DeploymentStatus::InProgress)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeploymentMetrics {
    pub deployment_time_ms: u64,
    pub health_check_time_ms: u64,
    pub rollback_time_ms: Option<u64>,
}

/// A deployment attempt, created at dispatch and terminal at outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deployment {
    pub id: DeploymentId,
    pub application: String,
    pub environment: String,
    pub strategy: Strategy,
    pub image: String,
    /// Image that was serving before this deployment, if known.
    pub previous_image: Option<String>,
    /// Blue-green: slot that received this version.
    pub active_slot: Option<Slot>,
    /// Blue-green: slot that served before the switch.
    pub previous_slot: Option<Slot>,
    pub replicas: u32,
    pub traffic: TrafficLevel,
    pub status: DeploymentStatus,
    pub metrics: DeploymentMetrics,
    pub security_scan: Option<SecurityScan>,
    /// Check the deployment was verified with; rollbacks reuse it.
    #[serde(default)]
    pub health_check: HealthCheck,
    pub created_at: u64,
    pub updated_at: u64,
}

impl Deployment {
    /// Runtime instance currently serving this deployment's version.
    pub fn live_instance(&self) -> String {
        self.live_target().instance_name(&self.application)
    }

    pub fn live_target(&self) -> DeployTarget {
        match (self.strategy, self.active_slot) {
            (Strategy::BlueGreen, Some(slot)) => DeployTarget::Slot(slot),
            _ => DeployTarget::Primary,
        }
    }

    /// Where the previous version lives (or should be restored to).
    pub fn previous_target(&self) -> DeployTarget {
        match (self.strategy, self.previous_slot) {
            (Strategy::BlueGreen, Some(slot)) => DeployTarget::Slot(slot),
            _ => DeployTarget::Primary,
        }
    }
}

// ── Strategy input ────────────────────────────────────────────────

/// Health check handed to the container runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheck {
    pub path: String,
    pub timeout_secs: u64,
}

impl Default for HealthCheck {
    fn default() -> Self {
        Self {
            path: "/health".to_string(),
            timeout_secs: 5,
        }
    }
}

impl HealthCheck {
    pub fn at(path: &str) -> Self {
        Self {
            path: path.to_string(),
            ..Self::default()
        }
    }
}

/// Everything a strategy needs to roll one version out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentConfig {
    pub deployment_id: DeploymentId,
    pub application: String,
    pub environment: String,
    pub image: String,
    pub strategy: Strategy,
    pub replicas: u32,
    pub health_check: HealthCheck,
    /// Error rate (0.0–1.0) at or above which a health sample fails.
    pub rollback_threshold: f64,
    /// Total verification window in seconds.
    pub test_duration_secs: u64,
    pub health_check_interval_secs: u64,
    pub warmup_secs: u64,
    /// Rolling: replicas replaced per batch.
    pub batch_size: u32,
}

impl DeploymentConfig {
    pub fn new(deployment_id: &str, application: &str, environment: &str, image: &str) -> Self {
        Self {
            deployment_id: deployment_id.to_string(),
            application: application.to_string(),
            environment: environment.to_string(),
            image: image.to_string(),
            strategy: Strategy::BlueGreen,
            replicas: 2,
            health_check: HealthCheck::default(),
            rollback_threshold: 0.05,
            test_duration_secs: 120,
            health_check_interval_secs: 10,
            warmup_secs: 30,
            batch_size: 1,
        }
    }

    /// Number of verification samples: `ceil(test_duration / interval)`.
    pub fn sample_count(&self) -> u32 {
        let interval = self.health_check_interval_secs.max(1);
        self.test_duration_secs.div_ceil(interval).max(1) as u32
    }
}

/// Thresholds watched by the automatic rollback monitor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollbackThresholds {
    /// Error rate (0.0–1.0).
    pub error_rate: f64,
    pub response_time_ms: f64,
    /// CPU usage percentage (0–100).
    pub cpu_percent: f64,
    /// Memory usage percentage (0–100).
    pub memory_percent: f64,
}

impl Default for RollbackThresholds {
    fn default() -> Self {
        Self {
            error_rate: 0.05,
            response_time_ms: 2000.0,
            cpu_percent: 90.0,
            memory_percent: 90.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_other() {
        assert_eq!(Slot::Blue.other(), Slot::Green);
        assert_eq!(Slot::Green.other(), Slot::Blue);
    }

    #[test]
    fn instance_names() {
        assert_eq!(DeployTarget::Slot(Slot::Blue).instance_name("billing"), "billing-blue");
        assert_eq!(DeployTarget::Canary.instance_name("billing"), "billing-canary");
        assert_eq!(DeployTarget::Primary.instance_name("billing"), "billing");
    }

    #[test]
    fn sample_count_rounds_up() {
        let mut cfg = DeploymentConfig::new("d-1", "billing", "production", "billing:v2");
        assert_eq!(cfg.sample_count(), 12);
        cfg.test_duration_secs = 125;
        assert_eq!(cfg.sample_count(), 13);
        cfg.test_duration_secs = 100;
        assert_eq!(cfg.sample_count(), 10);
    }

    #[test]
    fn environment_tiers() {
        assert_eq!(EnvironmentTier::of("production"), EnvironmentTier::Production);
        assert_eq!(EnvironmentTier::of("PROD"), EnvironmentTier::Production);
        assert_eq!(EnvironmentTier::of("staging"), EnvironmentTier::Staging);
        assert_eq!(EnvironmentTier::of("dev-42"), EnvironmentTier::Development);
    }

    #[test]
    fn strategy_serializes_kebab_case() {
        let json = serde_json::to_string(&Strategy::BlueGreen).unwrap();
        assert_eq!(json, "\"blue-green\"");
    }
}
