//! Alert rules, alerts, and the cooldown book.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use slipway_core::event::Severity;

use crate::snapshot::MetricSnapshot;

/// Snapshot field a rule watches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertCondition {
    ErrorRate,
    ResponseTimeP95,
    CpuUsage,
    MemoryUsage,
    HealthScore,
}

impl AlertCondition {
    pub fn value(self, snapshot: &MetricSnapshot) -> f64 {
        match self {
            AlertCondition::ErrorRate => snapshot.error_rate,
            AlertCondition::ResponseTimeP95 => snapshot.latency_p95_ms,
            AlertCondition::CpuUsage => snapshot.cpu_percent,
            AlertCondition::MemoryUsage => snapshot.memory_percent,
            AlertCondition::HealthScore => snapshot.health_score,
        }
    }

    /// Health score breaches when it drops below the threshold; every
    /// other condition when it rises above.
    pub fn breached(self, value: f64, threshold: f64) -> bool {
        match self {
            AlertCondition::HealthScore => value < threshold,
            _ => value > threshold,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AlertCondition::ErrorRate => "error_rate",
            AlertCondition::ResponseTimeP95 => "response_time_p95",
            AlertCondition::CpuUsage => "cpu_usage",
            AlertCondition::MemoryUsage => "memory_usage",
            AlertCondition::HealthScore => "health_score",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AlertAction {
    Webhook { url: String },
    Email { to: String },
    Slack { channel: String },
    /// Publishes `RollbackRequested`.
    Rollback,
    /// Publishes `ScaleRequested`.
    Scale { replicas: u32 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRule {
    pub id: String,
    pub name: String,
    pub condition: AlertCondition,
    pub threshold: f64,
    pub severity: Severity,
    pub cooldown_secs: u64,
    #[serde(default)]
    pub actions: Vec<AlertAction>,
    #[serde(default = "enabled_default")]
    pub enabled: bool,
}

fn enabled_default() -> bool {
    true
}

impl AlertRule {
    pub fn new(
        id: &str,
        name: &str,
        condition: AlertCondition,
        threshold: f64,
        severity: Severity,
    ) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            condition,
            threshold,
            severity,
            cooldown_secs: 300,
            actions: Vec::new(),
            enabled: true,
        }
    }

    pub fn with_cooldown(mut self, secs: u64) -> Self {
        self.cooldown_secs = secs;
        self
    }

    pub fn with_action(mut self, action: AlertAction) -> Self {
        self.actions.push(action);
        self
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}

/// A rule firing outside its cooldown window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub deployment_id: String,
    pub rule_id: String,
    pub rule_name: String,
    pub condition: AlertCondition,
    pub severity: Severity,
    pub value: f64,
    pub threshold: f64,
    pub message: String,
    /// Unix epoch millis.
    pub triggered_at: u64,
}

/// Stock rules installed for every monitored deployment.
///
/// "Warning" rules carry [`Severity::Medium`].
pub fn default_rules() -> Vec<AlertRule> {
    vec![
        AlertRule::new(
            "high-error-rate",
            "High error rate",
            AlertCondition::ErrorRate,
            0.05,
            Severity::Critical,
        )
        .with_action(AlertAction::Rollback),
        AlertRule::new(
            "slow-responses",
            "Slow p95 response time",
            AlertCondition::ResponseTimeP95,
            1000.0,
            Severity::Medium,
        ),
        AlertRule::new(
            "high-cpu",
            "High CPU usage",
            AlertCondition::CpuUsage,
            80.0,
            Severity::Medium,
        ),
        AlertRule::new(
            "high-memory",
            "High memory usage",
            AlertCondition::MemoryUsage,
            85.0,
            Severity::Medium,
        ),
        AlertRule::new(
            "low-health-score",
            "Low health score",
            AlertCondition::HealthScore,
            70.0,
            Severity::Critical,
        ),
    ]
}

/// Per-deployment rules, last-fired instants, and alert history.
#[derive(Default)]
pub(crate) struct AlertBook {
    rules: HashMap<String, Vec<AlertRule>>,
    /// (deployment_id, rule_id) → last firing.
    last_fired: HashMap<(String, String), Instant>,
    history: Vec<Alert>,
    history_limit: usize,
}

impl AlertBook {
    pub(crate) fn new(history_limit: usize) -> Self {
        Self {
            history_limit: history_limit.max(1),
            ..Self::default()
        }
    }

    pub(crate) fn set_rules(&mut self, deployment_id: &str, rules: Vec<AlertRule>) {
        self.rules.insert(deployment_id.to_string(), rules);
    }

    pub(crate) fn rules(&self, deployment_id: &str) -> Vec<AlertRule> {
        self.rules.get(deployment_id).cloned().unwrap_or_default()
    }

    pub(crate) fn has_rules(&self, deployment_id: &str) -> bool {
        self.rules.contains_key(deployment_id)
    }

    /// Evaluate every enabled rule; returns the alerts that fired, paired
    /// with their rule. Suppressed breaches leave no trace.
    pub(crate) fn evaluate(
        &mut self,
        deployment_id: &str,
        snapshot: &MetricSnapshot,
        now: Instant,
    ) -> Vec<(AlertRule, Alert)> {
        let rules = self.rules(deployment_id);
        let mut fired = Vec::new();

        for rule in rules.into_iter().filter(|r| r.enabled) {
            let value = rule.condition.value(snapshot);
            if !rule.condition.breached(value, rule.threshold) {
                continue;
            }
            let key = (deployment_id.to_string(), rule.id.clone());
            if let Some(last) = self.last_fired.get(&key) {
                if now.duration_since(*last) < rule.cooldown() {
                    continue;
                }
            }
            self.last_fired.insert(key, now);

            let alert = Alert {
                id: uuid::Uuid::new_v4().to_string(),
                deployment_id: deployment_id.to_string(),
                rule_id: rule.id.clone(),
                rule_name: rule.name.clone(),
                condition: rule.condition,
                severity: rule.severity,
                value,
                threshold: rule.threshold,
                message: format!(
                    "{}: {} = {value:.4} (threshold {})",
                    rule.name,
                    rule.condition.as_str(),
                    rule.threshold
                ),
                triggered_at: snapshot.timestamp,
            };
            self.history.push(alert.clone());
            if self.history.len() > self.history_limit {
                let excess = self.history.len() - self.history_limit;
                self.history.drain(..excess);
            }
            fired.push((rule, alert));
        }
        fired
    }

    pub(crate) fn history(&self, deployment_id: &str) -> Vec<Alert> {
        self.history
            .iter()
            .filter(|a| a.deployment_id == deployment_id)
            .cloned()
            .collect()
    }

    pub(crate) fn forget(&mut self, deployment_id: &str) {
        self.rules.remove(deployment_id);
        self.last_fired.retain(|(id, _), _| id != deployment_id);
    }
}
